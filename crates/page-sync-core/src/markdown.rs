//! Frontmatter and heading extraction for markdown documents.

use serde_yaml::{Mapping, Value};

/// A markdown document split at its frontmatter fence.
#[derive(Debug, Clone)]
pub struct ParsedMarkdown {
    /// YAML mapping from the leading `---` block, if present and valid
    pub frontmatter: Option<Mapping>,
    pub body: String,
}

impl ParsedMarkdown {
    /// Non-empty string value of a frontmatter key.
    pub fn frontmatter_str(&self, key: &str) -> Option<&str> {
        self.frontmatter
            .as_ref()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Text of the first level-one ATX heading (`# Title`) outside code fences.
    pub fn first_heading(&self) -> Option<&str> {
        let mut in_fence = false;
        self.body.lines().map(str::trim_start).find_map(|line| {
            if line.starts_with("```") || line.starts_with("~~~") {
                in_fence = !in_fence;
                return None;
            }
            if in_fence {
                return None;
            }
            let title = line.strip_prefix("# ")?.trim().trim_end_matches('#').trim();
            (!title.is_empty()).then_some(title)
        })
    }
}

/// Split `content` into the YAML between the fences and the text after.
///
/// Both fences must be lines consisting of `---` alone.
fn split_fences(content: &str) -> Option<(&str, &str)> {
    let first_break = content.find('\n')?;
    if content[..first_break].trim_end() != "---" {
        return None;
    }
    let rest = &content[first_break + 1..];

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Split a document into frontmatter and body.
///
/// Unterminated or invalid frontmatter leaves the whole document as body.
pub fn parse(content: &str) -> ParsedMarkdown {
    let whole = || ParsedMarkdown {
        frontmatter: None,
        body: content.to_string(),
    };
    let Some((yaml, body)) = split_fences(content) else {
        return whole();
    };

    let frontmatter = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(map)) if !map.is_empty() => Some(map),
        Ok(Value::Null) | Ok(Value::Mapping(_)) => None,
        // Not frontmatter after all, e.g. a horizontal rule pair
        Ok(_) | Err(_) => return whole(),
    };
    ParsedMarkdown {
        frontmatter,
        body: body.trim_start_matches(['\r', '\n']).to_string(),
    }
}
