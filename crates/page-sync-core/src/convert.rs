//! Markdown to page markup conversion.
//!
//! `ContentConverter` is the seam the synchronizers use; `MarkdownConverter`
//! is a line-oriented converter producing storage-format XHTML. It covers
//! headings, paragraphs, flat lists, block quotes, rules, fenced code and the
//! common inline spans. Mermaid blocks become code macros, or image macros
//! once their attachments exist (`to_markup_for_page`).

use thiserror::Error;

use crate::diagram::{DiagramAttachment, is_fence};
use crate::markdown;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Document {0} has no content")]
    Empty(String),

    #[error("No attachment for diagram #{index}")]
    MissingAttachment { index: usize },
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Result of parsing a local document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub title: String,
    /// Markdown body without frontmatter
    pub raw: String,
}

pub trait ContentConverter: Send + Sync {
    /// Split a document into display title and raw body.
    fn parse(&self, path: &str, content: &str) -> Result<ParsedDocument>;

    /// Convert a raw body to page markup.
    fn to_markup(&self, raw: &str) -> Result<String>;

    /// Convert with knowledge of the remote page, embedding attached diagrams.
    ///
    /// `attachments[i]` belongs to the i-th diagram block of `raw`.
    fn to_markup_for_page(
        &self,
        raw: &str,
        page_id: &str,
        attachments: &[DiagramAttachment],
    ) -> Result<String>;
}

/// Title from a file stem: `getting_started` -> `Getting Started`.
pub fn humanize(stem: &str) -> String {
    stem.split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

#[derive(Debug, Default, Clone)]
pub struct MarkdownConverter;

impl MarkdownConverter {
    pub fn new() -> Self {
        Self
    }

    fn render(
        &self,
        raw: &str,
        diagrams: Option<(&str, &[DiagramAttachment])>,
    ) -> Result<String> {
        let mut out = Renderer::default();
        let mut fence: Option<(String, Vec<&str>)> = None;
        let mut diagram_index = 0;

        for line in raw.lines() {
            if let Some((lang, lines)) = fence.as_mut() {
                if is_fence(line).is_some_and(str::is_empty) {
                    if lang.eq_ignore_ascii_case("mermaid") {
                        match diagrams {
                            Some((page_id, attachments)) => {
                                let attachment = attachments.get(diagram_index).ok_or(
                                    ConvertError::MissingAttachment {
                                        index: diagram_index,
                                    },
                                )?;
                                out.image(page_id, &attachment.file_name);
                            }
                            None => out.code(lang, lines),
                        }
                        diagram_index += 1;
                    } else {
                        out.code(lang, lines);
                    }
                    fence = None;
                } else {
                    lines.push(line);
                }
                continue;
            }

            if let Some(info) = is_fence(line) {
                out.close_blocks();
                let lang = info.split_whitespace().next().unwrap_or("").to_string();
                fence = Some((lang, Vec::new()));
                continue;
            }

            out.line(line);
        }

        // Unterminated fence: emit what we have
        if let Some((lang, lines)) = fence {
            out.code(&lang, &lines);
        }

        Ok(out.finish())
    }
}

impl ContentConverter for MarkdownConverter {
    fn parse(&self, path: &str, content: &str) -> Result<ParsedDocument> {
        let parsed = markdown::parse(content);
        let title = parsed
            .frontmatter_str("title")
            .or_else(|| parsed.first_heading())
            .map(str::to_string)
            .unwrap_or_else(|| humanize(file_stem(path)));

        if title.is_empty() {
            return Err(ConvertError::Empty(path.to_string()));
        }

        Ok(ParsedDocument {
            title,
            raw: parsed.body,
        })
    }

    fn to_markup(&self, raw: &str) -> Result<String> {
        self.render(raw, None)
    }

    fn to_markup_for_page(
        &self,
        raw: &str,
        page_id: &str,
        attachments: &[DiagramAttachment],
    ) -> Result<String> {
        self.render(raw, Some((page_id, attachments)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

/// Accumulates block-level output.
#[derive(Default)]
struct Renderer {
    out: String,
    paragraph: Vec<String>,
    list: Option<ListKind>,
    quote: Vec<String>,
}

impl Renderer {
    fn line(&mut self, line: &str) {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            self.close_blocks();
            return;
        }

        if let Some((level, text)) = heading(trimmed) {
            self.close_blocks();
            self.out
                .push_str(&format!("<h{level}>{}</h{level}>", render_inline(text)));
            return;
        }

        if is_rule(trimmed) {
            self.close_blocks();
            self.out.push_str("<hr />");
            return;
        }

        if let Some(text) = trimmed.strip_prefix('>') {
            self.close_paragraph();
            self.close_list();
            self.quote.push(text.trim().to_string());
            return;
        }

        if let Some((kind, text)) = list_item(trimmed) {
            self.close_paragraph();
            self.close_quote();
            if self.list != Some(kind) {
                self.close_list();
                self.out.push_str(match kind {
                    ListKind::Unordered => "<ul>",
                    ListKind::Ordered => "<ol>",
                });
                self.list = Some(kind);
            }
            self.out
                .push_str(&format!("<li>{}</li>", render_inline(text)));
            return;
        }

        self.close_list();
        self.close_quote();
        self.paragraph.push(trimmed.to_string());
    }

    fn code(&mut self, lang: &str, lines: &[&str]) {
        self.close_blocks();
        self.out.push_str("<ac:structured-macro ac:name=\"code\">");
        if !lang.is_empty() {
            self.out.push_str(&format!(
                "<ac:parameter ac:name=\"language\">{}</ac:parameter>",
                escape(lang)
            ));
        }
        let body = lines.join("\n").replace("]]>", "]]]]><![CDATA[>");
        self.out.push_str(&format!(
            "<ac:plain-text-body><![CDATA[{}]]></ac:plain-text-body></ac:structured-macro>",
            body
        ));
    }

    fn image(&mut self, page_id: &str, file_name: &str) {
        self.close_blocks();
        self.out.push_str(&format!(
            "<ac:image><ri:attachment ri:filename=\"{}\"><ri:content-entity ri:content-id=\"{}\" /></ri:attachment></ac:image>",
            escape(file_name),
            escape(page_id)
        ));
    }

    fn close_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            let text = self.paragraph.join(" ");
            self.out.push_str(&format!("<p>{}</p>", render_inline(&text)));
            self.paragraph.clear();
        }
    }

    fn close_list(&mut self) {
        match self.list.take() {
            Some(ListKind::Unordered) => self.out.push_str("</ul>"),
            Some(ListKind::Ordered) => self.out.push_str("</ol>"),
            None => {}
        }
    }

    fn close_quote(&mut self) {
        if !self.quote.is_empty() {
            let text = self.quote.join(" ");
            self.out
                .push_str(&format!("<blockquote><p>{}</p></blockquote>", render_inline(&text)));
            self.quote.clear();
        }
    }

    fn close_blocks(&mut self) {
        self.close_paragraph();
        self.close_list();
        self.close_quote();
    }

    fn finish(mut self) -> String {
        self.close_blocks();
        self.out
    }
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim()))
}

fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && (compact.chars().all(|c| c == '-')
            || compact.chars().all(|c| c == '*')
            || compact.chars().all(|c| c == '_'))
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    for marker in ["- ", "* ", "+ "] {
        if let Some(text) = line.strip_prefix(marker) {
            return Some((ListKind::Unordered, text));
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(text) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some((ListKind::Ordered, text));
        }
    }
    None
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

/// Inline spans: `code`, **strong**, *em* / _em_, [text](url).
fn render_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut prev: Option<char> = None;

    while let Some(c) = rest.chars().next() {
        match c {
            '`' => {
                if let Some(end) = rest[1..].find('`') {
                    out.push_str("<code>");
                    out.push_str(&escape(&rest[1..1 + end]));
                    out.push_str("</code>");
                    rest = &rest[end + 2..];
                    prev = Some('`');
                    continue;
                }
            }
            '*' | '_' if !(c == '_' && prev.is_some_and(char::is_alphanumeric)) => {
                let marker_len = if rest[1..].starts_with(c) { 2 } else { 1 };
                let marker = &rest[..marker_len];
                if let Some(end) = rest[marker_len..].find(marker) {
                    if end > 0 {
                        let tag = if marker_len == 2 { "strong" } else { "em" };
                        let inner = &rest[marker_len..marker_len + end];
                        out.push_str(&format!("<{tag}>{}</{tag}>", render_inline(inner)));
                        rest = &rest[marker_len + end + marker_len..];
                        prev = Some(c);
                        continue;
                    }
                }
            }
            '[' => {
                if let Some(close) = rest.find("](") {
                    if let Some(paren) = rest[close + 2..].find(')') {
                        let label = &rest[1..close];
                        let href = &rest[close + 2..close + 2 + paren];
                        out.push_str(&format!(
                            "<a href=\"{}\">{}</a>",
                            escape(href.trim()),
                            render_inline(label)
                        ));
                        rest = &rest[close + 2 + paren + 1..];
                        prev = Some(')');
                        continue;
                    }
                }
            }
            _ => {}
        }

        push_escaped(&mut out, c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}
