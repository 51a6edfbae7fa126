//! Confluence REST client: `PageClient` over the v1 content API.

use anyhow::Context;
use async_trait::async_trait;
use page_sync_core::remote::{Attachment, Page, PageClient, RemoteError, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

const EXPAND: &str = "version,space,ancestors";
/// Child listings are requested in one page of up to this many results
const CHILD_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SpaceRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct VersionRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct Content {
    id: String,
    title: String,
    #[serde(default)]
    space: Option<SpaceRef>,
    #[serde(default)]
    version: Option<VersionRef>,
    #[serde(default)]
    ancestors: Vec<IdRef>,
}

impl Content {
    fn into_page(self, fallback_space: &str) -> Page {
        Page {
            parent_id: self.ancestors.last().map(|a| a.id.clone()),
            space_key: self
                .space
                .map(|s| s.key)
                .unwrap_or_else(|| fallback_space.to_string()),
            version: self.version.map(|v| v.number).unwrap_or(1),
            id: self.id,
            title: self.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Results<T> {
    results: Vec<T>,
}

/// Map a failed response to the engine's error kinds.
///
/// `subject` names the page or title the request was about.
pub fn classify_failure(status: StatusCode, body: &str, subject: &str) -> RemoteError {
    let message = body.trim().to_string();
    let lower = message.to_lowercase();
    match status.as_u16() {
        404 => RemoteError::NotFound(subject.to_string()),
        403 => RemoteError::Forbidden {
            page_id: subject.to_string(),
            message,
        },
        400 | 409 if lower.contains("already exists") => RemoteError::TitleConflict {
            title: subject.to_string(),
        },
        // Archived pages reject edits with a plain 400
        400 if lower.contains("archived") => RemoteError::Forbidden {
            page_id: subject.to_string(),
            message,
        },
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

fn storage_body(content: &str) -> serde_json::Value {
    json!({ "storage": { "value": content, "representation": "storage" } })
}

pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    token: String,
}

impl ConfluenceClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            username: config.username.clone(),
            token: config.api_token().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.token))
    }

    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Request about {} failed with {}: {}", subject, status, body);
        Err(classify_failure(status, &body, subject))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| RemoteError::Transport(format!("Invalid response body: {}", e)))
    }

    async fn create(
        &self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Page> {
        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": space },
            "body": storage_body(content),
        });
        if let Some(parent) = parent_id {
            payload["ancestors"] = json!([{ "id": parent }]);
        }

        let request = self
            .http
            .post(self.url("content"))
            .query(&[("expand", EXPAND)])
            .json(&payload);
        let created: Content = Self::json(self.send(request, title).await?).await?;
        Ok(created.into_page(space))
    }
}

#[async_trait]
impl PageClient for ConfluenceClient {
    async fn create_page(&self, space: &str, title: &str, content: &str) -> Result<Page> {
        self.create(space, title, content, None).await
    }

    async fn create_page_with_parent(
        &self,
        space: &str,
        title: &str,
        content: &str,
        parent_id: &str,
    ) -> Result<Page> {
        self.create(space, title, content, Some(parent_id)).await
    }

    async fn update_page(&self, page_id: &str, title: &str, content: &str) -> Result<Page> {
        let current = self.get_page(page_id).await?;
        let payload = json!({
            "id": page_id,
            "type": "page",
            "title": title,
            "space": { "key": current.space_key },
            "version": { "number": current.version + 1 },
            "body": storage_body(content),
        });

        let request = self
            .http
            .put(self.url(&format!("content/{}", page_id)))
            .query(&[("expand", EXPAND)])
            .json(&payload);
        let updated: Content = Self::json(self.send(request, page_id).await?).await?;
        Ok(updated.into_page(&current.space_key))
    }

    async fn find_page_by_title(&self, space: &str, title: &str) -> Result<Option<Page>> {
        let request = self.http.get(self.url("content")).query(&[
            ("spaceKey", space),
            ("title", title),
            ("type", "page"),
            ("expand", EXPAND),
        ]);
        let found: Results<Content> = Self::json(self.send(request, title).await?).await?;
        Ok(found
            .results
            .into_iter()
            .next()
            .map(|content| content.into_page(space)))
    }

    async fn get_page(&self, page_id: &str) -> Result<Page> {
        let request = self
            .http
            .get(self.url(&format!("content/{}", page_id)))
            .query(&[("expand", EXPAND)]);
        let content: Content = Self::json(self.send(request, page_id).await?).await?;
        Ok(content.into_page(""))
    }

    async fn get_child_pages(&self, page_id: &str) -> Result<Vec<Page>> {
        let limit = CHILD_LIMIT.to_string();
        let request = self
            .http
            .get(self.url(&format!("content/{}/child/page", page_id)))
            .query(&[("expand", EXPAND), ("limit", limit.as_str())]);
        let children: Results<Content> = Self::json(self.send(request, page_id).await?).await?;
        Ok(children
            .results
            .into_iter()
            .map(|content| content.into_page(""))
            .collect())
    }

    async fn upload_attachment(&self, page_id: &str, file_path: &Path) -> Result<Attachment> {
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {}", file_path.display(), e)))?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("image/png")
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        // PUT creates the attachment or adds a new version of it
        let request = self
            .http
            .put(self.url(&format!("content/{}/child/attachment", page_id)))
            .header("X-Atlassian-Token", "no-check")
            .multipart(form);
        let uploaded: Results<Content> = Self::json(self.send(request, page_id).await?).await?;

        let id = uploaded
            .results
            .into_iter()
            .next()
            .map(|content| content.id)
            .ok_or_else(|| RemoteError::Api {
                status: 200,
                message: format!("Upload of {} returned no attachment", file_name),
            })?;
        Ok(Attachment {
            id,
            page_id: page_id.to_string(),
            file_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_is_distinguished() {
        let err = classify_failure(StatusCode::FORBIDDEN, "not permitted", "42");
        assert!(err.is_forbidden());

        let err = classify_failure(StatusCode::BAD_REQUEST, "Cannot edit an archived page", "42");
        assert!(err.is_forbidden());
    }

    #[test]
    fn test_title_conflict() {
        let body = r#"{"message":"A page with this title already exists"}"#;
        let err = classify_failure(StatusCode::BAD_REQUEST, body, "Guide");
        assert!(matches!(err, RemoteError::TitleConflict { title } if title == "Guide"));
    }

    #[test]
    fn test_other_statuses() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, "", "7"),
            RemoteError::NotFound(id) if id == "7"
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom", "7"),
            RemoteError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_content_into_page() {
        let content: Content = serde_json::from_str(
            r#"{"id":"9","title":"Guide","space":{"key":"DOC"},"version":{"number":4},
                "ancestors":[{"id":"1"},{"id":"5"}]}"#,
        )
        .unwrap();
        let page = content.into_page("X");
        assert_eq!(page.parent_id.as_deref(), Some("5"));
        assert_eq!(page.space_key, "DOC");
        assert_eq!(page.version, 4);
    }
}
