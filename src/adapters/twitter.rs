//! X (Twitter) API publisher.
//!
//! Posts through the v2 `POST /2/tweets` endpoint. Images go through the
//! v1.1 media upload endpoint first and are attached by media id.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::config::TwitterCredentials;
use crate::domain::{PublishRequest, PublishedPost};

use super::oauth1::Signer;
use super::Publisher;

const API_BASE: &str = "https://api.twitter.com";
const UPLOAD_BASE: &str = "https://upload.twitter.com";

/// X API client
pub struct TwitterPublisher {
    signer: Signer,
    api_base: String,
    upload_base: String,
    client: reqwest::Client,
}

/// Response from `POST /2/tweets`
#[derive(Debug, Deserialize)]
struct CreateTweetResponse {
    data: Option<TweetData>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

/// Response from the media upload endpoint
#[derive(Debug, Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
}

impl TwitterPublisher {
    pub fn new(credentials: TwitterCredentials) -> Self {
        Self::with_base_urls(credentials, API_BASE, UPLOAD_BASE)
    }

    /// Point the client at other hosts (used by tests)
    pub fn with_base_urls(credentials: TwitterCredentials, api_base: &str, upload_base: &str) -> Self {
        Self {
            signer: Signer::new(credentials),
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Upload an image and return its media id
    pub async fn upload_media(&self, media_path: &Path) -> Result<String> {
        let url = format!("{}/1.1/media/upload.json", self.upload_base);

        let file_name = media_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let bytes = tokio::fs::read(media_path)
            .await
            .with_context(|| format!("Failed to read media file: {}", media_path.display()))?;

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(media_path))?;
        let form = Form::new().part("media", part);

        let auth = self.signer.authorization("POST", &url, &[])?;
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .multipart(form)
            .send()
            .await
            .context("Failed to upload media")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Media upload failed ({}): {}", status, body);
        }

        let uploaded: MediaUploadResponse = response
            .json()
            .await
            .context("Failed to parse media upload response")?;

        info!(media_id = %uploaded.media_id_string, path = %media_path.display(), "Media uploaded");
        Ok(uploaded.media_id_string)
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn name(&self) -> &str {
        "x"
    }

    #[instrument(skip_all, fields(reply_to = ?request.reply_to))]
    async fn publish(&self, request: PublishRequest) -> Result<PublishedPost> {
        let mut payload = serde_json::json!({ "text": request.text });

        if let Some(ref media_path) = request.media_path {
            let media_id = self.upload_media(media_path).await?;
            payload["media"] = serde_json::json!({ "media_ids": [media_id] });
        }

        if let Some(ref parent) = request.reply_to {
            payload["reply"] = serde_json::json!({ "in_reply_to_tweet_id": parent });
        }

        let url = format!("{}/2/tweets", self.api_base);
        let auth = self.signer.authorization("POST", &url, &[])?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, auth)
            .json(&payload)
            .send()
            .await
            .context("Failed to send post")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read X API response")?;
        let parsed: CreateTweetResponse = serde_json::from_str(&body)
            .with_context(|| format!("Unexpected X API response ({}): {}", status, body))?;

        match parsed.data {
            Some(data) if status.is_success() => {
                info!(id = %data.id, "Post published");
                Ok(PublishedPost {
                    id: data.id,
                    text: data.text,
                })
            }
            _ => {
                let detail = parsed
                    .detail
                    .or(parsed.title)
                    .or_else(|| {
                        parsed
                            .errors
                            .into_iter()
                            .find_map(|e| e.detail.or(e.message))
                    })
                    .unwrap_or(body);
                anyhow::bail!("X API error ({}): {}", status, detail)
            }
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> TwitterCredentials {
        TwitterCredentials {
            api_key: "ck".to_string(),
            api_secret: "cs".to_string(),
            access_token: "at".to_string(),
            access_secret: "as".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header_exists("authorization"))
            .and(body_partial_json(serde_json::json!({
                "text": "shipped it",
                "reply": {"in_reply_to_tweet_id": "100"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {"id": "101", "text": "shipped it"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = TwitterPublisher::with_base_urls(credentials(), &server.uri(), &server.uri());
        let posted = publisher
            .publish(PublishRequest {
                text: "shipped it".to_string(),
                reply_to: Some("100".to_string()),
                media_path: None,
            })
            .await
            .unwrap();

        assert_eq!(posted.id, "101");
        assert_eq!(posted.text, "shipped it");
    }

    #[tokio::test]
    async fn test_publish_with_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1.1/media/upload.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "media_id": 555,
                "media_id_string": "555"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(body_partial_json(serde_json::json!({
                "media": {"media_ids": ["555"]}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": {"id": "7", "text": "look"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let image = temp.path().join("shot.png");
        std::fs::write(&image, b"\x89PNG fake").unwrap();

        let publisher = TwitterPublisher::with_base_urls(credentials(), &server.uri(), &server.uri());
        let posted = publisher
            .publish(PublishRequest {
                text: "look".to_string(),
                reply_to: None,
                media_path: Some(image),
            })
            .await
            .unwrap();
        assert_eq!(posted.id, "7");
    }

    #[tokio::test]
    async fn test_publish_error_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "title": "Forbidden",
                "detail": "You are not allowed to create a Tweet with duplicate content.",
                "status": 403
            })))
            .mount(&server)
            .await;

        let publisher = TwitterPublisher::with_base_urls(credentials(), &server.uri(), &server.uri());
        let err = publisher
            .publish(PublishRequest {
                text: "dup".to_string(),
                reply_to: None,
                media_path: None,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate content"));
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("noext")), "image/png");
    }
}
