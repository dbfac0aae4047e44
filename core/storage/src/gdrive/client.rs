//! Google Drive API client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use cardsafe_common::{Error, RemoteReason, Result};

use super::token::TokenSource;
use crate::provider::{BlobStore, ObjectMeta, ObjectQuery, FOLDER_MIME_TYPE};

/// Fields requested for every file resource.
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,trashed";
/// Fields requested when listing.
const LIST_FIELDS: &str = "files(id,name,mimeType,size,modifiedTime,parents,trashed),nextPageToken";

/// Drive client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Metadata API base URL.
    pub api_base: String,
    /// Upload API base URL.
    pub upload_base: String,
    /// Timeout applied to every request.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            request_timeout_secs: 30,
            user_agent: format!("Cardsafe/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes, as a decimal string (files only).
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Trashed status.
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

impl From<DriveFile> for ObjectMeta {
    fn from(file: DriveFile) -> Self {
        let size = file.size_bytes();
        ObjectMeta {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            parents: file.parents,
            size,
            modified: file.modified_time,
            trashed: file.trashed,
        }
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Drive API client.
///
/// Translates [`BlobStore`] calls into Drive v3 requests. It never retries;
/// that is left to the caller's retry policy.
pub struct DriveClient {
    http: Client,
    config: DriveConfig,
    tokens: Arc<dyn TokenSource>,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(config: DriveConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    /// Client settings.
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Probe the API with the current credential.
    ///
    /// Succeeds only if Drive accepts the token for a file listing.
    pub async fn verify_access(&self) -> Result<()> {
        let url = format!("{}/files", self.config.api_base);
        let request = self
            .authorized(self.http.get(&url))
            .await?
            .query(&[("pageSize", "1"), ("fields", "files(id)")]);

        let _: FileListResponse = self.send_json("verify access", request).await?;
        debug!("Drive access verified");
        Ok(())
    }

    /// Get authorization header.
    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(request.header(header::AUTHORIZATION, format!("Bearer {}", token)))
    }

    async fn send(&self, what: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| transport_error(what, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(what, status, &body))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.send(what, request)
            .await?
            .json()
            .await
            .map_err(|e| {
                Error::remote(
                    RemoteReason::Server,
                    format!("Failed to parse {} response: {}", what, e),
                )
            })
    }
}

#[async_trait]
impl BlobStore for DriveClient {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<ObjectMeta> {
        let url = format!("{}/files", self.config.api_base);

        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let request = self
            .authorized(self.http.post(&url))
            .await?
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata);

        let file: DriveFile = self.send_json("create folder", request).await?;
        Ok(file.into())
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<ObjectMeta> {
        let url = format!("{}/files", self.config.upload_base);

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent],
            "mimeType": mime_type,
        });
        let metadata_json = serde_json::to_vec(&metadata)
            .map_err(|e| Error::Serialization(format!("Failed to serialize metadata: {}", e)))?;

        let boundary = format!("cardsafe-{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata_json, mime_type, &data);

        let request = self
            .authorized(self.http.post(&url))
            .await?
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(body);

        let file: DriveFile = self.send_json("upload file", request).await?;
        Ok(file.into())
    }

    async fn update_file(&self, id: &str, data: Vec<u8>) -> Result<ObjectMeta> {
        let url = format!("{}/files/{}", self.config.upload_base, id);

        let request = self
            .authorized(self.http.patch(&url))
            .await?
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .body(data);

        let file: DriveFile = self.send_json("update file", request).await?;
        Ok(file.into())
    }

    async fn read_file(&self, id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}", self.config.api_base, id);

        let request = self
            .authorized(self.http.get(&url))
            .await?
            .query(&[("alt", "media")]);

        self.send("download file", request)
            .await?
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| transport_error("download file", &e))
    }

    async fn get(&self, id: &str) -> Result<ObjectMeta> {
        let url = format!("{}/files/{}", self.config.api_base, id);

        let request = self
            .authorized(self.http.get(&url))
            .await?
            .query(&[("fields", FILE_FIELDS)]);

        let file: DriveFile = self.send_json("get file", request).await?;
        Ok(file.into())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = format!("{}/files/{}", self.config.api_base, id);
        let request = self.authorized(self.http.delete(&url)).await?;
        self.send("delete file", request).await?;
        Ok(())
    }

    async fn query(&self, query: &ObjectQuery) -> Result<Vec<ObjectMeta>> {
        let url = format!("{}/files", self.config.api_base);
        let q = drive_query(query);

        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .authorized(self.http.get(&url))
                .await?
                .query(&[("fields", LIST_FIELDS), ("pageSize", "1000")]);
            if !q.is_empty() {
                request = request.query(&[("q", q.as_str())]);
            }
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileListResponse = self.send_json("list files", request).await?;
            all_files.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // `name contains` matches word prefixes, not string prefixes.
        // Top-level files list My Drive's id as parent, already checked
        // server-side.
        let local = ObjectQuery {
            top_level: false,
            ..query.clone()
        };
        Ok(all_files
            .into_iter()
            .map(ObjectMeta::from)
            .filter(|meta| local.matches(meta))
            .collect())
    }
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Translate an [`ObjectQuery`] into Drive's `q` syntax.
pub fn drive_query(query: &ObjectQuery) -> String {
    let mut clauses = Vec::new();

    if query.top_level {
        clauses.push("'root' in parents".to_string());
    }
    if let Some(parent) = &query.parent {
        clauses.push(format!("'{}' in parents", escape(parent)));
    }
    if let Some(name) = &query.name {
        clauses.push(format!("name = '{}'", escape(name)));
    }
    if let Some(prefix) = &query.name_prefix {
        clauses.push(format!("name contains '{}'", escape(prefix)));
    }
    match query.folders {
        Some(true) => clauses.push(format!("mimeType = '{}'", FOLDER_MIME_TYPE)),
        Some(false) => clauses.push(format!("mimeType != '{}'", FOLDER_MIME_TYPE)),
        None => {}
    }
    if !query.include_trashed {
        clauses.push("trashed = false".to_string());
    }

    clauses.join(" and ")
}

fn multipart_related(boundary: &str, metadata: &[u8], mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);

    // Metadata part
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(b"\r\n");

    // Data part
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}--", boundary).as_bytes());
    body
}

fn transport_error(what: &str, err: &reqwest::Error) -> Error {
    let reason = if err.is_timeout() {
        RemoteReason::Timeout
    } else {
        RemoteReason::Transport
    };
    Error::remote(reason, format!("Failed to {}: {}", what, err))
}

/// Map a non-success HTTP status to an error.
pub fn status_error(what: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("Failed to {}: {} - {}", what, status, body);
    let reason = match status {
        StatusCode::NOT_FOUND => return Error::NotFound(message),
        StatusCode::UNAUTHORIZED => RemoteReason::Unauthorized,
        StatusCode::FORBIDDEN => {
            if body.contains("storageQuotaExceeded") || body.contains("quotaExceeded") {
                RemoteReason::QuotaExceeded
            } else if body.to_ascii_lowercase().contains("ratelimitexceeded") {
                // rateLimitExceeded and userRateLimitExceeded.
                RemoteReason::RateLimited
            } else {
                RemoteReason::PermissionDenied
            }
        }
        StatusCode::TOO_MANY_REQUESTS => RemoteReason::RateLimited,
        StatusCode::REQUEST_TIMEOUT => RemoteReason::Timeout,
        s if s.is_server_error() => RemoteReason::Server,
        _ => return Error::InvalidInput(message),
    };
    Error::remote(reason, message)
}
