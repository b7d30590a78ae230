use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

use githaul_core::lfs::{BatchRequest, BatchResponse, LfsObject, LfsOperation, ObjectActions};
use githaul_core::repo::{RepoClient, RepoError};

/// Typed HTTP client for a Gitea-style hosting backend.
///
/// Covers the two API surfaces the upload engine needs: the contents API
/// (file probe/read/create/update by path and branch) and the Git LFS batch
/// endpoint plus the raw transfer/probe requests it negotiates.
pub struct ForgeClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ForgeClient {
    /// Create a new client with the given base URL and per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RepoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create from an existing `reqwest::Client` (e.g. shared in tests).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn contents_url(&self, repo: &str, path: &str) -> String {
        format!(
            "{}/api/v1/repos/{repo}/contents/{}",
            self.base_url,
            encode_path(path)
        )
    }

    fn batch_url(&self, namespace: &str) -> String {
        format!("{}/{namespace}.git/info/lfs/objects/batch", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn fetch_contents(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<ContentsResponse>, RepoError> {
        let resp = self
            .authed(self.client.get(self.contents_url(repo, path)))
            .query(&[("ref", branch)])
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        let contents: ContentsResponse = resp.json().await.map_err(|e| RepoError::InvalidResponse {
            message: format!("contents response: {e}"),
        })?;
        Ok(Some(contents))
    }
}

// ── Contents API wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    content: Option<String>,
    sha: String,
}

#[derive(Debug, Serialize)]
struct ContentPayload<'a> {
    content: String,
    branch: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

impl<'a> ContentPayload<'a> {
    fn new(content: &[u8], branch: &'a str, message: &'a str, sha: Option<String>) -> Self {
        Self {
            content: base64::engine::general_purpose::STANDARD.encode(content),
            branch,
            message,
            sha,
        }
    }
}

#[async_trait]
impl RepoClient for ForgeClient {
    async fn head_file(&self, repo: &str, path: &str, branch: &str) -> Result<bool, RepoError> {
        let resp = self
            .authed(self.client.head(self.contents_url(repo, path)))
            .query(&[("ref", branch)])
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(resp).await),
        }
    }

    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<Vec<u8>>, RepoError> {
        let Some(contents) = self.fetch_contents(repo, path, branch).await? else {
            return Ok(None);
        };
        let encoded = contents.content.ok_or_else(|| RepoError::InvalidResponse {
            message: format!("no inline content for {path}"),
        })?;
        Ok(Some(decode_content(&encoded)?))
    }

    async fn create_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError> {
        let payload = ContentPayload::new(content, branch, message, None);
        let resp = self
            .authed(self.client.post(self.contents_url(repo, path)))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        Ok(())
    }

    async fn update_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError> {
        // The contents API demands the current blob SHA on update.
        let current = self.fetch_contents(repo, path, branch).await?;
        let sha = match current {
            Some(contents) => contents.sha,
            None => {
                return Err(RepoError::Status {
                    status: 404,
                    body: format!("cannot update {path}: not found on {branch}"),
                });
            }
        };
        let payload = ContentPayload::new(content, branch, message, Some(sha));
        let resp = self
            .authed(self.client.put(self.contents_url(repo, path)))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        Ok(())
    }

    async fn batch_negotiate(
        &self,
        namespace: &str,
        op: LfsOperation,
        object: &LfsObject,
        refspec: &str,
    ) -> Result<ObjectActions, RepoError> {
        let request = BatchRequest::single(op, object, Some(refspec));
        let resp = self
            .authed(self.client.post(self.batch_url(namespace)))
            .header("Accept", LFS_CONTENT_TYPE)
            .header("Content-Type", LFS_CONTENT_TYPE)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        let batch: BatchResponse = resp.json().await.map_err(|e| RepoError::InvalidResponse {
            message: format!("batch response: {e}"),
        })?;
        let result = batch
            .objects
            .into_iter()
            .find(|o| o.oid == object.oid)
            .ok_or_else(|| RepoError::InvalidResponse {
                message: format!("batch response missing object {}", object.oid),
            })?;
        if let Some(error) = result.error {
            return Err(RepoError::Status {
                status: error.code,
                body: error.message,
            });
        }
        Ok(result.actions.map(ObjectActions::from).unwrap_or_default())
    }

    async fn transfer_bytes(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
        bytes: &[u8],
    ) -> Result<(), RepoError> {
        let mut header_map = to_header_map(headers);
        if !header_map.contains_key(reqwest::header::CONTENT_TYPE) {
            header_map.insert(
                reqwest::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
        }
        let resp = self
            .client
            .put(href)
            .headers(header_map)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(failure(resp).await);
        }
        Ok(())
    }

    async fn probe_exists(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
    ) -> Result<bool, RepoError> {
        let resp = self
            .client
            .head(href)
            .headers(to_header_map(headers))
            .send()
            .await
            .map_err(transport)?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(resp).await),
        }
    }
}

const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";

/// Percent-encode each path segment, leaving the separators alone.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// The contents API wraps base64 across lines; strip whitespace first.
fn decode_content(encoded: &str) -> Result<Vec<u8>, RepoError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| RepoError::InvalidResponse {
            message: format!("content not valid base64: {e}"),
        })
}

fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("skipping invalid transfer header {name}"),
        }
    }
    map
}

fn transport(err: reqwest::Error) -> RepoError {
    RepoError::transport(err.to_string())
}

async fn failure(resp: reqwest::Response) -> RepoError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    match status {
        401 | 403 => RepoError::AuthExpired,
        _ => RepoError::Status { status, body },
    }
}
