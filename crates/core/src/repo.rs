use std::collections::HashMap;

use async_trait::async_trait;

use crate::lfs::{LfsObject, LfsOperation, ObjectActions};

/// Errors surfaced by a [`RepoClient`] implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    /// Connect/timeout/body-read failures before an HTTP status existed.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Non-success HTTP status with the upstream diagnostic body verbatim.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Credentials were rejected. Never retried — the session must be
    /// refreshed out of band.
    #[error("authentication expired or rejected")]
    AuthExpired,

    /// A 2xx response whose body did not match the expected shape.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl RepoError {
    pub fn transport(message: impl Into<String>) -> Self {
        RepoError::Transport {
            message: message.into(),
        }
    }

    /// Transient conditions worth retrying: transport failures and the
    /// hosting backend's overload status class.
    pub fn is_transient(&self) -> bool {
        match self {
            RepoError::Transport { .. } => true,
            RepoError::Status { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }

    /// Validation-class rejection (the backend judged the payload invalid).
    pub fn is_validation(&self) -> bool {
        matches!(self, RepoError::Status { status, .. } if matches!(status, 400 | 422))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RepoError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The hosting-backend seam consumed by the upload engine.
///
/// One method per outbound call class: file probes and writes via the
/// contents API, LFS batch negotiation, raw object transfer, and the
/// lightweight post-upload existence probe. `repo` is the backend's
/// repository identifier (`owner/name`); `namespace` addresses the
/// repository's LFS store.
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Does `path` exist on `branch`?
    async fn head_file(&self, repo: &str, path: &str, branch: &str) -> Result<bool, RepoError>;

    /// Fetch the decoded content of `path@branch`; `None` when absent.
    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<Vec<u8>>, RepoError>;

    async fn create_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError>;

    async fn update_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError>;

    /// One round of the two-phase batch protocol for a single object.
    async fn batch_negotiate(
        &self,
        namespace: &str,
        op: LfsOperation,
        object: &LfsObject,
        refspec: &str,
    ) -> Result<ObjectActions, RepoError>;

    /// Raw PUT of object bytes to a negotiated action URL with the action's
    /// headers.
    async fn transfer_bytes(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
        bytes: &[u8],
    ) -> Result<(), RepoError>;

    /// Existence probe against a negotiated download URL — no body fetch.
    async fn probe_exists(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
    ) -> Result<bool, RepoError>;
}
