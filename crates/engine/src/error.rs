use std::fmt;

use githaul_core::chunk_store::ChunkStoreError;
use githaul_core::repo::RepoError;

use crate::retry::RetryError;

/// Which logical step of the upload pipeline failed. Carried on every
/// terminal error so an operator can recover without reading server logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Negotiate,
    Transfer,
    Verify,
    Commit,
    Manifest,
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStep::Negotiate => "negotiate",
            UploadStep::Transfer => "transfer",
            UploadStep::Verify => "verify",
            UploadStep::Commit => "commit",
            UploadStep::Manifest => "manifest",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// A chunk in `0..total` was never received. Recoverable: the client
    /// resends exactly this index.
    #[error("upload incomplete: chunk {missing} was never received")]
    IncompleteUpload { missing: u32 },

    #[error("chunk index {index} out of range for {total} chunks")]
    BadChunkIndex { index: u32, total: u32 },

    #[error("LFS uploads require a namespace")]
    MissingNamespace,

    #[error("chunk storage failed: {0}")]
    Store(#[from] ChunkStoreError),

    /// Credentials rejected. Surfaced immediately, never retried.
    #[error("authentication expired")]
    AuthExpired,

    /// A non-retryable upstream rejection before any budget was spent.
    #[error("{step} step failed: {last}")]
    Terminal { step: UploadStep, last: RepoError },

    /// The retry budget for one step ran out; `last` carries the final
    /// upstream diagnostic verbatim.
    #[error("{step} step failed after {attempts} attempts: {last}")]
    Exhausted {
        step: UploadStep,
        attempts: u32,
        last: RepoError,
    },

    /// The tracking manifest could not be updated within its retry budget.
    /// Names the affected paths so the caller can reconcile manually.
    #[error("tracking manifest update failed for {paths:?}: {last}")]
    ManifestUpdateFailed { paths: Vec<String>, last: RepoError },
}

/// Semantic response class for a finalize outcome or failure — transport
/// mapping is left to the embedding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// A named chunk is missing; the client must resend it.
    Conflict,
    /// The request itself was malformed.
    BadRequest,
    /// Credentials must be refreshed.
    Unauthorized,
    /// The upstream stayed unreachable through the retry budget.
    RequestTimeout,
    /// Terminal commit/manifest failure.
    ServerError,
}

impl UploadError {
    pub fn response_class(&self) -> ResponseClass {
        match self {
            UploadError::IncompleteUpload { .. } => ResponseClass::Conflict,
            UploadError::BadChunkIndex { .. } | UploadError::MissingNamespace => {
                ResponseClass::BadRequest
            }
            UploadError::AuthExpired => ResponseClass::Unauthorized,
            UploadError::Exhausted { last, .. } if last.is_transient() => {
                ResponseClass::RequestTimeout
            }
            _ => ResponseClass::ServerError,
        }
    }
}

/// Fold a retry-controller failure on a repository call into the upload
/// taxonomy, tagging it with the step that failed.
pub(crate) fn repo_failure(step: UploadStep, err: RetryError<RepoError>) -> UploadError {
    match err {
        RetryError::Fatal {
            source: RepoError::AuthExpired,
            ..
        } => UploadError::AuthExpired,
        RetryError::Fatal { source, .. } => UploadError::Terminal { step, last: source },
        RetryError::Exhausted {
            attempts, source, ..
        } => UploadError::Exhausted {
            step,
            attempts,
            last: source,
        },
    }
}
