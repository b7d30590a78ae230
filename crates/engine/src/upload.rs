use std::sync::Arc;

use githaul_core::assemble::{AssembleError, assemble};
use githaul_core::chunk_store::{ChunkStore, SessionKey};
use githaul_core::repo::RepoClient;
use tracing::{debug, info};

use crate::commit::{CommitOutcome, commit_file};
use crate::config::EngineConfig;
use crate::error::UploadError;
use crate::manifest_sync::ManifestSync;
use crate::negotiate::LfsPush;

/// One chunk of an upload, with everything needed to finalize once the last
/// chunk lands. Every chunk request carries the full session metadata, so
/// the engine holds no per-session state outside the chunk store.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    /// Hosting-backend repository identifier (`owner/name`).
    pub repo: String,
    /// Destination path inside the repository.
    pub path: String,
    /// Logical name of the uploaded file.
    pub file_name: String,
    pub branch: String,
    /// Zero-based chunk index.
    pub index: u32,
    /// Total number of chunks in this upload.
    pub total: u32,
    /// Store as an LFS object (pointer committed) instead of raw content.
    pub lfs: bool,
    /// LFS store address; required when `lfs` is set.
    pub namespace: Option<String>,
    pub bytes: Vec<u8>,
}

impl ChunkRequest {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.repo, &self.path, &self.file_name)
    }

    fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// Semantic outcome of one chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Non-final chunk stored; more are expected.
    Accepted,
    /// Final chunk received and the file was committed to a new path.
    Created,
    /// Final chunk received and an existing path was replaced.
    Updated,
}

impl From<CommitOutcome> for ChunkOutcome {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Created => ChunkOutcome::Created,
            CommitOutcome::Updated => ChunkOutcome::Updated,
        }
    }
}

/// The chunked-upload engine: persists chunks as they arrive and, on the
/// last one, reassembles the file and drives it into the hosting backend —
/// through the LFS batch protocol or as raw content.
pub struct UploadEngine {
    store: Arc<dyn ChunkStore>,
    client: Arc<dyn RepoClient>,
    config: EngineConfig,
}

impl UploadEngine {
    pub fn new(store: Arc<dyn ChunkStore>, client: Arc<dyn RepoClient>, config: EngineConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recommendation only: callers pick the mode per request.
    pub fn recommends_lfs(&self, size: u64) -> bool {
        size >= self.config.lfs_threshold_bytes
    }

    /// Store one chunk; finalize the upload when it is the last.
    ///
    /// Chunk writes are commutative — arrival order is irrelevant, only the
    /// final index set matters — and `put` is an idempotent overwrite, so
    /// client retries are safe. Finalization is triggered by whichever
    /// request observes `index + 1 == total`; a duplicate trigger after a
    /// successful finalize finds the store empty and reports chunk 0 missing
    /// rather than committing twice.
    pub async fn receive_chunk(&self, req: ChunkRequest) -> Result<ChunkOutcome, UploadError> {
        if req.total == 0 || req.index >= req.total {
            return Err(UploadError::BadChunkIndex {
                index: req.index,
                total: req.total,
            });
        }
        if req.lfs && req.namespace.is_none() {
            return Err(UploadError::MissingNamespace);
        }

        let key = req.session_key();
        self.store.put(&key, req.index, &req.bytes)?;
        debug!(
            "stored chunk {}/{} for {}:{}",
            req.index + 1,
            req.total,
            req.repo,
            req.path
        );

        if !req.is_last() {
            return Ok(ChunkOutcome::Accepted);
        }
        self.finalize(&req, &key).await
    }

    /// Rewrite tracking entries after paths moved in the repository.
    pub async fn rename_tracked(
        &self,
        repo: &str,
        branch: &str,
        pairs: &[(String, String)],
    ) -> Result<(), UploadError> {
        ManifestSync::new(self.client.as_ref(), &self.config, repo, branch)
            .rename(pairs)
            .await
    }

    /// Drop tracking entries, e.g. after paths were deleted out of band.
    pub async fn untrack(
        &self,
        repo: &str,
        branch: &str,
        paths: &[String],
    ) -> Result<(), UploadError> {
        ManifestSync::new(self.client.as_ref(), &self.config, repo, branch)
            .untrack(paths)
            .await
    }

    async fn finalize(&self, req: &ChunkRequest, key: &SessionKey) -> Result<ChunkOutcome, UploadError> {
        let blob = match assemble(self.store.as_ref(), key, req.total) {
            Ok(blob) => blob,
            Err(AssembleError::Incomplete { missing }) => {
                return Err(UploadError::IncompleteUpload { missing });
            }
            Err(AssembleError::Assembly { source }) => return Err(UploadError::Store(source)),
        };
        info!(
            "assembled {} ({} bytes, sha256 {}) for {}:{}",
            req.file_name,
            blob.size(),
            blob.sha256,
            req.repo,
            req.path
        );

        let message = format!("Upload {}", req.file_name);
        let manifest = ManifestSync::new(self.client.as_ref(), &self.config, &req.repo, &req.branch);

        if req.lfs {
            let namespace = req
                .namespace
                .as_deref()
                .ok_or(UploadError::MissingNamespace)?;
            let push = LfsPush {
                client: self.client.as_ref(),
                config: &self.config,
                repo: &req.repo,
                namespace,
                branch: &req.branch,
            };
            let outcome = push.push(&req.path, &blob, &message).await?;
            manifest.track(&req.path).await?;
            Ok(outcome.into())
        } else {
            let outcome = commit_file(
                self.client.as_ref(),
                &self.config.commit_policy(),
                &req.repo,
                &req.path,
                &req.branch,
                &blob.bytes,
                &message,
            )
            .await?;
            // A direct upload over a previously LFS-tracked path must not
            // leave the stale tracking rule behind.
            manifest.untrack(std::slice::from_ref(&req.path)).await?;
            Ok(outcome.into())
        }
    }
}
