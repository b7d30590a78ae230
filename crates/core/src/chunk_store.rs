use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::digest::sha256_hex;

/// Identity of one in-flight upload: which repository, which destination
/// path, and which logical file the chunks belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub repo: String,
    pub path: String,
    pub file_name: String,
}

impl SessionKey {
    pub fn new(
        repo: impl Into<String>,
        path: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
            file_name: file_name.into(),
        }
    }

    /// Stable storage identifier for this session.
    ///
    /// Derived from the identity triple so that concurrent sessions for
    /// different destinations never collide, and client retries of the same
    /// upload land in the same slot.
    pub fn storage_id(&self) -> String {
        let joined = format!("{}\0{}\0{}", self.repo, self.path, self.file_name);
        sha256_hex(joined.as_bytes())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkStoreError {
    #[error("missing chunk {index}")]
    MissingChunk { index: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable storage of upload chunks keyed by `(session, index)`.
///
/// `put` overwrites any prior chunk at the same index, so client retries of
/// a chunk are idempotent. Chunks persist until `clear` — partial failures
/// never discard already-received chunks, which lets a client resend only
/// what is missing.
pub trait ChunkStore: Send + Sync {
    fn put(&self, key: &SessionKey, index: u32, bytes: &[u8]) -> Result<(), ChunkStoreError>;

    /// Read one chunk. Fails with [`ChunkStoreError::MissingChunk`] if it was
    /// never stored.
    fn read(&self, key: &SessionKey, index: u32) -> Result<Vec<u8>, ChunkStoreError>;

    /// Indices currently stored for the session, in ascending order.
    fn indices(&self, key: &SessionKey) -> Result<Vec<u32>, ChunkStoreError>;

    /// Remove every chunk of the session. Removing an unknown session is a
    /// no-op.
    fn clear(&self, key: &SessionKey) -> Result<(), ChunkStoreError>;

    /// Drop all sessions whose most recent chunk arrival is older than
    /// `max_age`. Returns the number of sessions purged.
    fn purge_older_than(&self, max_age: Duration) -> Result<usize, ChunkStoreError>;
}

// ───────────────────────────────────────────────────────────────────────────
// Filesystem backend
// ───────────────────────────────────────────────────────────────────────────

/// Chunk storage under a root directory: one subdirectory per session
/// (named by its storage id), one `NNNNNN.part` file per chunk index.
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, key: &SessionKey) -> PathBuf {
        self.root.join(key.storage_id())
    }

    fn chunk_path(&self, key: &SessionKey, index: u32) -> PathBuf {
        self.session_dir(key).join(format!("{index:06}.part"))
    }
}

impl ChunkStore for FsChunkStore {
    fn put(&self, key: &SessionKey, index: u32, bytes: &[u8]) -> Result<(), ChunkStoreError> {
        let dir = self.session_dir(key);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(self.chunk_path(key, index), bytes)?;
        Ok(())
    }

    fn read(&self, key: &SessionKey, index: u32) -> Result<Vec<u8>, ChunkStoreError> {
        let path = self.chunk_path(key, index);
        if !path.exists() {
            return Err(ChunkStoreError::MissingChunk { index });
        }
        Ok(std::fs::read(path)?)
    }

    fn indices(&self, key: &SessionKey) -> Result<Vec<u32>, ChunkStoreError> {
        let dir = self.session_dir(key);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".part") {
                if let Ok(index) = stem.parse::<u32>() {
                    out.push(index);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    fn clear(&self, key: &SessionKey) -> Result<(), ChunkStoreError> {
        let dir = self.session_dir(key);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    fn purge_older_than(&self, max_age: Duration) -> Result<usize, ChunkStoreError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut purged = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            // The directory mtime advances on every chunk write, so it
            // tracks the most recent arrival.
            let modified = entry.metadata()?.modified()?;
            if modified <= cutoff {
                std::fs::remove_dir_all(entry.path())?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

// ───────────────────────────────────────────────────────────────────────────
// In-memory backend
// ───────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemorySession {
    chunks: HashMap<u32, Vec<u8>>,
    touched: Option<SystemTime>,
}

/// Mutexed in-memory chunk storage. Used by tests and by embedders that
/// keep uploads entirely in process.
#[derive(Default)]
pub struct MemoryChunkStore {
    sessions: Mutex<HashMap<String, MemorySession>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, key: &SessionKey, index: u32, bytes: &[u8]) -> Result<(), ChunkStoreError> {
        let mut sessions = self.sessions.lock().expect("chunk store mutex poisoned");
        let session = sessions.entry(key.storage_id()).or_default();
        session.chunks.insert(index, bytes.to_vec());
        session.touched = Some(SystemTime::now());
        Ok(())
    }

    fn read(&self, key: &SessionKey, index: u32) -> Result<Vec<u8>, ChunkStoreError> {
        let sessions = self.sessions.lock().expect("chunk store mutex poisoned");
        sessions
            .get(&key.storage_id())
            .and_then(|s| s.chunks.get(&index))
            .cloned()
            .ok_or(ChunkStoreError::MissingChunk { index })
    }

    fn indices(&self, key: &SessionKey) -> Result<Vec<u32>, ChunkStoreError> {
        let sessions = self.sessions.lock().expect("chunk store mutex poisoned");
        let mut out: Vec<u32> = sessions
            .get(&key.storage_id())
            .map(|s| s.chunks.keys().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        Ok(out)
    }

    fn clear(&self, key: &SessionKey) -> Result<(), ChunkStoreError> {
        let mut sessions = self.sessions.lock().expect("chunk store mutex poisoned");
        sessions.remove(&key.storage_id());
        Ok(())
    }

    fn purge_older_than(&self, max_age: Duration) -> Result<usize, ChunkStoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut sessions = self.sessions.lock().expect("chunk store mutex poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| s.touched.is_none_or(|t| t > cutoff));
        Ok(before - sessions.len())
    }
}
