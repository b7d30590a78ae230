use sha2::{Digest, Sha256};

use crate::chunk_store::{ChunkStore, ChunkStoreError, SessionKey};
use crate::digest::hex_of;

/// The fully reassembled upload: all chunks concatenated in index order.
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct ContentBlob {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`.
    pub sha256: String,
}

impl ContentBlob {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    /// Not every index in `0..total` has a stored chunk. Chunk artifacts are
    /// left in place so the client can resend exactly the missing index.
    #[error("upload incomplete: missing chunk {missing}")]
    Incomplete { missing: u32 },

    /// Reading or concatenating chunks failed mid-stream. Chunk artifacts
    /// have been cleared.
    #[error("chunk reassembly failed: {source}")]
    Assembly {
        #[source]
        source: ChunkStoreError,
    },
}

/// Reassemble a complete session into one [`ContentBlob`].
///
/// Completeness over `0..total` is checked explicitly before any chunk is
/// read — never assumed from the index that triggered finalization. On the
/// incomplete path nothing is deleted; on every other path (success or
/// mid-stream failure) the session's chunk artifacts are removed so storage
/// stays bounded and no partial file lingers.
///
/// Callers must invoke this at most once per session: the first call
/// consumes the stored chunks.
pub fn assemble(
    store: &dyn ChunkStore,
    key: &SessionKey,
    total: u32,
) -> Result<ContentBlob, AssembleError> {
    let present = store
        .indices(key)
        .map_err(|source| AssembleError::Assembly { source })?;
    if let Some(missing) = first_missing(&present, total) {
        return Err(AssembleError::Incomplete { missing });
    }

    let mut hasher = Sha256::new();
    let mut bytes = Vec::new();
    for index in 0..total {
        match store.read(key, index) {
            Ok(chunk) => {
                hasher.update(&chunk);
                bytes.extend_from_slice(&chunk);
            }
            Err(source) => {
                let _ = store.clear(key);
                return Err(AssembleError::Assembly { source });
            }
        }
    }

    store
        .clear(key)
        .map_err(|source| AssembleError::Assembly { source })?;

    Ok(ContentBlob {
        bytes,
        sha256: hex_of(hasher),
    })
}

/// First index in `0..total` absent from the sorted `present` list.
fn first_missing(present: &[u32], total: u32) -> Option<u32> {
    let mut expected = 0u32;
    for &index in present {
        if index > expected {
            break;
        }
        if index == expected {
            expected += 1;
        }
    }
    if expected < total { Some(expected) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::MemoryChunkStore;
    use crate::digest::sha256_hex;

    fn key() -> SessionKey {
        SessionKey::new("team/docs", "assets/archive.tar", "archive.tar")
    }

    #[test]
    fn reassembles_identically_for_any_arrival_order() {
        let chunks: Vec<&[u8]> = vec![b"alpha-", b"beta-", b"gamma-", b"delta"];
        let whole: Vec<u8> = chunks.concat();

        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2, 3],
            vec![3, 2, 1, 0],
            vec![2, 0, 3, 1],
            vec![1, 3, 0, 2],
        ];
        for order in orders {
            let store = MemoryChunkStore::new();
            for i in order {
                store.put(&key(), i as u32, chunks[i]).unwrap();
            }
            let blob = assemble(&store, &key(), 4).unwrap();
            assert_eq!(blob.bytes, whole);
            assert_eq!(blob.sha256, sha256_hex(&whole));
            assert_eq!(blob.size(), whole.len() as u64);
        }
    }

    #[test]
    fn single_chunk_upload() {
        let store = MemoryChunkStore::new();
        store.put(&key(), 0, b"tiny").unwrap();
        let blob = assemble(&store, &key(), 1).unwrap();
        assert_eq!(blob.bytes, b"tiny");
    }

    #[test]
    fn missing_chunk_names_first_gap_and_keeps_artifacts() {
        let store = MemoryChunkStore::new();
        store.put(&key(), 0, b"aa").unwrap();
        store.put(&key(), 2, b"cc").unwrap();

        match assemble(&store, &key(), 3) {
            Err(AssembleError::Incomplete { missing }) => assert_eq!(missing, 1),
            other => panic!("expected Incomplete, got {other:?}"),
        }
        // Stored chunks survive so the client only resends index 1.
        assert_eq!(store.indices(&key()).unwrap(), vec![0, 2]);
    }

    #[test]
    fn success_clears_chunk_artifacts() {
        let store = MemoryChunkStore::new();
        store.put(&key(), 0, b"aa").unwrap();
        store.put(&key(), 1, b"bb").unwrap();
        assemble(&store, &key(), 2).unwrap();
        assert_eq!(store.indices(&key()).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn empty_session_reports_chunk_zero() {
        let store = MemoryChunkStore::new();
        match assemble(&store, &key(), 2) {
            Err(AssembleError::Incomplete { missing }) => assert_eq!(missing, 0),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }
}
