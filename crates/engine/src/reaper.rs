use std::sync::Arc;
use std::time::Duration;

use githaul_core::chunk_store::ChunkStore;
use tracing::{debug, info, warn};

/// Periodically drop chunk artifacts of abandoned upload sessions.
///
/// A client that disconnects mid-upload leaves its chunks behind; nothing in
/// the finalize path cleans those up, so this task bounds storage growth by
/// age.
pub async fn run_reaper(
    store: Arc<dyn ChunkStore>,
    max_age: Duration,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    if interval.is_zero() {
        info!("Session reaper disabled (interval=0)");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.purge_older_than(max_age) {
                    Ok(0) => debug!("Session reaper: nothing to purge"),
                    Ok(purged) => info!("Session reaper: purged {purged} abandoned upload sessions"),
                    Err(e) => warn!("Session reaper error: {e}"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Session reaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use githaul_core::chunk_store::{MemoryChunkStore, SessionKey};

    #[tokio::test]
    async fn reaper_purges_and_stops_on_shutdown() {
        let store = Arc::new(MemoryChunkStore::new());
        let key = SessionKey::new("team/docs", "stale.bin", "stale.bin");
        store.put(&key, 0, b"abandoned").unwrap();

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(run_reaper(
            store.clone() as Arc<dyn ChunkStore>,
            Duration::ZERO,
            Duration::from_millis(10),
            rx,
        ));

        // Give the reaper a couple of ticks to sweep.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.indices(&key).unwrap(), Vec::<u32>::new());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
