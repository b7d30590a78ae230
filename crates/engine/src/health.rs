use std::sync::Arc;
use std::time::Duration;

use githaul_core::TRACKING_MANIFEST_PATH;
use githaul_core::repo::{RepoClient, RepoError};
use tracing::{debug, info, warn};

use crate::retry::{RetryPolicy, with_retry};

/// Periodic auth-liveness probe against the hosting backend.
///
/// A lightweight head probe distinguishes "backend reachable, credentials
/// good" from "credentials expired" before a long upload discovers it the
/// hard way. Auth failures are reported, never retried.
pub async fn run_auth_probe(
    client: Arc<dyn RepoClient>,
    repo: String,
    branch: String,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    if interval.is_zero() {
        info!("Auth probe disabled (interval=0)");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick.
    ticker.tick().await;

    let policy = RetryPolicy::new(2, Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                probe(client.as_ref(), &policy, &repo, &branch).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Auth probe shutting down");
                    break;
                }
            }
        }
    }
}

async fn probe(client: &dyn RepoClient, policy: &RetryPolicy, repo: &str, branch: &str) {
    // Any known path works; the manifest path is always safe to probe and
    // its absence still proves the credentials are accepted.
    let result = with_retry("auth probe", policy, RepoError::is_transient, move || {
        client.head_file(repo, TRACKING_MANIFEST_PATH, branch)
    })
    .await;

    match result {
        Ok(_) => debug!("Auth probe OK: backend reachable and credentials valid"),
        Err(err) => match err.into_inner() {
            RepoError::AuthExpired => {
                warn!("Auth probe: credentials expired or rejected; refresh the access token")
            }
            other => warn!("Auth probe: backend issue ({other})"),
        },
    }
}
