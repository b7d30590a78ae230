use githaul_core::TRACKING_MANIFEST_PATH;
use githaul_core::attributes::TrackingManifest;
use githaul_core::repo::{RepoClient, RepoError};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::UploadError;
use crate::retry::{RetryError, RetryPolicy, with_retry};

/// Keeps the repository's LFS tracking manifest consistent with which paths
/// are LFS-backed.
///
/// The manifest is one shared file mutated by every concurrent upload on the
/// repository, and the hosting protocol offers no transactional update. Each
/// operation therefore runs a full fetch→patch→write cycle under bounded
/// retry; a racing writer just means another cycle.
pub struct ManifestSync<'a> {
    client: &'a dyn RepoClient,
    policy: RetryPolicy,
    repo: &'a str,
    branch: &'a str,
}

impl<'a> ManifestSync<'a> {
    pub fn new(client: &'a dyn RepoClient, config: &EngineConfig, repo: &'a str, branch: &'a str) -> Self {
        Self {
            client,
            policy: config.manifest_policy(),
            repo,
            branch,
        }
    }

    /// Declare `path` LFS-tracked. Idempotent; creates the manifest when the
    /// repository has none yet.
    pub async fn track(&self, path: &str) -> Result<(), UploadError> {
        let message = format!("Track {path} with Git LFS");
        self.apply(
            vec![path.to_string()],
            &message,
            true,
            |manifest: &mut TrackingManifest| manifest.add_entry(path),
        )
        .await
    }

    /// Drop the tracking entries for `paths`. A missing manifest or unknown
    /// path is a no-op, not an error.
    pub async fn untrack(&self, paths: &[String]) -> Result<(), UploadError> {
        let message = format!("Untrack {} from Git LFS", paths.join(", "));
        self.apply(paths.to_vec(), &message, false, |manifest| {
            manifest.remove_entries(paths)
        })
        .await
    }

    /// Rewrite tracking entries after paths moved, all pairs within a single
    /// manifest write.
    pub async fn rename(&self, pairs: &[(String, String)]) -> Result<(), UploadError> {
        let affected: Vec<String> = pairs.iter().map(|(old, _)| old.clone()).collect();
        self.apply(
            affected,
            "Rename Git LFS tracked paths",
            false,
            |manifest| manifest.rename_entries(pairs),
        )
        .await
    }

    /// One read-modify-write cycle under retry. `allow_create` distinguishes
    /// `track` (which materializes an absent manifest) from the operations
    /// that short-circuit to a no-op when there is nothing to patch.
    async fn apply<P>(
        &self,
        affected: Vec<String>,
        message: &str,
        allow_create: bool,
        patch: P,
    ) -> Result<(), UploadError>
    where
        P: Fn(&mut TrackingManifest) -> bool,
    {
        let client = self.client;
        let repo = self.repo;
        let branch = self.branch;
        let patch = &patch;
        let cycle = move || async move {
            let current = client
                .read_file(repo, TRACKING_MANIFEST_PATH, branch)
                .await?;
            let existed = current.is_some();
            if !existed && !allow_create {
                return Ok(false);
            }
            let mut manifest = current
                .map(|bytes| TrackingManifest::parse(&String::from_utf8_lossy(&bytes)))
                .unwrap_or_default();
            if !patch(&mut manifest) {
                return Ok(false);
            }
            let text = manifest.to_text();
            if existed {
                client
                    .update_file(repo, TRACKING_MANIFEST_PATH, branch, text.as_bytes(), message)
                    .await?;
            } else {
                client
                    .create_file(repo, TRACKING_MANIFEST_PATH, branch, text.as_bytes(), message)
                    .await?;
            }
            Ok(true)
        };

        match with_retry("manifest update", &self.policy, manifest_retryable, cycle).await {
            Ok(changed) => {
                if changed {
                    debug!("tracking manifest updated for {affected:?}");
                }
                Ok(())
            }
            Err(RetryError::Fatal {
                source: RepoError::AuthExpired,
                ..
            }) => Err(UploadError::AuthExpired),
            Err(err) => {
                let last = err.into_inner();
                Err(UploadError::ManifestUpdateFailed {
                    paths: affected,
                    last,
                })
            }
        }
    }
}

/// Concurrent manifest writers surface as conflicts or transient validation
/// rejections; both are worth another read-modify-write cycle.
fn manifest_retryable(err: &RepoError) -> bool {
    err.is_transient() || err.is_validation() || err.status() == Some(409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use githaul_core::testing::MockRepoClient;

    fn quick_config() -> EngineConfig {
        EngineConfig {
            manifest_backoff_secs: 0,
            ..EngineConfig::default()
        }
    }

    fn manifest_text(client: &MockRepoClient) -> Option<String> {
        client
            .file("team/docs", "main", TRACKING_MANIFEST_PATH)
            .map(|bytes| String::from_utf8(bytes).unwrap())
    }

    #[tokio::test]
    async fn track_creates_manifest_and_is_idempotent() {
        let client = MockRepoClient::new();
        let config = quick_config();
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        sync.track("assets/video.mp4").await.unwrap();
        assert_eq!(
            manifest_text(&client).unwrap(),
            "assets/video.mp4 filter=lfs diff=lfs merge=lfs -text\n"
        );

        sync.track("assets/video.mp4").await.unwrap();
        let text = manifest_text(&client).unwrap();
        assert_eq!(text.matches("assets/video.mp4").count(), 1);
        // Second call found nothing to change, so only the first wrote.
        assert_eq!(client.call_count("create"), 1);
        assert_eq!(client.call_count("update"), 0);
    }

    #[tokio::test]
    async fn untrack_on_absent_manifest_is_noop() {
        let client = MockRepoClient::new();
        let config = quick_config();
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        sync.untrack(&["assets/video.mp4".to_string()]).await.unwrap();
        assert!(manifest_text(&client).is_none());
        assert_eq!(client.call_count("create"), 0);
    }

    #[tokio::test]
    async fn untrack_removes_both_line_variants() {
        let client = MockRepoClient::new();
        client.seed_file(
            "team/docs",
            "main",
            TRACKING_MANIFEST_PATH,
            b"a.bin filter=lfs diff=lfs merge=lfs -text\na.bin filter=lfs diff=lfs merge=lfs\nb.bin filter=lfs diff=lfs merge=lfs -text\n",
        );
        let config = quick_config();
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        sync.untrack(&["a.bin".to_string()]).await.unwrap();
        assert_eq!(
            manifest_text(&client).unwrap(),
            "b.bin filter=lfs diff=lfs merge=lfs -text\n"
        );
    }

    #[tokio::test]
    async fn rename_applies_all_pairs_in_one_write() {
        let client = MockRepoClient::new();
        client.seed_file(
            "team/docs",
            "main",
            TRACKING_MANIFEST_PATH,
            b"old.bin filter=lfs diff=lfs merge=lfs -text\nlegacy.bin filter=lfs diff=lfs merge=lfs\n",
        );
        let config = quick_config();
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        sync.rename(&[
            ("old.bin".to_string(), "new.bin".to_string()),
            ("legacy.bin".to_string(), "renamed.bin".to_string()),
        ])
        .await
        .unwrap();

        let text = manifest_text(&client).unwrap();
        assert!(text.contains("new.bin filter=lfs diff=lfs merge=lfs -text"));
        assert!(text.contains("renamed.bin filter=lfs diff=lfs merge=lfs"));
        assert!(!text.contains("old.bin"));
        assert!(!text.contains("legacy.bin"));
        assert_eq!(client.call_count("update"), 1);
    }

    #[tokio::test]
    async fn conflicting_write_is_retried() {
        let client = MockRepoClient::new();
        client.seed_file("team/docs", "main", TRACKING_MANIFEST_PATH, b"");
        client.fail_next(
            "update",
            RepoError::Status {
                status: 409,
                body: "concurrent update".into(),
            },
        );
        let config = quick_config();
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        sync.track("assets/video.mp4").await.unwrap();
        assert!(
            manifest_text(&client)
                .unwrap()
                .contains("assets/video.mp4")
        );
        assert_eq!(client.call_count("update"), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_names_affected_paths() {
        let client = MockRepoClient::new();
        let config = quick_config();
        for _ in 0..config.manifest_attempts {
            client.fail_next("read", RepoError::transport("connection reset"));
        }
        let sync = ManifestSync::new(&client, &config, "team/docs", "main");

        let err = sync.track("assets/video.mp4").await.unwrap_err();
        match err {
            UploadError::ManifestUpdateFailed { paths, last } => {
                assert_eq!(paths, vec!["assets/video.mp4".to_string()]);
                assert!(last.is_transient());
            }
            other => panic!("expected ManifestUpdateFailed, got {other}"),
        }
    }
}
