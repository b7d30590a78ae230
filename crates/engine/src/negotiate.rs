use std::collections::HashMap;

use githaul_core::assemble::ContentBlob;
use githaul_core::lfs::{LfsAction, LfsErrorMessage, LfsObject, LfsOperation, PointerRecord};
use githaul_core::repo::{RepoClient, RepoError};
use tracing::{debug, warn};

use crate::commit::{CommitOutcome, commit_file};
use crate::config::EngineConfig;
use crate::error::{UploadError, UploadStep};
use crate::retry::{RetryError, with_retry};

/// One LFS upload: the two-phase batch protocol plus pointer commit and
/// durability verification.
pub struct LfsPush<'a> {
    pub client: &'a dyn RepoClient,
    pub config: &'a EngineConfig,
    pub repo: &'a str,
    /// Addresses the repository's LFS store at the batch endpoint.
    pub namespace: &'a str,
    pub branch: &'a str,
}

/// Explicit machine states for one upload cycle. Verification failure is
/// the only arrow that restarts from the top.
enum State {
    Negotiate,
    Transfer(LfsAction),
    Commit,
    Verify,
    Done,
}

impl LfsPush<'_> {
    /// Push `blob` as the LFS object backing `path`, committing its pointer
    /// record to the destination.
    ///
    /// Runs up to `lfs_attempts` full negotiate→transfer→commit→verify
    /// cycles. A verify failure restarts the whole cycle — some backends
    /// acknowledge an upload before it is durably stored, and the restart
    /// re-transfers rather than trusting the earlier acknowledgement.
    pub async fn push(
        &self,
        path: &str,
        blob: &ContentBlob,
        message: &str,
    ) -> Result<CommitOutcome, UploadError> {
        let object = LfsObject::of(blob);
        let refspec = format!("refs/heads/{}", self.branch);
        let net = self.config.network_policy();
        let commit_policy = self.config.commit_policy();
        let client = self.client;
        let namespace = self.namespace;
        let mut last: Option<(UploadStep, RepoError)> = None;

        for cycle in 1..=self.config.lfs_attempts {
            if cycle > 1 {
                debug!(
                    "restarting LFS upload cycle {cycle}/{} for {}",
                    self.config.lfs_attempts, object.oid
                );
            }

            let mut state = State::Negotiate;
            let mut outcome = None;
            let finished = loop {
                state = match state {
                    State::Negotiate => {
                        let object = &object;
                        let refspec = refspec.as_str();
                        let negotiated = with_retry(
                            "lfs negotiate",
                            &net,
                            RepoError::is_transient,
                            move || {
                                client.batch_negotiate(
                                    namespace,
                                    LfsOperation::Upload,
                                    object,
                                    refspec,
                                )
                            },
                        )
                        .await;
                        match negotiated {
                            Ok(actions) => match actions.upload {
                                Some(action) => State::Transfer(action),
                                None => {
                                    // Content-addressed dedup: the backend
                                    // already holds these bytes.
                                    debug!(
                                        "object {} already present upstream, skipping transfer",
                                        object.oid
                                    );
                                    State::Commit
                                }
                            },
                            Err(err) => {
                                last = Some((
                                    UploadStep::Negotiate,
                                    restartable(UploadStep::Negotiate, err)?,
                                ));
                                break false;
                            }
                        }
                    }

                    State::Transfer(action) => {
                        let headers = strip_transfer_encoding(&action.header);
                        let headers = &headers;
                        let href = action.href.as_str();
                        let bytes = blob.bytes.as_slice();
                        let transferred =
                            with_retry("lfs transfer", &net, transfer_retryable, move || {
                                client.transfer_bytes(href, headers, bytes)
                            })
                            .await;
                        match transferred {
                            Ok(()) => State::Commit,
                            Err(err) => {
                                last = Some((
                                    UploadStep::Transfer,
                                    restartable(UploadStep::Transfer, err)?,
                                ));
                                break false;
                            }
                        }
                    }

                    State::Commit => {
                        let pointer = PointerRecord::new(&object).to_text();
                        outcome = Some(
                            commit_file(
                                client,
                                &commit_policy,
                                self.repo,
                                path,
                                self.branch,
                                pointer.as_bytes(),
                                message,
                            )
                            .await?,
                        );
                        State::Verify
                    }

                    State::Verify => {
                        let object_ref = &object;
                        let refspec = refspec.as_str();
                        let negotiated =
                            with_retry("lfs verify", &net, RepoError::is_transient, move || {
                                client.batch_negotiate(
                                    namespace,
                                    LfsOperation::Download,
                                    object_ref,
                                    refspec,
                                )
                            })
                            .await;
                        let download = match negotiated {
                            Ok(actions) => actions.download,
                            Err(err) => {
                                last = Some((
                                    UploadStep::Verify,
                                    restartable(UploadStep::Verify, err)?,
                                ));
                                break false;
                            }
                        };
                        let Some(action) = download else {
                            warn!(
                                "object {} not offered for download after upload, restarting",
                                object.oid
                            );
                            last = Some((UploadStep::Verify, not_present(&object)));
                            break false;
                        };
                        let headers = strip_transfer_encoding(&action.header);
                        let headers = &headers;
                        let href = action.href.as_str();
                        let probed =
                            with_retry("lfs probe", &net, RepoError::is_transient, move || {
                                client.probe_exists(href, headers)
                            })
                            .await;
                        match probed {
                            Ok(true) => State::Done,
                            Ok(false) => {
                                warn!(
                                    "object {} not present after upload, restarting",
                                    object.oid
                                );
                                last = Some((UploadStep::Verify, not_present(&object)));
                                break false;
                            }
                            Err(err) => {
                                last = Some((
                                    UploadStep::Verify,
                                    restartable(UploadStep::Verify, err)?,
                                ));
                                break false;
                            }
                        }
                    }

                    State::Done => break true,
                };
            };

            if finished {
                if let Some(outcome) = outcome {
                    return Ok(outcome);
                }
            }
        }

        let (step, last) = last.unwrap_or((UploadStep::Verify, not_present(&object)));
        Err(UploadError::Exhausted {
            step,
            attempts: self.config.lfs_attempts,
            last,
        })
    }
}

/// Transfer responses carrying a machine-readable error abort the upload
/// immediately; anything else is worth another attempt.
fn transfer_retryable(err: &RepoError) -> bool {
    match err {
        RepoError::Status { body, .. } if !err.is_transient() => {
            LfsErrorMessage::parse(body).is_none()
        }
        other => other.is_transient(),
    }
}

/// Decide what a failed repository call means for the cycle: auth and other
/// non-retryable rejections abort the whole upload, budget exhaustion hands
/// back the last error so the cycle can restart.
fn restartable(step: UploadStep, err: RetryError<RepoError>) -> Result<RepoError, UploadError> {
    match err {
        RetryError::Fatal {
            source: RepoError::AuthExpired,
            ..
        } => Err(UploadError::AuthExpired),
        RetryError::Fatal { source, .. } => Err(UploadError::Terminal { step, last: source }),
        RetryError::Exhausted { source, .. } => Ok(source),
    }
}

fn not_present(object: &LfsObject) -> RepoError {
    RepoError::Status {
        status: 404,
        body: format!(
            "object {} not available for download after upload",
            object.oid
        ),
    }
}

/// The batch endpoint hands back transfer headers verbatim, including a
/// `Transfer-Encoding` the raw PUT must not repeat — content length is not
/// chunked at this layer.
fn strip_transfer_encoding(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("transfer-encoding"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use githaul_core::digest::sha256_hex;
    use githaul_core::testing::MockRepoClient;

    fn blob(bytes: &[u8]) -> ContentBlob {
        ContentBlob {
            bytes: bytes.to_vec(),
            sha256: sha256_hex(bytes),
        }
    }

    fn quick_config(lfs_attempts: u32) -> EngineConfig {
        EngineConfig {
            lfs_attempts,
            commit_backoff_secs: 0,
            manifest_backoff_secs: 0,
            network_backoff_secs: 0,
            ..EngineConfig::default()
        }
    }

    fn push<'a>(client: &'a MockRepoClient, config: &'a EngineConfig) -> LfsPush<'a> {
        LfsPush {
            client,
            config,
            repo: "team/docs",
            namespace: "team/docs",
            branch: "main",
        }
    }

    #[tokio::test]
    async fn full_cycle_transfers_commits_and_verifies() {
        let client = MockRepoClient::new();
        let config = quick_config(4);
        let content = blob(b"large payload");

        let outcome = push(&client, &config)
            .push("assets/data.bin", &content, "Upload data.bin")
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Created);

        assert!(client.has_lfs_object(&content.sha256));
        let pointer = client.file("team/docs", "main", "assets/data.bin").unwrap();
        let parsed = PointerRecord::parse(&String::from_utf8(pointer).unwrap()).unwrap();
        assert_eq!(parsed.oid, content.sha256);
        assert_eq!(parsed.size, content.size());
        assert_eq!(client.call_count("transfer"), 1);
        assert_eq!(client.call_count("probe"), 1);
    }

    #[tokio::test]
    async fn present_object_skips_transfer() {
        let client = MockRepoClient::new();
        let config = quick_config(4);
        let content = blob(b"already stored");
        client.seed_lfs_object(&content.sha256, content.size());

        let outcome = push(&client, &config)
            .push("assets/dup.bin", &content, "Upload dup.bin")
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::Created);
        assert_eq!(client.call_count("transfer"), 0);
        // Pointer still lands for a path that never saw this object.
        assert!(client.file("team/docs", "main", "assets/dup.bin").is_some());
    }

    #[tokio::test]
    async fn lost_upload_is_retransferred_after_verify_failure() {
        let client = MockRepoClient::new();
        let config = quick_config(4);
        let content = blob(b"flaky backend");
        client.drop_next_transfers(1);

        let outcome = push(&client, &config)
            .push("assets/flaky.bin", &content, "Upload flaky.bin")
            .await
            .unwrap();
        // First cycle's transfer was acknowledged but dropped; the verify
        // restart re-uploads.
        assert_eq!(outcome, CommitOutcome::Updated);
        assert_eq!(client.call_count("transfer"), 2);
        assert!(client.has_lfs_object(&content.sha256));
    }

    #[tokio::test]
    async fn machine_error_on_transfer_aborts_immediately() {
        let client = MockRepoClient::new();
        let config = quick_config(4);
        let content = blob(b"over quota");
        client.fail_next(
            "transfer",
            RepoError::Status {
                status: 403,
                body: r#"{"message":"storage quota exceeded"}"#.into(),
            },
        );

        let err = push(&client, &config)
            .push("assets/quota.bin", &content, "Upload quota.bin")
            .await
            .unwrap_err();
        match err {
            UploadError::Terminal { step, last } => {
                assert_eq!(step, UploadStep::Transfer);
                assert_eq!(last.status(), Some(403));
            }
            other => panic!("expected Terminal, got {other}"),
        }
        assert_eq!(client.call_count("transfer"), 1);
    }

    #[tokio::test]
    async fn exhausted_cycles_surface_verify_failure() {
        let client = MockRepoClient::new();
        let config = quick_config(2);
        let content = blob(b"never durable");
        client.drop_next_transfers(10);

        let err = push(&client, &config)
            .push("assets/lost.bin", &content, "Upload lost.bin")
            .await
            .unwrap_err();
        match err {
            UploadError::Exhausted {
                step,
                attempts,
                last,
            } => {
                assert_eq!(step, UploadStep::Verify);
                assert_eq!(attempts, 2);
                assert_eq!(last.status(), Some(404));
            }
            other => panic!("expected Exhausted, got {other}"),
        }
        assert_eq!(client.call_count("transfer"), 2);
    }

    #[test]
    fn transfer_encoding_is_stripped_case_insensitively() {
        let headers = HashMap::from([
            ("Authorization".to_string(), "RemoteAuth x".to_string()),
            ("transfer-encoding".to_string(), "chunked".to_string()),
        ]);
        let stripped = strip_transfer_encoding(&headers);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains_key("Authorization"));
    }
}
