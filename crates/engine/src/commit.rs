use githaul_core::repo::{RepoClient, RepoError};
use tracing::debug;

use crate::error::{UploadError, UploadStep, repo_failure};
use crate::retry::{RetryPolicy, with_retry};

/// Whether the commit wrote a new path or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Created,
    Updated,
}

/// Commit a byte payload to `path@branch`, creating or updating as needed.
///
/// The existence probe and the write run inside one retry loop, so a path
/// created by a concurrent writer between probe and write is picked up as an
/// update on the next attempt. Validation-class rejections are retried too:
/// the hosting backend is known to transiently reject valid payloads under
/// load, so a 400/422 only becomes terminal when the budget runs out.
///
/// This is the single write path for both upload modes — raw content for
/// direct uploads, pointer text for LFS.
pub async fn commit_file(
    client: &dyn RepoClient,
    policy: &RetryPolicy,
    repo: &str,
    path: &str,
    branch: &str,
    content: &[u8],
    message: &str,
) -> Result<CommitOutcome, UploadError> {
    let retryable = |e: &RepoError| e.is_transient() || e.is_validation();
    let attempt = move || async move {
        if client.head_file(repo, path, branch).await? {
            client
                .update_file(repo, path, branch, content, message)
                .await?;
            Ok(CommitOutcome::Updated)
        } else {
            client
                .create_file(repo, path, branch, content, message)
                .await?;
            Ok(CommitOutcome::Created)
        }
    };

    let outcome = with_retry("commit", policy, retryable, attempt)
        .await
        .map_err(|err| repo_failure(UploadStep::Commit, err))?;
    debug!("committed {path}@{branch} ({outcome:?})");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use githaul_core::repo::RepoError;
    use githaul_core::testing::MockRepoClient;
    use std::time::Duration;

    fn quick() -> RetryPolicy {
        RetryPolicy::new(5, Duration::ZERO)
    }

    #[tokio::test]
    async fn creates_when_absent_updates_when_present() {
        let client = MockRepoClient::new();
        let outcome = commit_file(
            &client,
            &quick(),
            "team/docs",
            "a.txt",
            "main",
            b"one",
            "Upload a.txt",
        )
        .await
        .unwrap();
        assert_eq!(outcome, CommitOutcome::Created);

        let outcome = commit_file(
            &client,
            &quick(),
            "team/docs",
            "a.txt",
            "main",
            b"two",
            "Upload a.txt",
        )
        .await
        .unwrap();
        assert_eq!(outcome, CommitOutcome::Updated);
        assert_eq!(client.file("team/docs", "main", "a.txt").unwrap(), b"two");
    }

    #[tokio::test]
    async fn transient_validation_rejection_is_retried() {
        let client = MockRepoClient::new();
        client.fail_next(
            "create",
            RepoError::Status {
                status: 400,
                body: "backend overloaded, payload rejected".into(),
            },
        );
        let outcome = commit_file(
            &client,
            &quick(),
            "team/docs",
            "b.txt",
            "main",
            b"payload",
            "Upload b.txt",
        )
        .await
        .unwrap();
        assert_eq!(outcome, CommitOutcome::Created);
        assert_eq!(client.call_count("create"), 2);
    }

    #[tokio::test]
    async fn persistent_validation_failure_exhausts_with_step_and_status() {
        let client = MockRepoClient::new();
        for _ in 0..5 {
            client.fail_next(
                "create",
                RepoError::Status {
                    status: 422,
                    body: "rejected".into(),
                },
            );
        }
        let err = commit_file(
            &client,
            &quick(),
            "team/docs",
            "c.txt",
            "main",
            b"payload",
            "Upload c.txt",
        )
        .await
        .unwrap_err();
        match err {
            UploadError::Exhausted {
                step,
                attempts,
                last,
            } => {
                assert_eq!(step, UploadStep::Commit);
                assert_eq!(attempts, 5);
                assert_eq!(last.status(), Some(422));
            }
            other => panic!("expected Exhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn auth_failure_is_never_retried() {
        let client = MockRepoClient::new();
        client.fail_next("head", RepoError::AuthExpired);
        let err = commit_file(
            &client,
            &quick(),
            "team/docs",
            "d.txt",
            "main",
            b"payload",
            "Upload d.txt",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::AuthExpired));
        assert_eq!(client.call_count("head"), 1);
    }
}
