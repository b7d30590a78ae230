//! In-memory [`RepoClient`] double for engine and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::lfs::{LfsAction, LfsObject, LfsOperation, ObjectActions};
use crate::repo::{RepoClient, RepoError};

type FileKey = (String, String, String); // (repo, branch, path)

#[derive(Default)]
struct MockState {
    files: HashMap<FileKey, Vec<u8>>,
    lfs_objects: HashMap<String, u64>,
    failures: HashMap<String, VecDeque<RepoError>>,
    drop_transfers: u32,
    calls: Vec<String>,
}

/// Scripted hosting backend: contents live in a map, LFS objects in a
/// content-addressed set, and failures can be queued per operation name to
/// exercise retry paths.
#[derive(Default)]
pub struct MockRepoClient {
    state: Mutex<MockState>,
}

impl MockRepoClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, repo: &str, branch: &str, path: &str, content: &[u8]) {
        let mut state = self.lock();
        state.files.insert(
            (repo.to_string(), branch.to_string(), path.to_string()),
            content.to_vec(),
        );
    }

    pub fn file(&self, repo: &str, branch: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(repo.to_string(), branch.to_string(), path.to_string()))
            .cloned()
    }

    pub fn has_lfs_object(&self, oid: &str) -> bool {
        self.lock().lfs_objects.contains_key(oid)
    }

    pub fn seed_lfs_object(&self, oid: &str, size: u64) {
        self.lock().lfs_objects.insert(oid.to_string(), size);
    }

    /// Queue an error for the next call of `op` (one of `head`, `read`,
    /// `create`, `update`, `negotiate`, `transfer`, `probe`). Queued errors
    /// are consumed in FIFO order before the real behavior runs.
    pub fn fail_next(&self, op: &str, err: RepoError) {
        self.lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Acknowledge the next `n` transfers without storing the object, as a
    /// backend that loses uploads after a success response would.
    pub fn drop_next_transfers(&self, n: u32) {
        self.lock().drop_transfers = n;
    }

    /// Every call made so far, as `op:detail` strings, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock client mutex poisoned")
    }

    fn begin(&self, op: &str, detail: &str) -> Result<(), RepoError> {
        let mut state = self.lock();
        state.calls.push(format!("{op}:{detail}"));
        if let Some(queue) = state.failures.get_mut(op) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }
}

fn object_href(oid: &str) -> String {
    format!("mock://lfs/{oid}")
}

fn oid_of_href(href: &str) -> Result<String, RepoError> {
    href.strip_prefix("mock://lfs/")
        .map(str::to_string)
        .ok_or_else(|| RepoError::InvalidResponse {
            message: format!("unexpected action href {href}"),
        })
}

#[async_trait]
impl RepoClient for MockRepoClient {
    async fn head_file(&self, repo: &str, path: &str, branch: &str) -> Result<bool, RepoError> {
        self.begin("head", path)?;
        Ok(self
            .lock()
            .files
            .contains_key(&(repo.to_string(), branch.to_string(), path.to_string())))
    }

    async fn read_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<Vec<u8>>, RepoError> {
        self.begin("read", path)?;
        Ok(self.file(repo, branch, path))
    }

    async fn create_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError> {
        let _ = message;
        self.begin("create", path)?;
        let key = (repo.to_string(), branch.to_string(), path.to_string());
        let mut state = self.lock();
        if state.files.contains_key(&key) {
            // The contents API rejects a create against an existing path.
            return Err(RepoError::Status {
                status: 422,
                body: format!("file {path} already exists"),
            });
        }
        state.files.insert(key, content.to_vec());
        Ok(())
    }

    async fn update_file(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), RepoError> {
        let _ = message;
        self.begin("update", path)?;
        let key = (repo.to_string(), branch.to_string(), path.to_string());
        let mut state = self.lock();
        if !state.files.contains_key(&key) {
            return Err(RepoError::Status {
                status: 404,
                body: format!("file {path} does not exist"),
            });
        }
        state.files.insert(key, content.to_vec());
        Ok(())
    }

    async fn batch_negotiate(
        &self,
        namespace: &str,
        op: LfsOperation,
        object: &LfsObject,
        refspec: &str,
    ) -> Result<ObjectActions, RepoError> {
        let _ = (namespace, refspec);
        self.begin("negotiate", &format!("{}:{}", op.as_str(), object.oid))?;
        let present = self.lock().lfs_objects.contains_key(&object.oid);
        let action = |kind: &str| LfsAction {
            href: object_href(&object.oid),
            header: HashMap::from([
                ("Authorization".to_string(), "RemoteAuth mock".to_string()),
                // Deliberately hostile: callers must strip this before the
                // raw PUT.
                ("Transfer-Encoding".to_string(), format!("chunked;{kind}")),
            ]),
        };
        let actions = match op {
            LfsOperation::Upload if present => ObjectActions::default(),
            LfsOperation::Upload => ObjectActions {
                upload: Some(action("upload")),
                verify: Some(action("verify")),
                download: None,
            },
            LfsOperation::Download if present => ObjectActions {
                download: Some(action("download")),
                ..ObjectActions::default()
            },
            LfsOperation::Download => ObjectActions::default(),
        };
        Ok(actions)
    }

    async fn transfer_bytes(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
        bytes: &[u8],
    ) -> Result<(), RepoError> {
        let oid = oid_of_href(href)?;
        self.begin("transfer", &oid)?;
        if headers.keys().any(|k| k.eq_ignore_ascii_case("transfer-encoding")) {
            return Err(RepoError::Status {
                status: 400,
                body: "chunked transfer encoding not supported".to_string(),
            });
        }
        let mut state = self.lock();
        if state.drop_transfers > 0 {
            state.drop_transfers -= 1;
            return Ok(());
        }
        state.lfs_objects.insert(oid, bytes.len() as u64);
        Ok(())
    }

    async fn probe_exists(
        &self,
        href: &str,
        headers: &HashMap<String, String>,
    ) -> Result<bool, RepoError> {
        let _ = headers;
        let oid = oid_of_href(href)?;
        self.begin("probe", &oid)?;
        Ok(self.lock().lfs_objects.contains_key(&oid))
    }
}
