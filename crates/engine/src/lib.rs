pub mod commit;
pub mod config;
pub mod error;
pub mod health;
pub mod manifest_sync;
pub mod negotiate;
pub mod reaper;
pub mod retry;
pub mod upload;

pub use commit::{CommitOutcome, commit_file};
pub use config::{EngineConfig, load_config};
pub use error::{ResponseClass, UploadError, UploadStep};
pub use health::run_auth_probe;
pub use manifest_sync::ManifestSync;
pub use negotiate::LfsPush;
pub use reaper::run_reaper;
pub use retry::{RetryError, RetryPolicy, with_retry};
pub use upload::{ChunkOutcome, ChunkRequest, UploadEngine};
