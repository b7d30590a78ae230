use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::assemble::ContentBlob;

/// URL identifying the pointer-file format version.
pub const POINTER_VERSION_URL: &str = "https://git-lfs.github.com/spec/v1";

/// Content-addressed identity of one large object: `{oid, size}`.
///
/// Derived once from a [`ContentBlob`] and reused verbatim for upload
/// negotiation and later download verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LfsObject {
    pub oid: String,
    pub size: u64,
}

impl LfsObject {
    pub fn of(blob: &ContentBlob) -> Self {
        Self {
            oid: blob.sha256.clone(),
            size: blob.size(),
        }
    }
}

/// The textual stand-in committed to the repository in place of the large
/// file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRecord {
    pub oid: String,
    pub size: u64,
}

impl PointerRecord {
    pub fn new(object: &LfsObject) -> Self {
        Self {
            oid: object.oid.clone(),
            size: object.size,
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "version {}\noid sha256:{}\nsize {}\n",
            POINTER_VERSION_URL, self.oid, self.size
        )
    }

    /// Parse pointer text back into its fields. Returns `None` for anything
    /// that is not a well-formed sha256 pointer.
    pub fn parse(text: &str) -> Option<Self> {
        let mut version = None;
        let mut oid = None;
        let mut size = None;
        for line in text.lines() {
            if let Some(v) = line.strip_prefix("version ") {
                version = Some(v.trim());
            } else if let Some(o) = line.strip_prefix("oid sha256:") {
                oid = Some(o.trim().to_string());
            } else if let Some(s) = line.strip_prefix("size ") {
                size = s.trim().parse::<u64>().ok();
            }
        }
        match (version, oid, size) {
            (Some(v), Some(oid), Some(size)) if v == POINTER_VERSION_URL => {
                Some(Self { oid, size })
            }
            _ => None,
        }
    }
}

/// Which side of the batch protocol is being negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfsOperation {
    Upload,
    Download,
}

impl LfsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LfsOperation::Upload => "upload",
            LfsOperation::Download => "download",
        }
    }
}

// ── Batch wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BatchRequest {
    pub operation: String,
    pub transfers: Vec<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub refspec: Option<BatchRef>,
    pub objects: Vec<LfsObject>,
}

impl BatchRequest {
    pub fn single(op: LfsOperation, object: &LfsObject, refspec: Option<&str>) -> Self {
        Self {
            operation: op.as_str().to_string(),
            transfers: vec!["basic".to_string()],
            refspec: refspec.map(|name| BatchRef {
                name: name.to_string(),
            }),
            objects: vec![object.clone()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    pub objects: Vec<BatchObjectResult>,
}

#[derive(Debug, Deserialize)]
pub struct BatchObjectResult {
    pub oid: String,
    pub size: u64,
    #[serde(default)]
    pub actions: Option<BatchActions>,
    #[serde(default)]
    pub error: Option<BatchObjectError>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchActions {
    #[serde(default)]
    pub upload: Option<LfsAction>,
    #[serde(default)]
    pub verify: Option<LfsAction>,
    #[serde(default)]
    pub download: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
pub struct BatchObjectError {
    pub code: u16,
    pub message: String,
}

/// One transfer action handed back by the batch endpoint: where to send (or
/// fetch) the bytes, and which headers to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LfsAction {
    pub href: String,
    #[serde(default)]
    pub header: HashMap<String, String>,
}

/// Machine-readable error body some LFS endpoints attach to non-success
/// transfer responses.
#[derive(Debug, Deserialize)]
pub struct LfsErrorMessage {
    pub message: String,
}

impl LfsErrorMessage {
    /// Extract the machine error from a response body, if it carries one.
    pub fn parse(body: &str) -> Option<String> {
        serde_json::from_str::<LfsErrorMessage>(body)
            .ok()
            .map(|e| e.message)
    }
}

/// Semantic outcome of one batch negotiation, extracted from the wire
/// response. A missing `upload` action after an upload negotiation means the
/// server already holds the object byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct ObjectActions {
    pub upload: Option<LfsAction>,
    pub verify: Option<LfsAction>,
    pub download: Option<LfsAction>,
}

impl From<BatchActions> for ObjectActions {
    fn from(actions: BatchActions) -> Self {
        Self {
            upload: actions.upload,
            verify: actions.verify,
            download: actions.download,
        }
    }
}
