//! Append-only edit history for a single document.
//!
//! ```text
//! steps:   [ s0 | s1 | s2 | s3 | s4 ]
//!                       ▲              ▲
//!              steps_since(2)     version() == 5
//! ```
//!
//! The version is the number of committed steps. History is never
//! rewritten, so a version is a stable position clients can sync to.
//! Exclusive/shared access is provided by the owner (see
//! [`SharedHistory`](crate::store::SharedHistory)); this type itself is
//! plain data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// One opaque unit of edit content, tagged with its submitting client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "clientID")]
    pub client_id: u64,
    /// Payload is never inspected by the server.
    pub step: Value,
}

/// Steps after some version, plus the document's current version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySlice {
    #[serde(rename = "fileName")]
    pub doc_id: String,
    pub version: usize,
    pub steps: Vec<Step>,
}

/// The ordered step log for one document.
#[derive(Debug, Clone)]
pub struct EditHistory {
    id: String,
    steps: Vec<Step>,
}

impl EditHistory {
    /// Create an empty history.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    /// Document identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of steps ever committed.
    pub fn version(&self) -> usize {
        self.steps.len()
    }

    /// Steps committed after `version`.
    ///
    /// Empty when `version` is the current version.
    pub fn steps_since(&self, version: i64) -> SyncResult<&[Step]> {
        if version < 0 {
            return Err(SyncError::InvalidVersion(version));
        }
        let current = self.version();
        let start = usize::try_from(version).unwrap_or(usize::MAX);
        if start > current {
            return Err(SyncError::VersionAhead {
                requested: version,
                current,
            });
        }
        Ok(&self.steps[start..])
    }

    /// Same as [`steps_since`](Self::steps_since), packaged for a response.
    pub fn slice_since(&self, version: i64) -> SyncResult<HistorySlice> {
        let steps = self.steps_since(version)?.to_vec();
        Ok(HistorySlice {
            doc_id: self.id.clone(),
            version: self.version(),
            steps,
        })
    }

    /// Append `steps`, each tagged with `client_id`.
    ///
    /// Appending nothing is valid and leaves the version unchanged.
    pub fn append_steps(&mut self, steps: Vec<Value>, client_id: u64) {
        self.steps.reserve(steps.len());
        self.steps
            .extend(steps.into_iter().map(|step| Step { client_id, step }));
    }
}
