//! Change request data model.

use std::fmt;

use chrono::{DateTime, Utc};
use flux_core::{ChangeRequestId, FileDiff, SelfModDiff};
use serde::{Deserialize, Serialize};

/// What to do with a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Write a new file.
    Create,
    /// Replace an existing file's content.
    Modify,
    /// Remove a file.
    Delete,
}

impl ChangeAction {
    /// Parse the model's spelling; `None` for anything else.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

/// One validated file operation.
///
/// `path` is already cleaned and relative to the working tree root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Cleaned, repository-relative path.
    pub path: String,
    /// Operation.
    pub action: ChangeAction,
    /// Full new content; `None` only for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
}

/// Review state of a change request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved and handed to the filesystem. Terminal.
    Approved,
    /// Discarded. Terminal.
    Rejected,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

/// A proposed patch set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Unique identifier.
    pub id: ChangeRequestId,
    /// Model-written summary.
    pub description: String,
    /// Operations in application order.
    pub changes: Vec<FileChange>,
    /// One diff per change, same order.
    pub diffs: Vec<FileDiff>,
    /// Review state.
    pub status: ChangeStatus,
    /// When the proposal was stored.
    pub created_at: DateTime<Utc>,
}

impl ChangeRequest {
    /// Review payload sent to the client.
    pub fn diff_message(&self) -> SelfModDiff {
        SelfModDiff {
            request_id: self.id.to_string(),
            description: self.description.clone(),
            diffs: self.diffs.clone(),
        }
    }
}
