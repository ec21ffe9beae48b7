//! Action records - what the engine did to one entry

use super::FailureKind;
use serde::Serialize;

/// Kind of action taken for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Copy new file or overwrite a differing one
    Copy,

    /// Create a directory present only on the source
    CreateDirectory,

    /// Delete a file present only on the target
    DeleteFile,

    /// Delete a directory present only on the target
    DeleteDirectory,

    /// Skip (files identical)
    Skip,

    /// Structural problem not tied to a mutating operation
    Error,
}

impl ActionKind {
    /// Label used in transcripts
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Copy => "Copy",
            ActionKind::CreateDirectory => "Mkdir",
            ActionKind::DeleteFile => "Delete",
            ActionKind::DeleteDirectory => "Rmdir",
            ActionKind::Skip => "Skip",
            ActionKind::Error => "Error",
        }
    }

    /// Whether this kind mutates the target
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ActionKind::Skip | ActionKind::Error)
    }
}

/// Result of an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ActionOutcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
    Cancelled,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

/// One line of the sync transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    /// Full path of the entry the action applied to
    pub path: String,
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    /// Bytes moved, for copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

impl ActionRecord {
    pub fn succeeded(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            outcome: ActionOutcome::Succeeded,
            bytes: None,
        }
    }

    pub fn failed(
        kind: ActionKind,
        path: impl Into<String>,
        failure: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            outcome: ActionOutcome::Failed {
                kind: failure,
                message: message.into(),
            },
            bytes: None,
        }
    }

    pub fn cancelled(kind: ActionKind, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            outcome: ActionOutcome::Cancelled,
            bytes: None,
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }
}
