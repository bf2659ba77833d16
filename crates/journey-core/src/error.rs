//! Error types for `journey-core`.
//!
//! [`Error`] is the error every engine call surfaces to its caller. Variants
//! carry the identifiers a caller needs to render or react to the failure;
//! [`Error::kind`] collapses them into the coarse [`ErrorKind`] taxonomy that
//! callers are expected to branch on.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::state::NodeState;

/// Coarse error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  NotFound,
  Unauthorized,
  InvalidTransition,
  PrerequisiteUnsatisfied,
  IncompleteSubmission,
  MimeRejected,
  MultiplicityExceeded,
  OutcomeNotAllowed,
  ConcurrentTransition,
  ValidationError,
  Transient,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("node instance not found: {0}")]
  InstanceNotFound(Uuid),

  #[error("attachment not found: {0}")]
  AttachmentNotFound(Uuid),

  #[error("slot {slot_key:?} is not declared on instance {instance_id}")]
  SlotNotFound { instance_id: Uuid, slot_key: String },

  #[error("node {slug:?} is not defined in playbook version {version_id}")]
  NodeNotFound { version_id: Uuid, slug: String },

  #[error("playbook version not found: {0}")]
  PlaybookNotFound(Uuid),

  #[error("tenant {0} has no active playbook")]
  NoActivePlaybook(Uuid),

  #[error("user {user_id} is not authorized: {reason}")]
  Unauthorized { user_id: Uuid, reason: String },

  #[error("condition {condition:?} is not met by the current form")]
  ConditionNotMet { condition: String },

  #[error("transition {from} -> {to} is not allowed")]
  InvalidTransition { from: NodeState, to: NodeState },

  #[error("evidence cannot change while the instance is {state}")]
  EvidenceLocked { state: NodeState },

  #[error("node {node:?} has unsatisfied prerequisites: {missing:?}")]
  PrerequisiteUnsatisfied { node: String, missing: Vec<String> },

  #[error(
    "submission incomplete: missing slots {missing_slots:?}, form saved: \
     {has_form}"
  )]
  IncompleteSubmission {
    missing_slots: Vec<String>,
    has_form:      bool,
  },

  #[error("no form revision or attachment since the instance was returned")]
  NoChangesSinceReturn,

  #[error("mime type {mime:?} is not accepted by slot {slot_key:?}")]
  MimeRejected { slot_key: String, mime: String },

  #[error("slot {slot_key:?} already holds {limit} active attachment(s)")]
  MultiplicityExceeded { slot_key: String, limit: u32 },

  #[error("outcome {value:?} is not allowed for node {node:?}")]
  OutcomeNotAllowed { node: String, value: String },

  #[error("instance {instance_id} is no longer {expected}")]
  ConcurrentTransition {
    instance_id: Uuid,
    expected:    NodeState,
  },

  #[error("a review note is required")]
  ReviewNoteRequired,

  #[error("file of {size} bytes exceeds the {limit} byte limit")]
  FileTooLarge { size: u64, limit: u64 },

  #[error("playbook validation failed: {}", .0.join("; "))]
  Validation(Vec<String>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("transient failure: {0}")]
  Transient(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap any lower-level failure as [`ErrorKind::Transient`].
  pub fn transient(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Transient(Box::new(e))
  }

  pub fn unauthorized(user_id: Uuid, reason: impl Into<String>) -> Self {
    Self::Unauthorized { user_id, reason: reason.into() }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InstanceNotFound(_)
      | Self::AttachmentNotFound(_)
      | Self::SlotNotFound { .. }
      | Self::NodeNotFound { .. }
      | Self::PlaybookNotFound(_)
      | Self::NoActivePlaybook(_) => ErrorKind::NotFound,
      Self::Unauthorized { .. } | Self::ConditionNotMet { .. } => {
        ErrorKind::Unauthorized
      }
      Self::InvalidTransition { .. } | Self::EvidenceLocked { .. } => {
        ErrorKind::InvalidTransition
      }
      Self::PrerequisiteUnsatisfied { .. } => {
        ErrorKind::PrerequisiteUnsatisfied
      }
      Self::IncompleteSubmission { .. } | Self::NoChangesSinceReturn => {
        ErrorKind::IncompleteSubmission
      }
      Self::MimeRejected { .. } => ErrorKind::MimeRejected,
      Self::MultiplicityExceeded { .. } => ErrorKind::MultiplicityExceeded,
      Self::OutcomeNotAllowed { .. } => ErrorKind::OutcomeNotAllowed,
      Self::ConcurrentTransition { .. } => ErrorKind::ConcurrentTransition,
      Self::ReviewNoteRequired
      | Self::FileTooLarge { .. }
      | Self::Validation(_) => ErrorKind::ValidationError,
      Self::Serialization(_) | Self::Transient(_) => ErrorKind::Transient,
    }
  }

  /// Whether a caller may retry the same call after re-reading state.
  pub fn is_retryable(&self) -> bool {
    matches!(self.kind(), ErrorKind::ConcurrentTransition | ErrorKind::Transient)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_group_variants() {
    let err = Error::SlotNotFound {
      instance_id: Uuid::new_v4(),
      slot_key:    "cv".into(),
    };
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = Error::ConditionNotMet { condition: "rp_required".into() };
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let err = Error::NoChangesSinceReturn;
    assert_eq!(err.kind(), ErrorKind::IncompleteSubmission);
  }

  #[test]
  fn only_conflicts_and_transients_retry() {
    let conflict = Error::ConcurrentTransition {
      instance_id: Uuid::new_v4(),
      expected:    NodeState::Active,
    };
    assert!(conflict.is_retryable());
    assert!(!Error::ReviewNoteRequired.is_retryable());
    assert_eq!(ErrorKind::ConcurrentTransition.to_string(), "concurrent_transition");
  }
}
