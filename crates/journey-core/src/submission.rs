//! The submission model: slots, attachments, form revisions and outcomes.
//!
//! Everything here is owned by exactly one node instance. Form revisions and
//! outcomes are append-only; attachments only ever change review metadata
//! and their `is_active` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{instance::AttachmentCounts, playbook::SlotSpec};

// ─── Slots ───────────────────────────────────────────────────────────────────

/// A slot materialized on an instance from its node's declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
  pub slot_id:     Uuid,
  pub instance_id: Uuid,
  #[serde(flatten)]
  pub spec:        SlotSpec,
}

impl Slot {
  pub fn key(&self) -> &str { &self.spec.slot_key }
}

// ─── Attachments ─────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttachmentStatus {
  Submitted,
  Approved,
  ApprovedWithComments,
  Rejected,
}

impl AttachmentStatus {
  pub fn is_approved(self) -> bool {
    matches!(self, Self::Approved | Self::ApprovedWithComments)
  }
}

/// A reviewer's decision on one attachment.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
  Approve,
  ApproveWithComments,
  Reject,
}

impl Verdict {
  pub fn status(self) -> AttachmentStatus {
    match self {
      Self::Approve => AttachmentStatus::Approved,
      Self::ApproveWithComments => AttachmentStatus::ApprovedWithComments,
      Self::Reject => AttachmentStatus::Rejected,
    }
  }
}

/// What the document store hands back for an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentVersion {
  pub document_version_id: Uuid,
  pub mime:                String,
  pub size_bytes:          u64,
  pub checksum:            String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
  pub attachment_id:                Uuid,
  pub slot_id:                      Uuid,
  pub instance_id:                  Uuid,
  pub slot_key:                     String,
  pub document_version_id:          Uuid,
  pub mime:                         String,
  pub filename:                     String,
  pub size_bytes:                   u64,
  pub status:                       AttachmentStatus,
  pub is_active:                    bool,
  pub review_note:                  Option<String>,
  pub approved_by:                  Option<Uuid>,
  pub approved_at:                  Option<DateTime<Utc>>,
  /// Annotated copy returned by the reviewer. The original stays untouched.
  pub reviewed_document_version_id: Option<Uuid>,
  pub reviewed_by:                  Option<Uuid>,
  pub reviewed_at:                  Option<DateTime<Utc>>,
  pub attached_by:                  Uuid,
  pub attached_at:                  DateTime<Utc>,
}

impl Attachment {
  /// Counts toward completeness: active and not rejected.
  pub fn is_live(&self) -> bool {
    self.is_active && self.status != AttachmentStatus::Rejected
  }
}

/// Required slots that lack a live attachment, in slot order.
pub fn missing_required(slots: &[Slot], attachments: &[Attachment]) -> Vec<String> {
  slots
    .iter()
    .filter(|s| s.spec.required)
    .filter(|s| {
      !attachments
        .iter()
        .any(|a| a.slot_id == s.slot_id && a.is_live())
    })
    .map(|s| s.spec.slot_key.clone())
    .collect()
}

/// Aggregate review counts over the active attachments.
pub fn count_attachments<'a>(
  attachments: impl IntoIterator<Item = &'a Attachment>,
) -> AttachmentCounts {
  attachments
    .into_iter()
    .filter(|a| a.is_active)
    .fold(AttachmentCounts::default(), |mut c, a| {
      match a.status {
        AttachmentStatus::Submitted => c.submitted += 1,
        AttachmentStatus::Approved | AttachmentStatus::ApprovedWithComments => {
          c.approved += 1
        }
        AttachmentStatus::Rejected => c.rejected += 1,
      }
      c
    })
}

// ─── Form revisions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRevision {
  pub instance_id: Uuid,
  /// Starts at 1 and increases by one per save.
  pub rev:         u32,
  pub form_data:   serde_json::Value,
  pub edited_by:   Uuid,
  pub created_at:  DateTime<Utc>,
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
  pub outcome_id:  Uuid,
  pub instance_id: Uuid,
  pub value:       String,
  pub decided_by:  Uuid,
  pub note:        Option<String>,
  pub created_at:  DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::playbook::Multiplicity;

  fn slot(key: &str, required: bool) -> Slot {
    Slot {
      slot_id:     Uuid::new_v4(),
      instance_id: Uuid::nil(),
      spec:        SlotSpec {
        slot_key: key.into(),
        required,
        multiplicity: Multiplicity::Single,
        mime_whitelist: vec![],
        max_files: None,
      },
    }
  }

  fn attachment(slot: &Slot, status: AttachmentStatus, active: bool) -> Attachment {
    Attachment {
      attachment_id:                Uuid::new_v4(),
      slot_id:                      slot.slot_id,
      instance_id:                  slot.instance_id,
      slot_key:                     slot.key().to_owned(),
      document_version_id:          Uuid::new_v4(),
      mime:                         "application/pdf".into(),
      filename:                     "cv.pdf".into(),
      size_bytes:                   10,
      status,
      is_active:                    active,
      review_note:                  None,
      approved_by:                  None,
      approved_at:                  None,
      reviewed_document_version_id: None,
      reviewed_by:                  None,
      reviewed_at:                  None,
      attached_by:                  Uuid::nil(),
      attached_at:                  Utc::now(),
    }
  }

  #[test]
  fn rejected_and_inactive_do_not_satisfy() {
    let cv = slot("cv", true);
    let extra = slot("extra", false);
    let slots = vec![cv.clone(), extra];

    assert_eq!(missing_required(&slots, &[]), vec!["cv"]);

    let rejected = attachment(&cv, AttachmentStatus::Rejected, true);
    let stale = attachment(&cv, AttachmentStatus::Approved, false);
    assert_eq!(missing_required(&slots, &[rejected, stale]), vec!["cv"]);

    let live = attachment(&cv, AttachmentStatus::Submitted, true);
    assert!(missing_required(&slots, &[live]).is_empty());
  }

  #[test]
  fn counts_only_active() {
    let cv = slot("cv", true);
    let all = vec![
      attachment(&cv, AttachmentStatus::Submitted, true),
      attachment(&cv, AttachmentStatus::ApprovedWithComments, true),
      attachment(&cv, AttachmentStatus::Approved, true),
      attachment(&cv, AttachmentStatus::Rejected, false),
    ];
    let counts = count_attachments(&all);
    assert_eq!(counts, AttachmentCounts { submitted: 1, approved: 2, rejected: 0 });
  }
}
