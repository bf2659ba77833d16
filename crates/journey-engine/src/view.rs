//! Read models assembled from several store calls.

use journey_core::{
  instance::NodeInstance,
  submission::{Attachment, FormRevision, Outcome, Slot},
};
use serde::Serialize;

/// One slot with every attachment it has held, superseded ones included.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
  #[serde(flatten)]
  pub slot:        Slot,
  pub attachments: Vec<Attachment>,
}

impl SlotView {
  pub fn active(&self) -> impl Iterator<Item = &Attachment> {
    self.attachments.iter().filter(|a| a.is_active)
  }
}

/// An instance as a reviewer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
  pub instance: NodeInstance,
  pub slots:    Vec<SlotView>,
  /// Latest form revision.
  pub form:     Option<FormRevision>,
  pub outcomes: Vec<Outcome>,
  /// Required slot keys without a live attachment.
  pub missing:  Vec<String>,
}

impl Submission {
  pub fn slot(&self, key: &str) -> Option<&SlotView> { self.slots.iter().find(|s| s.slot.key() == key) }

  pub fn is_complete(&self) -> bool { self.missing.is_empty() && self.instance.has_form() }
}
