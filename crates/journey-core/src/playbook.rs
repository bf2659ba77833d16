//! Stored playbook versions and the slot schema shared with node definitions.
//!
//! The parsed, indexed form of a playbook lives in `journey-playbook`; this
//! module only holds what the store persists and what slots copy from their
//! node definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Slot schema ─────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
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
pub enum Multiplicity {
  #[default]
  Single,
  Multi,
}

/// The declaration of an evidence slot, as written in the playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
  pub slot_key:       String,
  pub required:       bool,
  pub multiplicity:   Multiplicity,
  /// Accepted MIME types. `type/*` matches any subtype; an empty list
  /// accepts everything.
  pub mime_whitelist: Vec<String>,
  /// Cap on active attachments for multi slots. `None` is unbounded.
  pub max_files:      Option<u32>,
}

impl SlotSpec {
  /// Maximum number of simultaneously active attachments, if any.
  pub fn active_limit(&self) -> Option<u32> {
    match self.multiplicity {
      Multiplicity::Single => Some(1),
      Multiplicity::Multi => self.max_files,
    }
  }

  pub fn accepts_mime(&self, mime: &str) -> bool {
    if self.mime_whitelist.is_empty() {
      return true;
    }
    let essence = mime.split(';').next().unwrap_or_default().trim();
    self.mime_whitelist.iter().any(|allowed| mime_matches(allowed, essence))
  }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
  match pattern.strip_suffix("/*") {
    Some(top) => mime
      .split_once('/')
      .is_some_and(|(t, _)| t.eq_ignore_ascii_case(top)),
    None => pattern.eq_ignore_ascii_case(mime),
  }
}

// ─── Stored versions ─────────────────────────────────────────────────────────

/// A published playbook document as the store keeps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookRecord {
  pub version_id:  Uuid,
  pub tenant_id:   Uuid,
  pub playbook_id: String,
  pub version:     String,
  /// Hex SHA-256 of `raw_json`.
  pub checksum:    String,
  pub raw_json:    String,
  pub created_at:  DateTime<Utc>,
}

/// Input to [`JourneyStore::publish_playbook`](crate::store::JourneyStore::publish_playbook).
#[derive(Debug, Clone)]
pub struct NewPlaybookRecord {
  pub tenant_id:   Uuid,
  pub playbook_id: String,
  pub version:     String,
  pub checksum:    String,
  pub raw_json:    String,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slot(mime: &[&str]) -> SlotSpec {
    SlotSpec {
      slot_key:       "cv".into(),
      required:       true,
      multiplicity:   Multiplicity::Single,
      mime_whitelist: mime.iter().map(|m| m.to_string()).collect(),
      max_files:      None,
    }
  }

  #[test]
  fn exact_and_wildcard_mime() {
    let s = slot(&["application/pdf", "image/*"]);
    assert!(s.accepts_mime("application/pdf"));
    assert!(s.accepts_mime("Application/PDF; charset=binary"));
    assert!(s.accepts_mime("image/jpeg"));
    assert!(!s.accepts_mime("application/zip"));
  }

  #[test]
  fn empty_whitelist_accepts_anything() {
    assert!(slot(&[]).accepts_mime("text/plain"));
  }

  #[test]
  fn single_slots_hold_one() {
    let mut s = slot(&[]);
    assert_eq!(s.active_limit(), Some(1));
    s.multiplicity = Multiplicity::Multi;
    assert_eq!(s.active_limit(), None);
    s.max_files = Some(3);
    assert_eq!(s.active_limit(), Some(3));
  }
}
