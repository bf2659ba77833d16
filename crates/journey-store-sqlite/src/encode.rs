//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that ordering by the column equals ordering by time. Enums use their
//! snake_case names. UUIDs are stored as hyphenated lowercase strings.

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use journey_core::{
  event::NodeEvent,
  instance::{AttachmentCounts, JourneyState, NodeInstance},
  playbook::{PlaybookRecord, SlotSpec},
  submission::{Attachment, FormRevision, Outcome, Slot},
};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

/// Parse a snake_case enum column.
pub fn decode_enum<T>(s: &str, what: &str) -> Result<T>
where
  T: FromStr,
  T::Err: Display,
{
  s.parse()
    .map_err(|e| Error::Decode(format!("{what} {s:?}: {e}")))
}

fn decode_count(n: i64) -> u32 { u32::try_from(n).unwrap_or(u32::MAX) }

// ─── Playbooks ───────────────────────────────────────────────────────────────

pub const PLAYBOOK_COLUMNS: &str =
  "version_id, tenant_id, playbook_id, version, checksum, raw_json, created_at";

pub struct RawPlaybook {
  pub version_id:  String,
  pub tenant_id:   String,
  pub playbook_id: String,
  pub version:     String,
  pub checksum:    String,
  pub raw_json:    String,
  pub created_at:  String,
}

impl RawPlaybook {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version_id:  r.get(0)?,
      tenant_id:   r.get(1)?,
      playbook_id: r.get(2)?,
      version:     r.get(3)?,
      checksum:    r.get(4)?,
      raw_json:    r.get(5)?,
      created_at:  r.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<PlaybookRecord> {
    Ok(PlaybookRecord {
      version_id:  decode_uuid(&self.version_id)?,
      tenant_id:   decode_uuid(&self.tenant_id)?,
      playbook_id: self.playbook_id,
      version:     self.version,
      checksum:    self.checksum,
      raw_json:    self.raw_json,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

// ─── Instances ───────────────────────────────────────────────────────────────

pub const INSTANCE_COLUMNS: &str = "instance_id, tenant_id, user_id, \
  playbook_version_id, node_slug, state, current_rev, locale, edited, \
  submitted_count, approved_count, rejected_count, opened_at, submitted_at, \
  updated_at";

pub struct RawInstance {
  pub instance_id:         String,
  pub tenant_id:           String,
  pub user_id:             String,
  pub playbook_version_id: String,
  pub node_slug:           String,
  pub state:               String,
  pub current_rev:         i64,
  pub locale:              Option<String>,
  pub edited:              bool,
  pub submitted_count:     i64,
  pub approved_count:      i64,
  pub rejected_count:      i64,
  pub opened_at:           String,
  pub submitted_at:        Option<String>,
  pub updated_at:          String,
}

impl RawInstance {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      instance_id:         r.get(0)?,
      tenant_id:           r.get(1)?,
      user_id:             r.get(2)?,
      playbook_version_id: r.get(3)?,
      node_slug:           r.get(4)?,
      state:               r.get(5)?,
      current_rev:         r.get(6)?,
      locale:              r.get(7)?,
      edited:              r.get(8)?,
      submitted_count:     r.get(9)?,
      approved_count:      r.get(10)?,
      rejected_count:      r.get(11)?,
      opened_at:           r.get(12)?,
      submitted_at:        r.get(13)?,
      updated_at:          r.get(14)?,
    })
  }

  pub fn into_instance(self) -> Result<NodeInstance> {
    Ok(NodeInstance {
      instance_id:             decode_uuid(&self.instance_id)?,
      tenant_id:               decode_uuid(&self.tenant_id)?,
      user_id:                 decode_uuid(&self.user_id)?,
      playbook_version_id:     decode_uuid(&self.playbook_version_id)?,
      node_slug:               self.node_slug,
      state:                   decode_enum(&self.state, "node state")?,
      current_rev:             decode_count(self.current_rev),
      locale:                  self.locale,
      edited_since_transition: self.edited,
      counts:                  AttachmentCounts {
        submitted: decode_count(self.submitted_count),
        approved:  decode_count(self.approved_count),
        rejected:  decode_count(self.rejected_count),
      },
      opened_at:               decode_dt(&self.opened_at)?,
      submitted_at:            decode_opt_dt(self.submitted_at)?,
      updated_at:              decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Slots ───────────────────────────────────────────────────────────────────

pub const SLOT_COLUMNS: &str =
  "slot_id, instance_id, slot_key, required, multiplicity, mime_whitelist, max_files";

pub struct RawSlot {
  pub slot_id:        String,
  pub instance_id:    String,
  pub slot_key:       String,
  pub required:       bool,
  pub multiplicity:   String,
  pub mime_whitelist: String,
  pub max_files:      Option<i64>,
}

impl RawSlot {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      slot_id:        r.get(0)?,
      instance_id:    r.get(1)?,
      slot_key:       r.get(2)?,
      required:       r.get(3)?,
      multiplicity:   r.get(4)?,
      mime_whitelist: r.get(5)?,
      max_files:      r.get(6)?,
    })
  }

  pub fn into_slot(self) -> Result<Slot> {
    Ok(Slot {
      slot_id:     decode_uuid(&self.slot_id)?,
      instance_id: decode_uuid(&self.instance_id)?,
      spec:        SlotSpec {
        slot_key:       self.slot_key,
        required:       self.required,
        multiplicity:   decode_enum(&self.multiplicity, "multiplicity")?,
        mime_whitelist: serde_json::from_str(&self.mime_whitelist)?,
        max_files:      self.max_files.map(decode_count),
      },
    })
  }
}

// ─── Attachments ─────────────────────────────────────────────────────────────

/// Columns of `node_attachments a JOIN node_slots s`.
pub const ATTACHMENT_COLUMNS: &str = "a.attachment_id, a.slot_id, s.slot_key, \
  a.document_version_id, a.mime, a.filename, a.size_bytes, a.status, \
  a.is_active, a.review_note, a.approved_by, a.approved_at, \
  a.reviewed_document_version_id, a.reviewed_by, a.reviewed_at, \
  a.attached_by, a.attached_at, s.instance_id";

pub struct RawAttachment {
  pub attachment_id:                String,
  pub slot_id:                      String,
  pub slot_key:                     String,
  pub document_version_id:          String,
  pub mime:                         String,
  pub filename:                     String,
  pub size_bytes:                   i64,
  pub status:                       String,
  pub is_active:                    bool,
  pub review_note:                  Option<String>,
  pub approved_by:                  Option<String>,
  pub approved_at:                  Option<String>,
  pub reviewed_document_version_id: Option<String>,
  pub reviewed_by:                  Option<String>,
  pub reviewed_at:                  Option<String>,
  pub attached_by:                  String,
  pub attached_at:                  String,
  pub instance_id:                  String,
}

impl RawAttachment {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      attachment_id:                r.get(0)?,
      slot_id:                      r.get(1)?,
      slot_key:                     r.get(2)?,
      document_version_id:          r.get(3)?,
      mime:                         r.get(4)?,
      filename:                     r.get(5)?,
      size_bytes:                   r.get(6)?,
      status:                       r.get(7)?,
      is_active:                    r.get(8)?,
      review_note:                  r.get(9)?,
      approved_by:                  r.get(10)?,
      approved_at:                  r.get(11)?,
      reviewed_document_version_id: r.get(12)?,
      reviewed_by:                  r.get(13)?,
      reviewed_at:                  r.get(14)?,
      attached_by:                  r.get(15)?,
      attached_at:                  r.get(16)?,
      instance_id:                  r.get(17)?,
    })
  }

  pub fn into_attachment(self) -> Result<Attachment> {
    Ok(Attachment {
      attachment_id:                decode_uuid(&self.attachment_id)?,
      slot_id:                      decode_uuid(&self.slot_id)?,
      instance_id:                  decode_uuid(&self.instance_id)?,
      slot_key:                     self.slot_key,
      document_version_id:          decode_uuid(&self.document_version_id)?,
      mime:                         self.mime,
      filename:                     self.filename,
      size_bytes:                   u64::try_from(self.size_bytes).unwrap_or_default(),
      status:                       decode_enum(&self.status, "attachment status")?,
      is_active:                    self.is_active,
      review_note:                  self.review_note,
      approved_by:                  decode_opt_uuid(self.approved_by)?,
      approved_at:                  decode_opt_dt(self.approved_at)?,
      reviewed_document_version_id: decode_opt_uuid(self.reviewed_document_version_id)?,
      reviewed_by:                  decode_opt_uuid(self.reviewed_by)?,
      reviewed_at:                  decode_opt_dt(self.reviewed_at)?,
      attached_by:                  decode_uuid(&self.attached_by)?,
      attached_at:                  decode_dt(&self.attached_at)?,
    })
  }
}

// ─── Append-only logs ────────────────────────────────────────────────────────

pub const REVISION_COLUMNS: &str = "instance_id, rev, form_data, edited_by, created_at";

pub struct RawRevision {
  pub instance_id: String,
  pub rev:         i64,
  pub form_data:   String,
  pub edited_by:   String,
  pub created_at:  String,
}

impl RawRevision {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      instance_id: r.get(0)?,
      rev:         r.get(1)?,
      form_data:   r.get(2)?,
      edited_by:   r.get(3)?,
      created_at:  r.get(4)?,
    })
  }

  pub fn into_revision(self) -> Result<FormRevision> {
    Ok(FormRevision {
      instance_id: decode_uuid(&self.instance_id)?,
      rev:         decode_count(self.rev),
      form_data:   serde_json::from_str(&self.form_data)?,
      edited_by:   decode_uuid(&self.edited_by)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub const OUTCOME_COLUMNS: &str =
  "outcome_id, instance_id, value, decided_by, note, created_at";

pub struct RawOutcome {
  pub outcome_id:  String,
  pub instance_id: String,
  pub value:       String,
  pub decided_by:  String,
  pub note:        Option<String>,
  pub created_at:  String,
}

impl RawOutcome {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      outcome_id:  r.get(0)?,
      instance_id: r.get(1)?,
      value:       r.get(2)?,
      decided_by:  r.get(3)?,
      note:        r.get(4)?,
      created_at:  r.get(5)?,
    })
  }

  pub fn into_outcome(self) -> Result<Outcome> {
    Ok(Outcome {
      outcome_id:  decode_uuid(&self.outcome_id)?,
      instance_id: decode_uuid(&self.instance_id)?,
      value:       self.value,
      decided_by:  decode_uuid(&self.decided_by)?,
      note:        self.note,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

pub const EVENT_COLUMNS: &str =
  "event_id, seq, instance_id, event_type, payload, actor_id, created_at";

pub struct RawEvent {
  pub event_id:    String,
  pub seq:         i64,
  pub instance_id: String,
  pub event_type:  String,
  pub payload:     String,
  pub actor_id:    String,
  pub created_at:  String,
}

impl RawEvent {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:    r.get(0)?,
      seq:         r.get(1)?,
      instance_id: r.get(2)?,
      event_type:  r.get(3)?,
      payload:     r.get(4)?,
      actor_id:    r.get(5)?,
      created_at:  r.get(6)?,
    })
  }

  pub fn into_event(self) -> Result<NodeEvent> {
    Ok(NodeEvent {
      event_id:    decode_uuid(&self.event_id)?,
      seq:         self.seq,
      instance_id: decode_uuid(&self.instance_id)?,
      event_type:  decode_enum(&self.event_type, "event type")?,
      payload:     serde_json::from_str(&self.payload)?,
      actor_id:    decode_uuid(&self.actor_id)?,
      created_at:  decode_dt(&self.created_at)?,
    })
  }
}

// ─── Projection ──────────────────────────────────────────────────────────────

pub const JOURNEY_COLUMNS: &str =
  "tenant_id, user_id, node_slug, state, instance_id, updated_at";

pub struct RawJourneyState {
  pub tenant_id:   String,
  pub user_id:     String,
  pub node_slug:   String,
  pub state:       String,
  pub instance_id: String,
  pub updated_at:  String,
}

impl RawJourneyState {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      tenant_id:   r.get(0)?,
      user_id:     r.get(1)?,
      node_slug:   r.get(2)?,
      state:       r.get(3)?,
      instance_id: r.get(4)?,
      updated_at:  r.get(5)?,
    })
  }

  pub fn into_state(self) -> Result<JourneyState> {
    Ok(JourneyState {
      tenant_id:   decode_uuid(&self.tenant_id)?,
      user_id:     decode_uuid(&self.user_id)?,
      node_slug:   self.node_slug,
      state:       decode_enum(&self.state, "node state")?,
      instance_id: decode_uuid(&self.instance_id)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}
