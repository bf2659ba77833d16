//! Synchronous SQL bodies of the store operations.
//!
//! Each function runs on the `tokio_rusqlite` connection thread. Write bodies
//! receive the open transaction; returning `Err` drops it, which rolls back
//! everything the body did.

use chrono::{DateTime, Utc};
use journey_core::{
  Error as CoreError,
  event::{EventType, NewEvent, NodeEvent},
  instance::{JourneyState, NewInstance, NodeInstance},
  playbook::{Multiplicity, NewPlaybookRecord, PlaybookRecord, SlotSpec},
  state::NodeState,
  store::{
    AttachWrite, Committed, FormWrite, Opened, ReviewWrite, ReviewedCopyWrite,
    TransitionWrite,
  },
  submission::{Attachment, AttachmentStatus, FormRevision, Outcome, Slot, missing_required},
};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde_json::json;
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    ATTACHMENT_COLUMNS, EVENT_COLUMNS, INSTANCE_COLUMNS, JOURNEY_COLUMNS,
    OUTCOME_COLUMNS, PLAYBOOK_COLUMNS, REVISION_COLUMNS, RawAttachment, RawEvent,
    RawInstance, RawJourneyState, RawOutcome, RawPlaybook, RawRevision, RawSlot,
    SLOT_COLUMNS, encode_dt, encode_uuid,
  },
};

// ─── Reads ───────────────────────────────────────────────────────────────────

pub fn playbook_by_id(conn: &Connection, version_id: Uuid) -> Result<Option<PlaybookRecord>> {
  conn
    .query_row(
      &format!("SELECT {PLAYBOOK_COLUMNS} FROM playbook_versions WHERE version_id = ?1"),
      params![encode_uuid(version_id)],
      RawPlaybook::from_row,
    )
    .optional()?
    .map(RawPlaybook::into_record)
    .transpose()
}

pub fn active_playbook(conn: &Connection, tenant_id: Uuid) -> Result<Option<PlaybookRecord>> {
  conn
    .query_row(
      &format!(
        "SELECT {PLAYBOOK_COLUMNS} FROM playbook_versions
         WHERE version_id = (SELECT version_id FROM playbook_active WHERE tenant_id = ?1)"
      ),
      params![encode_uuid(tenant_id)],
      RawPlaybook::from_row,
    )
    .optional()?
    .map(RawPlaybook::into_record)
    .transpose()
}

pub fn list_playbooks(conn: &Connection, tenant_id: Uuid) -> Result<Vec<PlaybookRecord>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {PLAYBOOK_COLUMNS} FROM playbook_versions
     WHERE tenant_id = ?1 ORDER BY created_at, rowid"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(tenant_id)], RawPlaybook::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawPlaybook::into_record).collect()
}

/// Fetch one instance row matching `filter` (a `WHERE` / `ORDER BY` tail).
fn instance_where(
  conn: &Connection,
  filter: &str,
  params: impl rusqlite::Params,
) -> Result<Option<NodeInstance>> {
  conn
    .query_row(
      &format!("SELECT {INSTANCE_COLUMNS} FROM node_instances {filter}"),
      params,
      RawInstance::from_row,
    )
    .optional()?
    .map(RawInstance::into_instance)
    .transpose()
}

pub fn instance_by_id(conn: &Connection, instance_id: Uuid) -> Result<Option<NodeInstance>> {
  instance_where(conn, "WHERE instance_id = ?1", params![encode_uuid(instance_id)])
}

pub fn find_instance(
  conn: &Connection,
  user_id: Uuid,
  node_slug: &str,
  version_id: Uuid,
) -> Result<Option<NodeInstance>> {
  instance_where(
    conn,
    "WHERE user_id = ?1 AND node_slug = ?2 AND playbook_version_id = ?3",
    params![encode_uuid(user_id), node_slug, encode_uuid(version_id)],
  )
}

pub fn latest_instance(
  conn: &Connection,
  user_id: Uuid,
  node_slug: &str,
) -> Result<Option<NodeInstance>> {
  instance_where(
    conn,
    "WHERE user_id = ?1 AND node_slug = ?2
     ORDER BY updated_at DESC, rowid DESC LIMIT 1",
    params![encode_uuid(user_id), node_slug],
  )
}

pub fn list_instances(conn: &Connection, user_id: Uuid) -> Result<Vec<NodeInstance>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {INSTANCE_COLUMNS} FROM node_instances
     WHERE user_id = ?1 ORDER BY opened_at, rowid"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(user_id)], RawInstance::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawInstance::into_instance).collect()
}

fn require_instance(conn: &Connection, instance_id: Uuid) -> Result<NodeInstance> {
  instance_by_id(conn, instance_id)?
    .ok_or_else(|| CoreError::InstanceNotFound(instance_id).into())
}

pub fn list_slots(conn: &Connection, instance_id: Uuid) -> Result<Vec<Slot>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {SLOT_COLUMNS} FROM node_slots WHERE instance_id = ?1 ORDER BY position"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(instance_id)], RawSlot::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawSlot::into_slot).collect()
}

fn slot_by_key(conn: &Connection, instance_id: Uuid, slot_key: &str) -> Result<Option<Slot>> {
  conn
    .query_row(
      &format!("SELECT {SLOT_COLUMNS} FROM node_slots WHERE instance_id = ?1 AND slot_key = ?2"),
      params![encode_uuid(instance_id), slot_key],
      RawSlot::from_row,
    )
    .optional()?
    .map(RawSlot::into_slot)
    .transpose()
}

pub fn attachment_by_id(conn: &Connection, attachment_id: Uuid) -> Result<Option<Attachment>> {
  conn
    .query_row(
      &format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM node_attachments a
         JOIN node_slots s ON s.slot_id = a.slot_id
         WHERE a.attachment_id = ?1"
      ),
      params![encode_uuid(attachment_id)],
      RawAttachment::from_row,
    )
    .optional()?
    .map(RawAttachment::into_attachment)
    .transpose()
}

pub fn list_attachments(
  conn: &Connection,
  instance_id: Uuid,
  include_inactive: bool,
) -> Result<Vec<Attachment>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ATTACHMENT_COLUMNS} FROM node_attachments a
     JOIN node_slots s ON s.slot_id = a.slot_id
     WHERE s.instance_id = ?1 AND (?2 OR a.is_active = 1)
     ORDER BY s.position, a.seq"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(instance_id), include_inactive], RawAttachment::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawAttachment::into_attachment).collect()
}

fn active_in_slot(conn: &Connection, slot_id: Uuid) -> Result<Vec<Attachment>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ATTACHMENT_COLUMNS} FROM node_attachments a
     JOIN node_slots s ON s.slot_id = a.slot_id
     WHERE a.slot_id = ?1 AND a.is_active = 1
     ORDER BY a.seq"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(slot_id)], RawAttachment::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawAttachment::into_attachment).collect()
}

pub fn revision(conn: &Connection, instance_id: Uuid, rev: u32) -> Result<Option<FormRevision>> {
  conn
    .query_row(
      &format!("SELECT {REVISION_COLUMNS} FROM form_revisions WHERE instance_id = ?1 AND rev = ?2"),
      params![encode_uuid(instance_id), rev],
      RawRevision::from_row,
    )
    .optional()?
    .map(RawRevision::into_revision)
    .transpose()
}

pub fn latest_revision(conn: &Connection, instance_id: Uuid) -> Result<Option<FormRevision>> {
  conn
    .query_row(
      &format!(
        "SELECT {REVISION_COLUMNS} FROM form_revisions
         WHERE instance_id = ?1 ORDER BY rev DESC LIMIT 1"
      ),
      params![encode_uuid(instance_id)],
      RawRevision::from_row,
    )
    .optional()?
    .map(RawRevision::into_revision)
    .transpose()
}

pub fn list_outcomes(conn: &Connection, instance_id: Uuid) -> Result<Vec<Outcome>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {OUTCOME_COLUMNS} FROM node_outcomes WHERE instance_id = ?1 ORDER BY seq"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(instance_id)], RawOutcome::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawOutcome::into_outcome).collect()
}

pub fn list_events(conn: &Connection, instance_id: Uuid) -> Result<Vec<NodeEvent>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {EVENT_COLUMNS} FROM node_events
     WHERE instance_id = ?1 ORDER BY created_at, seq"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(instance_id)], RawEvent::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawEvent::into_event).collect()
}

pub fn journey_states(conn: &Connection, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<JourneyState>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {JOURNEY_COLUMNS} FROM journey_states
     WHERE tenant_id = ?1 AND user_id = ?2 ORDER BY node_slug"
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(tenant_id), encode_uuid(user_id)], RawJourneyState::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawJourneyState::into_state).collect()
}

// ─── Shared write steps ──────────────────────────────────────────────────────

/// The stored state must still be the one the caller decided on.
fn expect_state(instance: &NodeInstance, expected: NodeState) -> Result<()> {
  if instance.state != expected {
    return Err(
      CoreError::ConcurrentTransition { instance_id: instance.instance_id, expected }.into(),
    );
  }
  Ok(())
}

fn insert_event(conn: &Connection, instance_id: Uuid, event: NewEvent) -> Result<NodeEvent> {
  let event_id = Uuid::new_v4();
  conn.execute(
    "INSERT INTO node_events (event_id, instance_id, event_type, payload, actor_id, created_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    params![
      encode_uuid(event_id),
      encode_uuid(instance_id),
      event.event_type.to_string(),
      event.payload.to_string(),
      encode_uuid(event.actor_id),
      encode_dt(event.created_at),
    ],
  )?;
  Ok(NodeEvent {
    event_id,
    seq: conn.last_insert_rowid(),
    instance_id,
    event_type: event.event_type,
    payload: event.payload,
    actor_id: event.actor_id,
    created_at: event.created_at,
  })
}

/// Bump `updated_at` and the edit flag, guarded on the observed state.
fn touch_instance(
  conn: &Connection,
  instance: &NodeInstance,
  at: DateTime<Utc>,
  edited: bool,
) -> Result<()> {
  let changed = conn.execute(
    "UPDATE node_instances
     SET updated_at = ?1, edited = MAX(edited, ?2)
     WHERE instance_id = ?3 AND state = ?4",
    params![
      encode_dt(at),
      edited,
      encode_uuid(instance.instance_id),
      instance.state.as_str(),
    ],
  )?;
  if changed == 0 {
    return Err(
      CoreError::ConcurrentTransition {
        instance_id: instance.instance_id,
        expected:    instance.state,
      }
      .into(),
    );
  }
  Ok(())
}

fn refresh_counts(conn: &Connection, instance_id: Uuid) -> Result<()> {
  conn.execute(
    "UPDATE node_instances SET
       submitted_count = (SELECT COUNT(*) FROM node_attachments a
                          JOIN node_slots s ON s.slot_id = a.slot_id
                          WHERE s.instance_id = ?1 AND a.is_active = 1
                            AND a.status = 'submitted'),
       approved_count  = (SELECT COUNT(*) FROM node_attachments a
                          JOIN node_slots s ON s.slot_id = a.slot_id
                          WHERE s.instance_id = ?1 AND a.is_active = 1
                            AND a.status IN ('approved', 'approved_with_comments')),
       rejected_count  = (SELECT COUNT(*) FROM node_attachments a
                          JOIN node_slots s ON s.slot_id = a.slot_id
                          WHERE s.instance_id = ?1 AND a.is_active = 1
                            AND a.status = 'rejected')
     WHERE instance_id = ?1",
    params![encode_uuid(instance_id)],
  )?;
  Ok(())
}

/// Point the `(user, node)` projection row at `instance`.
fn upsert_projection(conn: &Connection, instance: &NodeInstance) -> Result<()> {
  conn.execute(
    "INSERT INTO journey_states (tenant_id, user_id, node_slug, state, instance_id, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT (tenant_id, user_id, node_slug) DO UPDATE SET
       state       = excluded.state,
       instance_id = excluded.instance_id,
       updated_at  = excluded.updated_at",
    params![
      encode_uuid(instance.tenant_id),
      encode_uuid(instance.user_id),
      instance.node_slug,
      instance.state.as_str(),
      encode_uuid(instance.instance_id),
      encode_dt(instance.updated_at),
    ],
  )?;
  Ok(())
}

/// Re-read the instance after a write and mirror it into the projection.
fn settle(conn: &Connection, instance_id: Uuid) -> Result<NodeInstance> {
  let instance = require_instance(conn, instance_id)?;
  upsert_projection(conn, &instance)?;
  Ok(instance)
}

// ─── Playbooks ───────────────────────────────────────────────────────────────

pub fn publish_playbook(
  conn: &Connection,
  new: NewPlaybookRecord,
  at: DateTime<Utc>,
) -> Result<PlaybookRecord> {
  let existing = conn
    .query_row(
      &format!(
        "SELECT {PLAYBOOK_COLUMNS} FROM playbook_versions
         WHERE tenant_id = ?1 AND checksum = ?2"
      ),
      params![encode_uuid(new.tenant_id), new.checksum],
      RawPlaybook::from_row,
    )
    .optional()?
    .map(RawPlaybook::into_record)
    .transpose()?;

  let record = match existing {
    Some(record) => record,
    None => {
      let record = PlaybookRecord {
        version_id:  Uuid::new_v4(),
        tenant_id:   new.tenant_id,
        playbook_id: new.playbook_id,
        version:     new.version,
        checksum:    new.checksum,
        raw_json:    new.raw_json,
        created_at:  at,
      };
      conn.execute(
        &format!("INSERT INTO playbook_versions ({PLAYBOOK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
          encode_uuid(record.version_id),
          encode_uuid(record.tenant_id),
          record.playbook_id,
          record.version,
          record.checksum,
          record.raw_json,
          encode_dt(record.created_at),
        ],
      )?;
      record
    }
  };

  conn.execute(
    "INSERT INTO playbook_active (tenant_id, version_id, activated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT (tenant_id) DO UPDATE SET
       version_id   = excluded.version_id,
       activated_at = excluded.activated_at",
    params![encode_uuid(record.tenant_id), encode_uuid(record.version_id), encode_dt(at)],
  )?;

  Ok(record)
}

// ─── Instances ───────────────────────────────────────────────────────────────

pub fn ensure_slots(conn: &Connection, instance_id: Uuid, specs: &[SlotSpec]) -> Result<Vec<Slot>> {
  let base: i64 = conn.query_row(
    "SELECT COUNT(*) FROM node_slots WHERE instance_id = ?1",
    params![encode_uuid(instance_id)],
    |r| r.get(0),
  )?;
  let mut position = base;
  for spec in specs {
    let inserted = conn.execute(
      "INSERT INTO node_slots
         (slot_id, instance_id, slot_key, required, multiplicity, mime_whitelist, max_files, position)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
       ON CONFLICT (instance_id, slot_key) DO NOTHING",
      params![
        encode_uuid(Uuid::new_v4()),
        encode_uuid(instance_id),
        spec.slot_key,
        spec.required,
        spec.multiplicity.to_string(),
        serde_json::to_string(&spec.mime_whitelist)?,
        spec.max_files,
        position,
      ],
    )?;
    position += inserted as i64;
  }
  list_slots(conn, instance_id)
}

pub fn ensure_slots_checked(
  conn: &Connection,
  instance_id: Uuid,
  specs: &[SlotSpec],
) -> Result<Vec<Slot>> {
  require_instance(conn, instance_id)?;
  ensure_slots(conn, instance_id, specs)
}

pub fn open_instance(
  conn: &Connection,
  new: NewInstance,
  specs: &[SlotSpec],
  actor_id: Uuid,
  at: DateTime<Utc>,
) -> Result<Committed<Opened>> {
  if let Some(instance) = find_instance(conn, new.user_id, &new.node_slug, new.playbook_version_id)? {
    let slots = ensure_slots(conn, instance.instance_id, specs)?;
    return Ok(Committed {
      value:  Opened { instance, slots, created: false },
      events: Vec::new(),
    });
  }

  let instance_id = Uuid::new_v4();
  conn.execute(
    "INSERT INTO node_instances
       (instance_id, tenant_id, user_id, playbook_version_id, node_slug, state,
        locale, opened_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
    params![
      encode_uuid(instance_id),
      encode_uuid(new.tenant_id),
      encode_uuid(new.user_id),
      encode_uuid(new.playbook_version_id),
      new.node_slug,
      NodeState::Active.as_str(),
      new.locale,
      encode_dt(at),
    ],
  )?;

  let slots = ensure_slots(conn, instance_id, specs)?;
  let instance = settle(conn, instance_id)?;
  let event = insert_event(
    conn,
    instance_id,
    NewEvent::state_change(None, NodeState::Active, actor_id, at),
  )?;

  Ok(Committed {
    value:  Opened { instance, slots, created: true },
    events: vec![event],
  })
}

pub fn apply_transition(conn: &Connection, w: TransitionWrite) -> Result<Committed<NodeInstance>> {
  let current = require_instance(conn, w.instance_id)?;
  expect_state(&current, w.from)?;
  if w.require_complete {
    check_complete(conn, &current)?;
  }

  let at = encode_dt(w.at);
  let changed = conn.execute(
    "UPDATE node_instances
     SET state = ?1,
         updated_at = ?2,
         edited = 0,
         submitted_at = CASE WHEN ?1 = 'submitted' THEN COALESCE(submitted_at, ?2)
                             ELSE submitted_at END
     WHERE instance_id = ?3 AND state = ?4",
    params![w.to.as_str(), at, encode_uuid(w.instance_id), w.from.as_str()],
  )?;
  if changed == 0 {
    return Err(
      CoreError::ConcurrentTransition { instance_id: w.instance_id, expected: w.from }.into(),
    );
  }

  let mut events = Vec::new();

  if let Some(outcome) = w.outcome {
    let outcome_id = Uuid::new_v4();
    conn.execute(
      &format!("INSERT INTO node_outcomes ({OUTCOME_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
      params![
        encode_uuid(outcome_id),
        encode_uuid(w.instance_id),
        outcome.value,
        encode_uuid(outcome.decided_by),
        outcome.note,
        at,
      ],
    )?;
    let recorded = NewEvent::new(EventType::OutcomeRecorded, w.actor_id, w.at).with_payload(json!({
      "outcome_id": outcome_id,
      "value":      outcome.value,
      "note":       outcome.note,
    }));
    events.push(insert_event(conn, w.instance_id, recorded)?);
  }

  let instance = settle(conn, w.instance_id)?;

  let mut change = NewEvent::state_change(Some(w.from), w.to, w.actor_id, w.at);
  if let Some(note) = w.note {
    change = change.merge(json!({ "note": note }));
  }
  events.push(insert_event(conn, w.instance_id, change)?);

  Ok(Committed { value: instance, events })
}

/// A submission needs a form revision and a live attachment in every
/// required slot. Coming back from `needs_fixes` it also needs an edit made
/// since the return.
fn check_complete(conn: &Connection, instance: &NodeInstance) -> Result<()> {
  if instance.state == NodeState::NeedsFixes && !instance.edited_since_transition {
    return Err(CoreError::NoChangesSinceReturn.into());
  }
  let slots = list_slots(conn, instance.instance_id)?;
  let attachments = list_attachments(conn, instance.instance_id, false)?;
  let missing = missing_required(&slots, &attachments);
  if missing.is_empty() && instance.has_form() {
    return Ok(());
  }
  Err(CoreError::IncompleteSubmission { missing_slots: missing, has_form: instance.has_form() }.into())
}

// ─── Form revisions ──────────────────────────────────────────────────────────

pub fn save_revision(conn: &Connection, w: FormWrite) -> Result<Committed<FormRevision>> {
  let instance = require_instance(conn, w.instance_id)?;
  expect_state(&instance, w.expected_state)?;
  if !instance.state.accepts_evidence() {
    return Err(CoreError::EvidenceLocked { state: instance.state }.into());
  }

  let rev = instance.current_rev + 1;
  conn.execute(
    &format!("INSERT INTO form_revisions ({REVISION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
    params![
      encode_uuid(w.instance_id),
      rev,
      w.form_data.to_string(),
      encode_uuid(w.edited_by),
      encode_dt(w.at),
    ],
  )?;
  touch_instance(conn, &instance, w.at, true)?;
  conn.execute(
    "UPDATE node_instances SET current_rev = ?1 WHERE instance_id = ?2",
    params![rev, encode_uuid(w.instance_id)],
  )?;
  settle(conn, w.instance_id)?;

  let event = insert_event(
    conn,
    w.instance_id,
    NewEvent::new(EventType::FormSaved, w.edited_by, w.at).with_payload(json!({ "rev": rev })),
  )?;

  Ok(Committed {
    value:  FormRevision {
      instance_id: w.instance_id,
      rev,
      form_data: w.form_data,
      edited_by: w.edited_by,
      created_at: w.at,
    },
    events: vec![event],
  })
}

// ─── Attachments ─────────────────────────────────────────────────────────────

pub fn attach_document(conn: &Connection, w: AttachWrite) -> Result<Committed<Attachment>> {
  let instance = require_instance(conn, w.instance_id)?;
  expect_state(&instance, w.expected_state)?;
  if !instance.state.accepts_evidence() {
    return Err(CoreError::EvidenceLocked { state: instance.state }.into());
  }

  let slot = slot_by_key(conn, w.instance_id, &w.slot_key)?.ok_or_else(|| {
    CoreError::SlotNotFound { instance_id: w.instance_id, slot_key: w.slot_key.clone() }
  })?;
  if !slot.spec.accepts_mime(&w.document.mime) {
    return Err(
      CoreError::MimeRejected { slot_key: w.slot_key.clone(), mime: w.document.mime.clone() }
        .into(),
    );
  }

  let active = active_in_slot(conn, slot.slot_id)?;
  let superseded: Vec<Uuid> = match (slot.spec.multiplicity, slot.spec.active_limit()) {
    (Multiplicity::Single, _) if active.is_empty() => Vec::new(),
    (Multiplicity::Single, _) => {
      let all_rejected = active.iter().all(|a| a.status == AttachmentStatus::Rejected);
      if !(w.supersede || all_rejected) {
        return Err(CoreError::MultiplicityExceeded { slot_key: w.slot_key.clone(), limit: 1 }.into());
      }
      active.iter().map(|a| a.attachment_id).collect()
    }
    (Multiplicity::Multi, Some(limit)) if active.len() >= limit as usize => {
      return Err(CoreError::MultiplicityExceeded { slot_key: w.slot_key.clone(), limit }.into());
    }
    (Multiplicity::Multi, _) => Vec::new(),
  };

  for id in &superseded {
    conn.execute(
      "UPDATE node_attachments SET is_active = 0 WHERE attachment_id = ?1",
      params![encode_uuid(*id)],
    )?;
  }

  let attachment_id = Uuid::new_v4();
  conn.execute(
    "INSERT INTO node_attachments
       (attachment_id, slot_id, document_version_id, mime, filename, size_bytes,
        status, is_active, attached_by, attached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'submitted', 1, ?7, ?8)",
    params![
      encode_uuid(attachment_id),
      encode_uuid(slot.slot_id),
      encode_uuid(w.document.document_version_id),
      w.document.mime,
      w.filename,
      i64::try_from(w.document.size_bytes).unwrap_or(i64::MAX),
      encode_uuid(w.attached_by),
      encode_dt(w.at),
    ],
  )?;

  touch_instance(conn, &instance, w.at, true)?;
  refresh_counts(conn, w.instance_id)?;
  settle(conn, w.instance_id)?;

  let event = insert_event(
    conn,
    w.instance_id,
    NewEvent::new(EventType::AttachmentUploaded, w.attached_by, w.at).with_payload(json!({
      "attachment_id": attachment_id,
      "slot_key":      w.slot_key,
      "filename":      w.filename,
      "superseded":    superseded,
    })),
  )?;

  let attachment = attachment_by_id(conn, attachment_id)?
    .ok_or(CoreError::AttachmentNotFound(attachment_id))?;
  Ok(Committed { value: attachment, events: vec![event] })
}

fn reviewable(conn: &Connection, attachment_id: Uuid) -> Result<(Attachment, NodeInstance)> {
  let attachment =
    attachment_by_id(conn, attachment_id)?.ok_or(CoreError::AttachmentNotFound(attachment_id))?;
  let instance = require_instance(conn, attachment.instance_id)?;
  if instance.state.is_terminal() {
    return Err(CoreError::EvidenceLocked { state: instance.state }.into());
  }
  Ok((attachment, instance))
}

pub fn review_attachment(conn: &Connection, w: ReviewWrite) -> Result<Committed<Attachment>> {
  let (attachment, instance) = reviewable(conn, w.attachment_id)?;

  conn.execute(
    "UPDATE node_attachments
     SET status = ?1, review_note = ?2, approved_by = ?3, approved_at = ?4
     WHERE attachment_id = ?5",
    params![
      w.verdict.status().to_string(),
      w.note,
      encode_uuid(w.reviewer),
      encode_dt(w.at),
      encode_uuid(w.attachment_id),
    ],
  )?;

  touch_instance(conn, &instance, w.at, false)?;
  refresh_counts(conn, instance.instance_id)?;
  settle(conn, instance.instance_id)?;

  let event = insert_event(
    conn,
    instance.instance_id,
    NewEvent::new(EventType::AttachmentReviewed, w.reviewer, w.at).with_payload(json!({
      "attachment_id": w.attachment_id,
      "slot_key":      attachment.slot_key,
      "verdict":       w.verdict,
      "note":          w.note,
    })),
  )?;

  let attachment = attachment_by_id(conn, w.attachment_id)?
    .ok_or(CoreError::AttachmentNotFound(w.attachment_id))?;
  Ok(Committed { value: attachment, events: vec![event] })
}

pub fn upload_reviewed_copy(
  conn: &Connection,
  w: ReviewedCopyWrite,
) -> Result<Committed<Attachment>> {
  let (attachment, instance) = reviewable(conn, w.attachment_id)?;

  conn.execute(
    "UPDATE node_attachments
     SET reviewed_document_version_id = ?1, reviewed_by = ?2, reviewed_at = ?3
     WHERE attachment_id = ?4",
    params![
      encode_uuid(w.document_version_id),
      encode_uuid(w.reviewer),
      encode_dt(w.at),
      encode_uuid(w.attachment_id),
    ],
  )?;

  touch_instance(conn, &instance, w.at, false)?;
  settle(conn, instance.instance_id)?;

  let event = insert_event(
    conn,
    instance.instance_id,
    NewEvent::new(EventType::ReviewedCopyUploaded, w.reviewer, w.at).with_payload(json!({
      "attachment_id":                w.attachment_id,
      "slot_key":                     attachment.slot_key,
      "reviewed_document_version_id": w.document_version_id,
    })),
  )?;

  let attachment = attachment_by_id(conn, w.attachment_id)?
    .ok_or(CoreError::AttachmentNotFound(w.attachment_id))?;
  Ok(Committed { value: attachment, events: vec![event] })
}

// ─── Events & projection ─────────────────────────────────────────────────────

pub fn append_event(conn: &Connection, instance_id: Uuid, event: NewEvent) -> Result<NodeEvent> {
  require_instance(conn, instance_id)?;
  insert_event(conn, instance_id, event)
}

pub fn record_sla_breach(
  conn: &Connection,
  instance_id: Uuid,
  event: NewEvent,
) -> Result<Option<NodeEvent>> {
  require_instance(conn, instance_id)?;
  let reported: bool = conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM node_events WHERE instance_id = ?1 AND event_type = ?2)",
    params![encode_uuid(instance_id), EventType::SlaBreached.to_string()],
    |row| row.get(0),
  )?;
  if reported {
    return Ok(None);
  }
  insert_event(conn, instance_id, event).map(Some)
}

pub fn rebuild_projection(conn: &Connection, tenant_id: Option<Uuid>) -> Result<usize> {
  let written = conn.execute(
    "INSERT INTO journey_states (tenant_id, user_id, node_slug, state, instance_id, updated_at)
     SELECT ni.tenant_id, ni.user_id, ni.node_slug, ni.state, ni.instance_id, ni.updated_at
     FROM node_instances ni
     WHERE (?1 IS NULL OR ni.tenant_id = ?1)
       AND NOT EXISTS (
         SELECT 1 FROM node_instances newer
         WHERE newer.tenant_id = ni.tenant_id
           AND newer.user_id   = ni.user_id
           AND newer.node_slug = ni.node_slug
           AND (newer.updated_at > ni.updated_at
                OR (newer.updated_at = ni.updated_at AND newer.rowid > ni.rowid))
       )
     ON CONFLICT (tenant_id, user_id, node_slug) DO UPDATE SET
       state       = excluded.state,
       instance_id = excluded.instance_id,
       updated_at  = excluded.updated_at",
    params![tenant_id.map(encode_uuid)],
  )?;
  Ok(written)
}
