//! The `JourneyStore` trait and its write descriptors.
//!
//! The trait is implemented by storage backends (e.g. `journey-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//!
//! Every write method is a single atomic unit: the store re-checks the state
//! the caller observed, applies the change, refreshes the journey projection,
//! and appends the matching events, or does none of it. A changed prior state
//! is reported as [`Error::ConcurrentTransition`](crate::Error::ConcurrentTransition).

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  event::{NewEvent, NodeEvent},
  instance::{JourneyState, NewInstance, NodeInstance},
  playbook::{NewPlaybookRecord, PlaybookRecord, SlotSpec},
  state::NodeState,
  submission::{Attachment, DocumentVersion, FormRevision, Outcome, Slot, Verdict},
};

// ─── Write descriptors ───────────────────────────────────────────────────────

/// A change together with the events it appended.
#[derive(Debug, Clone)]
pub struct Committed<T> {
  pub value:  T,
  pub events: Vec<NodeEvent>,
}

/// Result of [`JourneyStore::open_instance`].
#[derive(Debug, Clone)]
pub struct Opened {
  pub instance: NodeInstance,
  pub slots:    Vec<Slot>,
  /// False when the instance already existed.
  pub created:  bool,
}

#[derive(Debug, Clone)]
pub struct NewOutcome {
  pub value:      String,
  pub decided_by: Uuid,
  pub note:       Option<String>,
}

/// A state change conditional on `from` still being the stored state.
#[derive(Debug, Clone)]
pub struct TransitionWrite {
  pub instance_id:      Uuid,
  pub from:             NodeState,
  pub to:               NodeState,
  pub actor_id:         Uuid,
  pub at:               DateTime<Utc>,
  /// Re-check submission completeness against the stored slots, form and
  /// edit flag before changing state.
  pub require_complete: bool,
  /// Recorded on the state-change event.
  pub note:             Option<String>,
  /// Appended to the outcome ledger, with its own event, ahead of the
  /// state change.
  pub outcome:          Option<NewOutcome>,
}

#[derive(Debug, Clone)]
pub struct FormWrite {
  pub instance_id:    Uuid,
  pub expected_state: NodeState,
  pub form_data:      Value,
  pub edited_by:      Uuid,
  pub at:             DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttachWrite {
  pub instance_id:    Uuid,
  pub expected_state: NodeState,
  pub slot_key:       String,
  pub document:       DocumentVersion,
  pub filename:       String,
  pub attached_by:    Uuid,
  pub at:             DateTime<Utc>,
  /// Replace the active attachment of a full single slot instead of failing.
  /// Rejected attachments are always replaceable.
  pub supersede:      bool,
}

#[derive(Debug, Clone)]
pub struct ReviewWrite {
  pub attachment_id: Uuid,
  pub verdict:       Verdict,
  pub note:          Option<String>,
  pub reviewer:      Uuid,
  pub at:            DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReviewedCopyWrite {
  pub attachment_id:       Uuid,
  pub document_version_id: Uuid,
  pub reviewer:            Uuid,
  pub at:                  DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a journey store backend.
///
/// Form revisions, outcomes and events are append-only. Instances are never
/// deleted.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait JourneyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Playbooks ─────────────────────────────────────────────────────────

  /// Store a validated playbook and make it the tenant's active version.
  ///
  /// Idempotent by `(tenant_id, checksum)`: republishing identical bytes
  /// returns the existing record and re-activates it.
  fn publish_playbook(
    &self,
    record: NewPlaybookRecord,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<PlaybookRecord, Self::Error>> + Send + '_;

  fn get_playbook(
    &self,
    version_id: Uuid,
  ) -> impl Future<Output = Result<Option<PlaybookRecord>, Self::Error>> + Send + '_;

  fn active_playbook(
    &self,
    tenant_id: Uuid,
  ) -> impl Future<Output = Result<Option<PlaybookRecord>, Self::Error>> + Send + '_;

  /// All versions published for a tenant, oldest first.
  fn list_playbooks(
    &self,
    tenant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PlaybookRecord>, Self::Error>> + Send + '_;

  // ── Instances ─────────────────────────────────────────────────────────

  /// Create an `active` instance with its slots and `opened` event, or
  /// return the existing one for `(user, node, version)` after ensuring
  /// its slots.
  fn open_instance(
    &self,
    new: NewInstance,
    slots: Vec<SlotSpec>,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Committed<Opened>, Self::Error>> + Send + '_;

  fn get_instance(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Option<NodeInstance>, Self::Error>> + Send + '_;

  fn find_instance(
    &self,
    user_id: Uuid,
    node_slug: String,
    playbook_version_id: Uuid,
  ) -> impl Future<Output = Result<Option<NodeInstance>, Self::Error>> + Send + '_;

  /// The most recently updated instance for `(user, node)` across versions.
  fn latest_instance(
    &self,
    user_id: Uuid,
    node_slug: String,
  ) -> impl Future<Output = Result<Option<NodeInstance>, Self::Error>> + Send + '_;

  fn list_instances(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<NodeInstance>, Self::Error>> + Send + '_;

  fn apply_transition(
    &self,
    write: TransitionWrite,
  ) -> impl Future<Output = Result<Committed<NodeInstance>, Self::Error>> + Send + '_;

  // ── Slots & attachments ───────────────────────────────────────────────

  /// Create any missing slots. Existing slots are left as they are.
  fn ensure_slots(
    &self,
    instance_id: Uuid,
    slots: Vec<SlotSpec>,
  ) -> impl Future<Output = Result<Vec<Slot>, Self::Error>> + Send + '_;

  fn list_slots(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Slot>, Self::Error>> + Send + '_;

  /// Attach a document to a slot, enforcing the slot's MIME whitelist and
  /// multiplicity. Superseded attachments become inactive.
  fn attach_document(
    &self,
    write: AttachWrite,
  ) -> impl Future<Output = Result<Committed<Attachment>, Self::Error>> + Send + '_;

  fn review_attachment(
    &self,
    write: ReviewWrite,
  ) -> impl Future<Output = Result<Committed<Attachment>, Self::Error>> + Send + '_;

  fn upload_reviewed_copy(
    &self,
    write: ReviewedCopyWrite,
  ) -> impl Future<Output = Result<Committed<Attachment>, Self::Error>> + Send + '_;

  fn get_attachment(
    &self,
    attachment_id: Uuid,
  ) -> impl Future<Output = Result<Option<Attachment>, Self::Error>> + Send + '_;

  fn list_attachments(
    &self,
    instance_id: Uuid,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<Attachment>, Self::Error>> + Send + '_;

  // ── Form revisions ────────────────────────────────────────────────────

  fn save_revision(
    &self,
    write: FormWrite,
  ) -> impl Future<Output = Result<Committed<FormRevision>, Self::Error>> + Send + '_;

  fn get_revision(
    &self,
    instance_id: Uuid,
    rev: u32,
  ) -> impl Future<Output = Result<Option<FormRevision>, Self::Error>> + Send + '_;

  fn latest_revision(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Option<FormRevision>, Self::Error>> + Send + '_;

  // ── Outcomes & events ─────────────────────────────────────────────────

  /// Outcomes in the order they were recorded.
  fn list_outcomes(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Outcome>, Self::Error>> + Send + '_;

  /// Events ordered by `created_at`, then insertion order.
  fn list_events(
    &self,
    instance_id: Uuid,
  ) -> impl Future<Output = Result<Vec<NodeEvent>, Self::Error>> + Send + '_;

  /// Append an event that does not accompany another write.
  fn append_event(
    &self,
    instance_id: Uuid,
    event: NewEvent,
  ) -> impl Future<Output = Result<NodeEvent, Self::Error>> + Send + '_;

  /// Append `event` unless the instance already has an `sla_breached`
  /// event. Returns the appended event, or `None` if a breach was already
  /// on record.
  fn record_sla_breach(
    &self,
    instance_id: Uuid,
    event: NewEvent,
  ) -> impl Future<Output = Result<Option<NodeEvent>, Self::Error>> + Send + '_;

  // ── Projection ────────────────────────────────────────────────────────

  fn journey_states(
    &self,
    tenant_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<JourneyState>, Self::Error>> + Send + '_;

  /// Rewrite projection rows from the latest instance of every
  /// `(user, node)` pair, for one tenant or all of them. Returns the number
  /// of rows written.
  fn rebuild_projection(
    &self,
    tenant_id: Option<Uuid>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
