//! [`SqliteStore`] — the SQLite implementation of [`JourneyStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use journey_core::{
  event::{NewEvent, NodeEvent},
  instance::{JourneyState, NewInstance, NodeInstance},
  playbook::{NewPlaybookRecord, PlaybookRecord, SlotSpec},
  store::{
    AttachWrite, Committed, FormWrite, JourneyStore, Opened, ReviewWrite,
    ReviewedCopyWrite, TransitionWrite,
  },
  submission::{Attachment, FormRevision, Outcome, Slot},
};

use crate::{Error, Result, schema::SCHEMA, sql};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A journey store backed by a single SQLite file.
///
/// Clones share one connection thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a private in-memory database.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` against the connection without a transaction.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }

  /// Run `f` inside one transaction, committing only if it succeeds.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match f(&tx) {
          Ok(value) => {
            tx.commit()?;
            Ok(Ok(value))
          }
          // Dropping `tx` rolls it back.
          Err(e) => Ok(Err(e)),
        }
      })
      .await?
  }

  /// Run a raw statement. Tests use this to poke at the append-only guards.
  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, stmt: &'static str) -> Result<usize> {
    self.read(move |conn| Ok(conn.execute(stmt, [])?)).await
  }
}

// ─── JourneyStore impl ───────────────────────────────────────────────────────

impl JourneyStore for SqliteStore {
  type Error = Error;

  // ── Playbooks ───────────────────────────────────────────────────────────

  async fn publish_playbook(
    &self,
    record: NewPlaybookRecord,
    at: DateTime<Utc>,
  ) -> Result<PlaybookRecord> {
    let record = self.write(move |tx| sql::publish_playbook(tx, record, at)).await?;
    info!(
      tenant_id = %record.tenant_id,
      version_id = %record.version_id,
      playbook_id = %record.playbook_id,
      version = %record.version,
      "playbook activated"
    );
    Ok(record)
  }

  async fn get_playbook(&self, version_id: Uuid) -> Result<Option<PlaybookRecord>> {
    self.read(move |conn| sql::playbook_by_id(conn, version_id)).await
  }

  async fn active_playbook(&self, tenant_id: Uuid) -> Result<Option<PlaybookRecord>> {
    self.read(move |conn| sql::active_playbook(conn, tenant_id)).await
  }

  async fn list_playbooks(&self, tenant_id: Uuid) -> Result<Vec<PlaybookRecord>> {
    self.read(move |conn| sql::list_playbooks(conn, tenant_id)).await
  }

  // ── Instances ───────────────────────────────────────────────────────────

  async fn open_instance(
    &self,
    new: NewInstance,
    slots: Vec<SlotSpec>,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Committed<Opened>> {
    let opened = self
      .write(move |tx| sql::open_instance(tx, new, &slots, actor_id, at))
      .await?;
    if opened.value.created {
      info!(
        instance_id = %opened.value.instance.instance_id,
        user_id = %opened.value.instance.user_id,
        node = %opened.value.instance.node_slug,
        "instance opened"
      );
    }
    Ok(opened)
  }

  async fn get_instance(&self, instance_id: Uuid) -> Result<Option<NodeInstance>> {
    self.read(move |conn| sql::instance_by_id(conn, instance_id)).await
  }

  async fn find_instance(
    &self,
    user_id: Uuid,
    node_slug: String,
    playbook_version_id: Uuid,
  ) -> Result<Option<NodeInstance>> {
    self
      .read(move |conn| sql::find_instance(conn, user_id, &node_slug, playbook_version_id))
      .await
  }

  async fn latest_instance(
    &self,
    user_id: Uuid,
    node_slug: String,
  ) -> Result<Option<NodeInstance>> {
    self.read(move |conn| sql::latest_instance(conn, user_id, &node_slug)).await
  }

  async fn list_instances(&self, user_id: Uuid) -> Result<Vec<NodeInstance>> {
    self.read(move |conn| sql::list_instances(conn, user_id)).await
  }

  async fn apply_transition(&self, w: TransitionWrite) -> Result<Committed<NodeInstance>> {
    let (instance_id, from, to) = (w.instance_id, w.from, w.to);
    let committed = self.write(move |tx| sql::apply_transition(tx, w)).await?;
    info!(%instance_id, %from, %to, "transition committed");
    Ok(committed)
  }

  // ── Slots & attachments ─────────────────────────────────────────────────

  async fn ensure_slots(&self, instance_id: Uuid, slots: Vec<SlotSpec>) -> Result<Vec<Slot>> {
    self
      .write(move |tx| sql::ensure_slots_checked(tx, instance_id, &slots))
      .await
  }

  async fn list_slots(&self, instance_id: Uuid) -> Result<Vec<Slot>> {
    self.read(move |conn| sql::list_slots(conn, instance_id)).await
  }

  async fn attach_document(&self, w: AttachWrite) -> Result<Committed<Attachment>> {
    let committed = self.write(move |tx| sql::attach_document(tx, w)).await?;
    debug!(
      attachment_id = %committed.value.attachment_id,
      slot = %committed.value.slot_key,
      "attachment stored"
    );
    Ok(committed)
  }

  async fn review_attachment(&self, w: ReviewWrite) -> Result<Committed<Attachment>> {
    let committed = self.write(move |tx| sql::review_attachment(tx, w)).await?;
    info!(
      attachment_id = %committed.value.attachment_id,
      status = %committed.value.status,
      "attachment reviewed"
    );
    Ok(committed)
  }

  async fn upload_reviewed_copy(&self, w: ReviewedCopyWrite) -> Result<Committed<Attachment>> {
    self.write(move |tx| sql::upload_reviewed_copy(tx, w)).await
  }

  async fn get_attachment(&self, attachment_id: Uuid) -> Result<Option<Attachment>> {
    self.read(move |conn| sql::attachment_by_id(conn, attachment_id)).await
  }

  async fn list_attachments(
    &self,
    instance_id: Uuid,
    include_inactive: bool,
  ) -> Result<Vec<Attachment>> {
    self
      .read(move |conn| sql::list_attachments(conn, instance_id, include_inactive))
      .await
  }

  // ── Form revisions ──────────────────────────────────────────────────────

  async fn save_revision(&self, w: FormWrite) -> Result<Committed<FormRevision>> {
    let committed = self.write(move |tx| sql::save_revision(tx, w)).await?;
    debug!(
      instance_id = %committed.value.instance_id,
      rev = committed.value.rev,
      "form revision saved"
    );
    Ok(committed)
  }

  async fn get_revision(&self, instance_id: Uuid, rev: u32) -> Result<Option<FormRevision>> {
    self.read(move |conn| sql::revision(conn, instance_id, rev)).await
  }

  async fn latest_revision(&self, instance_id: Uuid) -> Result<Option<FormRevision>> {
    self.read(move |conn| sql::latest_revision(conn, instance_id)).await
  }

  // ── Outcomes & events ───────────────────────────────────────────────────

  async fn list_outcomes(&self, instance_id: Uuid) -> Result<Vec<Outcome>> {
    self.read(move |conn| sql::list_outcomes(conn, instance_id)).await
  }

  async fn list_events(&self, instance_id: Uuid) -> Result<Vec<NodeEvent>> {
    self.read(move |conn| sql::list_events(conn, instance_id)).await
  }

  async fn append_event(&self, instance_id: Uuid, event: NewEvent) -> Result<NodeEvent> {
    self.write(move |tx| sql::append_event(tx, instance_id, event)).await
  }

  async fn record_sla_breach(
    &self,
    instance_id: Uuid,
    event: NewEvent,
  ) -> Result<Option<NodeEvent>> {
    self.write(move |tx| sql::record_sla_breach(tx, instance_id, event)).await
  }

  // ── Projection ──────────────────────────────────────────────────────────

  async fn journey_states(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<JourneyState>> {
    self
      .read(move |conn| sql::journey_states(conn, tenant_id, user_id))
      .await
  }

  async fn rebuild_projection(&self, tenant_id: Option<Uuid>) -> Result<usize> {
    let written = self
      .write(move |tx| sql::rebuild_projection(tx, tenant_id))
      .await?;
    info!(?tenant_id, rows = written, "journey projection rebuilt");
    Ok(written)
  }
}
