//! [`Engine`] — the Node Instance Engine.
//!
//! Every state-changing operation follows the same path:
//!
//! 1. load the instance and its playbook node;
//! 2. look the move up in the transition table and check the actor's roles;
//! 3. check the move's requirement (evidence, note, outcome, prerequisites,
//!    node condition);
//! 4. hand one write descriptor to the store, which re-checks the observed
//!    state and commits the change, projection and events together;
//! 5. notify, after commit and without failing the call.
//!
//! Nothing is retried here. A lost race surfaces as
//! [`Error::ConcurrentTransition`]; see [`crate::retry`].

use std::sync::Arc;

use journey_core::{
  Error, Result,
  actor::{Actor, Scope},
  collaborator::{Clock, DocumentStore, Identity, Notifier, SystemClock},
  event::NodeEvent,
  instance::{JourneyState, NewInstance, NodeInstance},
  state::{self, NodeState, Requirement, Trigger},
  store::{
    AttachWrite, FormWrite, JourneyStore, NewOutcome, Opened, ReviewWrite,
    ReviewedCopyWrite, TransitionWrite,
  },
  submission::{Attachment, DocumentVersion, FormRevision, Outcome, Verdict, missing_required},
};
use journey_playbook::{NodeDefinition, PlaybookVersion};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  authz::{self, Access},
  config::EngineConfig,
  emitter::Emitter,
  registry::PlaybookRegistry,
  view::{SlotView, Submission},
};

// ─── Requests ────────────────────────────────────────────────────────────────

/// Arguments to [`Engine::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
  pub user_id:             Uuid,
  pub node_slug:           String,
  /// Defaults to the tenant's active version.
  pub playbook_version_id: Option<Uuid>,
  /// Defaults to the playbook's `locale_default`.
  pub locale:              Option<String>,
}

impl OpenRequest {
  pub fn new(user_id: Uuid, node_slug: impl Into<String>) -> Self {
    Self { user_id, node_slug: node_slug.into(), playbook_version_id: None, locale: None }
  }

  pub fn version(mut self, version_id: Uuid) -> Self {
    self.playbook_version_id = Some(version_id);
    self
  }

  pub fn locale(mut self, locale: impl Into<String>) -> Self {
    self.locale = Some(locale.into());
    self
  }
}

/// An instance together with the playbook version it was opened under.
pub(crate) struct Loaded {
  pub instance: NodeInstance,
  pub playbook: Arc<PlaybookVersion>,
}

impl Loaded {
  pub fn node(&self) -> Result<&NodeDefinition> {
    self.playbook.node(&self.instance.node_slug).ok_or_else(|| Error::NodeNotFound {
      version_id: self.playbook.version_id,
      slug:       self.instance.node_slug.clone(),
    })
  }

  pub fn scope(&self) -> Scope<'_> {
    Scope {
      tenant_id: self.instance.tenant_id,
      program:   &self.playbook.playbook_id,
      node:      &self.instance.node_slug,
    }
  }

  /// Display title in the instance's locale.
  pub fn title(&self) -> String {
    let locale = self
      .instance
      .locale
      .as_deref()
      .or(self.playbook.locale_default.as_deref())
      .unwrap_or("en");
    self
      .playbook
      .node(&self.instance.node_slug)
      .and_then(|n| n.title_in(locale))
      .unwrap_or(&self.instance.node_slug)
      .to_owned()
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct Engine<S, I, N, D> {
  store:     S,
  registry:  PlaybookRegistry<S>,
  identity:  I,
  notifier:  N,
  documents: D,
  clock:     Arc<dyn Clock>,
  config:    EngineConfig,
}

impl<S: Clone, I, N, D> Engine<S, I, N, D> {
  pub fn new(store: S, identity: I, notifier: N, documents: D) -> Self {
    Self {
      registry: PlaybookRegistry::new(store.clone()),
      store,
      identity,
      notifier,
      documents,
      clock: Arc::new(SystemClock::default()),
      config: EngineConfig::default(),
    }
  }
}

impl<S, I, N, D> Engine<S, I, N, D> {
  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn registry(&self) -> &PlaybookRegistry<S> { &self.registry }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> { self.clock.now() }
}

impl<S, I, N, D> Engine<S, I, N, D>
where
  S: JourneyStore,
  I: Identity,
  N: Notifier,
  D: DocumentStore,
  Error: From<S::Error>,
{
  /// Resolve a session token through the identity collaborator.
  pub async fn actor(&self, session: impl Into<String>) -> Result<Actor> {
    self.identity.resolve_actor(session.into()).await
  }

  /// Validate and activate a playbook for `tenant_id`.
  pub async fn publish_playbook(&self, tenant_id: Uuid, raw: &str) -> Result<Arc<PlaybookVersion>> {
    self.registry.publish(tenant_id, raw, self.now()).await
  }

  // ── Shared steps ──────────────────────────────────────────────────────

  pub(crate) async fn load(&self, instance_id: Uuid) -> Result<Loaded> {
    let instance = self
      .store
      .get_instance(instance_id)
      .await?
      .ok_or(Error::InstanceNotFound(instance_id))?;
    let playbook = self.registry.version(instance.playbook_version_id).await?;
    Ok(Loaded { instance, playbook })
  }

  pub(crate) async fn emit(&self, loaded: &Loaded, events: &[NodeEvent]) {
    if events.is_empty() {
      return;
    }
    Emitter::new(&self.identity, &self.notifier)
      .emit(&loaded.instance, &loaded.title(), events)
      .await;
  }

  async fn authorize_reviewer(&self, actor: &Actor, loaded: &Loaded) -> Result<()> {
    let access = authz::reviewer(actor, &loaded.scope(), loaded.node()?, &self.config.reviewer_roles)?;
    if access == Access::IfLinked {
      let linked = self
        .identity
        .linked_reviewers(loaded.instance.tenant_id, loaded.instance.user_id)
        .await?;
      if !linked.contains(&actor.user_id) {
        return Err(Error::unauthorized(actor.user_id, "advisor is not linked to this student"));
      }
    }
    Ok(())
  }

  async fn authorize(&self, actor: &Actor, loaded: &Loaded, trigger: Trigger) -> Result<()> {
    match trigger {
      Trigger::Student => {
        authz::completer(actor, &loaded.scope(), loaded.node()?, loaded.instance.user_id)
      }
      Trigger::Reviewer => self.authorize_reviewer(actor, loaded).await,
      Trigger::Admin => authz::admin(actor, &loaded.scope()),
    }
  }

  /// Prerequisites of `node` whose latest instance for `user_id` is not done.
  async fn unsatisfied_prerequisites(
    &self,
    user_id: Uuid,
    node: &NodeDefinition,
  ) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for slug in &node.prerequisites {
      let latest = self.store.latest_instance(user_id, slug.clone()).await?;
      if !latest.is_some_and(|i| i.state == NodeState::Done) {
        missing.push(slug.clone());
      }
    }
    Ok(missing)
  }

  async fn check_condition(&self, loaded: &Loaded) -> Result<()> {
    let Some(condition) = &loaded.node()?.condition else {
      return Ok(());
    };
    let form = self
      .store
      .latest_revision(loaded.instance.instance_id)
      .await?
      .map_or_else(|| json!({}), |r| r.form_data);
    if condition.evaluate(&form) {
      Ok(())
    } else {
      Err(Error::ConditionNotMet { condition: condition.source().to_owned() })
    }
  }

  async fn check_complete(&self, instance: &NodeInstance) -> Result<()> {
    let missing = self.missing_required_slots(instance.instance_id).await?;
    if missing.is_empty() && instance.has_form() {
      Ok(())
    } else {
      Err(Error::IncompleteSubmission { missing_slots: missing, has_form: instance.has_form() })
    }
  }

  async fn missing_required_slots(&self, instance_id: Uuid) -> Result<Vec<String>> {
    let slots = self.store.list_slots(instance_id).await?;
    let attachments = self.store.list_attachments(instance_id, false).await?;
    Ok(missing_required(&slots, &attachments))
  }

  /// Evidence edits: the completer roles, and a state that accepts changes.
  fn check_evidence(&self, actor: &Actor, loaded: &Loaded) -> Result<()> {
    authz::completer(actor, &loaded.scope(), loaded.node()?, loaded.instance.user_id)?;
    if !loaded.instance.state.accepts_evidence() {
      return Err(Error::EvidenceLocked { state: loaded.instance.state });
    }
    Ok(())
  }

  async fn transition(
    &self,
    actor: &Actor,
    loaded: Loaded,
    to: NodeState,
    note: Option<String>,
    outcome: Option<NewOutcome>,
  ) -> Result<NodeInstance> {
    let from = loaded.instance.state;
    let rule = state::lookup(from, to).ok_or(Error::InvalidTransition { from, to })?;
    self.authorize(actor, &loaded, rule.trigger).await?;
    let require_complete = matches!(
      rule.requires,
      Some(Requirement::CompleteEvidence | Requirement::FreshChanges)
    );

    match rule.requires {
      Some(Requirement::CompleteEvidence) => self.check_complete(&loaded.instance).await?,
      Some(Requirement::FreshChanges) => {
        if !loaded.instance.edited_since_transition {
          return Err(Error::NoChangesSinceReturn);
        }
        self.check_complete(&loaded.instance).await?;
      }
      Some(Requirement::ReviewNote) => {
        if note.as_deref().is_none_or(|n| n.trim().is_empty()) {
          return Err(Error::ReviewNoteRequired);
        }
      }
      Some(Requirement::OutcomeRecorded) => {
        if outcome.is_none() {
          return Err(Error::InvalidTransition { from, to });
        }
        let node = loaded.node()?;
        let missing = self.unsatisfied_prerequisites(loaded.instance.user_id, node).await?;
        if !missing.is_empty() {
          return Err(Error::PrerequisiteUnsatisfied { node: node.slug.clone(), missing });
        }
      }
      None => {}
    }
    if matches!(to, NodeState::Submitted | NodeState::Done) {
      self.check_condition(&loaded).await?;
    }

    let committed = self
      .store
      .apply_transition(TransitionWrite {
        instance_id: loaded.instance.instance_id,
        from,
        to,
        actor_id: actor.user_id,
        at: self.now(),
        require_complete,
        note,
        outcome,
      })
      .await?;
    info!(
      instance_id = %committed.value.instance_id,
      %from,
      %to,
      actor_id = %actor.user_id,
      "instance transitioned"
    );
    self.emit(&loaded, &committed.events).await;
    Ok(committed.value)
  }

  // ── Instances ─────────────────────────────────────────────────────────

  /// Open `request.node_slug` for a student, or return the instance that
  /// already exists for that node and playbook version.
  pub async fn open(&self, actor: &Actor, request: OpenRequest) -> Result<Opened> {
    let playbook = match request.playbook_version_id {
      Some(id) => self.registry.version(id).await?,
      None => self.registry.active(actor.tenant_id).await?,
    };
    let node = playbook.node(&request.node_slug).ok_or_else(|| Error::NodeNotFound {
      version_id: playbook.version_id,
      slug:       request.node_slug.clone(),
    })?;
    let scope = Scope {
      tenant_id: playbook.tenant_id,
      program:   &playbook.playbook_id,
      node:      &node.slug,
    };
    authz::opener(actor, &scope, node, &self.config.reviewer_roles, request.user_id)?;

    let existing = self
      .store
      .find_instance(request.user_id, node.slug.clone(), playbook.version_id)
      .await?;
    if existing.is_none() {
      let missing = self.unsatisfied_prerequisites(request.user_id, node).await?;
      if !missing.is_empty() {
        return Err(Error::PrerequisiteUnsatisfied { node: node.slug.clone(), missing });
      }
    }

    let committed = self
      .store
      .open_instance(
        NewInstance {
          tenant_id:           playbook.tenant_id,
          user_id:             request.user_id,
          playbook_version_id: playbook.version_id,
          node_slug:           node.slug.clone(),
          locale:              request.locale.or_else(|| playbook.locale_default.clone()),
        },
        node.slots.clone(),
        actor.user_id,
        self.now(),
      )
      .await?;
    if !committed.value.created {
      debug!(instance_id = %committed.value.instance.instance_id, "instance already open");
    }
    Ok(committed.value)
  }

  pub async fn instance(&self, instance_id: Uuid) -> Result<NodeInstance> {
    Ok(self.load(instance_id).await?.instance)
  }

  // ── Evidence ──────────────────────────────────────────────────────────

  /// Append a form revision.
  pub async fn save_form(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    form_data: Value,
  ) -> Result<FormRevision> {
    let loaded = self.load(instance_id).await?;
    self.check_evidence(actor, &loaded)?;
    let committed = self
      .store
      .save_revision(FormWrite {
        instance_id,
        expected_state: loaded.instance.state,
        form_data,
        edited_by: actor.user_id,
        at: self.now(),
      })
      .await?;
    self.emit(&loaded, &committed.events).await;
    Ok(committed.value)
  }

  async fn attach(
    &self,
    actor: &Actor,
    loaded: &Loaded,
    slot_key: &str,
    document: DocumentVersion,
    filename: &str,
  ) -> Result<Attachment> {
    let committed = self
      .store
      .attach_document(AttachWrite {
        instance_id:    loaded.instance.instance_id,
        expected_state: loaded.instance.state,
        slot_key:       slot_key.to_owned(),
        document,
        filename:       filename.to_owned(),
        attached_by:    actor.user_id,
        at:             self.now(),
        supersede:      loaded.instance.state == NodeState::NeedsFixes,
      })
      .await?;
    self.emit(loaded, &committed.events).await;
    Ok(committed.value)
  }

  /// Attach an already stored document version to a slot.
  pub async fn upload_attachment(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    slot_key: &str,
    document: DocumentVersion,
    filename: &str,
  ) -> Result<Attachment> {
    let loaded = self.load(instance_id).await?;
    self.check_evidence(actor, &loaded)?;
    self.attach(actor, &loaded, slot_key, document, filename).await
  }

  /// Store `bytes` in the document store and attach them to a slot.
  ///
  /// Size, slot and MIME type are checked before anything is stored.
  pub async fn upload_file(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    slot_key: &str,
    bytes: Vec<u8>,
    mime: &str,
    filename: &str,
  ) -> Result<Attachment> {
    let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if size > self.config.max_upload_bytes {
      return Err(Error::FileTooLarge { size, limit: self.config.max_upload_bytes });
    }

    let loaded = self.load(instance_id).await?;
    self.check_evidence(actor, &loaded)?;
    let slot = self
      .store
      .list_slots(instance_id)
      .await?
      .into_iter()
      .find(|s| s.key() == slot_key)
      .ok_or_else(|| Error::SlotNotFound { instance_id, slot_key: slot_key.to_owned() })?;
    if !slot.spec.accepts_mime(mime) {
      return Err(Error::MimeRejected { slot_key: slot_key.to_owned(), mime: mime.to_owned() });
    }

    let document = self.documents.put(bytes, mime.to_owned(), actor.user_id).await?;
    self.attach(actor, &loaded, slot_key, document, filename).await
  }

  // ── Transitions ───────────────────────────────────────────────────────

  /// `active | needs_fixes → submitted`.
  pub async fn submit(&self, actor: &Actor, instance_id: Uuid) -> Result<NodeInstance> {
    let loaded = self.load(instance_id).await?;
    self.transition(actor, loaded, NodeState::Submitted, None, None).await
  }

  /// `submitted → under_review`.
  pub async fn assign_review(&self, actor: &Actor, instance_id: Uuid) -> Result<NodeInstance> {
    let loaded = self.load(instance_id).await?;
    self.transition(actor, loaded, NodeState::UnderReview, None, None).await
  }

  /// `submitted | under_review → needs_fixes`. The note is mandatory.
  pub async fn return_for_fixes(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    note: impl Into<String>,
  ) -> Result<NodeInstance> {
    let loaded = self.load(instance_id).await?;
    self
      .transition(actor, loaded, NodeState::NeedsFixes, Some(note.into()), None)
      .await
  }

  /// Append `value` to the outcome ledger and move to `done`, as one write.
  pub async fn record_outcome(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    value: &str,
    note: Option<String>,
  ) -> Result<NodeInstance> {
    let loaded = self.load(instance_id).await?;
    let node = loaded.node()?;
    if !node.allows_outcome(value) {
      return Err(Error::OutcomeNotAllowed { node: node.slug.clone(), value: value.to_owned() });
    }
    let outcome = NewOutcome {
      value: value.to_owned(),
      decided_by: actor.user_id,
      note: note.filter(|n| !n.trim().is_empty()),
    };
    self
      .transition(actor, loaded, NodeState::Done, None, Some(outcome))
      .await
  }

  /// Any non-terminal state → `cancelled`. Admins only.
  pub async fn cancel(
    &self,
    actor: &Actor,
    instance_id: Uuid,
    reason: Option<String>,
  ) -> Result<NodeInstance> {
    let loaded = self.load(instance_id).await?;
    self
      .transition(actor, loaded, NodeState::Cancelled, reason, None)
      .await
  }

  // ── Reviews ───────────────────────────────────────────────────────────

  /// Record a reviewer's verdict on one attachment. Rejections need a note.
  pub async fn review_attachment(
    &self,
    actor: &Actor,
    attachment_id: Uuid,
    verdict: Verdict,
    note: Option<String>,
  ) -> Result<Attachment> {
    let attachment = self
      .store
      .get_attachment(attachment_id)
      .await?
      .ok_or(Error::AttachmentNotFound(attachment_id))?;
    let loaded = self.load(attachment.instance_id).await?;
    self.authorize_reviewer(actor, &loaded).await?;
    if loaded.instance.state.is_terminal() {
      return Err(Error::EvidenceLocked { state: loaded.instance.state });
    }
    let note = note.filter(|n| !n.trim().is_empty());
    if verdict == Verdict::Reject && note.is_none() {
      return Err(Error::ReviewNoteRequired);
    }

    let committed = self
      .store
      .review_attachment(ReviewWrite {
        attachment_id,
        verdict,
        note,
        reviewer: actor.user_id,
        at: self.now(),
      })
      .await?;
    self.emit(&loaded, &committed.events).await;
    Ok(committed.value)
  }

  /// Attach a reviewer's annotated copy. The student's original is kept.
  pub async fn upload_reviewed_copy(
    &self,
    actor: &Actor,
    attachment_id: Uuid,
    document: DocumentVersion,
  ) -> Result<Attachment> {
    let attachment = self
      .store
      .get_attachment(attachment_id)
      .await?
      .ok_or(Error::AttachmentNotFound(attachment_id))?;
    let loaded = self.load(attachment.instance_id).await?;
    self.authorize_reviewer(actor, &loaded).await?;
    if loaded.instance.state.is_terminal() {
      return Err(Error::EvidenceLocked { state: loaded.instance.state });
    }

    let committed = self
      .store
      .upload_reviewed_copy(ReviewedCopyWrite {
        attachment_id,
        document_version_id: document.document_version_id,
        reviewer: actor.user_id,
        at: self.now(),
      })
      .await?;
    self.emit(&loaded, &committed.events).await;
    Ok(committed.value)
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Everything a review screen shows for one instance.
  pub async fn submission(&self, instance_id: Uuid) -> Result<Submission> {
    let instance = self.instance(instance_id).await?;
    let slots = self.store.list_slots(instance_id).await?;
    let attachments = self.store.list_attachments(instance_id, true).await?;
    let missing = missing_required(&slots, &attachments);
    let form = self.store.latest_revision(instance_id).await?;
    let outcomes = self.store.list_outcomes(instance_id).await?;

    let slots = slots
      .into_iter()
      .map(|slot| {
        let attachments = attachments
          .iter()
          .filter(|a| a.slot_id == slot.slot_id)
          .cloned()
          .collect();
        SlotView { slot, attachments }
      })
      .collect();

    Ok(Submission { instance, slots, form, outcomes, missing })
  }

  pub async fn form_revision(&self, instance_id: Uuid, rev: u32) -> Result<Option<FormRevision>> {
    Ok(self.store.get_revision(instance_id, rev).await?)
  }

  /// Required slots still lacking an active, non-rejected attachment.
  pub async fn missing_evidence(&self, instance_id: Uuid) -> Result<Vec<String>> {
    self.instance(instance_id).await?;
    self.missing_required_slots(instance_id).await
  }

  /// The outcome ledger of one instance, oldest first.
  pub async fn outcomes(&self, instance_id: Uuid) -> Result<Vec<Outcome>> {
    self.instance(instance_id).await?;
    Ok(self.store.list_outcomes(instance_id).await?)
  }

  /// The event log of one instance, in order.
  pub async fn history(&self, instance_id: Uuid) -> Result<Vec<NodeEvent>> {
    self.instance(instance_id).await?;
    Ok(self.store.list_events(instance_id).await?)
  }

  /// Projection rows for one student.
  pub async fn journey(&self, tenant_id: Uuid, user_id: Uuid) -> Result<Vec<JourneyState>> {
    Ok(self.store.journey_states(tenant_id, user_id).await?)
  }

  pub async fn rebuild_projection(&self, tenant_id: Option<Uuid>) -> Result<usize> {
    Ok(self.store.rebuild_projection(tenant_id).await?)
  }
}
