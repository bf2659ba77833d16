//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use journey_core::{
  Error as CoreError,
  event::{EventType, NewEvent},
  instance::{NewInstance, NodeInstance},
  playbook::{Multiplicity, NewPlaybookRecord, PlaybookRecord, SlotSpec},
  state::NodeState,
  store::{
    AttachWrite, FormWrite, JourneyStore, NewOutcome, ReviewWrite, ReviewedCopyWrite,
    TransitionWrite,
  },
  submission::{AttachmentStatus, DocumentVersion, Verdict},
};
use serde_json::json;
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn t(minutes: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn core(err: Error) -> CoreError {
  match err {
    Error::Core(inner) => inner,
    other => panic!("expected a domain error, got {other}"),
  }
}

fn record(tenant_id: Uuid, checksum: &str) -> NewPlaybookRecord {
  NewPlaybookRecord {
    tenant_id,
    playbook_id: "phd".into(),
    version: checksum.into(),
    checksum: checksum.into(),
    raw_json: format!(r#"{{"playbook_id":"phd","version":"{checksum}"}}"#),
  }
}

fn slots() -> Vec<SlotSpec> {
  vec![
    SlotSpec {
      slot_key:       "cv".into(),
      required:       true,
      multiplicity:   Multiplicity::Single,
      mime_whitelist: vec!["application/pdf".into()],
      max_files:      None,
    },
    SlotSpec {
      slot_key:       "papers".into(),
      required:       false,
      multiplicity:   Multiplicity::Multi,
      mime_whitelist: vec![],
      max_files:      Some(2),
    },
  ]
}

fn document(mime: &str) -> DocumentVersion {
  DocumentVersion {
    document_version_id: Uuid::new_v4(),
    mime:                mime.into(),
    size_bytes:          1024,
    checksum:            "00".into(),
  }
}

struct Fixture {
  store:    SqliteStore,
  playbook: PlaybookRecord,
  student:  Uuid,
}

async fn fixture() -> Fixture {
  let store = store().await;
  let playbook = store
    .publish_playbook(record(Uuid::new_v4(), "v1"), t(0))
    .await
    .unwrap();
  Fixture { store, playbook, student: Uuid::new_v4() }
}

impl Fixture {
  fn new_instance(&self, slug: &str) -> NewInstance {
    NewInstance {
      tenant_id:           self.playbook.tenant_id,
      user_id:             self.student,
      playbook_version_id: self.playbook.version_id,
      node_slug:           slug.into(),
      locale:              Some("en".into()),
    }
  }

  async fn open(&self, slug: &str) -> NodeInstance {
    self
      .store
      .open_instance(self.new_instance(slug), slots(), self.student, t(1))
      .await
      .unwrap()
      .value
      .instance
  }

  fn attach(&self, instance: &NodeInstance, slot: &str, mime: &str) -> AttachWrite {
    AttachWrite {
      instance_id:    instance.instance_id,
      expected_state: NodeState::Active,
      slot_key:       slot.into(),
      document:       document(mime),
      filename:       format!("{slot}.pdf"),
      attached_by:    self.student,
      at:             t(2),
      supersede:      false,
    }
  }

  fn transition(&self, instance: &NodeInstance, from: NodeState, to: NodeState) -> TransitionWrite {
    TransitionWrite {
      instance_id: instance.instance_id,
      from,
      to,
      actor_id: self.student,
      at: t(5),
      require_complete: false,
      note: None,
      outcome: None,
    }
  }
}

// ─── Playbooks ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn publish_is_idempotent_by_checksum() {
  let s = store().await;
  let tenant = Uuid::new_v4();

  let first = s.publish_playbook(record(tenant, "aaa"), t(0)).await.unwrap();
  let second = s.publish_playbook(record(tenant, "bbb"), t(1)).await.unwrap();
  assert_ne!(first.version_id, second.version_id);
  assert_eq!(s.active_playbook(tenant).await.unwrap().unwrap().version_id, second.version_id);

  let again = s.publish_playbook(record(tenant, "aaa"), t(2)).await.unwrap();
  assert_eq!(again.version_id, first.version_id);
  assert_eq!(again.created_at, t(0));
  assert_eq!(s.active_playbook(tenant).await.unwrap().unwrap().version_id, first.version_id);
  assert_eq!(s.list_playbooks(tenant).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_tenant_has_no_active_playbook() {
  let s = store().await;
  assert!(s.active_playbook(Uuid::new_v4()).await.unwrap().is_none());
  assert!(s.get_playbook(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── Instances ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_creates_instance_slots_event_and_projection() {
  let f = fixture().await;
  let opened = f
    .store
    .open_instance(f.new_instance("profile"), slots(), f.student, t(1))
    .await
    .unwrap();

  assert!(opened.value.created);
  assert_eq!(opened.value.instance.state, NodeState::Active);
  assert_eq!(opened.value.instance.current_rev, 0);
  assert_eq!(opened.value.slots.len(), 2);
  assert_eq!(opened.value.slots[0].key(), "cv");
  assert_eq!(opened.events.len(), 1);
  assert_eq!(opened.events[0].event_type, EventType::Opened);

  let journey = f
    .store
    .journey_states(f.playbook.tenant_id, f.student)
    .await
    .unwrap();
  assert_eq!(journey.len(), 1);
  assert_eq!(journey[0].node_slug, "profile");
  assert_eq!(journey[0].state, NodeState::Active);
}

#[tokio::test]
async fn reopening_returns_existing_instance_without_events() {
  let f = fixture().await;
  let first = f.open("profile").await;

  let again = f
    .store
    .open_instance(f.new_instance("profile"), slots(), f.student, t(3))
    .await
    .unwrap();
  assert!(!again.value.created);
  assert!(again.events.is_empty());
  assert_eq!(again.value.instance.instance_id, first.instance_id);

  let events = f.store.list_events(first.instance_id).await.unwrap();
  assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn ensure_slots_adds_only_missing_keys() {
  let f = fixture().await;
  let instance = f.open("profile").await;

  let mut specs = slots();
  specs.push(SlotSpec {
    slot_key:       "photo".into(),
    required:       false,
    multiplicity:   Multiplicity::Single,
    mime_whitelist: vec!["image/*".into()],
    max_files:      None,
  });
  let all = f.store.ensure_slots(instance.instance_id, specs).await.unwrap();
  let keys: Vec<_> = all.iter().map(|s| s.key()).collect();
  assert_eq!(keys, vec!["cv", "papers", "photo"]);

  let err = f
    .store
    .ensure_slots(Uuid::new_v4(), slots())
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::InstanceNotFound(_)));
}

// ─── Transitions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn transition_updates_state_and_logs_event() {
  let f = fixture().await;
  let instance = f.open("profile").await;

  let committed = f
    .store
    .apply_transition(f.transition(&instance, NodeState::Active, NodeState::Submitted))
    .await
    .unwrap();
  assert_eq!(committed.value.state, NodeState::Submitted);
  assert_eq!(committed.value.submitted_at, Some(t(5)));
  assert_eq!(committed.events.len(), 1);
  assert_eq!(committed.events[0].event_type, EventType::Submitted);
  assert_eq!(committed.events[0].payload, json!({ "from": "active", "to": "submitted" }));

  let journey = f
    .store
    .journey_states(f.playbook.tenant_id, f.student)
    .await
    .unwrap();
  assert_eq!(journey[0].state, NodeState::Submitted);
}

#[tokio::test]
async fn stale_transition_is_rejected() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let write = f.transition(&instance, NodeState::Active, NodeState::Submitted);

  f.store.apply_transition(write.clone()).await.unwrap();
  let err = f.store.apply_transition(write).await.unwrap_err();
  assert!(matches!(
    core(err),
    CoreError::ConcurrentTransition { expected: NodeState::Active, .. }
  ));

  // The losing write left nothing behind.
  let events = f.store.list_events(instance.instance_id).await.unwrap();
  assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn racing_transitions_commit_exactly_once() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let write = f.transition(&instance, NodeState::Active, NodeState::Submitted);

  let (a, b) = tokio::join!(
    f.store.apply_transition(write.clone()),
    f.store.apply_transition(write),
  );
  assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

  let submitted = f
    .store
    .list_events(instance.instance_id)
    .await
    .unwrap()
    .into_iter()
    .filter(|e| e.event_type == EventType::Submitted)
    .count();
  assert_eq!(submitted, 1);
}

#[tokio::test]
async fn submission_rechecks_evidence_at_commit() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let mut submit = f.transition(&instance, NodeState::Active, NodeState::Submitted);
  submit.require_complete = true;

  let err = f.store.apply_transition(submit.clone()).await.unwrap_err();
  assert!(matches!(
    core(err),
    CoreError::IncompleteSubmission { ref missing_slots, has_form: false } if missing_slots == &["cv"]
  ));

  f.store
    .save_revision(FormWrite {
      instance_id:    instance.instance_id,
      expected_state: NodeState::Active,
      form_data:      json!({ "title": "a" }),
      edited_by:      f.student,
      at:             t(2),
    })
    .await
    .unwrap();
  let cv = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  // Rejected after the caller looked, before it wrote.
  f.store
    .review_attachment(ReviewWrite {
      attachment_id: cv.value.attachment_id,
      verdict:       Verdict::Reject,
      note:          Some("wrong file".into()),
      reviewer:      Uuid::new_v4(),
      at:            t(3),
    })
    .await
    .unwrap();

  let err = f.store.apply_transition(submit).await.unwrap_err();
  assert!(matches!(
    core(err),
    CoreError::IncompleteSubmission { ref missing_slots, has_form: true } if missing_slots == &["cv"]
  ));
  let reloaded = f.store.get_instance(instance.instance_id).await.unwrap().unwrap();
  assert_eq!(reloaded.state, NodeState::Active);
}

#[tokio::test]
async fn resubmission_rechecks_the_edit_flag() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  f.store
    .apply_transition(f.transition(&instance, NodeState::Active, NodeState::Submitted))
    .await
    .unwrap();
  f.store
    .apply_transition(f.transition(&instance, NodeState::Submitted, NodeState::NeedsFixes))
    .await
    .unwrap();

  let mut resubmit = f.transition(&instance, NodeState::NeedsFixes, NodeState::Submitted);
  resubmit.require_complete = true;
  let err = f.store.apply_transition(resubmit).await.unwrap_err();
  assert!(matches!(core(err), CoreError::NoChangesSinceReturn));
}

#[tokio::test]
async fn outcome_is_logged_before_state_change() {
  let f = fixture().await;
  let instance = f.open("decision").await;
  let mut write = f.transition(&instance, NodeState::Active, NodeState::Done);
  write.note = Some("well done".into());
  write.outcome = Some(NewOutcome {
    value:      "accept".into(),
    decided_by: f.student,
    note:       Some("unanimous".into()),
  });

  let committed = f.store.apply_transition(write).await.unwrap();
  let kinds: Vec<_> = committed.events.iter().map(|e| e.event_type).collect();
  assert_eq!(kinds, vec![EventType::OutcomeRecorded, EventType::Transitioned]);
  assert_eq!(committed.events[1].payload["note"], "well done");

  let outcomes = f.store.list_outcomes(instance.instance_id).await.unwrap();
  assert_eq!(outcomes.len(), 1);
  assert_eq!(outcomes[0].value, "accept");
  assert_eq!(outcomes[0].note.as_deref(), Some("unanimous"));
}

// ─── Form revisions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn revisions_are_numbered_and_mark_edits() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let write = |data: serde_json::Value| FormWrite {
    instance_id:    instance.instance_id,
    expected_state: NodeState::Active,
    form_data:      data,
    edited_by:      f.student,
    at:             t(2),
  };

  let r1 = f.store.save_revision(write(json!({ "title": "a" }))).await.unwrap();
  let r2 = f.store.save_revision(write(json!({ "title": "b" }))).await.unwrap();
  assert_eq!((r1.value.rev, r2.value.rev), (1, 2));
  assert_eq!(r2.events[0].event_type, EventType::FormSaved);

  let latest = f.store.latest_revision(instance.instance_id).await.unwrap().unwrap();
  assert_eq!(latest.form_data, json!({ "title": "b" }));
  let first = f.store.get_revision(instance.instance_id, 1).await.unwrap().unwrap();
  assert_eq!(first.form_data, json!({ "title": "a" }));

  let reloaded = f.store.get_instance(instance.instance_id).await.unwrap().unwrap();
  assert_eq!(reloaded.current_rev, 2);
  assert!(reloaded.edited_since_transition);

  let after = f
    .store
    .apply_transition(f.transition(&instance, NodeState::Active, NodeState::Submitted))
    .await
    .unwrap();
  assert!(!after.value.edited_since_transition);
}

#[tokio::test]
async fn revisions_are_refused_once_submitted() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  f.store
    .apply_transition(f.transition(&instance, NodeState::Active, NodeState::Submitted))
    .await
    .unwrap();

  let err = f
    .store
    .save_revision(FormWrite {
      instance_id:    instance.instance_id,
      expected_state: NodeState::Submitted,
      form_data:      json!({}),
      edited_by:      f.student,
      at:             t(6),
    })
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::EvidenceLocked { state: NodeState::Submitted }));
}

// ─── Attachments ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn attachments_respect_the_mime_whitelist() {
  let f = fixture().await;
  let instance = f.open("profile").await;

  let err = f
    .store
    .attach_document(f.attach(&instance, "cv", "image/png"))
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::MimeRejected { .. }));

  let err = f
    .store
    .attach_document(f.attach(&instance, "nope", "application/pdf"))
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::SlotNotFound { .. }));

  let ok = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf; charset=binary"))
    .await
    .unwrap();
  assert_eq!(ok.value.status, AttachmentStatus::Submitted);
  assert_eq!(ok.value.slot_key, "cv");
}

#[tokio::test]
async fn single_slot_needs_explicit_supersede() {
  let f = fixture().await;
  let instance = f.open("profile").await;

  let first = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  let err = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::MultiplicityExceeded { limit: 1, .. }));

  let mut replace = f.attach(&instance, "cv", "application/pdf");
  replace.supersede = true;
  let second = f.store.attach_document(replace).await.unwrap();
  assert_eq!(
    second.events[0].payload["superseded"],
    json!([first.value.attachment_id])
  );

  let active = f.store.list_attachments(instance.instance_id, false).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].attachment_id, second.value.attachment_id);
  let all = f.store.list_attachments(instance.instance_id, true).await.unwrap();
  assert_eq!(all.len(), 2);
  assert!(!all[0].is_active);
}

#[tokio::test]
async fn rejected_single_slot_can_be_replaced() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let first = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  f.store
    .review_attachment(ReviewWrite {
      attachment_id: first.value.attachment_id,
      verdict:       Verdict::Reject,
      note:          Some("blurry scan".into()),
      reviewer:      Uuid::new_v4(),
      at:            t(3),
    })
    .await
    .unwrap();

  f.store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  let active = f.store.list_attachments(instance.instance_id, false).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].status, AttachmentStatus::Submitted);
}

#[tokio::test]
async fn multi_slot_enforces_max_files() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  for _ in 0..2 {
    f.store
      .attach_document(f.attach(&instance, "papers", "text/plain"))
      .await
      .unwrap();
  }
  let err = f
    .store
    .attach_document(f.attach(&instance, "papers", "text/plain"))
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::MultiplicityExceeded { limit: 2, .. }));
}

#[tokio::test]
async fn reviews_refresh_instance_counts() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let reviewer = Uuid::new_v4();
  let cv = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  let paper = f
    .store
    .attach_document(f.attach(&instance, "papers", "application/pdf"))
    .await
    .unwrap();

  let counts = f.store.get_instance(instance.instance_id).await.unwrap().unwrap().counts;
  assert_eq!((counts.submitted, counts.approved, counts.rejected), (2, 0, 0));

  let reviewed = f
    .store
    .review_attachment(ReviewWrite {
      attachment_id: cv.value.attachment_id,
      verdict:       Verdict::ApproveWithComments,
      note:          Some("fix the margins later".into()),
      reviewer,
      at:            t(4),
    })
    .await
    .unwrap();
  assert_eq!(reviewed.value.status, AttachmentStatus::ApprovedWithComments);
  assert_eq!(reviewed.value.approved_by, Some(reviewer));
  assert_eq!(reviewed.events[0].event_type, EventType::AttachmentReviewed);

  f.store
    .review_attachment(ReviewWrite {
      attachment_id: paper.value.attachment_id,
      verdict:       Verdict::Reject,
      note:          Some("wrong file".into()),
      reviewer,
      at:            t(4),
    })
    .await
    .unwrap();

  let counts = f.store.get_instance(instance.instance_id).await.unwrap().unwrap().counts;
  assert_eq!((counts.submitted, counts.approved, counts.rejected), (0, 1, 1));
}

#[tokio::test]
async fn reviewed_copy_is_recorded() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let cv = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  let copy = Uuid::new_v4();
  let reviewer = Uuid::new_v4();

  let committed = f
    .store
    .upload_reviewed_copy(ReviewedCopyWrite {
      attachment_id: cv.value.attachment_id,
      document_version_id: copy,
      reviewer,
      at: t(4),
    })
    .await
    .unwrap();
  assert_eq!(committed.value.reviewed_document_version_id, Some(copy));
  assert_eq!(committed.value.reviewed_by, Some(reviewer));
  assert_eq!(committed.events[0].event_type, EventType::ReviewedCopyUploaded);
}

#[tokio::test]
async fn terminal_instances_refuse_reviews() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let cv = f
    .store
    .attach_document(f.attach(&instance, "cv", "application/pdf"))
    .await
    .unwrap();
  f.store
    .apply_transition(f.transition(&instance, NodeState::Active, NodeState::Cancelled))
    .await
    .unwrap();

  let err = f
    .store
    .review_attachment(ReviewWrite {
      attachment_id: cv.value.attachment_id,
      verdict:       Verdict::Approve,
      note:          None,
      reviewer:      Uuid::new_v4(),
      at:            t(6),
    })
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::EvidenceLocked { state: NodeState::Cancelled }));
}

// ─── Events & projection ─────────────────────────────────────────────────────

#[tokio::test]
async fn events_list_in_time_then_insertion_order() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  f.store
    .append_event(
      instance.instance_id,
      NewEvent::new(EventType::SlaBreached, Uuid::nil(), t(1))
        .with_payload(json!({ "deadline": "x" })),
    )
    .await
    .unwrap();

  let events = f.store.list_events(instance.instance_id).await.unwrap();
  let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
  assert_eq!(kinds, vec![EventType::Opened, EventType::SlaBreached]);
  assert!(events[0].seq < events[1].seq);

  let err = f
    .store
    .append_event(Uuid::new_v4(), NewEvent::new(EventType::SlaBreached, Uuid::nil(), t(1)))
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::InstanceNotFound(_)));
}

#[tokio::test]
async fn sla_breach_is_recorded_once() {
  let f = fixture().await;
  let instance = f.open("profile").await;
  let breach = || {
    NewEvent::new(EventType::SlaBreached, Uuid::nil(), t(9))
      .with_payload(json!({ "due_at": "2024-09-01T09:00:00Z" }))
  };

  let (a, b) = tokio::join!(
    f.store.record_sla_breach(instance.instance_id, breach()),
    f.store.record_sla_breach(instance.instance_id, breach()),
  );
  let recorded = [a.unwrap(), b.unwrap()];
  assert_eq!(recorded.iter().filter(|e| e.is_some()).count(), 1);
  assert!(
    f.store
      .record_sla_breach(instance.instance_id, breach())
      .await
      .unwrap()
      .is_none()
  );

  let breaches = f
    .store
    .list_events(instance.instance_id)
    .await
    .unwrap()
    .into_iter()
    .filter(|e| e.event_type == EventType::SlaBreached)
    .count();
  assert_eq!(breaches, 1);

  let err = f
    .store
    .record_sla_breach(Uuid::new_v4(), breach())
    .await
    .unwrap_err();
  assert!(matches!(core(err), CoreError::InstanceNotFound(_)));
}

#[tokio::test]
async fn logs_are_append_only() {
  let f = fixture().await;
  let instance = f.open("decision").await;
  f.store
    .save_revision(FormWrite {
      instance_id:    instance.instance_id,
      expected_state: NodeState::Active,
      form_data:      json!({ "title": "a" }),
      edited_by:      f.student,
      at:             t(2),
    })
    .await
    .unwrap();
  let mut done = f.transition(&instance, NodeState::Active, NodeState::Done);
  done.outcome = Some(NewOutcome { value: "accept".into(), decided_by: f.student, note: None });
  f.store.apply_transition(done).await.unwrap();

  for stmt in [
    "UPDATE node_events SET actor_id = 'x'",
    "UPDATE form_revisions SET form_data = '{}'",
    "UPDATE node_outcomes SET value = 'reject'",
  ] {
    assert!(f.store.execute_raw(stmt).await.is_err(), "{stmt} should be refused");
  }
}

#[tokio::test]
async fn rebuild_restores_deleted_projection_rows() {
  let f = fixture().await;
  let profile = f.open("profile").await;
  f.open("proposal").await;
  f.store
    .apply_transition(f.transition(&profile, NodeState::Active, NodeState::Submitted))
    .await
    .unwrap();
  let before = f
    .store
    .journey_states(f.playbook.tenant_id, f.student)
    .await
    .unwrap();

  f.store.execute_raw("DELETE FROM journey_states").await.unwrap();
  let written = f.store.rebuild_projection(Some(f.playbook.tenant_id)).await.unwrap();
  assert_eq!(written, 2);

  let after = f
    .store
    .journey_states(f.playbook.tenant_id, f.student)
    .await
    .unwrap();
  assert_eq!(before, after);
}

#[tokio::test]
async fn latest_instance_follows_the_newest_version() {
  let f = fixture().await;
  let old = f.open("profile").await;
  let v2 = f
    .store
    .publish_playbook(record(f.playbook.tenant_id, "v2"), t(10))
    .await
    .unwrap();
  let newer = f
    .store
    .open_instance(
      NewInstance { playbook_version_id: v2.version_id, ..f.new_instance("profile") },
      slots(),
      f.student,
      t(11),
    )
    .await
    .unwrap()
    .value
    .instance;
  assert_ne!(old.instance_id, newer.instance_id);

  let latest = f
    .store
    .latest_instance(f.student, "profile".into())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(latest.instance_id, newer.instance_id);
  assert_eq!(f.store.list_instances(f.student).await.unwrap().len(), 2);

  let journey = f
    .store
    .journey_states(f.playbook.tenant_id, f.student)
    .await
    .unwrap();
  assert_eq!(journey.len(), 1);
  assert_eq!(journey[0].instance_id, newer.instance_id);
}
