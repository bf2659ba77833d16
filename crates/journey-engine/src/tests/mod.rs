//! Engine tests against an in-memory SQLite store and fake collaborators.


use std::sync::Arc;

use journey_core::{
  actor::{Actor, RoleContext},
  submission::{Attachment, DocumentVersion},
};
use journey_playbook::PlaybookVersion;
use journey_store_sqlite::SqliteStore;
use serde_json::json;
use uuid::Uuid;

use self::fakes::{FakeIdentity, MemoryDocuments, RecordingNotifier, SteppingClock};
use crate::{Engine, EngineConfig, OpenRequest};

pub type TestEngine = Engine<SqliteStore, FakeIdentity, RecordingNotifier, MemoryDocuments>;

/// The playbook every engine test runs against.
///
/// - `profile`: one required pdf `cv` slot, outcome `accepted`.
/// - `n1` → `n2`: a plain prerequisite chain.
/// - `decision`: branches to `finish` or `revise`; `finish` also needs `n1`.
/// - `thesis`: chair-reviewed, gated on page count, timed, with a capped
///   multi slot.
pub fn playbook_json() -> String {
  json!({
    "playbook_id": "phd",
    "version": "2026.1",
    "locale_default": "en",
    "conditions": [
      { "id": "long_enough", "expr": "thesis.pages >= 100" }
    ],
    "worlds": [
      {
        "id": "w1",
        "title": { "en": "Getting started" },
        "nodes": [
          {
            "id": "profile",
            "title": { "en": "Profile", "ru": "Профиль" },
            "type": "form",
            "who_can_complete": ["student"],
            "outcomes": [{ "value": "accepted" }],
            "requirements": {
              "slots": [
                { "slot_key": "cv", "required": true, "mime": ["application/pdf"] }
              ]
            }
          },
          {
            "id": "n1",
            "title": { "en": "Enrolment" },
            "who_can_complete": ["student"],
            "outcomes": [{ "value": "done" }]
          },
          {
            "id": "n2",
            "title": { "en": "Supervisor" },
            "who_can_complete": ["student"],
            "prerequisites": ["n1"],
            "outcomes": [{ "value": "done" }]
          }
        ]
      },
      {
        "id": "w2",
        "title": { "en": "Research" },
        "nodes": [
          {
            "id": "decision",
            "title": { "en": "Committee decision" },
            "who_can_complete": ["student"],
            "outcomes": [
              { "value": "accept", "next": ["finish"] },
              { "value": "reject", "next": ["revise"] }
            ]
          },
          {
            "id": "finish",
            "title": { "en": "Finish" },
            "prerequisites": ["decision", "n1"],
            "outcomes": [{ "value": "done" }]
          },
          {
            "id": "revise",
            "title": { "en": "Revise" },
            "prerequisites": ["decision"],
            "outcomes": [{ "value": "done" }]
          },
          {
            "id": "thesis",
            "title": { "en": "Thesis draft" },
            "who_can_complete": ["student"],
            "reviewers": ["chair"],
            "condition": "long_enough",
            "timer": { "duration_days": 7, "start_on": "opened" },
            "outcomes": [{ "value": "approved" }],
            "requirements": {
              "slots": [
                {
                  "slot_key": "chapters",
                  "multiplicity": "multi",
                  "max_files": 2,
                  "mime": ["application/pdf", "text/*"]
                }
              ]
            }
          }
        ]
      }
    ]
  })
  .to_string()
}

pub fn pdf(tag: &str) -> DocumentVersion {
  DocumentVersion {
    document_version_id: Uuid::new_v4(),
    mime:                "application/pdf".into(),
    size_bytes:          2048,
    checksum:            format!("pdf-{tag}"),
  }
}

pub fn jpg() -> DocumentVersion {
  DocumentVersion {
    document_version_id: Uuid::new_v4(),
    mime:                "image/jpeg".into(),
    size_bytes:          4096,
    checksum:            "jpg".into(),
  }
}

pub struct Harness {
  pub engine:    TestEngine,
  pub identity:  FakeIdentity,
  pub notifier:  RecordingNotifier,
  pub documents: MemoryDocuments,
  pub clock:     SteppingClock,
  pub playbook:  Arc<PlaybookVersion>,
  pub tenant:    Uuid,
  pub student:   Actor,
  /// Linked to `student`.
  pub advisor:   Actor,
  pub chair:     Actor,
  pub admin:     Actor,
}

impl Harness {
  pub async fn new() -> Self { Self::configured(EngineConfig::default()).await }

  pub async fn configured(config: EngineConfig) -> Self {
    let tenant = Uuid::new_v4();
    let identity = FakeIdentity::default();
    let notifier = RecordingNotifier::default();
    let documents = MemoryDocuments::default();
    let clock = SteppingClock::new();

    let store = SqliteStore::open_in_memory().await.expect("in-memory store");
    let engine = Engine::new(store, identity.clone(), notifier.clone(), documents.clone())
      .with_clock(clock.clone())
      .with_config(config);

    let student = Actor::new(Uuid::new_v4(), tenant).with_role("student");
    let advisor = Actor::new(Uuid::new_v4(), tenant).with_role("advisor");
    let chair = Actor::new(Uuid::new_v4(), tenant).with_role("chair");
    let admin = Actor::new(Uuid::new_v4(), tenant).with_role("admin");
    identity.link(student.user_id, advisor.user_id);
    identity.admin(tenant, admin.user_id);

    let playbook = engine
      .publish_playbook(tenant, &playbook_json())
      .await
      .expect("publish fixture playbook");

    Self {
      engine,
      identity,
      notifier,
      documents,
      clock,
      playbook,
      tenant,
      student,
      advisor,
      chair,
      admin,
    }
  }

  /// A second student in the same tenant, with no advisor links.
  pub fn other_student(&self) -> Actor {
    Actor::new(Uuid::new_v4(), self.tenant).with_role("student")
  }

  /// An admin of every tenant.
  pub fn superadmin(&self) -> Actor {
    Actor::new(Uuid::new_v4(), Uuid::new_v4()).with_grant("superadmin", RoleContext::Global)
  }

  pub async fn open(&self, slug: &str) -> Uuid {
    self.open_for(&self.student, slug).await
  }

  pub async fn open_for(&self, student: &Actor, slug: &str) -> Uuid {
    self
      .engine
      .open(student, OpenRequest::new(student.user_id, slug))
      .await
      .expect("open")
      .instance
      .instance_id
  }

  pub async fn save_form(&self, id: Uuid, form: serde_json::Value) {
    self.engine.save_form(&self.student, id, form).await.expect("save form");
  }

  pub async fn upload(&self, id: Uuid, slot: &str, document: DocumentVersion) -> Attachment {
    self
      .engine
      .upload_attachment(&self.student, id, slot, document, &format!("{slot}.pdf"))
      .await
      .expect("upload")
  }

  /// `profile` opened, filled in, uploaded and submitted. Returns the
  /// instance and its `cv` attachment.
  pub async fn submitted_profile(&self) -> (Uuid, Attachment) {
    let id = self.open("profile").await;
    self.save_form(id, json!({ "name": "A" })).await;
    let cv = self.upload(id, "cv", pdf("v1")).await;
    self.engine.submit(&self.student, id).await.expect("submit");
    (id, cv)
  }

  /// Walk a slot-less node to `done` with `outcome`.
  pub async fn complete(&self, slug: &str, outcome: &str) -> Uuid {
    let id = self.open(slug).await;
    self.save_form(id, json!({})).await;
    self.engine.submit(&self.student, id).await.expect("submit");
    self
      .engine
      .record_outcome(&self.chair, id, outcome, None)
      .await
      .expect("record outcome");
    id
  }
}
