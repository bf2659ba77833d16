//! Interfaces the core consumes from the rest of the portal.
//!
//! Implementations report their own failures as [`Error`]; a collaborator
//! that cannot be reached should answer with [`Error::Transient`].

use std::{
  future::Future,
  sync::atomic::{AtomicI64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Result, actor::Actor, submission::DocumentVersion};

/// Resolves sessions and answers relationship questions about users.
pub trait Identity: Send + Sync {
  /// Resolve an opaque session token into an actor with role grants.
  fn resolve_actor(
    &self,
    session: String,
  ) -> impl Future<Output = Result<Actor>> + Send + '_;

  /// Advisors and reviewers currently linked to a student.
  fn linked_reviewers(
    &self,
    tenant_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Uuid>>> + Send + '_;

  fn tenant_admins(
    &self,
    tenant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Uuid>>> + Send + '_;
}

/// Object storage for uploaded files. Uploads are idempotent by content hash.
pub trait DocumentStore: Send + Sync {
  fn put(
    &self,
    bytes: Vec<u8>,
    mime: String,
    uploader: Uuid,
  ) -> impl Future<Output = Result<DocumentVersion>> + Send + '_;
}

/// An outbound message for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub recipient_id: Uuid,
  pub kind:         String,
  pub subject:      String,
  pub body:         String,
  /// `"{event_id}:{recipient_id}"`. Delivery may repeat; receivers drop
  /// duplicates by this key.
  pub dedup_key:    String,
  pub payload:      Value,
}

/// The notification delivery service (at-least-once).
pub trait Notifier: Send + Sync {
  fn send(
    &self,
    notification: Notification,
  ) -> impl Future<Output = Result<()>> + Send + '_;
}

/// Source of timestamps. Injected so tests can control time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time that never goes backwards. A reading earlier than the
/// last one issued repeats the last one instead.
#[derive(Debug, Default)]
pub struct SystemClock {
  last_micros: AtomicI64,
}

impl SystemClock {
  fn issue(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
    let micros = wall.timestamp_micros();
    let last = self.last_micros.fetch_max(micros, Ordering::SeqCst);
    if last > micros {
      DateTime::from_timestamp_micros(last).unwrap_or(wall)
    } else {
      wall
    }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { self.issue(Utc::now()) }
}
