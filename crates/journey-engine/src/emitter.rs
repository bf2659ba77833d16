//! Notification Emitter — turns committed events into messages.
//!
//! Runs after the store has committed. Nothing here can fail the operation
//! that produced the events: identity lookups and deliveries that go wrong
//! are logged at `warn` and dropped.

use std::collections::BTreeSet;

use journey_core::{
  Result,
  collaborator::{Identity, Notification, Notifier},
  event::{EventType, NodeEvent},
  instance::NodeInstance,
  state::NodeState,
};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

/// Who hears about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
  Student,
  LinkedReviewers,
  Admins,
  AdminsAndStudent,
}

/// What to send for one event, before recipients are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
  pub audience: Audience,
  pub kind:     &'static str,
  pub subject:  String,
  pub body:     String,
}

/// Map an event to its notification, if it has one. `title` is the node's
/// display title.
pub fn plan(event: &NodeEvent, title: &str) -> Option<Plan> {
  let (audience, kind, subject, body) = match event.event_type {
    EventType::Submitted => (
      Audience::LinkedReviewers,
      "node_submitted",
      format!("{title}: submitted for review"),
      "A student has submitted this step for review.".to_owned(),
    ),
    EventType::ReviewAssigned => (
      Audience::Student,
      "review_started",
      format!("{title}: review started"),
      "A reviewer has started reviewing your submission.".to_owned(),
    ),
    EventType::AttachmentReviewed => {
      let rejected = event.payload["verdict"] == "reject";
      let body = if rejected {
        let note = event.payload["note"].as_str().unwrap_or_default();
        format!("Changes requested for your document. Note: {note}")
      } else {
        "Your document has been approved.".to_owned()
      };
      (Audience::Student, "document_reviewed", format!("{title}: document reviewed"), body)
    }
    EventType::ReviewedCopyUploaded => (
      Audience::Student,
      "reviewed_copy_available",
      format!("{title}: reviewed copy available"),
      "Your reviewer uploaded an annotated copy of your document.".to_owned(),
    ),
    EventType::Transitioned => match event.target_state()? {
      NodeState::NeedsFixes => {
        let note = event.payload["note"].as_str().unwrap_or_default();
        (
          Audience::Student,
          "changes_requested",
          format!("{title}: changes requested"),
          format!("Your submission was returned for fixes. Note: {note}"),
        )
      }
      NodeState::Done => (
        Audience::Student,
        "node_completed",
        format!("{title}: completed"),
        "This step of your journey is complete.".to_owned(),
      ),
      _ => return None,
    },
    EventType::Cancelled => (
      Audience::AdminsAndStudent,
      "node_cancelled",
      format!("{title}: cancelled"),
      "This step was cancelled by an administrator.".to_owned(),
    ),
    EventType::SlaBreached => (
      Audience::Admins,
      "deadline_breached",
      format!("{title}: deadline passed"),
      format!(
        "The deadline of {} passed before the step was completed.",
        event.payload["due_at"].as_str().unwrap_or("this step")
      ),
    ),
    EventType::Opened
    | EventType::FormSaved
    | EventType::AttachmentUploaded
    | EventType::OutcomeRecorded => return None,
  };
  Some(Plan { audience, kind, subject, body })
}

pub struct Emitter<'a, I, N> {
  identity: &'a I,
  notifier: &'a N,
}

impl<'a, I: Identity, N: Notifier> Emitter<'a, I, N> {
  pub fn new(identity: &'a I, notifier: &'a N) -> Self { Self { identity, notifier } }

  /// Notify everyone concerned by `events`, which were committed against
  /// `instance`.
  pub async fn emit(&self, instance: &NodeInstance, title: &str, events: &[NodeEvent]) {
    for event in events {
      if let Some(plan) = plan(event, title) {
        self.deliver(instance, event, plan).await;
      }
    }
  }

  async fn recipients(&self, instance: &NodeInstance, audience: Audience) -> Result<Vec<Uuid>> {
    Ok(match audience {
      Audience::Student => vec![instance.user_id],
      Audience::LinkedReviewers => {
        self.identity.linked_reviewers(instance.tenant_id, instance.user_id).await?
      }
      Audience::Admins => self.identity.tenant_admins(instance.tenant_id).await?,
      Audience::AdminsAndStudent => {
        let mut all = self.identity.tenant_admins(instance.tenant_id).await?;
        all.push(instance.user_id);
        all
      }
    })
  }

  async fn deliver(&self, instance: &NodeInstance, event: &NodeEvent, plan: Plan) {
    let recipients = match self.recipients(instance, plan.audience).await {
      Ok(r) => r,
      Err(e) => {
        warn!(
          event_id = %event.event_id,
          kind = plan.kind,
          error = %e,
          "could not resolve notification recipients"
        );
        return;
      }
    };

    let mut seen = BTreeSet::new();
    for recipient in recipients {
      // Actors are never told about their own actions.
      if recipient == event.actor_id || !seen.insert(recipient) {
        continue;
      }
      let notification = Notification {
        recipient_id: recipient,
        kind:         plan.kind.to_owned(),
        subject:      plan.subject.clone(),
        body:         plan.body.clone(),
        dedup_key:    format!("{}:{}", event.event_id, recipient),
        payload:      json!({
          "event_id":    event.event_id,
          "event_type":  event.event_type,
          "instance_id": instance.instance_id,
          "node_slug":   instance.node_slug,
          "user_id":     instance.user_id,
          "detail":      event.payload,
        }),
      };
      match self.notifier.send(notification).await {
        Ok(()) => debug!(event_id = %event.event_id, %recipient, kind = plan.kind, "notification sent"),
        Err(e) => warn!(
          event_id = %event.event_id,
          %recipient,
          kind = plan.kind,
          error = %e,
          "notification delivery failed"
        ),
      }
    }
  }
}
