//! The per-instance event log.
//!
//! Events are append-only and ordered by `created_at`, then by the store's
//! insertion sequence. State-changing events carry `{"from", "to"}` in their
//! payload, which is enough for [`replay`] to rebuild an instance's state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::state::NodeState;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
  Opened,
  FormSaved,
  AttachmentUploaded,
  Submitted,
  ReviewAssigned,
  AttachmentReviewed,
  ReviewedCopyUploaded,
  Transitioned,
  OutcomeRecorded,
  Cancelled,
  SlaBreached,
}

impl EventType {
  /// The event a transition into `to` is recorded as.
  pub fn for_transition(to: NodeState) -> Self {
    match to {
      NodeState::Submitted => Self::Submitted,
      NodeState::UnderReview => Self::ReviewAssigned,
      NodeState::Cancelled => Self::Cancelled,
      _ => Self::Transitioned,
    }
  }

  pub fn changes_state(self) -> bool {
    matches!(
      self,
      Self::Opened
        | Self::Submitted
        | Self::ReviewAssigned
        | Self::Transitioned
        | Self::Cancelled
    )
  }
}

/// A persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
  pub event_id:    Uuid,
  /// Store-assigned insertion order; breaks `created_at` ties.
  pub seq:         i64,
  pub instance_id: Uuid,
  pub event_type:  EventType,
  pub payload:     Value,
  pub actor_id:    Uuid,
  pub created_at:  DateTime<Utc>,
}

impl NodeEvent {
  /// The state this event moved the instance into, if it moved it at all.
  pub fn target_state(&self) -> Option<NodeState> {
    if !self.event_type.changes_state() {
      return None;
    }
    self.payload.get("to")?.as_str()?.parse().ok()
  }
}

/// An event waiting to be appended. The instance is implied by the store
/// call it is handed to.
#[derive(Debug, Clone)]
pub struct NewEvent {
  pub event_type: EventType,
  pub payload:    Value,
  pub actor_id:   Uuid,
  pub created_at: DateTime<Utc>,
}

impl NewEvent {
  pub fn new(event_type: EventType, actor_id: Uuid, created_at: DateTime<Utc>) -> Self {
    Self { event_type, payload: json!({}), actor_id, created_at }
  }

  pub fn with_payload(mut self, payload: Value) -> Self {
    self.payload = payload;
    self
  }

  /// A state-changing event with the `{"from", "to"}` payload.
  pub fn state_change(
    from: Option<NodeState>,
    to: NodeState,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
  ) -> Self {
    let event_type = match from {
      None => EventType::Opened,
      Some(_) => EventType::for_transition(to),
    };
    Self::new(event_type, actor_id, created_at).with_payload(json!({
      "from": from.map(NodeState::as_str),
      "to":   to.as_str(),
    }))
  }

  /// Merge `extra` into the payload object.
  pub fn merge(mut self, extra: Value) -> Self {
    if let (Value::Object(base), Value::Object(extra)) = (&mut self.payload, extra) {
      base.extend(extra);
    }
    self
  }
}

/// Rebuild an instance's state from its events, in log order.
///
/// Returns `None` when the log holds no state-changing event.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a NodeEvent>) -> Option<NodeState> {
  events.into_iter().filter_map(NodeEvent::target_state).last()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn persisted(seq: i64, e: NewEvent) -> NodeEvent {
    NodeEvent {
      event_id:    Uuid::new_v4(),
      seq,
      instance_id: Uuid::nil(),
      event_type:  e.event_type,
      payload:     e.payload,
      actor_id:    e.actor_id,
      created_at:  e.created_at,
    }
  }

  #[test]
  fn replay_follows_state_changes_only() {
    let now = Utc::now();
    let actor = Uuid::new_v4();
    let log = vec![
      persisted(1, NewEvent::state_change(None, NodeState::Active, actor, now)),
      persisted(2, NewEvent::new(EventType::FormSaved, actor, now).with_payload(json!({"rev": 1}))),
      persisted(
        3,
        NewEvent::state_change(Some(NodeState::Active), NodeState::Submitted, actor, now),
      ),
      persisted(4, NewEvent::new(EventType::OutcomeRecorded, actor, now)),
      persisted(
        5,
        NewEvent::state_change(Some(NodeState::Submitted), NodeState::Done, actor, now),
      ),
    ];
    assert_eq!(log[4].event_type, EventType::Transitioned);
    assert_eq!(replay(&log), Some(NodeState::Done));
    assert_eq!(replay(&log[..3]), Some(NodeState::Submitted));
    assert_eq!(replay(&log[1..2]), None);
  }

  #[test]
  fn merge_extends_payload() {
    let e = NewEvent::state_change(
      Some(NodeState::Submitted),
      NodeState::NeedsFixes,
      Uuid::nil(),
      Utc::now(),
    )
    .merge(json!({"note": "wrong template"}));
    assert_eq!(e.payload["to"], "needs_fixes");
    assert_eq!(e.payload["note"], "wrong template");
  }
}
