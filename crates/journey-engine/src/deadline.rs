//! Node timers.
//!
//! A timed node is due `duration_days` after it was opened or first
//! submitted. Breaching a deadline changes nothing about the instance; it
//! only appends one `sla_breached` event and tells the tenant's admins.

use chrono::{DateTime, Duration, Utc};
use journey_core::{
  Error, Result,
  collaborator::{DocumentStore, Identity, Notifier},
  event::{EventType, NewEvent},
  instance::NodeInstance,
  store::JourneyStore,
};
use journey_playbook::{Timer, TimerStart};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
  /// The node has no timer.
  Untimed,
  /// The timer has not started, or has not yet run out.
  Pending { due_at: Option<DateTime<Utc>> },
  /// The instance reached a terminal state.
  Closed { due_at: Option<DateTime<Utc>> },
  Breached {
    due_at:       DateTime<Utc>,
    /// True when this check appended the breach event.
    first_report: bool,
  },
}

/// When `instance` is due under `timer`. `None` until the timer starts, and
/// for a due date past the end of representable time.
pub fn due_at(timer: &Timer, instance: &NodeInstance) -> Option<DateTime<Utc>> {
  let start = match timer.start_on {
    TimerStart::Opened => Some(instance.opened_at),
    TimerStart::Submitted => instance.submitted_at,
  }?;
  Duration::try_days(i64::from(timer.duration_days)).and_then(|d| start.checked_add_signed(d))
}

impl<S, I, N, D> Engine<S, I, N, D>
where
  S: JourneyStore,
  I: Identity,
  N: Notifier,
  D: DocumentStore,
  Error: From<S::Error>,
{
  /// Compare an instance against its node's timer, reporting a breach at
  /// most once.
  pub async fn check_deadline(&self, instance_id: Uuid) -> Result<Deadline> {
    let loaded = self.load(instance_id).await?;
    let Some(timer) = loaded.node()?.timer else {
      return Ok(Deadline::Untimed);
    };
    let due = due_at(&timer, &loaded.instance);
    if loaded.instance.state.is_terminal() {
      return Ok(Deadline::Closed { due_at: due });
    }
    let now = self.now();
    let Some(due_at) = due.filter(|d| *d <= now) else {
      return Ok(Deadline::Pending { due_at: due });
    };

    let recorded = self
      .store()
      .record_sla_breach(
        instance_id,
        NewEvent::new(EventType::SlaBreached, Uuid::nil(), now)
          .with_payload(json!({ "due_at": due_at.to_rfc3339() })),
      )
      .await?;
    let Some(event) = recorded else {
      return Ok(Deadline::Breached { due_at, first_report: false });
    };
    info!(%instance_id, %due_at, node_slug = %loaded.instance.node_slug, "deadline breached");
    self.emit(&loaded, std::slice::from_ref(&event)).await;
    Ok(Deadline::Breached { due_at, first_report: true })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use journey_core::{instance::AttachmentCounts, state::NodeState};

  use super::*;

  fn instance(submitted_at: Option<DateTime<Utc>>) -> NodeInstance {
    let opened = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    NodeInstance {
      instance_id: Uuid::new_v4(),
      tenant_id: Uuid::nil(),
      user_id: Uuid::new_v4(),
      playbook_version_id: Uuid::new_v4(),
      node_slug: "proposal".into(),
      state: NodeState::Active,
      current_rev: 0,
      locale: None,
      edited_since_transition: false,
      counts: AttachmentCounts::default(),
      opened_at: opened,
      submitted_at,
      updated_at: opened,
    }
  }

  #[test]
  fn opened_timers_start_immediately() {
    let timer = Timer { duration_days: 10, start_on: TimerStart::Opened };
    let due = due_at(&timer, &instance(None)).unwrap();
    assert_eq!(due, Utc.with_ymd_and_hms(2026, 1, 11, 9, 0, 0).unwrap());
  }

  #[test]
  fn submitted_timers_wait_for_submission() {
    let timer = Timer { duration_days: 2, start_on: TimerStart::Submitted };
    assert_eq!(due_at(&timer, &instance(None)), None);

    let submitted = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let due = due_at(&timer, &instance(Some(submitted))).unwrap();
    assert_eq!(due, Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap());
  }

  #[test]
  fn unrepresentable_due_dates_never_fall_due() {
    let timer = Timer { duration_days: u32::MAX, start_on: TimerStart::Opened };
    assert_eq!(due_at(&timer, &instance(None)), None);
  }
}
