//! Node instance states and the transition table.
//!
//! The table is a compile-time constant. The engine looks up a `(from, to)`
//! pair, checks the trigger against the actor's roles, and then checks the
//! row's requirement before writing anything.

use serde::{Deserialize, Serialize};

// ─── State ───────────────────────────────────────────────────────────────────

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
pub enum NodeState {
  Active,
  Submitted,
  UnderReview,
  NeedsFixes,
  Done,
  Cancelled,
}

impl NodeState {
  pub const ALL: [NodeState; 6] = [
    Self::Active,
    Self::Submitted,
    Self::UnderReview,
    Self::NeedsFixes,
    Self::Done,
    Self::Cancelled,
  ];

  pub fn is_terminal(self) -> bool { matches!(self, Self::Done | Self::Cancelled) }

  /// Form saves and uploads are only accepted while the student holds the
  /// instance.
  pub fn accepts_evidence(self) -> bool {
    matches!(self, Self::Active | Self::NeedsFixes)
  }

  pub fn as_str(self) -> &'static str { self.into() }
}

// ─── Transition table ────────────────────────────────────────────────────────

/// Which side of the workflow may fire a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  /// A holder of one of the node's `who_can_complete` roles.
  Student,
  /// A holder of one of the node's reviewer roles.
  Reviewer,
  Admin,
}

/// Precondition checked by the engine before the conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
  /// Every required slot holds an active, non-rejected attachment and at
  /// least one form revision exists.
  CompleteEvidence,
  ReviewNote,
  OutcomeRecorded,
  /// A form revision or attachment was added since the last transition.
  FreshChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub from:     NodeState,
  pub to:       NodeState,
  pub trigger:  Trigger,
  pub requires: Option<Requirement>,
}

const fn row(
  from: NodeState,
  to: NodeState,
  trigger: Trigger,
  requires: Option<Requirement>,
) -> Transition {
  Transition { from, to, trigger, requires }
}

use NodeState::*;

pub const TRANSITIONS: &[Transition] = &[
  row(Active, Submitted, Trigger::Student, Some(Requirement::CompleteEvidence)),
  row(Submitted, UnderReview, Trigger::Reviewer, None),
  row(Submitted, NeedsFixes, Trigger::Reviewer, Some(Requirement::ReviewNote)),
  row(UnderReview, NeedsFixes, Trigger::Reviewer, Some(Requirement::ReviewNote)),
  row(UnderReview, Done, Trigger::Reviewer, Some(Requirement::OutcomeRecorded)),
  row(Submitted, Done, Trigger::Reviewer, Some(Requirement::OutcomeRecorded)),
  row(NeedsFixes, Submitted, Trigger::Student, Some(Requirement::FreshChanges)),
  row(Active, Cancelled, Trigger::Admin, None),
  row(Submitted, Cancelled, Trigger::Admin, None),
  row(UnderReview, Cancelled, Trigger::Admin, None),
  row(NeedsFixes, Cancelled, Trigger::Admin, None),
];

/// Look up the table row for `from -> to`.
pub fn lookup(from: NodeState, to: NodeState) -> Option<&'static Transition> {
  TRANSITIONS.iter().find(|t| t.from == from && t.to == to)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states_have_no_outgoing_rows() {
    for t in TRANSITIONS {
      assert!(!t.from.is_terminal(), "{} -> {}", t.from, t.to);
    }
  }

  #[test]
  fn every_non_terminal_state_can_be_cancelled() {
    for state in NodeState::ALL.into_iter().filter(|s| !s.is_terminal()) {
      let row = lookup(state, Cancelled).expect("cancel row");
      assert_eq!(row.trigger, Trigger::Admin);
    }
  }

  #[test]
  fn pairs_are_unique() {
    for (i, a) in TRANSITIONS.iter().enumerate() {
      for b in &TRANSITIONS[i + 1..] {
        assert!(!(a.from == b.from && a.to == b.to));
      }
    }
  }

  #[test]
  fn resubmission_requires_fresh_changes() {
    let row = lookup(NeedsFixes, Submitted).unwrap();
    assert_eq!(row.requires, Some(Requirement::FreshChanges));
    assert!(lookup(Active, Done).is_none());
    assert!(lookup(Done, Active).is_none());
  }

  #[test]
  fn state_strings_round_trip() {
    assert_eq!(UnderReview.as_str(), "under_review");
    assert_eq!("needs_fixes".parse::<NodeState>().unwrap(), NeedsFixes);
  }
}
