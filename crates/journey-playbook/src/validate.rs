//! Structural validation of a playbook document.
//!
//! Validation never stops at the first problem: every issue found is
//! reported so an author can fix a document in one pass.

use std::collections::{HashMap, HashSet};

use journey_core::playbook::Multiplicity;
use thiserror::Error;

use crate::{condition::Condition, document::PlaybookDocument};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
  #[error("playbook_id is empty")]
  MissingPlaybookId,

  #[error("version is empty")]
  MissingVersion,

  #[error("playbook defines no nodes")]
  NoNodes,

  #[error("world {world:?} contains a node with an empty id")]
  EmptySlug { world: String },

  #[error("node {0:?} is defined more than once")]
  DuplicateNode(String),

  #[error("node {node:?} references unknown node {target:?} in {field}")]
  UnknownReference {
    node:   String,
    field:  &'static str,
    target: String,
  },

  #[error("node {0:?} lists itself as a prerequisite")]
  SelfPrerequisite(String),

  #[error("prerequisite cycle: {}", .0.join(" -> "))]
  Cycle(Vec<String>),

  #[error("node {node:?} declares outcome {value:?} more than once")]
  DuplicateOutcome { node: String, value: String },

  #[error("node {node:?} declares slot {slot:?} more than once")]
  DuplicateSlot { node: String, slot: String },

  #[error("node {node:?} slot {slot:?} has malformed mime type {mime:?}")]
  MalformedMime {
    node: String,
    slot: String,
    mime: String,
  },

  #[error("node {node:?} slot {slot:?}: {reason}")]
  InvalidSlotCap {
    node:   String,
    slot:   String,
    reason: &'static str,
  },

  #[error("condition {0:?} is defined more than once")]
  DuplicateCondition(String),

  #[error("condition {id:?} does not parse: {reason}")]
  BadCondition { id: String, reason: String },

  #[error("node {node:?} timer must last at least one day")]
  ZeroTimer { node: String },

  #[error("node {node:?} timer of {days} days exceeds the {MAX_TIMER_DAYS}-day limit")]
  TimerTooLong { node: String, days: u32 },
}

/// Longest timer a node may declare.
pub const MAX_TIMER_DAYS: u32 = 3650;

/// Check a parsed document. Returns every issue found.
pub fn validate(doc: &PlaybookDocument) -> Result<(), Vec<ValidationIssue>> {
  let mut issues = Vec::new();

  if doc.playbook_id.trim().is_empty() {
    issues.push(ValidationIssue::MissingPlaybookId);
  }
  if doc.version.trim().is_empty() {
    issues.push(ValidationIssue::MissingVersion);
  }

  let conditions = check_conditions(doc, &mut issues);
  let slugs = check_slugs(doc, &mut issues);
  if slugs.is_empty() && !issues.iter().any(|i| matches!(i, ValidationIssue::EmptySlug { .. })) {
    issues.push(ValidationIssue::NoNodes);
  }

  for (_, node) in doc.nodes() {
    let id = &node.id;

    let references = [
      ("prerequisites", &node.prerequisites),
      ("next", &node.next),
    ];
    for (field, targets) in references {
      for target in targets.iter().filter(|t| !slugs.contains(t.as_str())) {
        issues.push(ValidationIssue::UnknownReference {
          node: id.clone(),
          field,
          target: target.clone(),
        });
      }
    }
    if node.prerequisites.contains(id) {
      issues.push(ValidationIssue::SelfPrerequisite(id.clone()));
    }

    let mut values = HashSet::new();
    for outcome in &node.outcomes {
      if !values.insert(outcome.value.as_str()) {
        issues.push(ValidationIssue::DuplicateOutcome {
          node:  id.clone(),
          value: outcome.value.clone(),
        });
      }
      for target in outcome.next.iter().filter(|t| !slugs.contains(t.as_str())) {
        issues.push(ValidationIssue::UnknownReference {
          node:   id.clone(),
          field:  "outcomes.next",
          target: target.clone(),
        });
      }
    }

    let mut keys = HashSet::new();
    for slot in node.slot_specs() {
      if !keys.insert(slot.slot_key.clone()) {
        issues.push(ValidationIssue::DuplicateSlot {
          node: id.clone(),
          slot: slot.slot_key.clone(),
        });
      }
      for mime in slot.mime_whitelist.iter().filter(|m| !is_valid_mime(m)) {
        issues.push(ValidationIssue::MalformedMime {
          node: id.clone(),
          slot: slot.slot_key.clone(),
          mime: mime.clone(),
        });
      }
      let cap_problem = match (slot.multiplicity, slot.max_files) {
        (_, Some(0)) => Some("max_files must be at least 1"),
        (Multiplicity::Single, Some(n)) if n > 1 => {
          Some("single slots cannot hold more than one file")
        }
        _ => None,
      };
      if let Some(reason) = cap_problem {
        issues.push(ValidationIssue::InvalidSlotCap {
          node: id.clone(),
          slot: slot.slot_key.clone(),
          reason,
        });
      }
    }

    if let Some(reference) = node.condition_ref() {
      if !conditions.contains(reference) {
        if let Err(e) = Condition::parse(reference) {
          issues.push(ValidationIssue::BadCondition {
            id:     format!("{id}.condition"),
            reason: e.to_string(),
          });
        }
      }
    }

    match node.timer.map(|t| t.duration_days) {
      Some(0) => issues.push(ValidationIssue::ZeroTimer { node: id.clone() }),
      Some(days) if days > MAX_TIMER_DAYS => {
        issues.push(ValidationIssue::TimerTooLong { node: id.clone(), days });
      }
      _ => {}
    }
  }

  issues.extend(find_cycles(doc, &slugs).into_iter().map(ValidationIssue::Cycle));

  if issues.is_empty() { Ok(()) } else { Err(issues) }
}

/// Collect node slugs, flagging empty and duplicate ids.
fn check_slugs<'a>(
  doc: &'a PlaybookDocument,
  issues: &mut Vec<ValidationIssue>,
) -> HashSet<&'a str> {
  let mut seen = HashSet::new();
  for (world, node) in doc.nodes() {
    if node.id.trim().is_empty() {
      issues.push(ValidationIssue::EmptySlug { world: world.id.clone() });
    } else if !seen.insert(node.id.as_str()) {
      issues.push(ValidationIssue::DuplicateNode(node.id.clone()));
    }
  }
  seen
}

/// Parse the top-level conditions, returning the ids that are usable.
fn check_conditions<'a>(
  doc: &'a PlaybookDocument,
  issues: &mut Vec<ValidationIssue>,
) -> HashSet<&'a str> {
  let mut ids = HashSet::new();
  for cond in &doc.conditions {
    if !ids.insert(cond.id.as_str()) {
      issues.push(ValidationIssue::DuplicateCondition(cond.id.clone()));
      continue;
    }
    if let Err(e) = Condition::parse(&cond.expr) {
      issues.push(ValidationIssue::BadCondition {
        id:     cond.id.clone(),
        reason: e.to_string(),
      });
    }
  }
  ids
}

/// `type/subtype` with RFC 6838 token characters; `type/*` is allowed.
pub(crate) fn is_valid_mime(mime: &str) -> bool {
  fn token(s: &str) -> bool {
    !s.is_empty()
      && s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
  }
  match mime.split_once('/') {
    Some((top, "*")) => token(top),
    Some((top, sub)) => token(top) && token(sub),
    None => false,
  }
}

/// Depth-first search over prerequisite edges. Each cycle is reported once,
/// as the path that closes it.
fn find_cycles(doc: &PlaybookDocument, slugs: &HashSet<&str>) -> Vec<Vec<String>> {
  #[derive(Clone, Copy, PartialEq)]
  enum Mark {
    Visiting,
    Done,
  }

  let edges: HashMap<&str, Vec<&str>> = doc
    .nodes()
    .map(|(_, n)| {
      let prereqs = n
        .prerequisites
        .iter()
        .map(String::as_str)
        .filter(|p| slugs.contains(p) && *p != n.id)
        .collect();
      (n.id.as_str(), prereqs)
    })
    .collect();

  fn visit<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
  ) {
    marks.insert(node, Mark::Visiting);
    stack.push(node);
    for &next in edges.get(node).into_iter().flatten() {
      match marks.get(next) {
        Some(Mark::Visiting) => {
          let start = stack.iter().position(|s| *s == next).unwrap_or(0);
          let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
          path.push(next.to_owned());
          cycles.push(path);
        }
        Some(Mark::Done) => {}
        None => visit(next, edges, marks, stack, cycles),
      }
    }
    stack.pop();
    marks.insert(node, Mark::Done);
  }

  let mut marks = HashMap::new();
  let mut cycles = Vec::new();
  for (_, node) in doc.nodes() {
    if !marks.contains_key(node.id.as_str()) {
      visit(node.id.as_str(), &edges, &mut marks, &mut Vec::new(), &mut cycles);
    }
  }
  cycles
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn doc(value: serde_json::Value) -> PlaybookDocument { serde_json::from_value(value).unwrap() }

  fn node(id: &str, prereqs: &[&str]) -> serde_json::Value {
    json!({ "id": id, "type": "form", "prerequisites": prereqs, "who_can_complete": ["student"] })
  }

  #[test]
  fn minimal_document_is_valid() {
    let d = doc(json!({
      "playbook_id": "phd",
      "version": "1",
      "worlds": [{ "id": "w1", "nodes": [node("a", &[]), node("b", &["a"])] }],
    }));
    assert_eq!(validate(&d), Ok(()));
  }

  #[test]
  fn collects_every_issue() {
    let d = doc(json!({
      "worlds": [{ "id": "w1", "nodes": [
        {
          "id": "a",
          "prerequisites": ["ghost"],
          "outcomes": [{ "value": "ok" }, { "value": "ok", "next": ["nowhere"] }],
          "requirements": { "slots": [
            { "slot_key": "cv", "mime": ["application/pdf", "pdf"] },
            { "slot_key": "cv", "multiplicity": "single", "max_files": 2 },
          ]},
          "condition": "a ==",
          "timer": { "duration_days": 0 },
        },
        node("a", &[]),
      ]}],
    }));
    let issues = validate(&d).unwrap_err();

    assert!(issues.contains(&ValidationIssue::MissingPlaybookId));
    assert!(issues.contains(&ValidationIssue::MissingVersion));
    assert!(issues.contains(&ValidationIssue::DuplicateNode("a".into())));
    assert!(issues.contains(&ValidationIssue::UnknownReference {
      node:   "a".into(),
      field:  "prerequisites",
      target: "ghost".into(),
    }));
    assert!(issues.contains(&ValidationIssue::UnknownReference {
      node:   "a".into(),
      field:  "outcomes.next",
      target: "nowhere".into(),
    }));
    assert!(issues.contains(&ValidationIssue::DuplicateOutcome {
      node:  "a".into(),
      value: "ok".into(),
    }));
    assert!(issues.contains(&ValidationIssue::DuplicateSlot {
      node: "a".into(),
      slot: "cv".into(),
    }));
    assert!(issues.contains(&ValidationIssue::MalformedMime {
      node: "a".into(),
      slot: "cv".into(),
      mime: "pdf".into(),
    }));
    assert!(issues.iter().any(|i| matches!(i, ValidationIssue::InvalidSlotCap { .. })));
    assert!(issues.iter().any(|i| matches!(i, ValidationIssue::BadCondition { .. })));
    assert!(issues.contains(&ValidationIssue::ZeroTimer { node: "a".into() }));
  }

  #[test]
  fn timers_are_bounded() {
    let d = doc(json!({
      "playbook_id": "phd",
      "version": "1",
      "worlds": [{ "id": "w1", "nodes": [
        { "id": "a", "timer": { "duration_days": MAX_TIMER_DAYS } },
        { "id": "b", "timer": { "duration_days": 4_000_000_000u32 } },
      ]}],
    }));
    assert_eq!(
      validate(&d),
      Err(vec![ValidationIssue::TimerTooLong { node: "b".into(), days: 4_000_000_000 }])
    );
  }

  #[test]
  fn detects_prerequisite_cycles() {
    let d = doc(json!({
      "playbook_id": "phd",
      "version": "1",
      "worlds": [{ "id": "w1", "nodes": [
        node("a", &["c"]), node("b", &["a"]), node("c", &["b"]), node("d", &["d"]),
      ]}],
    }));
    let issues = validate(&d).unwrap_err();
    let cycles: Vec<_> = issues
      .iter()
      .filter_map(|i| match i {
        ValidationIssue::Cycle(path) => Some(path.clone()),
        _ => None,
      })
      .collect();
    assert_eq!(cycles, vec![vec!["a", "c", "b", "a"]]);
    assert!(issues.contains(&ValidationIssue::SelfPrerequisite("d".into())));
  }

  #[test]
  fn condition_ids_resolve_before_parsing() {
    let d = doc(json!({
      "playbook_id": "phd",
      "version": "1",
      "conditions": [{ "id": "rp_required", "expr": "needs_rp == true" }],
      "worlds": [{ "id": "w1", "nodes": [
        { "id": "rp", "condition": "rp_required" },
      ]}],
    }));
    assert_eq!(validate(&d), Ok(()));
  }

  #[test]
  fn mime_format() {
    assert!(is_valid_mime("application/pdf"));
    assert!(is_valid_mime("application/vnd.openxmlformats-officedocument.wordprocessingml.document"));
    assert!(is_valid_mime("image/*"));
    assert!(!is_valid_mime("*/*"));
    assert!(!is_valid_mime("application/"));
    assert!(!is_valid_mime("pdf"));
  }
}
