//! [`PlaybookVersion`] — a validated, indexed playbook ready for lookups.

use std::collections::HashMap;

use journey_core::playbook::{PlaybookRecord, SlotSpec};
use uuid::Uuid;

use crate::{
  Error, Result,
  condition::Condition,
  document::{Localized, PlaybookDocument, Timer},
  validate::validate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeDef {
  pub value: String,
  pub label: Localized,
  pub next:  Vec<String>,
}

/// One node of a published playbook.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
  pub slug:             String,
  pub world:            String,
  pub kind:             String,
  pub title:            Localized,
  pub who_can_complete: Vec<String>,
  pub reviewers:        Option<Vec<String>>,
  pub prerequisites:    Vec<String>,
  pub next:             Vec<String>,
  pub outcomes:         Vec<OutcomeDef>,
  pub slots:            Vec<SlotSpec>,
  pub condition:        Option<Condition>,
  pub timer:            Option<Timer>,
}

impl NodeDefinition {
  pub fn outcome(&self, value: &str) -> Option<&OutcomeDef> {
    self.outcomes.iter().find(|o| o.value == value)
  }

  pub fn allows_outcome(&self, value: &str) -> bool { self.outcome(value).is_some() }

  /// Title in `locale`, falling back to any available translation.
  pub fn title_in(&self, locale: &str) -> Option<&str> {
    self
      .title
      .get(locale)
      .or_else(|| self.title.values().next())
      .map(String::as_str)
  }
}

/// An immutable playbook version: metadata from the store plus its nodes.
#[derive(Debug, Clone)]
pub struct PlaybookVersion {
  pub version_id:     Uuid,
  pub tenant_id:      Uuid,
  pub playbook_id:    String,
  pub version:        String,
  pub checksum:       String,
  pub locale_default: Option<String>,
  nodes:              Vec<NodeDefinition>,
  index:              HashMap<String, usize>,
}

impl PlaybookVersion {
  /// Parse and validate the raw document of a stored record.
  pub fn from_record(record: &PlaybookRecord) -> Result<Self> {
    let doc = crate::parse(&record.raw_json)?;
    Self::build(record, doc)
  }

  pub fn build(record: &PlaybookRecord, doc: PlaybookDocument) -> Result<Self> {
    validate(&doc).map_err(Error::Invalid)?;

    let named: HashMap<&str, &str> = doc
      .conditions
      .iter()
      .map(|c| (c.id.as_str(), c.expr.as_str()))
      .collect();

    let mut nodes = Vec::new();
    for (world, node) in doc.nodes() {
      let condition = match node.condition_ref() {
        Some(reference) => {
          let expr = named.get(reference).copied().unwrap_or(reference);
          // Validation already parsed every expression.
          Some(Condition::parse(expr).map_err(|e| {
            Error::Invalid(vec![crate::ValidationIssue::BadCondition {
              id:     reference.to_owned(),
              reason: e.to_string(),
            }])
          })?)
        }
        None => None,
      };
      nodes.push(NodeDefinition {
        slug: node.id.clone(),
        world: world.id.clone(),
        kind: node.kind.clone(),
        title: node.title.clone(),
        who_can_complete: node.who_can_complete.clone(),
        reviewers: node.reviewers.clone(),
        prerequisites: node.prerequisites.clone(),
        next: node.next.clone(),
        outcomes: node
          .outcomes
          .iter()
          .map(|o| OutcomeDef {
            value: o.value.clone(),
            label: o.label.clone(),
            next:  o.next.clone(),
          })
          .collect(),
        slots: node.slot_specs(),
        condition,
        timer: node.timer,
      });
    }

    let index = nodes
      .iter()
      .enumerate()
      .map(|(i, n)| (n.slug.clone(), i))
      .collect();

    Ok(Self {
      version_id: record.version_id,
      tenant_id: record.tenant_id,
      playbook_id: doc.playbook_id,
      version: doc.version,
      checksum: record.checksum.clone(),
      locale_default: doc.locale_default,
      nodes,
      index,
    })
  }

  pub fn node(&self, slug: &str) -> Option<&NodeDefinition> {
    self.index.get(slug).map(|&i| &self.nodes[i])
  }

  /// Nodes in document order.
  pub fn nodes(&self) -> impl Iterator<Item = &NodeDefinition> { self.nodes.iter() }

  /// Nodes that list `slug` as a prerequisite, in document order.
  pub fn dependents(&self, slug: &str) -> Vec<String> {
    self
      .nodes
      .iter()
      .filter(|n| n.prerequisites.iter().any(|p| p == slug))
      .map(|n| n.slug.clone())
      .collect()
  }

  /// Where the journey goes after `slug`: the recorded outcome's `next`
  /// when it declares one, otherwise the node's own `next`.
  pub fn successors(&self, slug: &str, outcome: Option<&str>) -> Vec<String> {
    let Some(node) = self.node(slug) else {
      return Vec::new();
    };
    outcome
      .and_then(|value| node.outcome(value))
      .filter(|o| !o.next.is_empty())
      .map_or_else(|| node.next.clone(), |o| o.next.clone())
  }
}
