//! Serde model of the playbook JSON document.
//!
//! Only the keys the journey core acts on are modelled; presentation keys
//! such as `screen` or `actionHints` are ignored on input.

use std::collections::BTreeMap;

use journey_core::playbook::{Multiplicity, SlotSpec};
use serde::{Deserialize, Serialize};

/// A map from locale code to text.
pub type Localized = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookDocument {
  #[serde(default)]
  pub playbook_id:    String,
  #[serde(default)]
  pub version:        String,
  #[serde(default)]
  pub locale_default: Option<String>,
  #[serde(default)]
  pub worlds:         Vec<WorldDoc>,
  #[serde(default)]
  pub roles:          Vec<RoleDoc>,
  #[serde(default)]
  pub conditions:     Vec<ConditionDoc>,
}

impl PlaybookDocument {
  /// Every node with the id of the world it sits in, in document order.
  pub fn nodes(&self) -> impl Iterator<Item = (&WorldDoc, &NodeDoc)> {
    self
      .worlds
      .iter()
      .flat_map(|w| w.nodes.iter().map(move |n| (w, n)))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDoc {
  pub id:    String,
  #[serde(default)]
  pub title: Localized,
  #[serde(default)]
  pub order: i32,
  #[serde(default)]
  pub nodes: Vec<NodeDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDoc {
  pub id:    String,
  #[serde(default)]
  pub label: Localized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDoc {
  pub id:          String,
  pub expr:        String,
  #[serde(default)]
  pub description: Localized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoc {
  pub id:               String,
  #[serde(default)]
  pub title:            Localized,
  #[serde(rename = "type", default)]
  pub kind:             String,
  #[serde(default)]
  pub who_can_complete: Vec<String>,
  /// Overrides the engine's default reviewer roles when present.
  #[serde(default)]
  pub reviewers:        Option<Vec<String>>,
  #[serde(default)]
  pub prerequisites:    Vec<String>,
  #[serde(default)]
  pub next:             Vec<String>,
  #[serde(default)]
  pub outcomes:         Vec<OutcomeDoc>,
  #[serde(default)]
  pub requirements:     RequirementsDoc,
  /// A condition id from the top-level `conditions`, or an inline
  /// expression.
  #[serde(default)]
  pub condition:        Option<String>,
  #[serde(default)]
  pub timer:            Option<Timer>,
}

impl NodeDoc {
  /// The condition reference, treating an empty string as absent.
  pub fn condition_ref(&self) -> Option<&str> {
    self.condition.as_deref().map(str::trim).filter(|c| !c.is_empty())
  }

  /// Slot declarations, with legacy `uploads` entries read as single slots.
  pub fn slot_specs(&self) -> Vec<SlotSpec> {
    let slots = self.requirements.slots.iter().map(|s| SlotSpec {
      slot_key:       s.slot_key.clone(),
      required:       s.required,
      multiplicity:   s.multiplicity,
      mime_whitelist: s.mime.clone(),
      max_files:      s.max_files,
    });
    let uploads = self.requirements.uploads.iter().map(|u| SlotSpec {
      slot_key:       u.key.clone(),
      required:       u.required,
      multiplicity:   Multiplicity::Single,
      mime_whitelist: u.mime.clone(),
      max_files:      None,
    });
    slots.chain(uploads).collect()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeDoc {
  pub value: String,
  #[serde(default)]
  pub label: Localized,
  #[serde(default)]
  pub next:  Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementsDoc {
  #[serde(default)]
  pub slots:   Vec<SlotDoc>,
  #[serde(default)]
  pub uploads: Vec<UploadDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDoc {
  #[serde(alias = "key")]
  pub slot_key:     String,
  #[serde(default)]
  pub required:     bool,
  #[serde(default)]
  pub multiplicity: Multiplicity,
  #[serde(default)]
  pub mime:         Vec<String>,
  #[serde(default)]
  pub max_files:    Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDoc {
  pub key:      String,
  #[serde(default)]
  pub mime:     Vec<String>,
  #[serde(default)]
  pub required: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStart {
  #[default]
  Opened,
  Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
  pub duration_days: u32,
  #[serde(default)]
  pub start_on:      TimerStart,
}
