//! Node instances and the journey projection rows derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::NodeState;

/// Aggregate review counts over an instance's active attachments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentCounts {
  pub submitted: u32,
  /// Includes `approved_with_comments`.
  pub approved:  u32,
  pub rejected:  u32,
}

/// A student's materialization of one node of one playbook version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
  pub instance_id:             Uuid,
  pub tenant_id:               Uuid,
  pub user_id:                 Uuid,
  pub playbook_version_id:     Uuid,
  pub node_slug:               String,
  pub state:                   NodeState,
  /// Latest form revision number; 0 until the first save.
  pub current_rev:             u32,
  pub locale:                  Option<String>,
  /// Set by every form save or upload, cleared by every transition.
  pub edited_since_transition: bool,
  pub counts:                  AttachmentCounts,
  pub opened_at:               DateTime<Utc>,
  pub submitted_at:            Option<DateTime<Utc>>,
  pub updated_at:              DateTime<Utc>,
}

impl NodeInstance {
  pub fn has_form(&self) -> bool { self.current_rev >= 1 }
}

/// Input to [`JourneyStore::open_instance`](crate::store::JourneyStore::open_instance).
#[derive(Debug, Clone)]
pub struct NewInstance {
  pub tenant_id:           Uuid,
  pub user_id:             Uuid,
  pub playbook_version_id: Uuid,
  pub node_slug:           String,
  pub locale:              Option<String>,
}

/// One row of the journey projection: the state of the latest instance for
/// a `(user, node)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyState {
  pub tenant_id:   Uuid,
  pub user_id:     Uuid,
  pub node_slug:   String,
  pub state:       NodeState,
  pub instance_id: Uuid,
  pub updated_at:  DateTime<Utc>,
}
