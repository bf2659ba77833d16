//! Actors and their role grants.
//!
//! An [`Actor`] is what the identity collaborator resolves a session into: a
//! user, the tenant they act in, and the roles they hold in various contexts.
//! The engine never stores actors; it only asks which roles apply to the
//! instance being touched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known role identifiers used by playbooks.
pub mod roles {
  pub const STUDENT: &str = "student";
  pub const ADVISOR: &str = "advisor";
  pub const SECRETARY: &str = "secretary";
  pub const CHAIR: &str = "chair";
  pub const ADMIN: &str = "admin";
  pub const SUPERADMIN: &str = "superadmin";
}

/// Where a role grant applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RoleContext {
  Global,
  Tenant(Uuid),
  /// A playbook, identified by its `playbook_id`.
  Program(String),
  /// Course grants come from the enrollment side of the portal. They never
  /// cover journey nodes.
  Course(String),
  /// A single node slug.
  Node(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
  pub role:    String,
  pub context: RoleContext,
}

/// The context a node instance lives in.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
  pub tenant_id: Uuid,
  pub program:   &'a str,
  pub node:      &'a str,
}

impl RoleGrant {
  pub fn applies_to(&self, scope: &Scope<'_>) -> bool {
    match &self.context {
      RoleContext::Global => true,
      RoleContext::Tenant(id) => *id == scope.tenant_id,
      RoleContext::Program(p) => p == scope.program,
      RoleContext::Course(_) => false,
      RoleContext::Node(n) => n == scope.node,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id:   Uuid,
  pub tenant_id: Uuid,
  pub grants:    Vec<RoleGrant>,
}

impl Actor {
  pub fn new(user_id: Uuid, tenant_id: Uuid) -> Self {
    Self { user_id, tenant_id, grants: Vec::new() }
  }

  /// The actor recorded on events the engine raises on its own behalf.
  pub fn system(tenant_id: Uuid) -> Self { Self::new(Uuid::nil(), tenant_id) }

  pub fn with_grant(mut self, role: impl Into<String>, context: RoleContext) -> Self {
    self.grants.push(RoleGrant { role: role.into(), context });
    self
  }

  /// Shorthand for a tenant-scoped grant in the actor's own tenant.
  pub fn with_role(self, role: impl Into<String>) -> Self {
    let tenant = self.tenant_id;
    self.with_grant(role, RoleContext::Tenant(tenant))
  }

  /// Every role that applies within `scope`.
  pub fn roles_in(&self, scope: &Scope<'_>) -> BTreeSet<&str> {
    self
      .grants
      .iter()
      .filter(|g| g.applies_to(scope))
      .map(|g| g.role.as_str())
      .collect()
  }

  /// The subset of `wanted` the actor holds within `scope`.
  pub fn matching_roles<'a>(
    &'a self,
    scope: &Scope<'_>,
    wanted: &[String],
  ) -> BTreeSet<&'a str> {
    self
      .roles_in(scope)
      .into_iter()
      .filter(|r| wanted.iter().any(|w| w == r))
      .collect()
  }

  pub fn is_admin(&self, scope: &Scope<'_>) -> bool {
    let held = self.roles_in(scope);
    held.contains(roles::ADMIN) || held.contains(roles::SUPERADMIN)
  }
}
