//! Role checks for engine operations.
//!
//! These functions only look at the actor's grants. Whether an advisor is
//! actually linked to the student needs the identity collaborator, so the
//! reviewer check hands that decision back as [`Access::IfLinked`].

use journey_core::{
  Error, Result,
  actor::{Actor, RoleContext, Scope, roles},
};
use journey_playbook::NodeDefinition;
use uuid::Uuid;

/// Outcome of a grant check that passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
  Granted,
  /// Allowed only if the actor is one of the student's linked reviewers.
  IfLinked,
}

fn completer_roles(node: &NodeDefinition) -> Vec<String> {
  if node.who_can_complete.is_empty() {
    vec![roles::STUDENT.to_owned()]
  } else {
    node.who_can_complete.clone()
  }
}

/// Reviewer roles for `node`: its own list, else the configured default.
pub fn reviewer_roles<'a>(node: &'a NodeDefinition, default: &'a [String]) -> &'a [String] {
  node.reviewers.as_deref().unwrap_or(default)
}

/// Student-side actions: submitting and editing evidence.
///
/// An actor whose only matching role is `student` may act on their own
/// instances only.
pub fn completer(actor: &Actor, scope: &Scope<'_>, node: &NodeDefinition, owner: Uuid) -> Result<()> {
  let held = actor.matching_roles(scope, &completer_roles(node));
  if held.is_empty() {
    return Err(Error::unauthorized(actor.user_id, format!("cannot complete {:?}", node.slug)));
  }
  if held.iter().all(|r| *r == roles::STUDENT) && actor.user_id != owner {
    return Err(Error::unauthorized(actor.user_id, "not the owner of this instance"));
  }
  Ok(())
}

/// Review-side actions: transitions, attachment reviews, reviewed copies.
pub fn reviewer(
  actor: &Actor,
  scope: &Scope<'_>,
  node: &NodeDefinition,
  default_roles: &[String],
) -> Result<Access> {
  let held = actor.matching_roles(scope, reviewer_roles(node, default_roles));
  if held.is_empty() {
    return Err(Error::unauthorized(actor.user_id, format!("cannot review {:?}", node.slug)));
  }
  if held.iter().all(|r| *r == roles::ADVISOR) {
    return Ok(Access::IfLinked);
  }
  Ok(Access::Granted)
}

pub fn admin(actor: &Actor, scope: &Scope<'_>) -> Result<()> {
  if actor.is_admin(scope) {
    Ok(())
  } else {
    Err(Error::unauthorized(actor.user_id, "admin role required"))
  }
}

/// Opening an instance: the student themself, a reviewer, or an admin.
///
/// Only actors holding a global grant may open under another tenant's
/// playbook.
pub fn opener(
  actor: &Actor,
  scope: &Scope<'_>,
  node: &NodeDefinition,
  default_roles: &[String],
  user_id: Uuid,
) -> Result<()> {
  let global = actor.grants.iter().any(|g| matches!(g.context, RoleContext::Global));
  if actor.tenant_id != scope.tenant_id && !global {
    return Err(Error::unauthorized(actor.user_id, "playbook belongs to another tenant"));
  }
  if actor.user_id == user_id
    || actor.is_admin(scope)
    || !actor.matching_roles(scope, reviewer_roles(node, default_roles)).is_empty()
  {
    Ok(())
  } else {
    Err(Error::unauthorized(actor.user_id, "cannot open instances for another user"))
  }
}
