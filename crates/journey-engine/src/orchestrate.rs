//! Moving a student forward once a node is done.
//!
//! The engine itself never opens nodes on its own; callers decide when to
//! advance and call [`open_successors`] with the completed instance.

use journey_core::{
  Error, ErrorKind, Result,
  actor::Actor,
  collaborator::{DocumentStore, Identity, Notifier},
  instance::NodeInstance,
  state::NodeState,
  store::JourneyStore,
};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{Engine, OpenRequest};

/// What [`open_successors`] did.
#[derive(Debug, Clone, Default)]
pub struct Advance {
  /// Successor instances, newly opened or already present.
  pub opened:  Vec<NodeInstance>,
  /// Successors that still wait on other prerequisites.
  pub waiting: Vec<String>,
}

/// Open the nodes that follow a `done` instance under the playbook version
/// it was opened with. The last recorded outcome picks the branch when it
/// declares one.
///
/// Anything other than a `done` instance yields an empty [`Advance`].
pub async fn open_successors<S, I, N, D>(
  engine: &Engine<S, I, N, D>,
  actor: &Actor,
  instance_id: Uuid,
) -> Result<Advance>
where
  S: JourneyStore,
  I: Identity,
  N: Notifier,
  D: DocumentStore,
  Error: From<S::Error>,
{
  let instance = engine.instance(instance_id).await?;
  if instance.state != NodeState::Done {
    return Ok(Advance::default());
  }
  let outcome = engine.outcomes(instance_id).await?.pop();
  let playbook = engine.registry().version(instance.playbook_version_id).await?;

  let mut advance = Advance::default();
  for slug in playbook.successors(&instance.node_slug, outcome.as_ref().map(|o| o.value.as_str())) {
    let request = OpenRequest::new(instance.user_id, slug.clone())
      .version(instance.playbook_version_id);
    let request = match &instance.locale {
      Some(locale) => request.locale(locale.clone()),
      None => request,
    };
    match engine.open(actor, request).await {
      Ok(opened) => advance.opened.push(opened.instance),
      Err(e) if e.kind() == ErrorKind::PrerequisiteUnsatisfied => {
        debug!(%instance_id, successor = %slug, error = %e, "successor still waiting");
        advance.waiting.push(slug);
      }
      Err(e) => return Err(e),
    }
  }
  Ok(advance)
}
