//! [`PlaybookRegistry`] — publication and cached lookup of playbook versions.
//!
//! Versions are immutable once stored, so a parsed [`PlaybookVersion`] is
//! cached by version id for the life of the registry and never invalidated.

use std::{
  collections::HashMap,
  sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use journey_core::{
  Error, Result,
  playbook::{NewPlaybookRecord, PlaybookRecord},
  store::JourneyStore,
};
use journey_playbook::{NodeDefinition, PlaybookVersion};
use tracing::{debug, info};
use uuid::Uuid;

/// Check a raw document without publishing it. Every issue is reported.
pub fn validate_playbook(raw: &str) -> journey_playbook::Result<()> {
  journey_playbook::load(raw).map(drop)
}

pub struct PlaybookRegistry<S> {
  store: S,
  cache: RwLock<HashMap<Uuid, Arc<PlaybookVersion>>>,
}

impl<S> PlaybookRegistry<S> {
  pub fn new(store: S) -> Self { Self { store, cache: RwLock::new(HashMap::new()) } }

  fn cached(&self, version_id: Uuid) -> Option<Arc<PlaybookVersion>> {
    self
      .cache
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&version_id)
      .cloned()
  }

  fn remember(&self, version: PlaybookVersion) -> Arc<PlaybookVersion> {
    let version = Arc::new(version);
    self
      .cache
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(version.version_id, Arc::clone(&version));
    version
  }

  fn load(&self, record: &PlaybookRecord) -> Result<Arc<PlaybookVersion>> {
    if let Some(hit) = self.cached(record.version_id) {
      return Ok(hit);
    }
    Ok(self.remember(PlaybookVersion::from_record(record)?))
  }
}

impl<S> PlaybookRegistry<S>
where
  S: JourneyStore,
  Error: From<S::Error>,
{
  /// Validate `raw` and make it the tenant's active playbook.
  ///
  /// Publishing bytes identical to an earlier version re-activates that
  /// version instead of storing a copy.
  pub async fn publish(
    &self,
    tenant_id: Uuid,
    raw: &str,
    at: DateTime<Utc>,
  ) -> Result<Arc<PlaybookVersion>> {
    let doc = journey_playbook::load(raw)?;
    let record = self
      .store
      .publish_playbook(
        NewPlaybookRecord {
          tenant_id,
          playbook_id: doc.playbook_id.clone(),
          version: doc.version.clone(),
          checksum: journey_playbook::checksum(raw.as_bytes()),
          raw_json: raw.to_owned(),
        },
        at,
      )
      .await?;

    let version = match self.cached(record.version_id) {
      Some(hit) => hit,
      None => self.remember(PlaybookVersion::build(&record, doc)?),
    };
    info!(
      %tenant_id,
      version_id = %version.version_id,
      checksum = %version.checksum,
      "playbook published"
    );
    Ok(version)
  }

  /// The tenant's active version.
  pub async fn active(&self, tenant_id: Uuid) -> Result<Arc<PlaybookVersion>> {
    let record = self
      .store
      .active_playbook(tenant_id)
      .await?
      .ok_or(Error::NoActivePlaybook(tenant_id))?;
    self.load(&record)
  }

  /// Any stored version, active or not.
  pub async fn version(&self, version_id: Uuid) -> Result<Arc<PlaybookVersion>> {
    if let Some(hit) = self.cached(version_id) {
      debug!(%version_id, "playbook cache hit");
      return Ok(hit);
    }
    let record = self
      .store
      .get_playbook(version_id)
      .await?
      .ok_or(Error::PlaybookNotFound(version_id))?;
    self.load(&record)
  }

  pub async fn node(&self, version_id: Uuid, slug: &str) -> Result<NodeDefinition> {
    let version = self.version(version_id).await?;
    version
      .node(slug)
      .cloned()
      .ok_or_else(|| Error::NodeNotFound { version_id, slug: slug.to_owned() })
  }

  /// Nodes listing `slug` as a prerequisite, in document order.
  pub async fn dependents(&self, version_id: Uuid, slug: &str) -> Result<Vec<String>> {
    let version = self.version(version_id).await?;
    if version.node(slug).is_none() {
      return Err(Error::NodeNotFound { version_id, slug: slug.to_owned() });
    }
    Ok(version.dependents(slug))
  }
}
