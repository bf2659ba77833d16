//! Engine configuration, deserialised from the `[engine]` table of the
//! operator's config file.

use journey_core::actor::roles;
use serde::{Deserialize, Serialize};

/// Runtime engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Largest payload [`Engine::upload_file`](crate::Engine::upload_file)
  /// accepts.
  pub max_upload_bytes: u64,
  /// Reviewer roles for nodes that do not declare `reviewers`.
  pub reviewer_roles:   Vec<String>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_upload_bytes: 50 * 1024 * 1024,
      reviewer_roles:   [roles::ADVISOR, roles::SECRETARY, roles::CHAIR, roles::ADMIN]
        .map(String::from)
        .to_vec(),
    }
  }
}

/// Backoff settings for [`with_retry`](crate::retry::with_retry).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 25 } }
}
