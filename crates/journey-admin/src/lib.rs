//! Maintenance commands for a journey database.
//!
//! The `journeyctl` binary parses arguments and loads [`AdminConfig`]; the
//! commands themselves live here so they can run against any store.

use std::{
  io::Write,
  path::{Path, PathBuf},
};

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use clap::Subcommand;
use journey_core::store::JourneyStore;
use journey_engine::{EngineConfig, PlaybookRegistry, validate_playbook};
use journey_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Operator configuration: a config file layered under `JOURNEY_*`
/// environment variables (`JOURNEY_DATABASE`,
/// `JOURNEY_ENGINE__MAX_UPLOAD_BYTES`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
  pub database: PathBuf,
  pub engine:   EngineConfig,
}

impl Default for AdminConfig {
  fn default() -> Self {
    Self { database: PathBuf::from("journey.db"), engine: EngineConfig::default() }
  }
}

impl AdminConfig {
  /// Load `path` if it exists, then apply environment overrides.
  pub fn load(path: &Path) -> Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("JOURNEY")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise AdminConfig")
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Check a playbook document and print every issue found.
  Validate { file: PathBuf },

  /// Publish a playbook document and make it the tenant's active version.
  Publish {
    #[arg(long)]
    tenant: Uuid,
    file:   PathBuf,
  },

  /// Rewrite journey projection rows from the latest instances.
  RebuildProjection {
    /// Limit the rebuild to one tenant.
    #[arg(long)]
    tenant: Option<Uuid>,
  },

  /// Print an instance's events as JSON lines.
  History { instance: Uuid },

  /// Print a student's journey projection as JSON lines.
  Journey {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long)]
    user:   Uuid,
  },

  /// Print the effective configuration.
  ShowConfig,
}

/// Run `command`, opening the configured database only if it needs one.
pub async fn run(command: Command, config: &AdminConfig, out: &mut impl Write) -> Result<()> {
  match command {
    Command::Validate { file } => validate(&file, &read(&file)?, out),
    Command::ShowConfig => {
      serde_json::to_writer_pretty(&mut *out, config)?;
      writeln!(out)?;
      Ok(())
    }
    other => {
      let store = SqliteStore::open(&config.database)
        .await
        .with_context(|| format!("failed to open database at {:?}", config.database))?;
      execute(other, &store, out).await
    }
  }
}

/// Run a database command against `store`.
pub async fn execute(command: Command, store: &SqliteStore, out: &mut impl Write) -> Result<()> {
  match command {
    Command::Validate { file } => validate(&file, &read(&file)?, out)?,
    Command::Publish { tenant, file } => {
      let raw = read(&file)?;
      let registry = PlaybookRegistry::new(store.clone());
      let version = registry
        .publish(tenant, &raw, Utc::now())
        .await
        .with_context(|| format!("failed to publish {}", file.display()))?;
      writeln!(out, "{} {}", version.version_id, version.checksum)?;
    }
    Command::RebuildProjection { tenant } => {
      let written = store.rebuild_projection(tenant).await.context("projection rebuild failed")?;
      info!(?tenant, written, "projection rebuilt");
      writeln!(out, "{written} rows written")?;
    }
    Command::History { instance } => {
      if store.get_instance(instance).await?.is_none() {
        bail!("instance {instance} not found");
      }
      for event in store.list_events(instance).await? {
        writeln!(out, "{}", serde_json::to_string(&event)?)?;
      }
    }
    Command::Journey { tenant, user } => {
      for row in store.journey_states(tenant, user).await? {
        writeln!(out, "{}", serde_json::to_string(&row)?)?;
      }
    }
    Command::ShowConfig => bail!("show-config does not use the database"),
  }
  Ok(())
}

fn read(file: &Path) -> Result<String> {
  std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn validate(file: &Path, raw: &str, out: &mut impl Write) -> Result<()> {
  match validate_playbook(raw) {
    Ok(()) => {
      writeln!(out, "{}: ok", file.display())?;
      Ok(())
    }
    Err(journey_playbook::Error::Invalid(issues)) => {
      for issue in &issues {
        writeln!(out, "{}: {issue}", file.display())?;
      }
      bail!("{} issue(s) in {}", issues.len(), file.display())
    }
    Err(e) => Err(e).with_context(|| format!("{} is not a playbook document", file.display())),
  }
}

#[cfg(test)]
mod tests {
  use journey_core::{
    actor::Actor,
    instance::NewInstance,
    store::JourneyStore,
  };
  use serde_json::json;

  use super::*;

  fn playbook() -> String {
    json!({
      "playbook_id": "phd",
      "version": "1",
      "worlds": [{ "id": "w1", "nodes": [{ "id": "profile" }, { "id": "plan", "prerequisites": ["profile"] }] }]
    })
    .to_string()
  }

  fn output(buf: Vec<u8>) -> String { String::from_utf8(buf).unwrap() }

  #[test]
  fn validate_lists_every_issue() {
    let broken = json!({
      "playbook_id": "",
      "version": "1",
      "worlds": [{ "id": "w1", "nodes": [{ "id": "a", "prerequisites": ["ghost"] }] }]
    })
    .to_string();

    let mut out = Vec::new();
    let err = validate(Path::new("broken.json"), &broken, &mut out).unwrap_err();
    assert!(err.to_string().contains("2 issue(s)"));
    let printed = output(out);
    assert_eq!(printed.lines().count(), 2);
    assert!(printed.contains("ghost"));

    let mut out = Vec::new();
    validate(Path::new("ok.json"), &playbook(), &mut out).unwrap();
    assert_eq!(output(out), "ok.json: ok\n");
  }

  #[test]
  fn malformed_json_is_an_error() {
    let mut out = Vec::new();
    assert!(validate(Path::new("x.json"), "{", &mut out).is_err());
    assert!(out.is_empty());
  }

  #[tokio::test]
  async fn publish_then_inspect() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let dir = std::env::temp_dir().join(format!("journeyctl-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("playbook.json");
    std::fs::write(&file, playbook()).unwrap();
    let tenant = Uuid::new_v4();

    let mut out = Vec::new();
    execute(Command::Publish { tenant, file: file.clone() }, &store, &mut out)
      .await
      .unwrap();
    let printed = output(out);
    let (version_id, checksum) = printed.trim().split_once(' ').unwrap();
    assert_eq!(checksum, journey_playbook::checksum(playbook().as_bytes()));
    let version_id: Uuid = version_id.parse().unwrap();

    let student = Actor::new(Uuid::new_v4(), tenant);
    let opened = store
      .open_instance(
        NewInstance {
          tenant_id:           tenant,
          user_id:             student.user_id,
          playbook_version_id: version_id,
          node_slug:           "profile".into(),
          locale:              None,
        },
        vec![],
        student.user_id,
        Utc::now(),
      )
      .await
      .unwrap();
    let instance_id = opened.value.instance.instance_id;

    let mut out = Vec::new();
    execute(Command::History { instance: instance_id }, &store, &mut out).await.unwrap();
    let lines = output(out);
    assert_eq!(lines.lines().count(), 1);
    let event: serde_json::Value = serde_json::from_str(lines.trim()).unwrap();
    assert_eq!(event["event_type"], "opened");

    let mut out = Vec::new();
    execute(Command::Journey { tenant, user: student.user_id }, &store, &mut out)
      .await
      .unwrap();
    let row: serde_json::Value = serde_json::from_str(output(out).trim()).unwrap();
    assert_eq!(row["node_slug"], "profile");
    assert_eq!(row["state"], "active");

    let mut out = Vec::new();
    execute(Command::RebuildProjection { tenant: Some(tenant) }, &store, &mut out)
      .await
      .unwrap();
    assert_eq!(output(out), "1 rows written\n");

    let missing = execute(Command::History { instance: Uuid::new_v4() }, &store, &mut Vec::new()).await;
    assert!(missing.is_err());

    std::fs::remove_dir_all(dir).ok();
  }

  #[tokio::test]
  async fn show_config_prints_without_a_database() {
    let config = AdminConfig {
      database: PathBuf::from("/nonexistent/dir/journey.db"),
      engine:   EngineConfig::default(),
    };
    let mut out = Vec::new();
    run(Command::ShowConfig, &config, &mut out).await.unwrap();
    let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(printed["database"], "/nonexistent/dir/journey.db");
    assert_eq!(printed["engine"]["max_upload_bytes"], config.engine.max_upload_bytes);
  }

  #[test]
  fn missing_config_file_uses_defaults() {
    let config = AdminConfig::load(Path::new("/nonexistent/journeyctl.toml")).unwrap();
    assert_eq!(config.engine.max_upload_bytes, EngineConfig::default().max_upload_bytes);
  }
}
