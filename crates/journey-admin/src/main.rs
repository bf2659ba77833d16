//! `journeyctl` — maintenance tool for a journey database.
//!
//! # Usage
//!
//! ```text
//! journeyctl validate playbook.json
//! journeyctl --config journey.toml publish --tenant <uuid> playbook.json
//! journeyctl rebuild-projection --tenant <uuid>
//! journeyctl history <instance-id>
//! journeyctl journey --tenant <uuid> --user <uuid>
//! ```

use std::{io, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use journey_admin::{AdminConfig, Command};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "journeyctl", author, version, about = "Journey core maintenance")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "journey.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  // Logs go to stderr; stdout carries command output.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let config = AdminConfig::load(&cli.config)?;

  let stdout = io::stdout();
  journey_admin::run(cli.command, &config, &mut stdout.lock()).await
}
