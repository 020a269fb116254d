use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use farmsync::commands::{self, Command};
use farmsync::config::Config;
use farmsync::logging;

#[derive(Parser, Debug)]
#[command(name = "farmsync")]
#[command(about = "Offline cache and mutation sync for the farm companion app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/farmsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let _log_guard = logging::init()?;

  let config = Config::load(args.config.as_deref())?;

  commands::run(args.command, &config).await
}
