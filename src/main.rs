mod app;
mod config;
mod contacts;
mod error;
mod event;
mod logging;
mod store;
mod thumbnails;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "abook")]
#[command(about = "Sync a random-user contact list and cache avatar thumbnails")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/abook/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Random-user service endpoint
  #[arg(short, long)]
  endpoint: Option<String>,

  /// Number of users to request
  #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
  results: Option<u32>,

  #[command(subcommand)]
  command: Option<app::Command>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(endpoint) = args.endpoint {
    config.endpoint = endpoint;
  }
  if let Some(results) = args.results {
    config.results = results;
  }
  config.endpoint_url()?;

  let _log_guard = logging::init(&config.log)?;

  let mut app = app::App::new(config)?;
  app.run(args.command.unwrap_or_default()).await
}
