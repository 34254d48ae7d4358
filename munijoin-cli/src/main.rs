mod cli;
mod display;
mod error;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, RunCommand};
use log::debug;
use munijoin::config::Config;

use crate::error::{MunijoinCliError, MunijoinCliResult};

const DEFAULT_LOGGING_LEVEL: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config = read_config(args.config.as_deref())?;
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config).await?;
    }
    Ok(())
}

/// Read the configuration from `path` when given, otherwise from the user config directory
/// (e.g. `~/.config/munijoin/config.toml` on Linux). Without either, the defaults apply.
fn read_config(path: Option<&Path>) -> MunijoinCliResult<Config> {
    let (file_path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("munijoin").join("config.toml"), false),
            None => return Ok(Config::default()),
        },
    };
    match std::fs::read_to_string(&file_path) {
        Ok(contents) => toml::from_str(&contents).map_err(|source| MunijoinCliError::ConfigError {
            path: file_path,
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => Ok(Config::default()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(MunijoinCliError::FileNotFound(file_path))
        }
        Err(e) => Err(e.into()),
    }
}
