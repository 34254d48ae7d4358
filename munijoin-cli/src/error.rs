use std::path::PathBuf;

use munijoin::error::MunijoinError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum MunijoinCliError {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("{0}")]
    MunijoinError(#[from] MunijoinError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid TOML in config file {}: {source}", path.display())]
    ConfigError {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

pub type MunijoinCliResult<T> = Result<T, MunijoinCliError>;
