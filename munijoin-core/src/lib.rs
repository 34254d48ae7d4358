use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::config::Config;
use crate::geo::MunicipalityDimension;
use crate::pipeline::MergedTable;
use crate::rank::{RankOrder, RankedSlice};

// Re-exports
pub use column_names as COL;

// Modules
pub mod coerce;
pub mod column_names;
pub mod config;
pub mod error;
pub mod formatters;
pub mod geo;
pub mod join;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod rank;
pub mod schema;
pub mod source;

/// Type for a municipality harmonization run: the configuration and the dimension loaded from
/// its boundary file.
pub struct Munijoin {
    pub dimension: Arc<MunicipalityDimension>,
    pub config: Config,
}

impl Munijoin {
    /// Setup the Munijoin object with default configuration
    pub async fn new() -> Result<Self> {
        Self::new_with_config(Config::default()).await
    }

    /// Setup the Munijoin object with custom configuration. Validates the configuration and
    /// loads the boundary file, which must exist.
    pub async fn new_with_config(config: Config) -> Result<Self> {
        debug!("config: {config:?}");
        config.validate()?;
        let path = config.boundary_path();
        let boundary = config.boundary.clone();
        let dimension =
            tokio::task::spawn_blocking(move || geo::load_dimension(&path, &boundary)).await??;
        Ok(Self {
            dimension: Arc::new(dimension),
            config,
        })
    }

    /// Load every fact source and join it onto the dimension
    pub async fn merge(&self) -> Result<MergedTable> {
        pipeline::merge(&self.config, Arc::clone(&self.dimension)).await
    }

    /// Top or bottom rows of the merged table by `metric`
    pub fn rank(
        &self,
        merged: &MergedTable,
        metric: &str,
        order: RankOrder,
        size: Option<usize>,
    ) -> Result<RankedSlice> {
        let size = size.unwrap_or(self.config.default_slice_size);
        Ok(rank::rank(&merged.df, metric, order, size)?)
    }

    /// Merge and write every configured export
    pub async fn export(&self) -> Result<(MergedTable, Vec<PathBuf>)> {
        let merged = self.merge().await?;
        let written = pipeline::write_exports(&self.config, &merged.df)?;
        Ok((merged, written))
    }
}
