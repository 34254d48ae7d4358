use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use itertools::Itertools;
use log::{debug, info};
use munijoin::config::Config;
use munijoin::formatters::{OutputFormat, OutputFormatter, OutputGenerator};
use munijoin::pipeline::{select_columns, MergedTable};
use munijoin::rank::RankOrder;
use munijoin::source::load_table;
use munijoin::{Munijoin, COL};
use polars::prelude::DataFrame;
use spinners::{Spinner, Spinners};

use crate::display::{
    display_coverage, display_dataframe, display_headers, display_normalized, display_quality,
};
use crate::error::{MunijoinCliError, MunijoinCliResult};

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";

/// Write `df` with `generator` to `output_file`, or to stdout without one.
fn write_output<T, U>(generator: T, mut df: DataFrame, output_file: Option<U>) -> anyhow::Result<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file)?;
        generator.save(&mut f, &mut df)?;
    } else {
        let mut stdout_lock = io::stdout().lock();
        generator.save(&mut stdout_lock, &mut df)?;
        stdout_lock.flush()?;
    }
    Ok(())
}

/// Spinner shown while `message` runs, unless `quiet`.
fn start_spinner(quiet: bool, message: &str) -> Option<Spinner> {
    (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            format!("{message}{RUNNING_TAIL_STRING}"),
        )
    })
}

fn stop_spinner(spinner: Option<Spinner>) {
    if let Some(mut s) = spinner {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
}

/// Load the boundary dimension and merge every source.
async fn merged(config: Config, quiet: bool) -> MunijoinCliResult<(Munijoin, MergedTable)> {
    let sp = start_spinner(quiet, "Loading municipal boundaries");
    let munijoin = Munijoin::new_with_config(config).await?;
    stop_spinner(sp);
    let sp = start_spinner(quiet, "Merging sources");
    let merged = munijoin.merge().await?;
    stop_spinner(sp);
    Ok((munijoin, merged))
}

/// Implemented by every subcommand; `Commands` dispatches to it.
#[enum_dispatch]
pub trait RunCommand {
    async fn run(&self, config: Config) -> MunijoinCliResult<()>;
}

/// The Export command merges every source and writes each configured export to the output
/// directory.
#[derive(Args, Debug)]
pub struct ExportCommand {
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for ExportCommand {
    async fn run(&self, config: Config) -> MunijoinCliResult<()> {
        info!("Running `export` subcommand");
        let (munijoin, merged) = merged(config, self.quiet).await?;
        let sp = start_spinner(self.quiet, "Writing exports");
        let written = munijoin::pipeline::write_exports(&munijoin.config, &merged.df)?;
        stop_spinner(sp);
        if !self.quiet {
            display_coverage(&merged.coverage);
            println!();
            for path in &written {
                println!("{}", path.display());
            }
        }
        Ok(())
    }
}

/// The Merged command writes the whole merged table, one row per municipality.
#[derive(Args, Debug)]
pub struct MergedCommand {
    #[arg(
        short = 'f',
        long = "output-format",
        value_name = "OUTPUT_FORMAT",
        default_value_t = OutputFormat::Csv,
        help = "One of csv, geojson or geojsonseq"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place results (stdout if absent)")]
    output_file: Option<PathBuf>,
    #[arg(
        short = 'c',
        long = "column",
        help = "Columns to keep, in order (every column if absent)"
    )]
    columns: Vec<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for MergedCommand {
    async fn run(&self, config: Config) -> MunijoinCliResult<()> {
        info!("Running `merged` subcommand");
        let (_, merged) = merged(config, self.quiet).await?;
        let df = if self.columns.is_empty() {
            merged.df
        } else {
            select_columns(&merged.df, &self.columns)?
        };
        write_output(
            OutputFormatter::from(self.output_format),
            df,
            self.output_file.as_ref(),
        )?;
        Ok(())
    }
}

/// The Rank command shows the municipalities with the largest (or smallest) values of a
/// metric. Results are printed as a table unless an output format or file is given.
#[derive(Args, Debug)]
pub struct RankCommand {
    #[arg(help = "Column of the merged table to rank by, e.g. pop_per_km2")]
    metric: String,
    #[arg(long, help = "Smallest values first")]
    bottom: bool,
    #[arg(short = 'n', long, help = "Number of rows (the configured slice size if absent)")]
    size: Option<usize>,
    #[arg(
        short = 'c',
        long = "column",
        help = "Columns to show besides the municipality and the metric"
    )]
    columns: Vec<String>,
    #[arg(short = 'f', long = "output-format", value_name = "OUTPUT_FORMAT")]
    output_format: Option<OutputFormat>,
    #[arg(short = 'o', long, help = "Output file to place results")]
    output_file: Option<PathBuf>,
    #[arg(from_global)]
    quiet: bool,
}

impl RankCommand {
    fn order(&self) -> RankOrder {
        if self.bottom {
            RankOrder::Bottom
        } else {
            RankOrder::Top
        }
    }

    fn selected_columns(&self) -> Vec<String> {
        [COL::MUNICIPIO.to_string(), self.metric.clone()]
            .into_iter()
            .chain(self.columns.iter().cloned())
            .unique()
            .collect()
    }
}

impl RunCommand for RankCommand {
    async fn run(&self, config: Config) -> MunijoinCliResult<()> {
        info!("Running `rank` subcommand");
        let (munijoin, merged) = merged(config, self.quiet).await?;
        let slice = munijoin.rank(&merged, &self.metric, self.order(), self.size)?;
        debug!("{} rows ranked by {}", slice.df.height(), slice.metric);
        let df = select_columns(&slice.df, &self.selected_columns())?;
        match (self.output_format, &self.output_file) {
            (None, None) => display_dataframe(&df)?,
            (format, output_file) => write_output(
                OutputFormatter::from(format.unwrap_or_default()),
                df,
                output_file.as_ref(),
            )?,
        }
        Ok(())
    }
}

/// The Coverage command reports how well each source matched the municipal boundaries and how
/// cleanly its values parsed.
#[derive(Args, Debug)]
pub struct CoverageCommand {
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for CoverageCommand {
    async fn run(&self, config: Config) -> MunijoinCliResult<()> {
        info!("Running `coverage` subcommand");
        let (_, merged) = merged(config, self.quiet).await?;
        display_coverage(&merged.coverage);
        display_quality(&merged.quality);
        Ok(())
    }
}

/// The Normalize command shows the display name and the join key derived from raw names.
#[derive(Args, Debug)]
pub struct NormalizeCommand {
    #[arg(required = true, help = "Raw municipality names")]
    names: Vec<String>,
}

impl RunCommand for NormalizeCommand {
    async fn run(&self, _config: Config) -> MunijoinCliResult<()> {
        info!("Running `normalize` subcommand");
        display_normalized(&self.names);
        Ok(())
    }
}

/// The Inspect command reads a CSV file the way sources are read and lists its cleaned headers.
#[derive(Args, Debug)]
pub struct InspectCommand {
    #[arg(help = "CSV file to inspect")]
    file: PathBuf,
}

impl RunCommand for InspectCommand {
    async fn run(&self, _config: Config) -> MunijoinCliResult<()> {
        info!("Running `inspect` subcommand");
        let df = load_table(&self.file)?
            .ok_or_else(|| MunijoinCliError::FileNotFound(self.file.clone()))?;
        println!("{} rows", df.height());
        display_headers(&df);
        Ok(())
    }
}

/// Harmonize municipal data sources onto one table per municipality
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, name = "munijoin")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(short = 'q', long = "quiet", global = true, help = "Do not show progress")]
    quiet: bool,
    #[arg(
        long = "config",
        global = true,
        value_name = "CONFIG_FILE",
        help = "TOML configuration file (the user config directory if absent)"
    )]
    pub config: Option<PathBuf>,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command should implmement the RunCommand trait and specify the list
/// of possible arguments in the struct.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Merge every source and write the configured exports
    Export(ExportCommand),
    /// Write the merged table
    Merged(MergedCommand),
    /// Show the top (or bottom) municipalities by a metric
    Rank(RankCommand),
    /// Show source coverage and column quality
    Coverage(CoverageCommand),
    /// Show the display name and join key of raw municipality names
    Normalize(NormalizeCommand),
    /// List the cleaned headers of a CSV file
    Inspect(InspectCommand),
}
