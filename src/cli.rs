//! CLI argument parsing for stratarank

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the session report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

/// Built-in configuration presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    Default,
    Strict,
    Permissive,
}

#[derive(Parser, Debug)]
#[command(name = "stratarank")]
#[command(version)]
#[command(about = "Rank session metrics against their strata and combine percentile and threshold alerts", long_about = None)]
pub struct Cli {
    /// Session table: JSON array of session records
    #[arg(short = 't', long = "table", value_name = "FILE")]
    pub table: PathBuf,

    /// Engine configuration (TOML); overrides --preset
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration preset used when no --config is given
    #[arg(long = "preset", value_enum, default_value = "default")]
    pub preset: Preset,

    /// Skip the built-in threshold rules (session count, water intake)
    #[arg(long = "no-default-thresholds")]
    pub no_default_thresholds: bool,

    /// Keep rows whose FIELD is one of the values (repeatable, e.g. -f stage=STAGE_1,STAGE_2)
    #[arg(short = 'f', long = "filter", value_name = "FIELD=V1,V2")]
    pub filter: Vec<String>,

    /// Report faceted value counts for FIELD (repeatable)
    #[arg(long = "facet", value_name = "FIELD")]
    pub facet: Vec<String>,

    /// Only each subject's most recent session
    #[arg(long = "latest")]
    pub latest: bool,

    /// Print the percentile matrix of one subject as JSON and exit
    #[arg(long = "matrix", value_name = "SUBJECT")]
    pub matrix: Option<String>,

    /// Output format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Add alert counts and per-stratum statistics to the report
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
