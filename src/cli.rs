use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config::parse_duration, inference::SampleSize};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load CSV and spreadsheet files into database tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a CSV or spreadsheet file into a SQLite table
    Load(LoadArgs),
    /// Show the sanitized column names and inferred types of a file
    Probe(ProbeArgs),
}

/// Options shared by every command that reads an input file.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV, TSV, or spreadsheet file
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from a spreadsheet (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// SQLite database file (created when absent)
    #[arg(long = "db")]
    pub db: PathBuf,
    /// Destination table name
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// YAML file with load options; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Rows per insert batch
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Fail instead of creating the table when it does not exist
    #[arg(long = "no-create")]
    pub no_create: bool,
    /// Keep loading after a batch fails
    #[arg(long = "best-effort")]
    pub best_effort: bool,
    /// Maximum length of generated identifiers
    #[arg(long = "max-identifier-length")]
    pub max_identifier_length: Option<usize>,
    /// Rows sampled for type inference ('all' or a row count)
    #[arg(long = "sample-rows")]
    pub sample_rows: Option<SampleSize>,
    /// Per-batch timeout such as '30s', '500ms', or '2m'
    #[arg(long, value_parser = parse_timeout)]
    pub timeout: Option<std::time::Duration>,
    /// Append audit events as JSON lines to this file
    #[arg(long = "audit-log")]
    pub audit_log: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Maximum length of generated identifiers
    #[arg(long = "max-identifier-length", default_value_t = crate::identifiers::DEFAULT_MAX_IDENTIFIER_LENGTH)]
    pub max_identifier_length: usize,
    /// Rows sampled for type inference ('all' or a row count)
    #[arg(long = "sample-rows", default_value = "all")]
    pub sample_rows: SampleSize,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

fn parse_timeout(value: &str) -> Result<std::time::Duration, String> {
    parse_duration(value).map_err(|err| err.to_string())
}
