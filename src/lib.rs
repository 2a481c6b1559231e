pub mod audit;
pub mod cli;
pub mod config;
pub mod data;
pub mod database;
pub mod engine;
pub mod error;
pub mod identifiers;
pub mod inference;
pub mod io_utils;
mod load_cmd;
pub mod loader;
mod probe;
pub mod reconcile;
pub mod schema;
pub mod source;
pub mod sqlite;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

pub use crate::{
    audit::{AuditEvent, AuditSink},
    config::LoadOptions,
    engine::LoadEngine,
    error::{DatabaseError, LoadError},
    loader::{CancellationToken, FailurePolicy, LoadResult},
    reconcile::TablePolicy,
    source::{Cell, SourceTable},
    sqlite::SqliteConnector,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheetload", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => load_cmd::execute(&args),
        Commands::Probe(args) => probe::execute(&args),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
