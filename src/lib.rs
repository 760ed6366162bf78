pub mod cli;
pub mod columns;
pub mod convert;
pub mod data;
pub mod diff;
pub mod error;
pub mod executor;
pub mod import;
pub mod io_utils;
pub mod link;
pub mod mapping;
pub mod matcher;
pub mod preprocess;
pub mod preview;
pub mod rows;
pub mod scheduler;
pub mod schema;
pub mod settings;
pub mod store;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug};

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("json_table_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    // Store calls are awaited one at a time; a single thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting the async runtime")?;
    debug!("Running {:?}", cli.command);
    runtime.block_on(async {
        match &cli.command {
            Commands::Import(args) => import::execute(args).await,
            Commands::Preview(args) => preview::execute(args).await,
            Commands::Columns(args) => columns::execute(args).await,
        }
    })
}
