use anyhow::{ensure, Context, Result};
use fold_builder::config::Config;
use std::{env, path::PathBuf};
use structopt::StructOpt;
use tracing::info_span;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Build few-shot dataset folds
struct Args {
    #[structopt(long, default_value = "fold.json5")]
    /// configuration file
    pub config_file: PathBuf,
}

pub fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let Args { config_file } = Args::from_args();
    let config = Config::open(&config_file)
        .with_context(|| format!("failed to load config file '{}'", config_file.display()))?;

    // build folds
    let summary = {
        let _span = info_span!("fold_builder").entered();
        fold_builder::start(&config)?
    };

    let num_failed = summary.failures().count();
    ensure!(
        num_failed == 0,
        "{} of {} folds failed",
        num_failed,
        summary.outcomes.len()
    );

    Ok(())
}
