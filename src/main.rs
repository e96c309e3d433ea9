mod cli;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoUtc};

fn main() {
    let args = cli::Args::parse();

    let default_filter = if args.global.verbose {
        "airtable=debug"
    } else {
        "airtable=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(args) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
