//! Boxcall CLI entry point.

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use boxcall_cli::commands::{dispatch, load_config, Cli};

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let level = tracing::Level::from(config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from(level).into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli, &config) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
