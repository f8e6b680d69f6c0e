mod config;
mod error;

use clap::Parser;
use config::{Cli, Commands};

mod cmd;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Demo(args) => cmd::demo::run(config, args).await,
        Commands::BenchGroups(args) => cmd::bench::run(config, args).await,
        Commands::Consume(args) => cmd::consume::run(config, args).await,
        Commands::Stats(args) => cmd::admin::stats(config, args).await,
        Commands::Pending(args) => cmd::admin::pending(config, args).await,
        Commands::Claim(args) => cmd::admin::claim(config, args).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
