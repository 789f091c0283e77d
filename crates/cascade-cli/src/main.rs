//! Cascade CLI entrypoint.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod handlers;

use commands::Commands;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "Release orchestrator for multi-repository package fleets", long_about = None)]
struct Cli {
    /// Fleet file (defaults to $CASCADE_CONFIG, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Logs go to stderr so command output stays pipeable.
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Validate => handlers::validate(config)?,
        Commands::Builders => handlers::builders(config)?,
        Commands::Classify { branch } => handlers::classify_branch(&branch)?,
        Commands::Artifact { file_name } => handlers::artifact(&file_name)?,
        Commands::Discover { dir } => handlers::discover(config, &dir).await?,
        Commands::Plan {
            dir,
            repository,
            source_ref,
            arch,
        } => handlers::plan(config, &dir, repository, source_ref, &arch).await?,
        Commands::Push { repository, branch } => {
            handlers::push(config, repository, branch).await?
        }
        Commands::Force {
            builder,
            source_ref,
            full_build,
        } => handlers::force(config, builder, source_ref, full_build).await?,
        Commands::Serve => handlers::serve(config).await?,
        Commands::DetectArch => handlers::detect_arch().await?,
    }

    Ok(())
}
