mod config;
mod dispatcher;
mod engine;
mod error;
mod logging;
mod monitor;
mod resume;
mod retry;
mod scanner;
mod shutdown;
mod store;
mod verifier;

use clap::{Parser, Subcommand};
use config::{CliOverrides, MigrationConfig};
use engine::{EngineOutcome, MigrationEngine};
use eyre::Result;
use logging::TracingLogger;
use std::sync::Arc;
use store::redis_store::{RedisEndpoint, RedisStore};

#[derive(Parser, Debug)]
#[command(name = "redis-migrate", version, about = "Bulk key-value migration between two Redis-protocol stores")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a migration from source to target.
    Migrate(CliOverrides),
    /// Print version information and exit.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Version => {
            println!("redis-migrate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Migrate(cli) => {
            let config = MigrationConfig::resolve(cli)?;
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.as_env_filter_directive()))
                .init();

            let source_endpoint = RedisEndpoint {
                host: config.source.host.clone(),
                port: config.source.port,
                password: config.source.password.clone(),
                database: config.source.database,
            };
            let target_endpoint = RedisEndpoint {
                host: config.target.host.clone(),
                port: config.target.port,
                password: config.target.password.clone(),
                database: config.target.database,
            };

            let source = RedisStore::new(source_endpoint).map_err(|e| eyre::eyre!("failed to build source client: {e}"))?;
            let target = RedisStore::new(target_endpoint).map_err(|e| eyre::eyre!("failed to build target client: {e}"))?;

            let logger = Arc::new(TracingLogger);
            let engine = MigrationEngine::new(config, source, target, logger);
            let outcome = engine.run().await;

            match &outcome {
                EngineOutcome::Succeeded { processed, failed } => {
                    tracing::info!(processed, failed, "migration succeeded");
                }
                EngineOutcome::FailedFast { reason } => {
                    tracing::error!(reason, "migration failed fast");
                }
                EngineOutcome::Terminated => {
                    tracing::warn!("migration terminated by shutdown signal");
                }
                EngineOutcome::CompletedWithVerificationErrors { verification_failures } => {
                    tracing::warn!(count = verification_failures.len(), "migration completed with verification errors");
                }
                EngineOutcome::CompletedWithErrors { transfer_failures } => {
                    tracing::warn!(count = transfer_failures.len(), "migration completed with per-key transfer errors");
                }
            }

            std::process::exit(outcome.exit_code());
        }
    }
}
