mod cli;
mod commands;
mod output;

use anyhow::{Result, anyhow};
use clap::Parser;
use stockpile_cache::config::loader;
use stockpile_cache::{CacheSystem, init_tracing_from};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    execute(Cli::parse()).await
}

async fn execute(cli: Cli) -> Result<()> {
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Key(args) => commands::cache::key(args)?,
        Commands::Ping => commands::cache::ping(&connect(&cli).await?, format).await?,
        Commands::Get(args) => commands::cache::get(&connect(&cli).await?, args, format).await?,
        Commands::Invalidate(args) => {
            commands::cache::invalidate(&connect(&cli).await?, args, format).await?
        }
        Commands::Graph => commands::graph::graph(&connect(&cli).await?, format)?,
        Commands::Watch(args) => {
            let system = connect(&cli).await?;
            commands::watch::watch(&system, system.bus().channel(), args, format).await?
        }
    }
    Ok(())
}

/// Load settings, set up logging and connect to the shared store.
async fn connect(cli: &Cli) -> Result<CacheSystem> {
    let settings = loader::load_config(cli.config.as_deref()).map_err(|e| anyhow!(e))?;
    init_tracing_from(&settings.logging);
    Ok(CacheSystem::connect(&settings).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING_CONFIG: &str = "/nonexistent/stockpile.toml";

    #[tokio::test]
    async fn key_runs_without_loading_config() {
        let cli = Cli::parse_from([
            "stockpile",
            "--config",
            MISSING_CONFIG,
            "key",
            "products:list",
            r#"{"page": 1}"#,
        ]);
        assert!(execute(cli).await.is_ok());
    }

    #[tokio::test]
    async fn store_commands_load_config() {
        let cli = Cli::parse_from(["stockpile", "--config", MISSING_CONFIG, "ping"]);
        let err = execute(cli).await.unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
