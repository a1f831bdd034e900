use anyhow::Context;
use clap::{Parser, Subcommand};
use geoloc::config::Config;
use geoloc::location::{Candidates, Resolver};
use geoloc::server::{self, AppState};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// geoloc: cached, rate-gated geocoding with provider fallback
///
/// Resolves free-text place names to coordinates through a local SQLite
/// cache and a chain of providers (Google, LocationIQ, Nominatim, built-in).
///
/// Examples:
///   geoloc resolve Monas
///   geoloc batch "DPRD NTB, Mataram" Mataram Lombok
///   geoloc stats
///   geoloc serve --port 8787
#[derive(Parser)]
#[command(name = "geoloc", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.geoloc/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a single location text.
    Resolve {
        /// Location text, e.g. "Monas" or "Bandung".
        text: String,
    },
    /// Resolve the candidates of one content item and pick the best.
    Batch {
        /// The most specific candidate.
        primary: String,
        /// Alternate mentions, in extraction order.
        secondary: Vec<String>,
    },
    /// Show cache statistics.
    Stats,
    /// Remove every cache entry.
    Clear,
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsOutput {
    #[serde(flatten)]
    cache: geoloc::location::CacheStats,
    gate: geoloc::rate_gate::GateSnapshot,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "geoloc=debug" } else { "geoloc=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let resolver = Resolver::from_config(&config).with_context(|| {
        format!("opening location cache at {}", config.cache.path.display())
    })?;

    match cli.command {
        Command::Resolve { text } => {
            let result = resolver.resolve_one(&text).await;
            eprintln!("{}", result.display_line());
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Batch { primary, secondary } => {
            let outcome = resolver
                .resolve_batch(&Candidates::new(primary, secondary))
                .await;
            if let Some(selected) = &outcome.selected {
                eprintln!("  Selected: {}", selected);
            }
            eprintln!("{}", outcome.best.display_line());
            print_json(&outcome)?;
            if !outcome.best.success {
                std::process::exit(1);
            }
        }
        Command::Stats => {
            let stats = StatsOutput {
                cache: resolver.cache_stats().await?,
                gate: resolver.gate().snapshot().await,
            };
            print_json(&stats)?;
        }
        Command::Clear => {
            let removed = resolver.clear_cache().await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let state = AppState::new(Arc::new(resolver), config.api_gate.to_gate("api"));
            server::start(&host, port, state)
                .await
                .with_context(|| format!("serving on {}:{}", host, port))?;
        }
    }

    Ok(())
}
