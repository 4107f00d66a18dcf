use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use bwalloc::config::AllocatorConfig;
use bwalloc::scenario::Scenario;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Replays a conference scenario through the bandwidth allocator and prints
/// every published event as a JSON line.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Allocator configuration (TOML). BWALLOC__* environment variables override it.
    #[arg(short, long, env = "BWALLOC_CONFIG")]
    config: Option<PathBuf>,

    /// Scenario to replay (TOML).
    #[arg(short, long)]
    scenario: PathBuf,

    /// Keep serving /debug and /allocation on this address after the replay.
    #[arg(long)]
    debug_addr: Option<SocketAddr>,

    /// Emit logs as JSON objects instead of text.
    #[arg(long, env = "BWALLOC_LOG_JSON")]
    log_json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bwalloc=info"));
    let json_layer = args.log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stderr)
    });
    let fmt_layer = (!args.log_json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(fmt_layer)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let shutdown = CancellationToken::new();
    let result = rt.block_on(run(args, shutdown.clone()));
    shutdown.cancel();
    result
}

async fn run(args: Args, shutdown: CancellationToken) -> anyhow::Result<()> {
    let config = AllocatorConfig::load(args.config.as_deref()).context("failed to load config")?;
    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;

    tracing::info!(
        participants = scenario.participants.len(),
        steps = scenario.steps.len(),
        "replaying scenario"
    );
    let replay = scenario.replay(config)?;
    for record in &replay.records {
        println!("{}", serde_json::to_string(record)?);
    }
    tracing::info!(events = replay.records.len(), "replay finished");

    let Some(debug_addr) = args.debug_addr else {
        return Ok(());
    };

    let controller = replay.controller;
    let watchdog = controller.spawn_watchdog(shutdown.child_token());
    let cors = tower_http::cors::CorsLayer::very_permissive();
    let router = bwalloc::api::router(controller).layer(cors);

    let listener = tokio::net::TcpListener::bind(debug_addr)
        .await
        .with_context(|| format!("failed to bind {debug_addr}"))?;
    tracing::info!("serving allocator debug state on {debug_addr}");

    tokio::select! {
        res = axum::serve(listener, router) => {
            if let Err(err) = res {
                tracing::error!("debug server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down gracefully...");
        }
    }

    shutdown.cancel();
    if let Err(err) = watchdog.await {
        tracing::warn!("watchdog exited with error: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn json_logs_are_opt_in() {
        let args = Args::try_parse_from(["bwalloc", "--scenario", "stage.toml"]).unwrap();
        assert!(!args.log_json);
        assert!(args.debug_addr.is_none());

        let args =
            Args::try_parse_from(["bwalloc", "-s", "stage.toml", "--log-json"]).unwrap();
        assert!(args.log_json);
    }
}
