// ABOUTME: Entry point for the rose relay: serve the API with dispatch loop, run one tick, or list sessions
// ABOUTME: Initializes logging (stdout plus a daily rolling file), .env, configuration and the app context

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rose::{
    config::Config,
    dispatch::DispatchLoop,
    gateway,
    metrics::init_metrics,
    paths,
    relay::ChannelRelay,
    server::{self, ApiState},
    AppContext,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "rose", version, about = "Message relay between humans, agents and chat channels")]
struct Cli {
    /// Path to config.toml (defaults to ROSE_CONFIG_PATH, ./config.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API, the dispatch loop and the channel relay
    Serve,
    /// Run a single dispatch tick and print what it did
    Tick,
    /// List sessions with unseen messages
    Sessions,
}

fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_dir = paths::log_dir();
    let file_layer = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&log_dir, "rose.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Some((fmt::layer().with_writer(writer).with_ansi(false), guard))
        }
        Err(e) => {
            eprintln!("Logging to stdout only, cannot create {}: {}", log_dir.display(), e);
            None
        }
    };

    let (file_layer, guard) = match file_layer {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    // Flushes the file log on drop
    let _log_guard = init_logging();

    let config = Config::load_from(cli.config.as_deref())?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        database = %config.storage.path,
        dispatch_enabled = config.dispatch.enabled,
        platform = %config.relay.platform,
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Tick => tick(config).await,
        Command::Sessions => sessions(config),
    }
}

async fn serve(config: Config) -> Result<()> {
    let metrics = init_metrics().context("Failed to install metrics recorder")?;
    let channel = gateway::adapter_from_config(&config)?;
    let ctx = AppContext::from_config(config)?;
    let relay = ChannelRelay::new(ctx.clone(), channel);

    let cancel = CancellationToken::new();
    let dispatch = if ctx.config.dispatch.enabled {
        let dispatch_loop = DispatchLoop::new(ctx.clone());
        Some(tokio::spawn(dispatch_loop.run(cancel.child_token())))
    } else {
        tracing::info!("Dispatch loop disabled");
        None
    };

    let state = ApiState {
        ctx,
        relay: relay.clone(),
        metrics,
    };

    let shutdown_token = cancel.clone();
    let shutdown = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                }
                tracing::info!("Shutdown requested");
            }
            _ = shutdown_token.cancelled() => {}
        }
    };

    let served = server::serve(state, shutdown).await;

    cancel.cancel();
    relay.shutdown().await;
    if let Some(handle) = dispatch {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Dispatch loop task failed");
        }
    }

    tracing::info!("Stopped");
    served
}

async fn tick(config: Config) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    let report = DispatchLoop::new(ctx).tick().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sessions(config: Config) -> Result<()> {
    let ctx = AppContext::from_config(config)?;
    let ids = ctx.queue.list_unseen_ids()?;
    if ids.is_empty() {
        println!("No sessions with unseen messages");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}
