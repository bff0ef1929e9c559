// ABOUTME: Main entry point for the gateway adapter service
// ABOUTME: Initializes logging, config, metrics, the adapter, and the WS server

use anyhow::Result;
use clap::Parser;
use onebridge::adapter::Adapter;
use onebridge::config::Config;
use onebridge::dispatch::TraceSink;
use onebridge::gateway;
use onebridge::metrics;
use onebridge::routing::NullRouting;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "onebridge", version, about = "WebSocket adapter between a chat gateway and an internal routing layer")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic hook to log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n╔══════════════════════════════════════════════════════════╗");
        eprintln!("║ PANIC! Adapter crashed with the following error:        ║");
        eprintln!("╚══════════════════════════════════════════════════════════╝\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    // Initialize logging; ONEBRIDGE_LOG_DIR adds a daily-rotated JSON file layer
    let mut _log_guard = None;
    let file_layer = match std::env::var("ONEBRIDGE_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(&dir, "onebridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            _log_guard = Some(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        _ => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting gateway adapter");

    // Load configuration
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load_from(args.config.as_deref())?;

    tracing::info!(
        bind_addr = %config.bind_addr(),
        auth_enabled = config.expected_authorization().is_some(),
        max_frame_bytes = config.gateway.max_frame_bytes,
        heartbeat_interval_secs = config.gateway.heartbeat_interval_secs,
        idle_timeout_secs = config.gateway.idle_timeout_secs,
        response_timeout_secs = config.commands.response_timeout_secs,
        grace_period_secs = config.shutdown.grace_period_secs,
        "Configuration loaded"
    );

    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let adapter = Arc::new(Adapter::new(
        config,
        Arc::new(TraceSink),
        Arc::new(NullRouting),
    ));
    adapter.start().await?;

    // Cancel the adapter when the process is asked to stop; serve() drains
    // on the same token, then the shutdown below finishes the teardown.
    let signal_adapter = Arc::clone(&adapter);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_adapter.cancel_token().cancel();
    });

    let serve_result = gateway::serve(Arc::clone(&adapter), metrics_handle).await;
    adapter.shutdown().await;
    serve_result?;

    tracing::info!("Gateway adapter stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
