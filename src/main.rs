use clap::Parser;
use monitor_engine::db::services::MemoryStore;
use monitor_engine::server::{EngineConfig, MonitorEngine, SeedData};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Run one retention sweep and exit
    #[arg(long)]
    cleanup_now: bool,
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "monitor-engine.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn seed_store(store: &MemoryStore, seed: SeedData) {
    store.set_settings(seed.settings).await;
    for monitor in seed.monitors {
        store.insert_monitor(monitor).await;
    }
    for binding in seed.channels {
        store.add_binding(binding).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load engine configuration: {e}");
            return Err(e.into());
        }
    };
    init_logging(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting monitor engine.");

    let store = Arc::new(MemoryStore::new());
    seed_store(&store, config.seed.clone()).await;
    let engine = MonitorEngine::new(store, &config);

    if args.cleanup_now {
        let deleted = engine.trigger_manual_cleanup().await;
        info!(deleted, "Manual cleanup finished.");
        return Ok(());
    }

    engine.start().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal.");
    }
    info!("Shutdown signal received.");
    engine.shutdown().await;
    Ok(())
}
