use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};
use zenarth_console::config::Config;
use zenarth_console::http::{self, AppContext};
use zenarth_console::services::session::{SessionEvent, SessionStore};
use zenarth_console::utils::kv_store::FileKvStore;

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zenarth_console={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::load().context("Failed to load configuration")?);
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting zenarth-console backend");
    tracing::debug!("Loaded configuration: {:?}", config);

    // Session tracking is an in-process component: dashboard-side consumers
    // get handles to this store rather than going through the HTTP surface.
    let kv = FileKvStore::new(config.data_dir.clone())
        .context("Failed to initialize session data directory")?;
    let sessions = Arc::new(Mutex::new(SessionStore::new(Box::new(kv))));

    let mut session_events = sessions
        .lock()
        .expect("session store lock poisoned at startup")
        .subscribe();
    tokio::spawn(async move {
        while let Ok(event) = session_events.recv().await {
            match event {
                SessionEvent::Started(record) => {
                    tracing::info!(session_id = %record.id, name = %record.name, "session started")
                }
                SessionEvent::Stopped(record) => {
                    tracing::info!(session_id = %record.id, duration_ms = record.duration, "session stopped")
                }
                other => tracing::debug!(event = ?other, "session store updated"),
            }
        }
    });

    let context = Arc::new(AppContext::new(config.clone()));
    let app = http::router(context);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .context(format!("Failed to bind to {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "Console API server listening");

    axum::serve(listener, app)
        .await
        .context("Server terminated unexpectedly")?;

    Ok(())
}
