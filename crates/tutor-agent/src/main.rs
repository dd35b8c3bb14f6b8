//! Tutor worker binary: the main entry point for the voice tutor.
//!
//! Loads configuration, prewarms the worker, and serves the HTTP control
//! surface with structured logging and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_agent::config;
use tutor_agent::{
    app, tutor_entrypoint, AppState, OpenAiPlugins, TutorSettings, Worker, WorkerOptions,
};
use tutor_voice::{BridgeConnector, RoomRegistry, VoiceService};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TUTOR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; the variables may come from the environment.
    let dotenv = dotenvy::dotenv();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the worker cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }
    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Endpoint credentials are required before any session can run.
    let plugins = OpenAiPlugins::new(config.stt.clone(), config.llm.clone(), config.tts.clone());
    plugins
        .validate()
        .expect("invalid speech/LLM endpoint configuration, check the API key variables");

    let registry = RoomRegistry::new();
    let mut connector = BridgeConnector::new(registry.clone());
    let livekit = if config.livekit.is_enabled() {
        let service = Arc::new(VoiceService::new(config.livekit.clone()));
        tracing::info!(url = %service.get_url(), "LiveKit room service enabled");
        connector = connector.with_livekit(Arc::clone(&service));
        Some(service)
    } else {
        tracing::info!("LiveKit not configured, rooms are bridged over HTTP only");
        None
    };

    let settings = TutorSettings {
        pipeline: config.pipeline_options(),
        pricing: config.pricing.clone(),
    };
    let options = WorkerOptions::new(tutor_entrypoint(settings, Arc::new(plugins)));
    let worker = Worker::start(options, Arc::new(connector), config.job_settings())
        .await
        .expect("failed to prewarm worker");

    // Build application
    let app = app(AppState {
        worker: worker.clone(),
        registry,
        livekit,
    });
    let addr = SocketAddr::new(config.worker.host, config.worker.port);

    tracing::info!(%addr, "starting tutor worker");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    worker.shutdown().await;
    tracing::info!("tutor worker shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
