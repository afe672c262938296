use std::sync::Arc;

use vision_gateway::api::build_router;
use vision_gateway::config::{load_config_or_default, AppConfig};
use vision_gateway::observability::init_tracing;
use vision_gateway::routing::{normalize_base_path, Credentials};
use vision_gateway::state::AppState;
use vision_gateway::transport::HttpTransport;

const CONFIG_PATH_ENV: &str = "VISION_GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

fn main() {
    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config_or_default(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from '{config_path}': {e}");
        eprintln!("Copy 'config.example.yaml' to 'config.yaml' or fix the reported field.");
        std::process::exit(1);
    });

    // Variables already set in the process environment win over the file.
    let env_file_loaded = dotenvy::from_filename(&config.features.env_file).is_ok();

    init_tracing(&config.features.log_level, config.features.json_logs);
    if !env_file_loaded {
        tracing::debug!(file = %config.features.env_file, "no env file loaded");
    }
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let worker_threads = config.server.runtime_worker_threads;
    let mut runtime_builder = if worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    runtime_builder.enable_io();
    runtime_builder.enable_time();
    if let Some(max_blocking_threads) = config.server.runtime_max_blocking_threads {
        runtime_builder.max_blocking_threads(max_blocking_threads);
    }
    runtime_builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let credentials = Credentials::from_env();
    let configured = credentials.configured();
    if configured.is_empty() {
        tracing::warn!("no provider credentials found; every guidance request will fail");
    }

    let transport = HttpTransport::new(&config.server).unwrap_or_else(|err| {
        eprintln!("Failed to build HTTP client: {err}");
        std::process::exit(1);
    });
    let state = Arc::new(AppState::new(config, credentials, transport));
    let app = build_router(state);

    tracing::info!(
        "vision-gateway starting on {}:{} with base_path='{}' providers={:?}",
        host,
        port,
        base_path,
        configured
    );

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!("vision-gateway is ready to accept connections");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server exited with error");
    }
}
