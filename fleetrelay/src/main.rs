// Copyright 2026 The Fleetrelay Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use fleetrelay::config::{self, ConfigSource};
use fleetrelay::proxy;
use fleetrelay::{agent, identity, store, stream};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetrelay", about = "SSE relay between the chat client and the Fleet Agent")]
struct Cli {
    /// Path to the fleetrelay.yaml config file, read unless FLEETRELAY_CONFIG_YAML is set
    #[arg(long, default_value = "fleetrelay.yaml", env = "FLEETRELAY_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = 3001, env = "FLEETRELAY_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "FLEETRELAY_HOST")]
    host: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::new(cli.host, cli.port);
    tracing::info!(%addr, "fleetrelay starting");

    let source = config::EnvOrFileSource::new(cli.config);
    tracing::info!(source = %source.describe(), "loading config");
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        environment = %config.environment,
        config_hash = %config.config_hash,
        agent_configured = config.upstream.url.is_some(),
        connect_timeout_ms = config.upstream.connect_timeout.as_millis() as u64,
        channel_capacity = config.stream.channel_capacity,
        "config loaded"
    );
    if config.upstream.url.is_none() {
        tracing::warn!("upstream.url is not set; chat turns will fail until it is configured");
    }

    let state = proxy::AppState {
        agent: Arc::new(agent::build_agent_client(config.upstream.clone())),
        store: Arc::new(store::InMemoryChatStore::new()),
        identity: Arc::new(identity::SessionIdResolver),
        processor: Arc::new(stream::StreamProcessor::new(
            Arc::new(stream::UuidIds),
            config.stream.channel_capacity,
        )),
        max_body_bytes: config.server.max_body_bytes,
        secure_cookies: config.environment == "production",
    };

    let app = proxy::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "fleetrelay listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
