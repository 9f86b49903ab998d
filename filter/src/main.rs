// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! powgate filter service
//!
//! External authorization server for a service-mesh gateway. Every forwarded
//! request is checked against the allowlist, the per-route rate limits and
//! the proof-of-work challenge scheme.
//!
//! ## Operation
//!
//! - `ANY /*`: ext_authz style check of the forwarded request; 200 allows
//! - `POST /check`: the same decision for a JSON description of a request
//! - `GET /health`, `GET /healthz`, `GET /metrics`
//!
//! `SIGHUP` reloads the configuration file. A config that fails validation is
//! logged and ignored; the running one stays in place.

use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use powgate_filter::{
    anchor::{run_refresher, AnchorRing, MempoolSource},
    config::Config,
    decision::Filter,
    handlers::{router, AppState},
};

#[derive(Parser)]
#[command(name = "powgate-filter", version, about = "Proof-of-work and rate limit gateway filter")]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(long, short, env = "POWGATE_CONFIG", default_value = "powgate.yaml")]
    config: PathBuf,

    /// Override the configured bind address
    #[arg(long, env = "POWGATE_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(config.tracing_level().into())
                .from_env_lossy(),
        )
        .init();

    let upstream = config.upstream_url()?;
    info!(
        config = %args.config.display(),
        difficulty = %config.difficulty,
        hosts = config.virtual_hosts.len(),
        whitelist = config.whitelist.len(),
        trusted_proxies = config.trusted_proxies.len(),
        upstream = %upstream,
        "Starting powgate filter"
    );

    // Entropy anchors
    let anchors = Arc::new(AnchorRing::new(config.challenge.accepted_anchors));
    let source = MempoolSource::new(upstream, config.anchor.timeout())?;
    tokio::spawn(run_refresher(
        anchors.clone(),
        source,
        config.anchor.refresh_interval(),
        config.anchor.timeout(),
    ));

    let state = Arc::new(AppState {
        filter: Filter::new(&config, anchors)?,
    });

    // Spawn cleanup task
    let cleanup_state = state.clone();
    let cleanup_every = config.limiter.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            cleanup_state.filter.cleanup();
        }
    });

    spawn_reload_listener(state.clone(), args.config.clone());

    let app = router(state, &config.metrics);

    // Start server
    let addr: SocketAddr = args.bind.as_deref().unwrap_or(&config.bind_addr).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

/// Reload `path` on every SIGHUP.
#[cfg(unix)]
fn spawn_reload_listener(state: Arc<AppState>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, "Cannot listen for SIGHUP, reload disabled");
                return;
            }
        };
        while hangups.recv().await.is_some() {
            reload(&state, &path);
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_state: Arc<AppState>, _path: PathBuf) {}

#[cfg(unix)]
fn reload(state: &AppState, path: &Path) {
    let result = Config::load(path)
        .map_err(anyhow::Error::from)
        .and_then(|config| state.filter.reload(&config).map_err(anyhow::Error::from));
    match result {
        Ok(()) => info!(config = %path.display(), "Reload complete"),
        Err(error) => error!(config = %path.display(), error = %error, "Reload failed, keeping previous configuration"),
    }
}
