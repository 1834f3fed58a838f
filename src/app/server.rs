//! Listener setup, transport selection and shutdown sequencing

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::relay::RelayTasks;

/// How long in-flight HTTP connections get once shutdown starts
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Serve until a shutdown signal arrives, then stop the relay tasks, close
/// every connection and clear the registry before the listener goes away.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();

    // Resource failures are fatal before anything else starts
    let tls = load_tls(&config).await?;
    let listener = TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server_addr))?;
    let addr = listener.local_addr()?;

    let scheme = if tls.is_some() { "wss" } else { "ws" };
    info!("Server listening on {}", addr);
    info!("WebSocket endpoint: {}://{}/ws", scheme, addr);
    info!(
        visibility_radius = config.relay.visibility_radius,
        broadcast_interval_ms = config.relay.broadcast_interval.as_millis() as u64,
        stale_timeout_ms = config.relay.stale_timeout.as_millis() as u64,
        reaper_interval_ms = config.relay.reaper_interval.as_millis() as u64,
        "Relay configured"
    );

    let relay = state.relay.clone();
    let tasks = RelayTasks::spawn(relay.clone());
    let router = build_router(state);

    let shutdown = async move {
        shutdown_signal().await;
        tasks.stop().await;
        relay.shutdown();
    };

    match tls {
        Some(tls) => serve_tls(listener, tls, router, shutdown).await?,
        None => {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await?
        }
    }

    Ok(())
}

async fn serve_tls<F>(
    listener: TcpListener,
    tls: RustlsConfig,
    router: axum::Router,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = axum_server::Handle::new();
    let watcher = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        watcher.graceful_shutdown(Some(GRACE_PERIOD));
    });

    axum_server::tls_rustls::from_tcp_rustls(listener.into_std()?, tls)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}

/// Which transport the certificate files on disk call for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}

/// TLS needs both halves of the pair; one alone is a misconfiguration
pub fn select_transport(cert: &Path, key: &Path) -> Transport {
    match (cert.is_file(), key.is_file()) {
        (true, true) => Transport::Tls,
        (false, false) => Transport::Plain,
        (cert_present, key_present) => {
            warn!(
                cert = %cert.display(),
                key = %key.display(),
                cert_present,
                key_present,
                "Incomplete TLS key pair, serving without TLS"
            );
            Transport::Plain
        }
    }
}

async fn load_tls(config: &Config) -> anyhow::Result<Option<RustlsConfig>> {
    match select_transport(&config.tls_cert_path, &config.tls_key_path) {
        Transport::Plain => Ok(None),
        Transport::Tls => {
            let tls = RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS pair {} / {}",
                        config.tls_cert_path.display(),
                        config.tls_key_path.display()
                    )
                })?;
            Ok(Some(tls))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("flight-relay-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_pair_means_plain() {
        let dir = scratch_dir("none");
        assert_eq!(
            select_transport(&dir.join("cert.pem"), &dir.join("key.pem")),
            Transport::Plain
        );
    }

    #[test]
    fn half_pair_means_plain() {
        let dir = scratch_dir("half");
        let cert = dir.join("cert.pem");
        fs::write(&cert, "cert").unwrap();
        assert_eq!(select_transport(&cert, &dir.join("key.pem")), Transport::Plain);
    }

    #[test]
    fn full_pair_means_tls() {
        let dir = scratch_dir("full");
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        fs::write(&cert, "cert").unwrap();
        fs::write(&key, "key").unwrap();
        assert_eq!(select_transport(&cert, &key), Transport::Tls);
    }

    #[tokio::test]
    async fn unreadable_pair_fails_fast() {
        let dir = scratch_dir("bogus");
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        fs::write(&cert, "not a certificate").unwrap();
        fs::write(&key, "not a key").unwrap();

        let mut config = Config::from_lookup(|_| None).unwrap();
        config.tls_cert_path = cert;
        config.tls_key_path = key;
        assert!(load_tls(&config).await.is_err());
    }
}
