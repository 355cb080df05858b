//! quicbridge-server: QUIC to TCP bridge.
//!
//! Terminates QUIC connections and relays every bidirectional stream opened
//! on them to a fresh TCP connection to a fixed backend.

mod admission;
mod config;
mod observe;
mod relay;
mod server;
mod session;
mod tls;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use observe::TracingObserver;
use server::BridgeServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// quicbridge-server: relay QUIC streams to a TCP backend
#[derive(Parser, Debug)]
#[command(name = "quicbridge-server", version, about = "Relay QUIC streams to a TCP backend")]
struct Cli {
    /// Listen addresses, comma separated (":4242" binds all interfaces)
    #[arg(short, long, env = "LISTEN_ADDRESSES", value_delimiter = ',')]
    listen: Option<Vec<String>>,

    /// TLS certificate (PEM)
    #[arg(long, env = "QUIC_CERT_FILE")]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long, env = "QUIC_KEY_FILE")]
    key: Option<String>,

    /// Backend address (host:port)
    #[arg(short, long, env = "TARGET_ADDRESS")]
    backend: Option<String>,

    /// ALPN protocol identifiers, comma separated
    #[arg(long, value_delimiter = ',')]
    alpn: Option<Vec<String>>,

    /// Connection idle timeout in seconds (0 disables)
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Keep-alive interval in seconds (0 disables)
    #[arg(long)]
    keep_alive: Option<u64>,

    /// Backend connect timeout in milliseconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Maximum concurrent relays per session
    #[arg(long)]
    max_relays: Option<usize>,

    /// Config file path
    #[arg(long, default_value = "~/.quicbridge/config.toml")]
    config: String,

    /// Generate self-signed certificate for development
    #[arg(long)]
    generate_cert: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting quicbridge-server");

    let (cert, key) = if cli.generate_cert {
        let dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".quicbridge");
        match tls::generate_self_signed_cert(&dir) {
            Ok((c, k)) => {
                info!(cert = %c.display(), key = %k.display(), "generated self-signed certificate");
                (
                    Some(c.to_string_lossy().into_owned()),
                    Some(k.to_string_lossy().into_owned()),
                )
            }
            Err(e) => {
                error!(error = %e, "failed to generate self-signed certificate");
                std::process::exit(1);
            }
        }
    } else {
        (cli.cert.clone(), cli.key.clone())
    };

    let overrides = CliOverrides {
        listen: cli.listen.clone(),
        cert,
        key,
        alpn: cli.alpn.clone(),
        idle_timeout: cli.idle_timeout,
        keep_alive: cli.keep_alive,
        backend: cli.backend.clone(),
        connect_timeout_ms: cli.connect_timeout,
        max_sessions: cli.max_sessions,
        max_relays: cli.max_relays,
    };

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let material = match tls::load_tls_config(
        &server_config.cert_path,
        &server_config.key_path,
        &server_config.alpn,
    ) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to load TLS config");
            std::process::exit(1);
        }
    };
    info!(
        fingerprint = %tls::cert_fingerprint(&material.leaf),
        "loaded certificate"
    );

    let bound = match BridgeServer::new(server_config, Arc::new(TracingObserver)).bind(material.config)
    {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to bind listeners");
            std::process::exit(1);
        }
    };

    if let Err(e) = bound.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
