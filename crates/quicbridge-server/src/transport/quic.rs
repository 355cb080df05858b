//! QUIC transport using quinn.
//!
//! Builds the endpoint, feeds incoming connection attempts to the
//! dispatcher, and adapts quinn connections and bidirectional streams to the
//! bridge's transport traits. Also maps `quinn::ConnectionError` onto the
//! fixed termination categories.

use quicbridge_core::{
    BridgeError, BridgeResult, Classify, CloseOrigin, MuxConnection, SplitStream, SubChannel,
    Termination, QUIC_V1,
};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Transport parameters applied to every accepted connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuicSettings {
    /// Close connections silent for this long. `None` disables the timeout.
    pub idle_timeout: Option<Duration>,
    /// Send keep-alive packets at this interval.
    pub keep_alive: Option<Duration>,
}

/// Combine the TLS configuration and transport settings into a quinn
/// server configuration.
pub fn build_server_config(
    tls: Arc<rustls::ServerConfig>,
    settings: &QuicSettings,
) -> BridgeResult<quinn::ServerConfig> {
    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .map_err(|e| BridgeError::Transport(format!("QUIC crypto config failed: {e}")))?;

    let mut transport = quinn::TransportConfig::default();
    let idle = settings
        .idle_timeout
        .map(quinn::IdleTimeout::try_from)
        .transpose()
        .map_err(|e| BridgeError::Config(format!("idle timeout out of range: {e}")))?;
    transport.max_idle_timeout(idle);
    transport.keep_alive_interval(settings.keep_alive);

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    server_config.transport_config(Arc::new(transport));
    Ok(server_config)
}

/// Bind a QUIC endpoint on `addr`.
pub fn bind(addr: SocketAddr, config: quinn::ServerConfig) -> BridgeResult<quinn::Endpoint> {
    let endpoint = quinn::Endpoint::server(config, addr)
        .map_err(|e| BridgeError::Transport(format!("QUIC bind {addr} failed: {e}")))?;
    let local = endpoint.local_addr().unwrap_or(addr);
    info!(addr = %local, "QUIC listener started");
    Ok(endpoint)
}

/// Forward incoming connection attempts from `endpoint` to `tx` until the
/// endpoint is closed or the receiver goes away.
///
/// Does no handshake work itself, so a slow handshake never holds up the
/// next attempt.
pub async fn accept_incoming(endpoint: quinn::Endpoint, tx: mpsc::Sender<quinn::Incoming>) {
    while let Some(incoming) = endpoint.accept().await {
        debug!(remote = %incoming.remote_address(), "incoming QUIC connection");
        if tx.send(incoming).await.is_err() {
            debug!("dispatcher gone, stopping listener");
            return;
        }
    }
    info!("QUIC endpoint closed, stopping listener");
}

/// An established QUIC connection.
pub struct QuicConnection {
    inner: quinn::Connection,
}

impl QuicConnection {
    pub fn new(inner: quinn::Connection) -> Self {
        Self { inner }
    }
}

impl MuxConnection for QuicConnection {
    type SubChannel = QuicSubChannel;
    type Error = ConnectionEnded;

    async fn accept_sub_channel(&self) -> Result<QuicSubChannel, ConnectionEnded> {
        let (send, recv) = self.inner.accept_bi().await.map_err(ConnectionEnded)?;
        Ok(QuicSubChannel { send, recv })
    }

    fn remote_id(&self) -> String {
        self.inner.remote_address().to_string()
    }

    fn close_with_code(&self, code: u32, reason: &str) {
        self.inner.close(quinn::VarInt::from_u32(code), reason.as_bytes());
    }
}

/// A bidirectional QUIC stream.
pub struct QuicSubChannel {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
}

impl SplitStream for QuicSubChannel {
    type Reader = quinn::RecvStream;
    type Writer = quinn::SendStream;

    fn into_split(self) -> (quinn::RecvStream, quinn::SendStream) {
        (self.recv, self.send)
    }

    /// Closing the connection discards stream data the peer has not yet
    /// acknowledged, so a finished stream is only delivered once it has.
    fn delivered(
        writer: &quinn::SendStream,
    ) -> impl Future<Output = io::Result<()>> + Send + 'static {
        let stopped = writer.stopped();
        async move {
            match stopped.await {
                Ok(None) => Ok(()),
                Ok(Some(code)) => Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("peer stopped the stream with code {code}"),
                )),
                Err(e) => Err(io::Error::from(e)),
            }
        }
    }
}

impl SubChannel for QuicSubChannel {
    /// Ask the peer to stop sending, with `code`, and finish our side.
    async fn refuse(mut self, code: u32) {
        let code = quinn::VarInt::from_u32(code);
        if let Err(e) = self.recv.stop(code) {
            debug!(error = %e, "stream already stopped");
        }
        if let Err(e) = self.send.finish() {
            debug!(error = %e, "stream already finished");
        }
    }
}

/// The error that ended a QUIC connection.
#[derive(Debug, Clone)]
pub struct ConnectionEnded(pub quinn::ConnectionError);

impl fmt::Display for ConnectionEnded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Classify for ConnectionEnded {
    fn classify(&self) -> Termination {
        classify_connection_error(&self.0)
    }
}

/// Classify the error that ended an established connection.
pub fn classify_connection_error(err: &quinn::ConnectionError) -> Termination {
    use quinn::ConnectionError as E;
    match err {
        E::Reset => Termination::StatelessReset,
        E::TimedOut => Termination::IdleTimeout,
        E::ApplicationClosed(close) => Termination::ApplicationClose {
            origin: CloseOrigin::Remote,
            code: close.error_code.into_inner(),
            message: String::from_utf8_lossy(&close.reason).into_owned(),
        },
        E::LocallyClosed => Termination::ApplicationClose {
            origin: CloseOrigin::Local,
            code: 0,
            message: String::new(),
        },
        E::ConnectionClosed(close) => Termination::TransportClose {
            origin: CloseOrigin::Remote,
            code: u64::from(close.error_code),
            message: String::from_utf8_lossy(&close.reason).into_owned(),
        },
        E::TransportError(e) => Termination::TransportClose {
            origin: CloseOrigin::Local,
            code: u64::from(e.code),
            message: e.reason.clone(),
        },
        // quinn does not surface the peer's supported versions.
        E::VersionMismatch => Termination::VersionNegotiation {
            ours: vec![QUIC_V1],
            theirs: Vec::new(),
        },
        #[allow(unreachable_patterns)]
        other => Termination::Unclassified(other.to_string()),
    }
}

/// Classify the error that ended a handshake. A timeout here means the
/// handshake never completed, not that an established connection idled.
pub fn classify_handshake_error(err: &quinn::ConnectionError) -> Termination {
    match err {
        quinn::ConnectionError::TimedOut => Termination::HandshakeTimeout,
        other => classify_connection_error(other),
    }
}
