//! Core server: QUIC listeners, session dispatch, orderly shutdown.

use crate::admission::Admission;
use crate::config::ServerConfig;
use crate::observe::{BridgeEvent, RelayObserver};
use crate::relay::{RelaySettings, TcpDialer};
use crate::session::{Session, SessionManager};
use crate::transport::quic::{self, classify_handshake_error, QuicConnection};
use quicbridge_core::codes::CLOSE_NORMAL;
use quicbridge_core::BridgeResult;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Extra time sessions get on top of their relay grace period during
/// shutdown, to close their connections.
const SESSION_CLOSE_MARGIN: Duration = Duration::from_secs(1);

/// The bridge server, configured but not yet bound.
pub struct BridgeServer {
    config: ServerConfig,
    observer: Arc<dyn RelayObserver>,
}

impl BridgeServer {
    pub fn new(config: ServerConfig, observer: Arc<dyn RelayObserver>) -> Self {
        Self { config, observer }
    }

    /// Bind one QUIC endpoint per configured listen address.
    pub fn bind(self, tls: Arc<rustls::ServerConfig>) -> BridgeResult<BoundServer> {
        let quic_config = quic::build_server_config(tls, &self.config.quic)?;
        let endpoints = self
            .config
            .listen
            .iter()
            .map(|addr| quic::bind(*addr, quic_config.clone()))
            .collect::<BridgeResult<Vec<_>>>()?;

        Ok(BoundServer {
            endpoints,
            dialer: Arc::new(TcpDialer::new(
                self.config.backend_addr.clone(),
                self.config.connect_timeout,
            )),
            admission: Arc::new(Admission::new(self.config.admission)),
            observer: self.observer,
            relay: self.config.relay,
            shutdown_tx: broadcast::channel(1).0,
        })
    }
}

/// A server with bound endpoints, ready to accept connections.
pub struct BoundServer {
    endpoints: Vec<quinn::Endpoint>,
    dialer: Arc<TcpDialer>,
    admission: Arc<Admission>,
    observer: Arc<dyn RelayObserver>,
    relay: RelaySettings,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl BoundServer {
    /// Addresses the endpoints actually bound (resolves port 0).
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.endpoints
            .iter()
            .filter_map(|ep| ep.local_addr().ok())
            .collect()
    }

    /// Accept connections until `shutdown` resolves or every listener
    /// stops, then shut down in order: stop accepting, tell sessions to
    /// stop, let relays drain, close connections, wait for the endpoints to
    /// go idle.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> BridgeResult<()> {
        let (incoming_tx, mut incoming_rx) = mpsc::channel::<quinn::Incoming>(64);
        let mut listeners = JoinSet::new();
        for endpoint in &self.endpoints {
            listeners.spawn(quic::accept_incoming(endpoint.clone(), incoming_tx.clone()));
        }
        drop(incoming_tx);

        info!(
            listen = ?self.local_addrs(),
            backend = %self.dialer_address(),
            "quicbridge ready"
        );

        let mut sessions: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "session task panicked");
                        }
                    }
                }
                incoming = incoming_rx.recv() => match incoming {
                    Some(incoming) => self.dispatch(incoming, &mut sessions),
                    None => {
                        info!("all listeners closed, shutting down");
                        break;
                    }
                },
            }
        }

        // Stop accepting. New connection attempts are refused from here on.
        for endpoint in &self.endpoints {
            endpoint.set_server_config(None);
        }
        listeners.abort_all();
        drop(incoming_rx);

        info!(sessions = sessions.len(), "broadcasting shutdown to sessions");
        let _ = self.shutdown_tx.send(());

        let deadline = self.relay.shutdown_grace + SESSION_CLOSE_MARGIN;
        let drained = tokio::time::timeout(deadline, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = sessions.len(), "sessions did not finish in time, aborting");
            sessions.shutdown().await;
        }

        for endpoint in &self.endpoints {
            endpoint.close(quinn::VarInt::from_u32(CLOSE_NORMAL), b"server shutting down");
        }
        for endpoint in &self.endpoints {
            endpoint.wait_idle().await;
        }
        info!("quicbridge stopped");
        Ok(())
    }

    fn dialer_address(&self) -> &str {
        use quicbridge_core::BackendDialer;
        self.dialer.address()
    }

    /// Admit or refuse one connection attempt. Admitted attempts finish
    /// their handshake and run their session on a task of their own, so a
    /// slow client never holds up the listener.
    fn dispatch(&self, incoming: quinn::Incoming, sessions: &mut JoinSet<()>) {
        let remote = incoming.remote_address().to_string();

        let guard = match self.admission.try_admit_session() {
            Ok(guard) => guard,
            Err(reason) => {
                debug!(active = self.admission.active_sessions(), "server full");
                self.observer
                    .record(BridgeEvent::SessionRejected { remote, reason });
                incoming.refuse();
                return;
            }
        };

        // Subscribe before spawning so a shutdown sent meanwhile is not missed.
        let shutdown = self.shutdown_tx.subscribe();
        let admission = self.admission.clone();
        let dialer = self.dialer.clone();
        let observer = self.observer.clone();
        let relay = self.relay;

        sessions.spawn(async move {
            let _guard = guard;
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(e) => {
                    observer.record(BridgeEvent::HandshakeFailed {
                        remote,
                        termination: classify_handshake_error(&e),
                    });
                    return;
                }
            };
            debug!(remote = %remote, "handshake complete");

            let session = Session::new(QuicConnection::new(connection), admission.relay_counter());
            SessionManager::new(session, dialer, observer, relay)
                .run(shutdown)
                .await;
        });
    }
}
