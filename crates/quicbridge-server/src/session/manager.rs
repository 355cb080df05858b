//! Per-connection session lifecycle.
//!
//! A [`SessionManager`] owns one accepted connection. It pulls sub-channels
//! off the connection one at a time, in transport order, and hands each to
//! its own relay task. Relay tasks live in a per-session `JoinSet`, so the
//! session can drain them on the way out and abort whatever is left after
//! the grace period.

use crate::admission::RelayCounter;
use crate::observe::{BridgeEvent, RelayObserver};
use crate::relay::{serve_sub_channel, RelayContext, RelaySettings};
use quicbridge_core::codes::{CLOSE_NORMAL, STREAM_RELAY_LIMIT};
use quicbridge_core::{BackendDialer, Classify, CloseOrigin, MuxConnection, SubChannel, Termination};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

const SHUTDOWN_REASON: &str = "server shutting down";
const SESSION_ENDED_REASON: &str = "session ended";

/// One accepted top-level connection.
pub struct Session<C> {
    /// Unique session identifier.
    pub id: String,
    /// Remote endpoint, for diagnostics.
    pub remote: String,
    connection: Arc<C>,
    relays: RelayCounter,
}

impl<C: MuxConnection> Session<C> {
    pub fn new(connection: C, relays: RelayCounter) -> Self {
        let remote = connection.remote_id();
        Self {
            id: generate_session_id(),
            remote,
            connection: Arc::new(connection),
            relays,
        }
    }

    /// Relays currently running on this session.
    pub fn active_relays(&self) -> usize {
        self.relays.active()
    }
}

/// Drives one [`Session`] from its first sub-channel to teardown.
pub struct SessionManager<C, D> {
    session: Session<C>,
    dialer: Arc<D>,
    observer: Arc<dyn RelayObserver>,
    settings: RelaySettings,
}

impl<C, D> SessionManager<C, D>
where
    C: MuxConnection,
    D: BackendDialer,
{
    pub fn new(
        session: Session<C>,
        dialer: Arc<D>,
        observer: Arc<dyn RelayObserver>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            session,
            dialer,
            observer,
            settings,
        }
    }

    /// Accept and relay sub-channels until the connection ends or `shutdown`
    /// fires, then release everything the session owns.
    ///
    /// Returns the classified reason the session ended.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Termination {
        let Self {
            session,
            dialer,
            observer,
            settings,
        } = self;
        let connection = session.connection.clone();

        observer.record(BridgeEvent::SessionOpened {
            session_id: session.id.clone(),
            remote: session.remote.clone(),
        });

        let mut relays: JoinSet<()> = JoinSet::new();
        let mut next_channel_id = 0u64;
        let mut relays_served = 0u64;

        let (termination, shutting_down) = loop {
            tokio::select! {
                biased;

                // Lagged or Closed count as a shutdown request too.
                _ = shutdown.recv() => {
                    break (
                        Termination::ApplicationClose {
                            origin: CloseOrigin::Local,
                            code: u64::from(CLOSE_NORMAL),
                            message: SHUTDOWN_REASON.to_string(),
                        },
                        true,
                    );
                }

                Some(joined) = relays.join_next(), if !relays.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(session_id = %session.id, error = %e, "relay task panicked");
                        }
                    }
                }

                accepted = connection.accept_sub_channel() => match accepted {
                    Ok(sub) => {
                        let channel_id = next_channel_id;
                        next_channel_id += 1;

                        let guard = match session.relays.try_acquire() {
                            Ok(guard) => guard,
                            Err(reason) => {
                                observer.record(BridgeEvent::SubChannelRejected {
                                    session_id: session.id.clone(),
                                    channel_id,
                                    reason,
                                });
                                sub.refuse(STREAM_RELAY_LIMIT).await;
                                continue;
                            }
                        };
                        relays_served += 1;

                        let dialer = dialer.clone();
                        let ctx = RelayContext {
                            session_id: session.id.clone(),
                            channel_id,
                            settings,
                            observer: observer.clone(),
                        };
                        relays.spawn(async move {
                            let _guard = guard;
                            serve_sub_channel(sub, dialer.as_ref(), ctx).await;
                        });
                    }
                    Err(e) => break (e.classify(), false),
                },
            }
        };

        debug!(
            session_id = %session.id,
            in_flight = session.active_relays(),
            "session stopped accepting, draining relays"
        );
        drain(&session.id, &mut relays, &settings).await;

        let reason = if shutting_down {
            SHUTDOWN_REASON
        } else {
            SESSION_ENDED_REASON
        };
        connection.close_with_code(CLOSE_NORMAL, reason);

        observer.record(BridgeEvent::SessionClosed {
            session_id: session.id.clone(),
            remote: session.remote.clone(),
            termination: termination.clone(),
            relays_served,
        });
        termination
    }
}

/// Wait up to the grace period for in-flight relays, then abort the rest.
/// Aborted relays drop their endpoints, which closes them.
async fn drain(session_id: &str, relays: &mut JoinSet<()>, settings: &RelaySettings) {
    if relays.is_empty() {
        return;
    }
    let finished = tokio::time::timeout(settings.shutdown_grace, async {
        while relays.join_next().await.is_some() {}
    })
    .await;
    if finished.is_err() {
        warn!(
            session_id,
            remaining = relays.len(),
            grace = ?settings.shutdown_grace,
            "relays still running after grace period, aborting"
        );
        relays.shutdown().await;
    }
}

fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    hex::encode(bytes)
}
