//! Session and relay lifecycle events.
//!
//! Components never log lifecycle outcomes directly; they hand a
//! [`BridgeEvent`] to the [`RelayObserver`] they were constructed with. The
//! production observer renders events as `tracing` records. Tests swap in an
//! observer that records events for assertions.

use crate::relay::{DirectionOutcome, RelayReport};
use quicbridge_core::Termination;
use tracing::{debug, error, info, warn};

/// Something that happened to a session or one of its relays.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Refused at the door by the admission policy.
    SessionRejected { remote: String, reason: String },
    /// The secure handshake of an incoming connection failed.
    HandshakeFailed {
        remote: String,
        termination: Termination,
    },
    SessionOpened { session_id: String, remote: String },
    /// The accept loop ended and the session's resources were released.
    SessionClosed {
        session_id: String,
        remote: String,
        termination: Termination,
        relays_served: u64,
    },
    /// A sub-channel was closed without dialing the backend.
    SubChannelRejected {
        session_id: String,
        channel_id: u64,
        reason: String,
    },
    DialFailed {
        session_id: String,
        channel_id: u64,
        backend: String,
        error: String,
    },
    RelayStarted {
        session_id: String,
        channel_id: u64,
        backend: String,
    },
    RelayFinished {
        session_id: String,
        channel_id: u64,
        report: RelayReport,
    },
}

/// Sink for [`BridgeEvent`]s.
pub trait RelayObserver: Send + Sync {
    fn record(&self, event: BridgeEvent);
}

/// Observer that logs events through `tracing`.
pub struct TracingObserver;

impl RelayObserver for TracingObserver {
    fn record(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::SessionRejected { remote, reason } => {
                warn!(remote = %remote, reason = %reason, "session refused");
            }
            BridgeEvent::HandshakeFailed {
                remote,
                termination,
            } => {
                warn!(
                    remote = %remote,
                    category = termination.category(),
                    cause = %termination,
                    "handshake failed"
                );
            }
            BridgeEvent::SessionOpened { session_id, remote } => {
                info!(session_id = %session_id, remote = %remote, "new session");
            }
            BridgeEvent::SessionClosed {
                session_id,
                remote,
                termination,
                relays_served,
            } => {
                if termination.is_clean() {
                    info!(
                        session_id = %session_id,
                        remote = %remote,
                        category = termination.category(),
                        cause = %termination,
                        relays_served,
                        "session closed"
                    );
                } else {
                    warn!(
                        session_id = %session_id,
                        remote = %remote,
                        category = termination.category(),
                        cause = %termination,
                        relays_served,
                        "session closed"
                    );
                }
            }
            BridgeEvent::SubChannelRejected {
                session_id,
                channel_id,
                reason,
            } => {
                warn!(session_id = %session_id, channel_id, reason = %reason, "sub-channel refused");
            }
            BridgeEvent::DialFailed {
                session_id,
                channel_id,
                backend,
                error,
            } => {
                error!(
                    session_id = %session_id,
                    channel_id,
                    backend = %backend,
                    error = %error,
                    "backend dial failed, closing sub-channel"
                );
            }
            BridgeEvent::RelayStarted {
                session_id,
                channel_id,
                backend,
            } => {
                debug!(session_id = %session_id, channel_id, backend = %backend, "relay started");
            }
            BridgeEvent::RelayFinished {
                session_id,
                channel_id,
                report,
            } => log_relay_report(&session_id, channel_id, &report),
        }
    }
}

fn log_relay_report(session_id: &str, channel_id: u64, report: &RelayReport) {
    let directions = [
        ("client->backend", &report.client_to_backend),
        ("backend->client", &report.backend_to_client),
    ];
    for (direction, side) in directions {
        match &side.outcome {
            DirectionOutcome::Eof => {}
            DirectionOutcome::ReadError(e) => {
                error!(session_id, channel_id, direction, error = %e, "relay read error");
            }
            DirectionOutcome::WriteError(e) => {
                error!(session_id, channel_id, direction, error = %e, "relay write error");
            }
        }
    }
    info!(
        session_id,
        channel_id,
        client_to_backend = report.client_to_backend.bytes,
        backend_to_client = report.backend_to_client.bytes,
        elapsed_ms = report.elapsed.as_millis() as u64,
        clean = report.is_clean(),
        "relay finished"
    );
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingObserver;
    use super::*;
    use crate::relay::stream::DirectionReport;
    use std::time::Duration;

    fn sample_report(outcome: DirectionOutcome) -> RelayReport {
        RelayReport {
            client_to_backend: DirectionReport {
                bytes: 4,
                outcome: DirectionOutcome::Eof,
            },
            backend_to_client: DirectionReport { bytes: 4, outcome },
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_tracing_observer_handles_every_event() {
        let obs = TracingObserver;
        obs.record(BridgeEvent::SessionOpened {
            session_id: "s".into(),
            remote: "127.0.0.1:1".into(),
        });
        obs.record(BridgeEvent::SessionClosed {
            session_id: "s".into(),
            remote: "127.0.0.1:1".into(),
            termination: Termination::IdleTimeout,
            relays_served: 2,
        });
        obs.record(BridgeEvent::SessionClosed {
            session_id: "s".into(),
            remote: "127.0.0.1:1".into(),
            termination: Termination::StatelessReset,
            relays_served: 0,
        });
        obs.record(BridgeEvent::RelayFinished {
            session_id: "s".into(),
            channel_id: 0,
            report: sample_report(DirectionOutcome::WriteError("broken pipe".into())),
        });
        obs.record(BridgeEvent::DialFailed {
            session_id: "s".into(),
            channel_id: 1,
            backend: "127.0.0.1:9".into(),
            error: "refused".into(),
        });
    }

    #[test]
    fn test_recording_observer_keeps_order() {
        let obs = RecordingObserver::default();
        obs.record(BridgeEvent::SessionOpened {
            session_id: "a".into(),
            remote: "r".into(),
        });
        obs.record(BridgeEvent::RelayFinished {
            session_id: "a".into(),
            channel_id: 7,
            report: sample_report(DirectionOutcome::Eof),
        });
        let events = obs.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], BridgeEvent::SessionOpened { .. }));
        assert_eq!(
            obs.count(|e| matches!(e, BridgeEvent::RelayFinished { channel_id: 7, .. })),
            1
        );
    }
}
