//! Classification of session-terminating errors.
//!
//! When a top-level connection stops delivering sub-channels, the error it
//! returns is mapped into a [`Termination`]: a closed set of categories with
//! the diagnostic fields each one carries. Classification is total; anything
//! the transport reports that does not fit a known category becomes
//! [`Termination::Unclassified`] with the raw error text.

use std::fmt;

/// QUIC version 1 (RFC 9000).
pub const QUIC_V1: u32 = 0x0000_0001;

/// Which side initiated a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOrigin {
    Local,
    Remote,
}

impl fmt::Display for CloseOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseOrigin::Local => f.write_str("local"),
            CloseOrigin::Remote => f.write_str("remote"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The peer lost its state and answered with a stateless reset.
    StatelessReset,
    /// The handshake did not complete in time.
    HandshakeTimeout,
    /// No traffic for longer than the negotiated idle timeout.
    IdleTimeout,
    /// Closed by the application layer of either side.
    ApplicationClose {
        origin: CloseOrigin,
        code: u64,
        message: String,
    },
    /// Closed because of a transport-level protocol error.
    TransportClose {
        origin: CloseOrigin,
        code: u64,
        message: String,
    },
    /// No common transport version.
    VersionNegotiation { ours: Vec<u32>, theirs: Vec<u32> },
    /// Anything else, with the raw error text.
    Unclassified(String),
}

impl Termination {
    /// Short, stable category name for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Termination::StatelessReset => "stateless-reset",
            Termination::HandshakeTimeout => "handshake-timeout",
            Termination::IdleTimeout => "idle-timeout",
            Termination::ApplicationClose { .. } => "application-close",
            Termination::TransportClose { .. } => "transport-close",
            Termination::VersionNegotiation { .. } => "version-negotiation-failure",
            Termination::Unclassified(_) => "unclassified",
        }
    }

    /// Whether this is an ordinary end of a session rather than a fault.
    ///
    /// Idle timeouts and application closes with code 0 are the normal ways
    /// a client goes away.
    pub fn is_clean(&self) -> bool {
        match self {
            Termination::IdleTimeout => true,
            Termination::ApplicationClose { code, .. } => *code == 0,
            _ => false,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::StatelessReset => f.write_str("stateless reset"),
            Termination::HandshakeTimeout => f.write_str("handshake timed out"),
            Termination::IdleTimeout => f.write_str("idle timeout"),
            Termination::ApplicationClose {
                origin,
                code,
                message,
            } => write!(
                f,
                "application close by {origin} peer (code {code:#x}): {message}"
            ),
            Termination::TransportClose {
                origin,
                code,
                message,
            } => write!(
                f,
                "transport close by {origin} peer (code {code:#x}): {message}"
            ),
            Termination::VersionNegotiation { ours, theirs } => write!(
                f,
                "version negotiation failed (ours: {}, theirs: {})",
                format_versions(ours),
                format_versions(theirs)
            ),
            Termination::Unclassified(text) => write!(f, "unclassified: {text}"),
        }
    }
}

fn format_versions(versions: &[u32]) -> String {
    if versions.is_empty() {
        return "[]".to_string();
    }
    let parts: Vec<String> = versions.iter().map(|v| format!("{v:#010x}")).collect();
    format!("[{}]", parts.join(", "))
}

/// Maps a transport error into a [`Termination`].
///
/// Implementations must be total and side-effect free.
pub trait Classify {
    fn classify(&self) -> Termination;
}

impl Classify for Termination {
    fn classify(&self) -> Termination {
        self.clone()
    }
}
