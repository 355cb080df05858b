//! Backend dialing and the per-sub-channel relay.

pub mod dialer;
pub mod stream;

pub use dialer::TcpDialer;
pub use stream::{serve_sub_channel, DirectionOutcome, RelayContext, RelayReport};

use std::time::Duration;

/// Tuning shared by every relay of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Copy buffer per direction, in bytes.
    pub buffer_size: usize,
    /// How long a closing session waits for its relays before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
