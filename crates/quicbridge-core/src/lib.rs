//! quicbridge-core: shared library for the QUIC-to-TCP bridge.
//!
//! Provides the error type, the transport traits the relay engine is written
//! against, and the classifier for session-terminating errors.

pub mod codes;
pub mod error;
pub mod termination;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{BridgeError, BridgeResult};
pub use termination::{Classify, CloseOrigin, Termination, QUIC_V1};
pub use transport::{BackendDialer, MuxConnection, SplitStream, SubChannel};
