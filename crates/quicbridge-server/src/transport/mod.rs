//! Transport listeners.

pub mod quic;

pub use quic::QuicSettings;
