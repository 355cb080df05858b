//! Session management: one manager per accepted connection.

pub mod manager;

pub use manager::{Session, SessionManager};
