//! Application close codes used on connections and sub-channels.

/// Connection closed because the session ended or the server is stopping.
pub const CLOSE_NORMAL: u32 = 0x0;

/// Sub-channel refused because the backend could not be reached.
pub const STREAM_BACKEND_UNAVAILABLE: u32 = 0x10;

/// Sub-channel refused because the session is at its relay limit.
pub const STREAM_RELAY_LIMIT: u32 = 0x11;
