use thiserror::Error;

/// Errors produced while setting up or running the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Wrap a dial failure, keeping the address for diagnostics.
    pub fn dial(addr: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Dial {
            addr: addr.into(),
            source,
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
