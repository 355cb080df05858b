//! TCP backend dialer.

use quicbridge_core::{BackendDialer, BridgeError, BridgeResult};
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Dials the fixed backend over TCP, one attempt per call.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    connect_timeout: Duration,
}

impl TcpDialer {
    /// * `addr` - Backend `host:port`; hostnames are resolved on every dial.
    /// * `connect_timeout` - Upper bound for one connection attempt.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

impl BackendDialer for TcpDialer {
    type Stream = TcpStream;

    fn address(&self) -> &str {
        &self.addr
    }

    async fn dial(&self) -> BridgeResult<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                BridgeError::dial(
                    &self.addr,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", self.connect_timeout),
                    ),
                )
            })?
            .map_err(|e| BridgeError::dial(&self.addr, e))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %self.addr, error = %e, "could not set TCP_NODELAY");
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let dialer = TcpDialer::new(&addr, Duration::from_secs(2));
        assert_eq!(dialer.address(), addr);

        let (dialed, accepted) = tokio::join!(dialer.dial(), listener.accept());
        let dialed = dialed.unwrap();
        let (_peer, peer_addr) = accepted.unwrap();
        assert_eq!(dialed.local_addr().unwrap(), peer_addr);
    }

    #[tokio::test]
    async fn test_dial_refused_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dialer = TcpDialer::new(&addr, Duration::from_secs(5));
        let started = std::time::Instant::now();
        let err = dialer.dial().await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            BridgeError::Dial { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("unexpected error: {other}"),
        }
    }
}
