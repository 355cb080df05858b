//! Transport traits consumed by the bridge.
//!
//! The relay engine needs three capabilities from its collaborators: a
//! multiplexed connection that hands out sub-channels one at a time, duplex
//! streams that split into independently owned read and write halves, and a
//! dialer for the fixed backend.

use crate::error::BridgeResult;
use crate::termination::Classify;
use std::fmt::Display;
use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// A duplex byte stream that can be split into an owned reader and writer.
///
/// Shutting down the writer is the half-close: the peer reads end-of-input
/// while the reader stays usable.
pub trait SplitStream: Send + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    fn into_split(self) -> (Self::Reader, Self::Writer);

    /// Resolves once the peer has received everything written to `writer`
    /// before it was shut down.
    ///
    /// The default resolves at once, for transports whose data outlives
    /// the writer.
    fn delivered(
        _writer: &Self::Writer,
    ) -> impl Future<Output = io::Result<()>> + Send + 'static {
        std::future::ready(Ok(()))
    }
}

impl SplitStream for tokio::net::TcpStream {
    type Reader = tokio::net::tcp::OwnedReadHalf;
    type Writer = tokio::net::tcp::OwnedWriteHalf;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::net::TcpStream::into_split(self)
    }
}

impl SplitStream for tokio::io::DuplexStream {
    type Reader = tokio::io::ReadHalf<tokio::io::DuplexStream>;
    type Writer = tokio::io::WriteHalf<tokio::io::DuplexStream>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        tokio::io::split(self)
    }
}

/// One sub-channel of a multiplexed connection.
pub trait SubChannel: SplitStream + Sized {
    /// Close the sub-channel without relaying anything.
    ///
    /// Finishes our write side and tells the peer to stop sending, using
    /// `code` where the transport supports stop codes.
    fn refuse(self, _code: u32) -> impl Future<Output = ()> + Send {
        async move {
            let (_reader, mut writer) = self.into_split();
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "sub-channel already closed");
            }
        }
    }
}

impl SubChannel for tokio::io::DuplexStream {}

/// A top-level secure multiplexed connection.
pub trait MuxConnection: Send + Sync + 'static {
    type SubChannel: SubChannel;
    type Error: Classify + Display + Send + 'static;

    /// Wait for the peer to open the next sub-channel.
    ///
    /// An error means the connection is gone; no further sub-channels will
    /// be delivered.
    fn accept_sub_channel(
        &self,
    ) -> impl Future<Output = Result<Self::SubChannel, Self::Error>> + Send;

    /// Identifier of the remote endpoint, used in diagnostics.
    fn remote_id(&self) -> String;

    /// Close the whole connection with an application code and reason.
    fn close_with_code(&self, code: u32, reason: &str);
}

/// Opens connections to the fixed backend address.
///
/// Never retries internally; one call is one attempt.
pub trait BackendDialer: Send + Sync + 'static {
    type Stream: SplitStream;

    /// The backend address, for diagnostics.
    fn address(&self) -> &str;

    fn dial(&self) -> impl Future<Output = BridgeResult<Self::Stream>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_duplex_half_close_keeps_reader_open() {
        let (a, b) = tokio::io::duplex(64);
        let (mut a_read, mut a_write) = SplitStream::into_split(a);
        let (mut b_read, mut b_write) = SplitStream::into_split(b);

        a_write.write_all(b"abc").await.unwrap();
        a_write.shutdown().await.unwrap();

        let mut got = Vec::new();
        b_read.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"abc");

        // The other direction still works after the half-close.
        b_write.write_all(b"xyz").await.unwrap();
        let mut buf = [0u8; 3];
        a_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[tokio::test]
    async fn test_default_refuse_signals_eof() {
        let (ours, theirs) = tokio::io::duplex(64);
        ours.refuse(0x10).await;

        let (mut reader, _writer) = SplitStream::into_split(theirs);
        let mut got = Vec::new();
        reader.read_to_end(&mut got).await.unwrap();
        assert!(got.is_empty());
    }
}
