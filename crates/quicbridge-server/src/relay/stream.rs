//! Bidirectional stream relay.
//!
//! A relay pairs one sub-channel with one freshly dialed backend connection
//! and runs two copy directions concurrently:
//!
//! - **client→backend**: reads the sub-channel, writes the backend.
//! - **backend→client**: reads the backend, writes the sub-channel.
//!
//! Each direction copies through a bounded buffer until its source reaches
//! end-of-input or fails, or its destination fails. It then shuts down its
//! destination's write side so the peer on that side sees end-of-input
//! instead of waiting forever. The relay finishes once both directions have
//! finished and the client has received the reply stream, and closes both
//! endpoints on the way out.

use super::RelaySettings;
use crate::observe::{BridgeEvent, RelayObserver};
use quicbridge_core::codes::STREAM_BACKEND_UNAVAILABLE;
use quicbridge_core::{BackendDialer, SplitStream, SubChannel};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// How one copy direction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionOutcome {
    /// The source reached end-of-input.
    Eof,
    ReadError(String),
    WriteError(String),
}

/// Bytes moved by one direction and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionReport {
    pub bytes: u64,
    pub outcome: DirectionOutcome,
}

/// Summary of a finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub client_to_backend: DirectionReport,
    pub backend_to_client: DirectionReport,
    pub elapsed: Duration,
}

impl RelayReport {
    /// Both directions ended at end-of-input.
    pub fn is_clean(&self) -> bool {
        self.client_to_backend.outcome == DirectionOutcome::Eof
            && self.backend_to_client.outcome == DirectionOutcome::Eof
    }
}

/// Identity of a relay within its session, for diagnostics.
#[derive(Clone)]
pub struct RelayContext {
    pub session_id: String,
    pub channel_id: u64,
    pub settings: RelaySettings,
    pub observer: Arc<dyn RelayObserver>,
}

/// Serve one sub-channel: dial the backend, relay until both directions end.
///
/// Never returns an error. A dial failure closes the sub-channel so the
/// client can retry on a new one; copy errors are reported through the
/// observer. Returns the report when a relay actually ran.
pub async fn serve_sub_channel<S, D>(sub: S, dialer: &D, ctx: RelayContext) -> Option<RelayReport>
where
    S: SubChannel,
    D: BackendDialer,
{
    let backend = match dialer.dial().await {
        Ok(backend) => backend,
        Err(e) => {
            ctx.observer.record(BridgeEvent::DialFailed {
                session_id: ctx.session_id.clone(),
                channel_id: ctx.channel_id,
                backend: dialer.address().to_string(),
                error: e.to_string(),
            });
            sub.refuse(STREAM_BACKEND_UNAVAILABLE).await;
            return None;
        }
    };

    ctx.observer.record(BridgeEvent::RelayStarted {
        session_id: ctx.session_id.clone(),
        channel_id: ctx.channel_id,
        backend: dialer.address().to_string(),
    });

    let report = relay(sub, backend, ctx.settings).await;

    ctx.observer.record(BridgeEvent::RelayFinished {
        session_id: ctx.session_id,
        channel_id: ctx.channel_id,
        report: report.clone(),
    });
    Some(report)
}

/// Copy between `client` and `backend` until both directions have ended,
/// then close both.
///
/// A reply that ended cleanly only counts as delivered once the client
/// transport confirms receipt, waiting at most `settings.shutdown_grace`.
pub async fn relay<A, B>(client: A, backend: B, settings: RelaySettings) -> RelayReport
where
    A: SplitStream,
    B: SplitStream,
{
    let started = Instant::now();
    let (mut client_reader, client_writer) = client.into_split();
    let (mut backend_reader, backend_writer) = backend.into_split();
    let mut client_writer = CloseOnce::new(client_writer);
    let mut backend_writer = CloseOnce::new(backend_writer);

    let (client_to_backend, mut backend_to_client) = tokio::join!(
        pump(&mut client_reader, &mut backend_writer, settings.buffer_size),
        pump(&mut backend_reader, &mut client_writer, settings.buffer_size),
    );

    // Both directions already shut their destinations down; these are no-ops
    // unless a direction bailed out before reaching its close.
    let _ = client_writer.close().await;
    let _ = backend_writer.close().await;

    if backend_to_client.outcome == DirectionOutcome::Eof {
        let delivered = A::delivered(client_writer.get_ref());
        match tokio::time::timeout(settings.shutdown_grace, delivered).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                backend_to_client.outcome = DirectionOutcome::WriteError(e.to_string());
            }
            Err(_) => {
                backend_to_client.outcome =
                    DirectionOutcome::WriteError("client did not acknowledge the reply".into());
            }
        }
    }
    drop((client_reader, client_writer, backend_reader, backend_writer));

    RelayReport {
        client_to_backend,
        backend_to_client,
        elapsed: started.elapsed(),
    }
}

/// One copy direction: `reader` into `writer` through a buffer of
/// `buffer_size` bytes, then half-close `writer`.
async fn pump<R, W>(reader: &mut R, writer: &mut CloseOnce<W>, buffer_size: usize) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut bytes = 0u64;

    let outcome = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break DirectionOutcome::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break DirectionOutcome::ReadError(e.to_string()),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break DirectionOutcome::WriteError(e.to_string());
        }
        bytes += n as u64;
    };

    if let Err(e) = writer.close().await {
        debug!(error = %e, "half-close of relay destination failed");
    }

    DirectionReport { bytes, outcome }
}

/// Write half that shuts down at most once.
///
/// Closing an already-closed writer is a successful no-op, so every exit
/// path can close unconditionally.
pub struct CloseOnce<W> {
    inner: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> CloseOnce<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after close",
            ));
        }
        self.inner.write_all(data).await
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Shut down the write side (half-close). Idempotent.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await
    }
}
