// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection handshake and streaming.
//!
//! Each accepted socket is driven by one [`ConnectionHandler`] through three
//! states:
//!
//! ```text
//!   AwaitingVersion ──(valid handshake)──> Streaming ──(EOF / error / cancel)──> Closed
//!          │                                                                       ^
//!          └──────────────(bad handshake / EOF / error / cancel)───────────────────┘
//! ```
//!
//! Nothing is ever written back to the peer. A rejected handshake simply drops
//! the socket, and no entry is produced for that connection.

use std::net::SocketAddr;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::codec::LineCodec;
use crate::errors::{HandshakeError, LineCodecError};
use crate::protocol::{parse_entry, validate_version, VersionSpecifier};
use crate::queue::EntrySender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingVersion,
    Streaming,
    Closed,
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// The handshake failed; no entry was produced.
    Rejected(HandshakeError),
    /// The peer closed the stream.
    Finished { entries: u64 },
    /// The server is shutting down and closed the connection.
    Cancelled { entries: u64 },
    /// Reading from the peer failed.
    Failed { entries: u64, error: LineCodecError },
    /// The sink writer is gone and can no longer accept entries.
    SinkGone { entries: u64 },
}

impl ConnectionOutcome {
    /// Number of entries this connection pushed into the queue.
    #[must_use]
    pub fn entries(&self) -> u64 {
        match self {
            Self::Rejected(_) => 0,
            Self::Finished { entries }
            | Self::Cancelled { entries }
            | Self::Failed { entries, .. }
            | Self::SinkGone { entries } => *entries,
        }
    }
}

/// Drives one client connection from handshake to close.
///
/// The handler owns the stream; it is dropped, and therefore closed, exactly
/// once when [`ConnectionHandler::run`] returns.
pub struct ConnectionHandler<S> {
    lines: FramedRead<S, LineCodec>,
    peer: SocketAddr,
    queue: EntrySender,
    cancel_token: CancellationToken,
    state: ConnectionState,
    entries: u64,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        queue: EntrySender,
        cancel_token: CancellationToken,
        max_line_length: usize,
    ) -> Self {
        Self {
            lines: FramedRead::new(stream, LineCodec::new(max_line_length)),
            peer,
            queue,
            cancel_token,
            state: ConnectionState::AwaitingVersion,
            entries: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> ConnectionOutcome {
        let outcome = match self.handshake().await {
            Ok(version) => {
                debug!(peer = %self.peer, %version, "Received valid version value from client");
                self.transition(ConnectionState::Streaming);
                self.stream().await
            }
            Err(e) => ConnectionOutcome::Rejected(e),
        };
        self.transition(ConnectionState::Closed);
        self.log_outcome(&outcome);
        outcome
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!(peer = %self.peer, from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
    }

    /// Reads and validates the version line. Unlike log lines, a malformed
    /// handshake is rejected.
    async fn handshake(&mut self) -> Result<VersionSpecifier, HandshakeError> {
        let line = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => return Err(HandshakeError::Cancelled),
            line = self.lines.next() => line,
        };
        let line = match line {
            Some(line) => line?,
            None => return Err(HandshakeError::Eof),
        };

        let version = VersionSpecifier::from_line(&line)?;
        validate_version(version)?;
        Ok(version)
    }

    /// Forwards every line to the queue until the stream ends or the server
    /// shuts down.
    ///
    /// Only the read races cancellation. A line that has been read is always
    /// enqueued, even if that means waiting on a full queue during shutdown.
    async fn stream(&mut self) -> ConnectionOutcome {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => return self.drain_buffered().await,
                next = self.lines.next() => next,
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(error)) => {
                    return ConnectionOutcome::Failed {
                        entries: self.entries,
                        error,
                    };
                }
                None => return ConnectionOutcome::Finished { entries: self.entries },
            };

            let entry = parse_entry(&line);
            trace!(peer = %self.peer, "Received entry: {}", entry);
            if self.queue.send(entry).await.is_err() {
                return ConnectionOutcome::SinkGone { entries: self.entries };
            }
            self.entries += 1;
        }
    }

    /// Enqueues the complete lines already read off the socket but not yet
    /// decoded. The socket itself is not read again; a trailing partial line is
    /// discarded.
    async fn drain_buffered(&mut self) -> ConnectionOutcome {
        let mut buffered = std::mem::take(self.lines.read_buffer_mut());
        loop {
            let line = match self.lines.decoder_mut().decode(&mut buffered) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(peer = %self.peer, "Discarding buffered input on shutdown: {}", e);
                    break;
                }
            };
            if self.queue.send(parse_entry(&line)).await.is_err() {
                return ConnectionOutcome::SinkGone { entries: self.entries };
            }
            self.entries += 1;
        }
        ConnectionOutcome::Cancelled { entries: self.entries }
    }

    fn log_outcome(&self, outcome: &ConnectionOutcome) {
        let peer = &self.peer;
        match outcome {
            ConnectionOutcome::Rejected(e @ (HandshakeError::Eof | HandshakeError::Cancelled)) => {
                debug!(%peer, "Dropped connection before handshake: {}", e);
            }
            ConnectionOutcome::Rejected(e) => {
                warn!(%peer, "Rejected connection: {}", e);
            }
            ConnectionOutcome::Finished { entries } => {
                info!(%peer, entries, "Closed connection");
            }
            ConnectionOutcome::Cancelled { entries } => {
                debug!(%peer, entries, "Closed connection for shutdown");
            }
            ConnectionOutcome::Failed { entries, error } => {
                warn!(%peer, entries, "Error reading from stream: {}", error);
            }
            ConnectionOutcome::SinkGone { entries } => {
                error!(%peer, entries, "Entry queue closed while connection was streaming");
            }
        }
    }
}
