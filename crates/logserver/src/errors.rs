// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log server.
//!
//! Errors are scoped to where they can occur. Connection-scoped failures
//! (`HandshakeError`, `LineCodecError`) end a single connection and never escape
//! it. Only `ServerError` is surfaced to the process.

use crate::protocol::VersionSpecifier;

/// The peer announced a protocol version this server does not speak.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("unrecognized protocol version {0}")]
    Unsupported(VersionSpecifier),
}

/// Errors produced while framing a byte stream into lines.
#[derive(Debug, thiserror::Error)]
pub enum LineCodecError {
    #[error("line exceeds maximum length of {0} bytes")]
    MaxLineLengthExceeded(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a connection is dropped before it reaches the streaming state.
///
/// None of these are reported back to the peer.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("connection closed before a version was sent")]
    Eof,

    #[error("unable to read protocol version: {0}")]
    Read(#[from] LineCodecError),

    #[error("unable to decode protocol version: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid version specifier: {0}")]
    Version(#[from] VersionError),

    #[error("server shutting down")]
    Cancelled,
}

/// Fatal accept loop outcome. Graceful stops are not errors.
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    #[error("acceptor panicked: {0}")]
    Panicked(String),

    #[error("acceptor task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`crate::server::LogServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Acceptor(#[from] AcceptorError),

    #[error("sink writer failed: {0}")]
    Writer(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
