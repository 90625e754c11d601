// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP log ingestion server.
//!
//! Clients connect, announce protocol version `1.0` on their first line, and
//! then stream newline-delimited log records. Records from every connection are
//! funnelled through one bounded queue into a single sink writer.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod listener;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod shutdown;
pub mod writer;

pub use config::{OutputKind, ServerConfig};
pub use errors::ServerError;
pub use protocol::LogEntry;
pub use server::{LogServer, ShutdownReport};
pub use shutdown::{ShutdownCoordinator, ShutdownTier};
