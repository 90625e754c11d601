// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Two-tier shutdown.
//!
//! The first termination signal trips the shared [`CancellationToken`]: the
//! acceptor stops, open connections are closed, the queue drains and the server
//! returns. A second signal means the graceful path is taking too long, and the
//! process exits immediately with a non-zero status.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit status used when a second signal aborts the graceful shutdown.
pub const IMMEDIATE_EXIT_CODE: i32 = 1;

/// What a shutdown request should do, given how many came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTier {
    /// Drain and stop. Only the first request gets this tier.
    Graceful,
    /// Abandon in-flight data and exit now.
    Immediate,
}

/// Owns the cancellation token shared by the acceptor and every connection.
///
/// Cloning yields another handle to the same token and request counter.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    requests: Arc<AtomicU32>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token to hand to the components that must stop on shutdown. Readers
    /// only: tripping goes through [`ShutdownCoordinator::trip`].
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Records a shutdown request and cancels the token on the first one.
    pub fn trip(&self) -> ShutdownTier {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.cancel_token.cancel();
            ShutdownTier::Graceful
        } else {
            ShutdownTier::Immediate
        }
    }

    /// Waits for SIGINT or SIGTERM forever, applying the two-tier policy.
    ///
    /// Meant to be spawned once by the binary. The second signal terminates the
    /// process from inside this task.
    pub async fn listen_for_signals(self) {
        let mut signals = match Signals::new() {
            Ok(signals) => signals,
            Err(e) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        loop {
            if let Err(e) = signals.recv().await {
                error!("Failed to receive signal: {}", e);
                return;
            }
            match self.trip() {
                ShutdownTier::Graceful => {
                    info!("Signal received, stopping gracefully");
                }
                ShutdownTier::Immediate => {
                    warn!("Signal received, stopping NOW");
                    std::process::exit(IMMEDIATE_EXIT_CODE);
                }
            }
        }
    }
}

struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result,
                _ = self.terminate.recv() => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    }
}
