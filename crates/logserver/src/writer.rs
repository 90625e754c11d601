// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink writer: the single consumer of the entry queue.
//!
//! The writer renders every entry it receives and hands the line to a
//! [`LineSink`]. It runs until the queue is closed and drained, so once the
//! server has closed the queue, awaiting the writer task is enough to know that
//! every accepted entry reached the sink.
//!
//! Sinks are plain blocking writers, so the writer runs on a dedicated blocking
//! thread and a stalled sink never holds up a runtime worker.

use std::io::{self, Write};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, Span};

use crate::queue::EntryReceiver;

/// Destination of rendered log lines.
pub trait LineSink: Send + 'static {
    /// Emits one rendered line, without trailing newline.
    fn emit(&mut self, line: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes lines to any [`Write`] implementation, one per line.
#[derive(Debug)]
pub struct WriterSink<W> {
    inner: W,
}

impl<W: Write + Send + 'static> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send + 'static> LineSink for WriterSink<W> {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Line-buffered standard output.
pub type StdoutSink = WriterSink<io::LineWriter<io::Stdout>>;

impl StdoutSink {
    #[must_use]
    pub fn stdout() -> Self {
        WriterSink::new(io::LineWriter::new(io::stdout()))
    }
}

/// Emits every line as an `info` event on the `logserver::output` target, so
/// received logs share the server's own log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn emit(&mut self, line: &str) -> io::Result<()> {
        info!(target: "logserver::output", "{}", line);
        Ok(())
    }
}

/// Totals reported by the writer once the queue is drained.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterReport {
    pub lines_written: u64,
    pub sink_errors: u64,
}

pub struct SinkWriter<S> {
    sink: S,
    rx: EntryReceiver,
}

impl<S: LineSink> SinkWriter<S> {
    pub fn new(sink: S, rx: EntryReceiver) -> Self {
        Self { sink, rx }
    }

    /// Runs [`SinkWriter::run`] on the runtime's blocking pool, inside the
    /// caller's span.
    pub fn spawn(self) -> JoinHandle<WriterReport> {
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| self.run()))
    }

    /// Drains the queue until it is closed, then flushes the sink. Blocks the
    /// calling thread; see [`SinkWriter::spawn`].
    ///
    /// Sink failures are logged and counted; the writer keeps consuming so that
    /// producers never stall on a broken sink.
    pub fn run(mut self) -> WriterReport {
        debug!("Sink writer started");
        let mut report = WriterReport::default();

        while let Some(entry) = self.rx.blocking_recv() {
            let line = entry.to_string();
            match self.sink.emit(&line) {
                Ok(()) => report.lines_written += 1,
                Err(e) => {
                    report.sink_errors += 1;
                    error!("Failed to write log line to sink: {}", e);
                }
            }
        }

        if let Err(e) = self.sink.flush() {
            error!("Failed to flush sink: {}", e);
        }
        debug!(
            lines_written = report.lines_written,
            sink_errors = report.sink_errors,
            "Sink writer stopped"
        );
        report
    }
}
