//! Continuous reading stream over the scale link.
//!
//! [`ReadingStream::open`] connects to the device and hands the transport to
//! a dedicated `scale-reader` thread, which is its only owner from then on.
//! The thread frames and decodes bytes and sends one event per outcome:
//!
//! | Event | When |
//! |-------|------|
//! | `Ok(reading)` | A frame decoded |
//! | `Ok(WeightReading::stale())` | No valid frame for `stale_after`, repeated per window |
//! | `Err(LinkError::Degraded)` | `degraded_after` consecutive bad frames, once per run |
//! | `Err(LinkError::Disconnected)` | Transport failed, and again for every failed reconnect |
//!
//! The stream never ends on its own. Only [`ReadingStream::close`] (or drop)
//! stops the thread, and the transport is released with it.

mod backoff;
mod reader;

pub use backoff::Backoff;

use crate::core::types::WeightReading;
use crate::decoder::{DecodeLimits, ScaleFormat};
use crate::error::{Error, LinkError, Result};
use crate::transport::Connector;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One item of the stream
pub type StreamEvent = std::result::Result<WeightReading, LinkError>;

/// Events buffered between the reader thread and the consumer
const EVENT_QUEUE_DEPTH: usize = 256;

/// Stream timing and thresholds
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Silence after which a stale reading is emitted
    pub stale_after: Duration,
    /// Consecutive decode failures that mark the link degraded
    pub degraded_after: u32,
    /// First reconnect delay
    pub reconnect_initial: Duration,
    /// Reconnect delay ceiling
    pub reconnect_max: Duration,
    pub limits: DecodeLimits,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(2),
            degraded_after: 5,
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(8),
            limits: DecodeLimits::default(),
        }
    }
}

/// Counters kept by the reader thread
#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    stale_emitted: AtomicU64,
    reconnects: AtomicU64,
}

impl StreamCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stale_emitted: self.stale_emitted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the stream counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub stale_emitted: u64,
    /// Successful reconnects after a lost transport
    pub reconnects: u64,
}

/// Lazy, infinite sequence of readings from one scale
pub struct ReadingStream {
    events: Receiver<StreamEvent>,
    shutdown: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    counters: Arc<StreamCounters>,
    format: ScaleFormat,
    source: String,
    closed: bool,
}

impl ReadingStream {
    /// Connect to the device and start the reader thread.
    ///
    /// The first connect is synchronous so a wrong port fails here. Later
    /// losses are recovered inside the stream.
    pub fn open<C: Connector>(
        mut connector: C,
        format: ScaleFormat,
        config: StreamConfig,
    ) -> Result<Self> {
        let source = connector.describe();
        let mut transport = connector.connect()?;
        if let Err(e) = transport.clear_input() {
            log::warn!("Could not clear input on {}: {}", source, e);
        }
        log::info!("Reading {} frames from {}", format, source);

        let (tx, events) = bounded(EVENT_QUEUE_DEPTH);
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(StreamCounters::default());

        let ctx = reader::ReaderContext {
            connector: Box::new(connector),
            format,
            config,
            tx,
            shutdown: Arc::clone(&shutdown),
            counters: Arc::clone(&counters),
        };
        let reader_thread = thread::Builder::new()
            .name("scale-reader".to_string())
            .spawn(move || reader::reader_loop(ctx, transport))?;

        Ok(Self {
            events,
            shutdown,
            reader_thread: Some(reader_thread),
            counters,
            format,
            source,
            closed: false,
        })
    }

    /// Wait at most `timeout` for the next event
    pub fn next_timeout(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<StreamEvent, RecvTimeoutError> {
        if self.closed {
            return Err(RecvTimeoutError::Disconnected);
        }
        self.events.recv_timeout(timeout)
    }

    /// Stop the reader thread and release the device
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.join_reader() {
            log::error!("Closing stream from {}: {}", self.source, e);
        }
        log::info!("Stream from {} closed", self.source);
    }

    fn join_reader(&mut self) -> Result<()> {
        match self.reader_thread.take() {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanic),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    pub fn format(&self) -> ScaleFormat {
        self.format
    }

    /// Device description, e.g. `/dev/ttyUSB0 @ 9600 baud`
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Iterator for ReadingStream {
    type Item = StreamEvent;

    /// Blocks until the next event; `None` only after close
    fn next(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().ok()
    }
}

impl Drop for ReadingStream {
    fn drop(&mut self) {
        self.close();
    }
}
