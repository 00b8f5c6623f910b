//! Reader thread for the reading stream
//!
//! Owns the transport for its whole life. On a transport error the handle is
//! dropped and the connector is retried with bounded exponential backoff;
//! the framer is reset so a half frame from the old connection never joins
//! bytes from the new one.

use super::{Backoff, StreamConfig, StreamCounters, StreamEvent};
use crate::core::types::WeightReading;
use crate::decoder::{self, Framed, LineFramer, MAX_FRAME_LEN, ScaleFormat, hex_dump};
use crate::error::LinkError;
use crate::transport::{Connector, Transport};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Serial read chunk
const READ_CHUNK: usize = 256;
/// Granularity of shutdown checks while blocked
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

pub(super) struct ReaderContext {
    pub connector: Box<dyn Connector>,
    pub format: ScaleFormat,
    pub config: StreamConfig,
    pub tx: Sender<StreamEvent>,
    pub shutdown: Arc<AtomicBool>,
    pub counters: Arc<StreamCounters>,
}

/// Per-connection decode state
struct RunState {
    framer: LineFramer,
    last_valid: Instant,
    consecutive_failures: u32,
    degraded_reported: bool,
}

impl RunState {
    fn new(format: ScaleFormat) -> Self {
        Self {
            framer: LineFramer::new(format.terminator(), MAX_FRAME_LEN),
            last_valid: Instant::now(),
            consecutive_failures: 0,
            degraded_reported: false,
        }
    }

    fn restart(&mut self) {
        self.framer.reset();
        self.last_valid = Instant::now();
        self.consecutive_failures = 0;
        self.degraded_reported = false;
    }
}

/// Reader loop - runs until shutdown or until the consumer goes away
pub(super) fn reader_loop(mut ctx: ReaderContext, transport: Box<dyn Transport>) {
    let mut backoff = Backoff::new(ctx.config.reconnect_initial, ctx.config.reconnect_max);
    let mut state = RunState::new(ctx.format);
    let mut transport = Some(transport);
    let mut buf = [0u8; READ_CHUNK];

    while !ctx.shutdown.load(Ordering::Relaxed) {
        let Some(device) = transport.as_mut() else {
            match ctx.connector.connect() {
                Ok(mut device) => {
                    if let Err(e) = device.clear_input() {
                        log::warn!("Could not clear input after reconnect: {}", e);
                    }
                    log::info!(
                        "Reconnected to {} after {} attempt(s)",
                        ctx.connector.describe(),
                        backoff.attempt()
                    );
                    StreamCounters::bump(&ctx.counters.reconnects);
                    backoff.reset();
                    state.restart();
                    transport = Some(device);
                }
                Err(e) => {
                    log::debug!("Reconnect to {} failed: {}", ctx.connector.describe(), e);
                    if !disconnected(&ctx, &mut backoff, e.to_string()) {
                        break;
                    }
                }
            }
            continue;
        };

        match device.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                state.framer.push(&buf[..n]);
                if !drain_frames(&ctx, &mut state) {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Lost {}: {}", ctx.connector.describe(), e);
                transport = None;
                if !disconnected(&ctx, &mut backoff, e.to_string()) {
                    break;
                }
                continue;
            }
        }

        if state.last_valid.elapsed() >= ctx.config.stale_after {
            log::debug!("No valid frame for {:?}", ctx.config.stale_after);
            state.last_valid = Instant::now();
            StreamCounters::bump(&ctx.counters.stale_emitted);
            if !emit(&ctx, Ok(WeightReading::stale())) {
                break;
            }
        }
    }

    log::info!("Reader thread exiting");
}

/// Decode every complete frame in the framer. False when the consumer is gone.
fn drain_frames(ctx: &ReaderContext, state: &mut RunState) -> bool {
    while let Some(framed) = state.framer.next_frame() {
        let result = match framed {
            Framed::Frame(raw) => {
                log::trace!("Frame: {}", hex_dump(&raw));
                decoder::decode(&raw, ctx.format, &ctx.config.limits)
                    .map_err(|e| e.to_string())
            }
            Framed::Overflow(dropped) => {
                Err(format!("{} bytes without a terminator", dropped))
            }
        };

        let event = match result {
            Ok(reading) => {
                StreamCounters::bump(&ctx.counters.frames_decoded);
                state.consecutive_failures = 0;
                state.degraded_reported = false;
                state.last_valid = Instant::now();
                Ok(reading)
            }
            Err(reason) => {
                StreamCounters::bump(&ctx.counters.decode_errors);
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                log::debug!(
                    "Undecodable frame ({} in a row): {}",
                    state.consecutive_failures,
                    reason
                );
                if state.degraded_reported
                    || state.consecutive_failures < ctx.config.degraded_after
                {
                    continue;
                }
                state.degraded_reported = true;
                log::warn!(
                    "Link degraded: {} consecutive undecodable frames",
                    state.consecutive_failures
                );
                Err(LinkError::Degraded {
                    consecutive: state.consecutive_failures,
                })
            }
        };

        if !emit(ctx, event) {
            return false;
        }
    }
    true
}

/// Report a lost or unreachable device, then wait out the backoff
fn disconnected(ctx: &ReaderContext, backoff: &mut Backoff, reason: String) -> bool {
    let delay = backoff.next_delay();
    let event = Err(LinkError::Disconnected {
        attempt: backoff.attempt(),
        reason,
    });
    if !emit(ctx, event) {
        return false;
    }
    sleep_unless_shutdown(&ctx.shutdown, delay);
    true
}

/// Blocking send that still honours shutdown. False when the consumer is gone.
fn emit(ctx: &ReaderContext, mut event: StreamEvent) -> bool {
    loop {
        match ctx.tx.send_timeout(event, SHUTDOWN_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if ctx.shutdown.load(Ordering::Relaxed) {
                    return false;
                }
                event = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                log::debug!("Stream consumer dropped");
                return false;
            }
        }
    }
}

fn sleep_unless_shutdown(shutdown: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
