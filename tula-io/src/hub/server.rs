//! Server-mode hub.
//!
//! Threads:
//! - `hub-pump`: drains the reading stream and is the only cell writer
//! - `hub-listener`: accepts viewers and spawns their sessions
//! - `hub-session-N`: one per viewer, see [`super::session`]

use super::session::{HubSession, SessionContext, SessionRegistry, run_session};
use super::{CredentialVerifier, HubConfig, POLL_INTERVAL, WeightSource};
use crate::core::cell::{CellReader, CellWriter, ReadingCell, Subscription};
use crate::core::types::{LinkState, VersionedReading, WeightReading};
use crate::error::{Error, LinkError, Result};
use crate::stream::ReadingStream;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accept loop sleep when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Hub that owns the scale and serves its readings
pub struct ServerHub {
    reader: CellReader,
    local_addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: Arc<AtomicBool>,
    pump_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
    session_threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ServerHub {
    /// Bind the listener and start pumping `stream` into the hub
    pub fn start(
        stream: ReadingStream,
        config: HubConfig,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_address).map_err(|e| {
            Error::Other(format!("Failed to bind to {}: {}", config.bind_address, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (writer, reader) = ReadingCell::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let registry: SessionRegistry = Arc::new(RwLock::new(BTreeMap::new()));
        let session_threads = Arc::new(Mutex::new(Vec::new()));

        let pump_shutdown = Arc::clone(&shutdown);
        let pump_thread = thread::Builder::new()
            .name("hub-pump".to_string())
            .spawn(move || pump_loop(stream, writer, pump_shutdown))?;

        let accept = AcceptLoop {
            listener,
            cell: reader.clone(),
            verifier,
            config,
            registry: Arc::clone(&registry),
            shutdown: Arc::clone(&shutdown),
            session_threads: Arc::clone(&session_threads),
        };
        let listener_thread = thread::Builder::new()
            .name("hub-listener".to_string())
            .spawn(move || accept.run())?;

        log::info!("Weight hub serving on {}", local_addr);

        Ok(Self {
            reader,
            local_addr,
            registry,
            shutdown,
            pump_thread: Some(pump_thread),
            listener_thread: Some(listener_thread),
            session_threads,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of live sessions, ordered by id
    pub fn sessions(&self) -> Vec<HubSession> {
        self.registry.read().values().cloned().collect()
    }

    /// Read-only handle onto the hub's cell
    pub fn reader(&self) -> CellReader {
        self.reader.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Close the listener, evict every session and release the scale
    pub fn shutdown(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Weight hub shutting down");

        for (name, handle) in [
            ("hub-listener", self.listener_thread.take()),
            ("hub-pump", self.pump_thread.take()),
        ] {
            if let Some(handle) = handle
                && handle.join().is_err()
            {
                log::error!("{} thread panicked", name);
            }
        }

        let sessions: Vec<_> = self.session_threads.lock().drain(..).collect();
        for handle in sessions {
            if handle.join().is_err() {
                log::error!("Session thread panicked");
            }
        }
        log::info!("Weight hub stopped");
    }
}

impl WeightSource for ServerHub {
    fn current_reading(&self) -> VersionedReading {
        self.reader.current()
    }

    fn subscribe(&self) -> Subscription {
        self.reader.subscribe()
    }
}

impl Drop for ServerHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Map stream events onto cell publishes until shutdown
fn pump_loop(mut stream: ReadingStream, mut writer: CellWriter, shutdown: Arc<AtomicBool>) {
    let mut link = LinkState::Disconnected;

    while !shutdown.load(Ordering::Relaxed) {
        let event = match stream.next_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("Reading stream ended unexpectedly");
                break;
            }
        };

        match event {
            Ok(reading) if !reading.is_stale() => {
                link = LinkState::Connected;
                writer.publish(reading, link);
            }
            Ok(stale) => {
                // Silence on a noisy line stays degraded; otherwise the device is attached
                if link != LinkState::Degraded {
                    link = LinkState::Connected;
                }
                writer.publish(stale, link);
            }
            Err(LinkError::Degraded { consecutive }) => {
                log::warn!("Scale link degraded ({} bad frames)", consecutive);
                link = LinkState::Degraded;
                writer.relabel(link);
            }
            Err(LinkError::Disconnected { attempt, reason }) => {
                if attempt == 1 {
                    log::warn!("Scale disconnected: {}", reason);
                }
                link = LinkState::Disconnected;
                writer.publish(WeightReading::stale(), link);
            }
        }
    }

    stream.close();
    log::info!("Hub pump exiting");
    // Dropping the writer ends every subscription
}

struct AcceptLoop {
    listener: TcpListener,
    cell: CellReader,
    verifier: Arc<dyn CredentialVerifier>,
    config: HubConfig,
    registry: SessionRegistry,
    shutdown: Arc<AtomicBool>,
    session_threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AcceptLoop {
    fn run(self) {
        let mut next_id = 1u64;

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        log::warn!("Failed to set blocking mode for {}: {}", peer, e);
                        continue;
                    }
                    let id = next_id;
                    next_id += 1;
                    log::info!("Viewer connected: {} (session {})", peer, id);
                    self.registry.write().insert(id, HubSession::new(id, peer));

                    let ctx = SessionContext {
                        id,
                        peer,
                        cell: self.cell.clone(),
                        verifier: Arc::clone(&self.verifier),
                        config: self.config.clone(),
                        registry: Arc::clone(&self.registry),
                        shutdown: Arc::clone(&self.shutdown),
                    };
                    let spawned = thread::Builder::new()
                        .name(format!("hub-session-{}", id))
                        .spawn(move || run_session(ctx, stream));
                    match spawned {
                        Ok(handle) => {
                            let mut threads = self.session_threads.lock();
                            threads.retain(|h| !h.is_finished());
                            threads.push(handle);
                        }
                        Err(e) => {
                            log::error!("Failed to spawn session thread: {}", e);
                            self.registry.write().remove(&id);
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        log::info!("Hub listener exiting");
    }
}
