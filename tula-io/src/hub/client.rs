//! Client-mode hub.
//!
//! Mirrors a server hub into a local cell. The handshake happens on the
//! caller's thread so a wrong password is reported straight away; after that
//! a `hub-client` thread owns the socket, pings, mirrors updates and
//! reconnects with backoff when the server goes away.
//!
//! Local versions are the server's versions plus an offset. The offset only
//! changes on reconnect, and only when the server's numbering is behind the
//! local cell (a restarted server, or the local disconnect marker), so local
//! subscribers never see versions go backwards.

use super::{HubConfig, POLL_INTERVAL, WeightSource, configure_socket};
use crate::core::cell::{CellReader, CellWriter, ReadingCell, Subscription};
use crate::core::types::{LinkState, VersionedReading, WeightReading};
use crate::error::{AuthError, Error, Result};
use crate::stream::Backoff;
use crate::streaming::{ClientMessage, FrameReader, Serializer, ServerMessage, is_disconnect};
use parking_lot::Mutex;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// State shared between the handle and the client thread
struct Shared {
    connected: AtomicBool,
    session_id: AtomicU64,
    last_traffic: Mutex<Instant>,
}

/// Hub mirroring a remote server
pub struct ClientHub {
    reader: CellReader,
    server: SocketAddr,
    stale_after: Duration,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    client_thread: Option<JoinHandle<()>>,
}

/// An authenticated connection
struct Connection {
    stream: TcpStream,
    frames: FrameReader,
    session_id: u64,
    snapshot: VersionedReading,
}

impl ClientHub {
    /// Connect and authenticate, then start mirroring in the background
    pub fn connect(address: &str, credential: Option<String>, config: HubConfig) -> Result<Self> {
        let server = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("Cannot resolve server address '{}'", address)))?;
        let serializer = Serializer::new(config.wire_format);

        let connection = handshake(server, credential.as_deref(), &config, &serializer)?;
        log::info!(
            "Joined hub {} as session {}",
            server,
            connection.session_id
        );

        let (mut writer, reader) = ReadingCell::new();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            session_id: AtomicU64::new(connection.session_id),
            last_traffic: Mutex::new(Instant::now()),
        });
        let offset = {
            let mut mirror = Mirror {
                writer: &mut writer,
                offset: 0,
            };
            mirror.rebase(connection.snapshot);
            mirror.offset
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = ClientWorker {
            server,
            credential,
            config: config.clone(),
            serializer,
            shared: Arc::clone(&shared),
            shutdown: Arc::clone(&shutdown),
        };
        let client_thread = thread::Builder::new()
            .name("hub-client".to_string())
            .spawn(move || worker.run(writer, connection, offset))?;

        Ok(Self {
            reader,
            server,
            stale_after: config.stale_after,
            shared,
            shutdown,
            client_thread: Some(client_thread),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Session id of the current connection (changes on reconnect)
    pub fn session_id(&self) -> u64 {
        self.shared.session_id.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Local cell mirroring the server
    pub fn reader(&self) -> CellReader {
        self.reader.clone()
    }

    /// Say goodbye to the server and stop the client thread
    pub fn close(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.client_thread.take()
            && handle.join().is_err()
        {
            log::error!("hub-client thread panicked");
        }
    }
}

impl WeightSource for ClientHub {
    /// The mirrored reading, reported stale when the server has been silent
    /// for longer than `stale_after`
    fn current_reading(&self) -> VersionedReading {
        let mut current = self.reader.current();
        if self.shared.last_traffic.lock().elapsed() > self.stale_after {
            current.reading = WeightReading {
                measurement: None,
                timestamp_us: current.reading.timestamp_us,
            };
        }
        current
    }

    fn subscribe(&self) -> Subscription {
        self.reader.subscribe()
    }
}

impl Drop for ClientHub {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, send Hello and wait for the verdict
fn handshake(
    server: SocketAddr,
    credential: Option<&str>,
    config: &HubConfig,
    serializer: &Serializer,
) -> Result<Connection> {
    let mut stream = TcpStream::connect_timeout(&server, config.auth_timeout)?;
    configure_socket(&stream, config)?;

    serializer.write_message(
        &mut stream,
        &ClientMessage::Hello {
            client_name: config.client_name.clone(),
            credential: credential.map(str::to_string),
        },
    )?;

    let mut frames = FrameReader::new();
    let deadline = Instant::now() + config.auth_timeout;
    while Instant::now() < deadline {
        match frames.read_message::<_, ServerMessage>(&mut stream, serializer)? {
            None => continue,
            Some(ServerMessage::Welcome {
                session_id,
                snapshot,
            }) => {
                return Ok(Connection {
                    stream,
                    frames,
                    session_id,
                    snapshot,
                });
            }
            Some(ServerMessage::Rejected { reason }) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(AuthError::Rejected { reason }.into());
            }
            Some(other) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(Error::Protocol(format!(
                    "expected welcome, got {}",
                    other.kind()
                )));
            }
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
    Err(AuthError::Timeout.into())
}

/// Applies server versions to the local cell
struct Mirror<'a> {
    writer: &'a mut CellWriter,
    offset: u64,
}

impl Mirror<'_> {
    /// Adopt a fresh snapshot, shifting the offset if the server is behind
    fn rebase(&mut self, snapshot: VersionedReading) {
        let local = self.writer.current().version;
        if snapshot.version.saturating_add(self.offset) <= local {
            self.offset = local + 1 - snapshot.version;
        }
        self.apply(snapshot);
    }

    fn apply(&mut self, update: VersionedReading) -> bool {
        self.writer.mirror(VersionedReading {
            version: update.version.saturating_add(self.offset),
            ..update
        })
    }
}

struct ClientWorker {
    server: SocketAddr,
    credential: Option<String>,
    config: HubConfig,
    serializer: Serializer,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
}

impl ClientWorker {
    fn run(self, mut writer: CellWriter, first: Connection, offset: u64) {
        // `connect` already applied the handshake snapshot
        let mut mirror = Mirror {
            writer: &mut writer,
            offset,
        };
        let mut connection = Some(first);
        let mut backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);

        while !self.shutdown.load(Ordering::Relaxed) {
            let Some(mut conn) = connection.take() else {
                let delay = backoff.next_delay();
                self.sleep_unless_shutdown(delay);
                if self.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match handshake(
                    self.server,
                    self.credential.as_deref(),
                    &self.config,
                    &self.serializer,
                ) {
                    Ok(conn) => {
                        log::info!(
                            "Rejoined hub {} as session {} after {} attempt(s)",
                            self.server,
                            conn.session_id,
                            backoff.attempt()
                        );
                        backoff.reset();
                        self.shared.session_id.store(conn.session_id, Ordering::Relaxed);
                        self.shared.connected.store(true, Ordering::Relaxed);
                        *self.shared.last_traffic.lock() = Instant::now();
                        mirror.rebase(conn.snapshot);
                        connection = Some(conn);
                    }
                    Err(e) => log::debug!(
                        "Reconnect attempt {} to {} failed: {}",
                        backoff.attempt(),
                        self.server,
                        e
                    ),
                }
                continue;
            };

            match self.serve(&mut conn, &mut mirror) {
                Ok(()) => {
                    let _ = self
                        .serializer
                        .write_message(&mut conn.stream, &ClientMessage::Bye);
                    let _ = conn.stream.shutdown(Shutdown::Both);
                    break;
                }
                Err(e) => {
                    if is_disconnect(&e) {
                        log::warn!("Lost hub {}", self.server);
                    } else {
                        log::warn!("Hub connection to {} failed: {}", self.server, e);
                    }
                    let _ = conn.stream.shutdown(Shutdown::Both);
                    self.shared.connected.store(false, Ordering::Relaxed);
                    mirror
                        .writer
                        .publish(WeightReading::stale(), LinkState::Disconnected);
                }
            }
        }

        self.shared.connected.store(false, Ordering::Relaxed);
        log::info!("Hub client exiting");
    }

    /// Mirror updates until shutdown (`Ok`) or connection loss (`Err`)
    fn serve(&self, conn: &mut Connection, mirror: &mut Mirror<'_>) -> Result<()> {
        let mut nonce = 0u64;
        let mut last_ping = Instant::now();

        while !self.shutdown.load(Ordering::Relaxed) {
            if last_ping.elapsed() >= self.config.ping_interval {
                nonce += 1;
                self.serializer
                    .write_message(&mut conn.stream, &ClientMessage::Ping { nonce })?;
                last_ping = Instant::now();
            }

            let Some(msg) = conn
                .frames
                .read_message::<_, ServerMessage>(&mut conn.stream, &self.serializer)?
            else {
                continue;
            };
            *self.shared.last_traffic.lock() = Instant::now();

            match msg {
                ServerMessage::Update { reading } => {
                    mirror.apply(reading);
                }
                ServerMessage::Pong { nonce } => log::trace!("Pong {}", nonce),
                ServerMessage::Evicted { reason } => {
                    return Err(Error::Protocol(format!("evicted: {}", reason)));
                }
                ServerMessage::Refused { reason } => log::warn!("Hub refused: {}", reason),
                other => log::debug!("Ignoring unexpected {}", other.kind()),
            }
        }
        Ok(())
    }

    fn sleep_unless_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}
