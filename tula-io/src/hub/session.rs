//! Server-side viewer sessions.
//!
//! One thread per connection. The thread owns the socket, answers the
//! handshake, then forwards cell updates and answers pings until the viewer
//! leaves, goes idle, or the hub shuts down. The socket is shut down and the
//! registry entry removed on every exit path.

use super::{CredentialVerifier, HubConfig, configure_socket};
use crate::core::cell::CellReader;
use crate::error::{AuthError, Error, Result};
use crate::streaming::{ClientMessage, FrameReader, Serializer, ServerMessage, is_disconnect};
use crossbeam_channel::TryRecvError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for a valid Hello
    Unauthenticated,
    /// Receiving updates
    Authenticated,
    /// Terminal
    Closed,
}

/// Inputs that move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    CredentialAccepted,
    CredentialRejected,
    HandshakeTimeout,
    /// A client tried to mutate hub state; refused, state unchanged
    MutationAttempt,
    /// Bye, idle eviction, socket loss or hub shutdown
    Disconnect,
}

impl SessionState {
    pub(crate) fn on(self, event: SessionEvent) -> SessionState {
        use SessionEvent::*;
        use SessionState::*;
        match (self, event) {
            (Closed, _) => Closed,
            (_, Disconnect) => Closed,
            (Unauthenticated, CredentialAccepted) => Authenticated,
            (Unauthenticated, CredentialRejected | HandshakeTimeout) => Closed,
            (state, _) => state,
        }
    }
}

/// What the hub knows about one connected viewer
#[derive(Debug, Clone)]
pub struct HubSession {
    /// Monotonically increasing per hub, starting at 1
    pub client_id: u64,
    pub peer: SocketAddr,
    /// Name from the Hello, once received
    pub client_name: Option<String>,
    pub connected_at: Instant,
    /// Last inbound message
    pub last_seen: Instant,
    pub state: SessionState,
}

impl HubSession {
    pub(crate) fn new(client_id: u64, peer: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            client_id,
            peer,
            client_name: None,
            connected_at: now,
            last_seen: now,
            state: SessionState::Unauthenticated,
        }
    }
}

/// Live sessions by id
pub(crate) type SessionRegistry = Arc<RwLock<BTreeMap<u64, HubSession>>>;

pub(crate) struct SessionContext {
    pub id: u64,
    pub peer: SocketAddr,
    pub cell: CellReader,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub config: HubConfig,
    pub registry: SessionRegistry,
    pub shutdown: Arc<AtomicBool>,
}

/// Session thread body
pub(crate) fn run_session(ctx: SessionContext, stream: TcpStream) {
    let serializer = Serializer::new(ctx.config.wire_format);
    let mut session = SessionRunner {
        ctx,
        stream,
        reader: FrameReader::new(),
        serializer,
        state: SessionState::Unauthenticated,
    };

    match session.serve() {
        Ok(reason) => log::info!("Session {} closed: {}", session.ctx.id, reason),
        Err(e) if is_disconnect(&e) => {
            log::info!("Session {} disconnected ({})", session.ctx.id, session.ctx.peer);
        }
        Err(Error::Auth(e)) => {
            log::warn!(
                "Session {} from {} refused: {}",
                session.ctx.id,
                session.ctx.peer,
                e
            );
        }
        Err(e) => log::warn!("Session {} failed: {}", session.ctx.id, e),
    }

    session.apply(SessionEvent::Disconnect);
    let _ = session.stream.shutdown(Shutdown::Both);
    session.ctx.registry.write().remove(&session.ctx.id);
}

struct SessionRunner {
    ctx: SessionContext,
    stream: TcpStream,
    reader: FrameReader,
    serializer: Serializer,
    state: SessionState,
}

impl SessionRunner {
    fn serve(&mut self) -> Result<&'static str> {
        configure_socket(&self.stream, &self.ctx.config)?;

        let client_name = self.handshake()?;
        self.apply(SessionEvent::CredentialAccepted);
        log::info!(
            "Session {} authenticated: '{}' from {}",
            self.ctx.id,
            client_name,
            self.ctx.peer
        );
        if let Some(entry) = self.ctx.registry.write().get_mut(&self.ctx.id) {
            entry.client_name = Some(client_name);
        }

        let (snapshot, mut updates) = self.ctx.cell.snapshot_and_subscribe();
        self.send(&ServerMessage::Welcome {
            session_id: self.ctx.id,
            snapshot,
        })?;

        let mut last_seen = Instant::now();
        loop {
            if self.ctx.shutdown.load(Ordering::Relaxed) {
                self.evict("hub shutting down");
                return Ok("hub shutdown");
            }

            loop {
                match updates.try_recv() {
                    Ok(reading) => self.send(&ServerMessage::Update { reading })?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.evict("reading source closed");
                        return Ok("reading source closed");
                    }
                }
            }

            let Some(msg) = self
                .reader
                .read_message::<_, ClientMessage>(&mut self.stream, &self.serializer)?
            else {
                if last_seen.elapsed() >= self.ctx.config.session_timeout {
                    self.evict("idle timeout");
                    return Ok("idle timeout");
                }
                continue;
            };

            last_seen = Instant::now();
            self.touch(last_seen);
            log::trace!("Session {} <- {}", self.ctx.id, msg.kind());

            match msg {
                ClientMessage::Ping { nonce } => self.send(&ServerMessage::Pong { nonce })?,
                ClientMessage::Publish { reading } => {
                    self.apply(SessionEvent::MutationAttempt);
                    log::warn!(
                        "Session {} tried to publish {}; refused",
                        self.ctx.id,
                        reading
                    );
                    self.send(&ServerMessage::Refused {
                        reason: "only the hub's scale publishes readings".to_string(),
                    })?;
                }
                ClientMessage::Hello { .. } => self.send(&ServerMessage::Refused {
                    reason: "already authenticated".to_string(),
                })?,
                ClientMessage::Bye => return Ok("client said bye"),
            }
        }
    }

    /// Wait for a Hello and ask the verifier; returns the client name
    fn handshake(&mut self) -> Result<String> {
        let deadline = Instant::now() + self.ctx.config.auth_timeout;
        loop {
            if self.ctx.shutdown.load(Ordering::Relaxed) {
                return Err(Error::Other("hub shutting down".to_string()));
            }
            if Instant::now() >= deadline {
                self.apply(SessionEvent::HandshakeTimeout);
                self.send_best_effort(&ServerMessage::Rejected {
                    reason: AuthError::Timeout.to_string(),
                });
                return Err(AuthError::Timeout.into());
            }

            let msg = self
                .reader
                .read_message::<_, ClientMessage>(&mut self.stream, &self.serializer)?;
            match msg {
                None => continue,
                Some(ClientMessage::Hello {
                    client_name,
                    credential,
                }) => {
                    self.touch(Instant::now());
                    return match self
                        .ctx
                        .verifier
                        .verify(&client_name, credential.as_deref())
                    {
                        Ok(()) => Ok(client_name),
                        Err(e) => {
                            self.apply(SessionEvent::CredentialRejected);
                            let reason = match &e {
                                AuthError::Rejected { reason } => reason.clone(),
                                other => other.to_string(),
                            };
                            self.send_best_effort(&ServerMessage::Rejected { reason });
                            Err(e.into())
                        }
                    };
                }
                Some(other) => {
                    self.apply(SessionEvent::CredentialRejected);
                    let reason = format!("expected hello, got {}", other.kind());
                    self.send_best_effort(&ServerMessage::Rejected {
                        reason: reason.clone(),
                    });
                    return Err(Error::Protocol(reason));
                }
            }
        }
    }

    fn send(&mut self, msg: &ServerMessage) -> Result<()> {
        log::trace!("Session {} -> {}", self.ctx.id, msg.kind());
        self.serializer.write_message(&mut self.stream, msg)
    }

    fn send_best_effort(&mut self, msg: &ServerMessage) {
        if let Err(e) = self.send(msg) {
            log::debug!("Session {}: could not send {}: {}", self.ctx.id, msg.kind(), e);
        }
    }

    fn evict(&mut self, reason: &str) {
        self.send_best_effort(&ServerMessage::Evicted {
            reason: reason.to_string(),
        });
    }

    fn apply(&mut self, event: SessionEvent) {
        let next = self.state.on(event);
        if next != self.state {
            log::debug!(
                "Session {}: {:?} -> {:?} on {:?}",
                self.ctx.id,
                self.state,
                next,
                event
            );
            self.state = next;
            if let Some(entry) = self.ctx.registry.write().get_mut(&self.ctx.id) {
                entry.state = next;
            }
        }
    }

    fn touch(&self, at: Instant) {
        if let Some(entry) = self.ctx.registry.write().get_mut(&self.ctx.id) {
            entry.last_seen = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent::*;
    use SessionState::*;

    #[test]
    fn test_handshake_transitions() {
        assert_eq!(Unauthenticated.on(CredentialAccepted), Authenticated);
        assert_eq!(Unauthenticated.on(CredentialRejected), Closed);
        assert_eq!(Unauthenticated.on(HandshakeTimeout), Closed);
        assert_eq!(Unauthenticated.on(Disconnect), Closed);
    }

    #[test]
    fn test_mutation_attempt_leaves_state_alone() {
        assert_eq!(Authenticated.on(MutationAttempt), Authenticated);
        assert_eq!(Unauthenticated.on(MutationAttempt), Unauthenticated);
    }

    #[test]
    fn test_authenticated_only_leaves_by_disconnect() {
        assert_eq!(Authenticated.on(CredentialAccepted), Authenticated);
        assert_eq!(Authenticated.on(CredentialRejected), Authenticated);
        assert_eq!(Authenticated.on(Disconnect), Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        for event in [
            CredentialAccepted,
            CredentialRejected,
            HandshakeTimeout,
            MutationAttempt,
            Disconnect,
        ] {
            assert_eq!(Closed.on(event), Closed);
        }
    }
}
