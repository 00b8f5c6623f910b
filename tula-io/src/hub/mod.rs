//! Weight hub: one authoritative current reading, many viewers.
//!
//! ## Modes
//!
//! - **Server** ([`ServerHub`]): owns the reading stream. A pump thread is the
//!   only writer of the reading cell; every connected viewer gets its own
//!   session thread fed from a cell subscription.
//! - **Client** ([`ClientHub`]): owns no scale. It mirrors a server's cell
//!   into a local one and exposes the same read accessors.
//!
//! Both implement [`WeightSource`], which is all a display or recorder needs.
//!
//! ## Session lifecycle
//!
//! ```text
//! accept ──► Unauthenticated ──Hello ok──► Authenticated ──Bye/idle/EOF──► Closed
//!                  │
//!                  └──── bad credential / no Hello in time ──────────────► Closed
//! ```

pub mod auth;
mod client;
mod server;
mod session;

pub use auth::{CredentialVerifier, OpenAccess, PasswordVerifier};
pub use client::ClientHub;
pub use server::ServerHub;
pub use session::{HubSession, SessionState};

use crate::core::cell::Subscription;
use crate::core::types::VersionedReading;
use crate::error::CalculationError;
use crate::streaming::WireFormat;
use crate::tare::{self, NetMode, NetResult, TareConfiguration};
use std::net::TcpStream;
use std::time::Duration;

/// Read side of a hub, whichever mode it runs in
pub trait WeightSource: Send + Sync {
    /// Latest published reading
    fn current_reading(&self) -> VersionedReading;

    /// Every version published after the current one, in order
    fn subscribe(&self) -> Subscription;

    /// Net weight of the current reading
    fn net_weight(
        &self,
        tare: &TareConfiguration,
        mode: NetMode,
    ) -> Result<NetResult, CalculationError> {
        tare::net(&self.current_reading().reading, tare, mode)
    }
}

/// Hub timing and network settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Server listen address
    pub bind_address: String,
    /// Server: a session with no inbound traffic for this long is evicted
    pub session_timeout: Duration,
    /// Server: time a new connection has to send its Hello
    pub auth_timeout: Duration,
    /// Client: keepalive period
    pub ping_interval: Duration,
    /// Client: no server traffic for this long marks the mirror stale
    pub stale_after: Duration,
    /// Client: first reconnect delay
    pub reconnect_initial: Duration,
    /// Client: reconnect delay ceiling
    pub reconnect_max: Duration,
    pub wire_format: WireFormat,
    /// Name a client announces in its Hello
    pub client_name: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5555".to_string(),
            session_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(3),
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(8),
            wire_format: WireFormat::Json,
            client_name: "viewer".to_string(),
        }
    }
}

/// Socket read timeout used by hub threads between shutdown checks
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Timeouts for a hub connection on either end.
///
/// Reads wake every [`POLL_INTERVAL`] to check for shutdown. A write that
/// cannot drain within `session_timeout` fails, so a peer that stops reading
/// cannot pin a hub thread.
pub(crate) fn configure_socket(
    stream: &TcpStream,
    config: &HubConfig,
) -> crate::error::Result<()> {
    stream.set_read_timeout(Some(POLL_INTERVAL))?;
    stream.set_write_timeout(Some(config.session_timeout))?;
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("Could not disable Nagle: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_hub_sockets_have_both_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let config = HubConfig {
            session_timeout: Duration::from_millis(750),
            ..HubConfig::default()
        };
        for stream in [&client, &server] {
            configure_socket(stream, &config).unwrap();
            assert_eq!(stream.read_timeout().unwrap(), Some(POLL_INTERVAL));
            assert_eq!(stream.write_timeout().unwrap(), Some(Duration::from_millis(750)));
            assert!(stream.nodelay().unwrap());
        }
    }
}
