//! Single-instance coordination over a loopback TCP port.
//!
//! The first process to bind `127.0.0.1:<port>` becomes the **primary** and
//! keeps the listener for its lifetime. A later process whose bind fails with
//! "address in use" is a **secondary**: it forwards its link to the primary
//! and its embedder exits.
//!
//! # Architecture
//!
//! - **Server**: accept loop of the primary, one message per connection
//! - **Client**: the secondary's connect-and-write path
//! - **Protocol**: framed and raw message encodings shared by both
//!
//! An unrelated process holding the same port is indistinguishable from a
//! primary; the secondary then fails to deliver (or delivers to the wrong
//! peer). The window between a failed bind and the connect is also racy if
//! the primary exits in between. Both are accepted imprecisions of using a
//! port as the cross-process lock.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::forward;
pub use server::{PrimaryHandle, PrimaryServer};

use crate::config::LinkConfig;
use crate::{DeeplinkError, Result};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::info;

/// Role of this process, decided once by the outcome of the bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Primary,
    Secondary,
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceRole::Primary => write!(f, "primary"),
            InstanceRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// Outcome of [`InstanceCoordinator::start`].
#[derive(Debug)]
pub enum Startup {
    /// This process owns the port; links arrive at the configured handler.
    Primary(PrimaryHandle),
    /// Another instance owns the port and has been sent the payload.
    Forwarded,
}

impl Startup {
    pub fn role(&self) -> InstanceRole {
        match self {
            Startup::Primary(_) => InstanceRole::Primary,
            Startup::Forwarded => InstanceRole::Secondary,
        }
    }
}

/// Decides whether this process is the primary or forwards to it.
///
/// `start` consumes the coordinator, so the role is decided exactly once.
#[derive(Debug)]
pub struct InstanceCoordinator {
    config: LinkConfig,
}

impl InstanceCoordinator {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Loopback address shared by every invocation of this application.
    pub fn coordination_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.config.port()))
    }

    /// Claim the port or forward `payload` to whoever holds it.
    ///
    /// The returned [`PrimaryHandle`] runs the accept loop on a spawned task;
    /// the caller decides how long to keep it alive. A secondary that cannot
    /// reach the primary gets a retryable coordination error; the library
    /// never exits the process itself.
    pub async fn start(self, payload: &str) -> Result<Startup> {
        let addr = self.coordination_addr();

        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let handle = PrimaryServer::spawn(listener, self.config)?;
                Ok(Startup::Primary(handle))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                info!(
                    "{} is already claimed, forwarding link to the primary instance",
                    addr
                );
                forward(addr, payload, &self.config).await?;
                Ok(Startup::Forwarded)
            }
            Err(e) => Err(DeeplinkError::Bind { addr, source: e }),
        }
    }
}

/// The link a process was launched with: its last argument.
///
/// The OS substitutes the activating URI for the `"%1"` placeholder, which
/// is the final element of the registered command. Returns `None` when the
/// process was started without arguments.
pub fn invocation_payload<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter().skip(1).last()
}
