//! Primary-side listener.
//!
//! Accepts one connection at a time on the claimed loopback port, reads a
//! single message from it and hands it to the configured handler before
//! accepting the next connection. Delivery order is therefore acceptance
//! order.
//!
//! Errors on one connection are logged and the loop keeps serving; only
//! cancellation ends it.

use super::protocol::read_message;
use crate::cancel::CancellationToken;
use crate::config::LinkConfig;
use crate::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running primary. Dropping it shuts the accept loop down.
pub struct PrimaryHandle {
    addr: SocketAddr,
    cancel: CancellationToken,
    delivered: Arc<AtomicU64>,
    task_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for PrimaryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimaryHandle")
            .field("addr", &self.addr)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("delivered", &self.messages_delivered())
            .finish()
    }
}

impl PrimaryHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of messages handed to the handler so far.
    pub fn messages_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Token that stops the accept loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting, close the listener and wait for the loop to exit.
    ///
    /// The port is free again once this returns.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait until the loop exits (after `stop()` or token cancellation).
    pub async fn wait(mut self) {
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Primary accept loop ended abnormally: {}", e);
                }
            }
        }
    }
}

impl Drop for PrimaryHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Owns the claimed listener for the primary instance.
pub struct PrimaryServer;

impl PrimaryServer {
    /// Spawn the accept loop on an already bound listener.
    pub fn spawn(listener: TcpListener, config: LinkConfig) -> Result<PrimaryHandle> {
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let delivered = Arc::new(AtomicU64::new(0));

        info!(
            "Primary instance for {}:// listening on {} ({} wire format)",
            config.scheme(),
            addr,
            config.wire_format()
        );

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            config,
            cancel.clone(),
            delivered.clone(),
        ));

        Ok(PrimaryHandle {
            addr,
            cancel,
            delivered,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        config: LinkConfig,
        cancel: CancellationToken,
        delivered: Arc<AtomicU64>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Primary listener on {} shutting down", config.port());
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!("Link connection from {}", peer_addr);
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = Self::handle_connection(stream, peer_addr, &config, &delivered) => {}
                            }
                        }
                        Err(e) => {
                            warn!("Link accept error: {}", e);
                        }
                    }
                }
            }
        }
        // Listener is dropped here, releasing the port.
    }

    /// Read one message from `stream` and deliver it.
    async fn handle_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        config: &LinkConfig,
        delivered: &AtomicU64,
    ) {
        let read = tokio::time::timeout(
            config.read_timeout(),
            read_message(&mut stream, config.wire_format(), config.max_message_bytes()),
        )
        .await;

        let message = match read {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => {
                debug!("Connection from {} closed without a message", peer_addr);
                return;
            }
            Ok(Err(e)) => {
                warn!("Dropping link from {}: {}", peer_addr, e);
                return;
            }
            Err(_) => {
                warn!(
                    "Dropping link from {}: no message within {:?}",
                    peer_addr,
                    config.read_timeout()
                );
                return;
            }
        };
        drop(stream);

        if message.is_empty() {
            debug!("Ignoring empty link from {}", peer_addr);
            return;
        }

        match config.handler() {
            Some(handler) => {
                debug!("Delivering link ({} bytes) from {}", message.len(), peer_addr);
                // Counted before the call so observers of the handler see it.
                delivered.fetch_add(1, Ordering::Relaxed);
                handler(message);
            }
            None => {
                debug!("No handler registered, dropping link from {}", peer_addr);
            }
        }
    }
}
