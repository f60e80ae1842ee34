//! Secondary-side forwarding.
//!
//! Connects to the primary's loopback listener, writes the link and closes
//! the connection. Connecting is bounded by a timeout and retried a few
//! times so a primary that is still starting up can be reached.

use super::protocol::write_message;
use crate::config::LinkConfig;
use crate::{DeeplinkError, Result};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Forward `payload` to the primary listening on `addr`.
pub async fn forward(addr: SocketAddr, payload: &str, config: &LinkConfig) -> Result<()> {
    let mut stream = connect(addr, config).await?;

    write_message(&mut stream, config.wire_format(), payload).await?;
    // Closing the write half marks end-of-message for the raw format.
    stream.shutdown().await?;

    info!("Forwarded link ({} bytes) to primary at {}", payload.len(), addr);
    Ok(())
}

async fn connect(addr: SocketAddr, config: &LinkConfig) -> Result<TcpStream> {
    let attempts = config.connect_attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("Connected to primary at {} (attempt {})", addr, attempt);
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!("Connect attempt {}/{} to {} failed: {}", attempt, attempts, addr, e);
                last_error = Some(e);
            }
            Err(_) => {
                debug!(
                    "Connect attempt {}/{} to {} timed out after {:?}",
                    attempt,
                    attempts,
                    addr,
                    config.connect_timeout()
                );
                last_error = None;
            }
        }

        if attempt < attempts {
            tokio::time::sleep(config.retry_delay()).await;
        }
    }

    Err(match last_error {
        Some(source) => DeeplinkError::Connect {
            addr,
            attempts,
            source,
        },
        None => DeeplinkError::ConnectTimeout {
            addr,
            timeout: config.connect_timeout(),
        },
    })
}
