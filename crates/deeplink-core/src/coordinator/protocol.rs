//! Wire format for forwarded links.
//!
//! One message per connection, client to server only, no response.
//!
//! ```text
//! Framed: [u32 BE: len][UTF-8 bytes of len]
//! Raw:    [UTF-8 bytes ...] EOF
//! ```
//!
//! Raw messages longer than the receiver's buffer are truncated.

use crate::config::WireFormat;
use crate::{DeeplinkError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read one message in the given format.
///
/// `max` is the frame cap for `Framed` and the read buffer for `Raw`.
/// Returns `None` when the peer closed without sending anything.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    format: WireFormat,
    max: usize,
) -> Result<Option<String>> {
    match format {
        WireFormat::Framed => {
            let Some(payload) = read_frame(reader, max).await? else {
                return Ok(None);
            };
            let message = String::from_utf8(payload).map_err(|e| DeeplinkError::InvalidPayload {
                message: format!("invalid UTF-8 in frame: {}", e),
            })?;
            Ok(Some(message))
        }
        WireFormat::Raw => {
            let payload = read_raw(reader, max).await?;
            if payload.is_empty() {
                return Ok(None);
            }
            // A truncated message can end mid-character.
            Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
        }
    }
}

/// Write one message in the given format and flush it.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    format: WireFormat,
    message: &str,
) -> Result<()> {
    match format {
        WireFormat::Framed => write_frame(writer, message.as_bytes()).await,
        WireFormat::Raw => {
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        }
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF before the header.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        return Err(DeeplinkError::MessageTooLarge { size: len, max });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| DeeplinkError::MessageTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read until EOF or until `buffer_size` bytes have arrived.
async fn read_raw<R: AsyncReadExt + Unpin>(reader: &mut R, buffer_size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; buffer_size];
    let mut filled = 0;

    while filled < buffer_size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf)
}
