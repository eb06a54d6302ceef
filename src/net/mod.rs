//! Peer transport: one request then one response per connection, each
//! framed as a u32 big-endian length followed by UTF-8 JSON.

use std::time::Duration;

use log::warn;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::error::NodeError;
use crate::proto::Response;
use crate::utils::config::Config;
use crate::utils::constants::MAX_FRAME_BYTES;
use crate::utils::types::Address;

pub async fn read_message<R>(reader: &mut R) -> Result<Value, NodeError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NodeError::Frame(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_BYTES
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// One complete exchange against a peer, bounded by a single timeout over
/// connect, send and receive.
pub async fn send_request(
    addr: &Address,
    message: &Value,
    timeout_millis: u64,
) -> Result<Response, NodeError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr.as_str()).await?;
        write_message(&mut stream, message).await?;
        read_message(&mut stream).await
    };
    match timeout(Duration::from_millis(timeout_millis), exchange).await {
        Ok(result) => Ok(serde_json::from_value(result?)?),
        Err(_) => Err(NodeError::Timeout {
            addr: addr.clone(),
            millis: timeout_millis,
        }),
    }
}

/// Join-time variant: the peer may still be binding its listener, so
/// connection failures are retried a bounded number of times.
pub async fn send_request_with_retry(
    addr: &Address,
    message: &Value,
    config: &Config,
) -> Result<Response, NodeError> {
    let mut retries = 0;
    loop {
        match send_request(addr, message, config.request_timeout_millis).await {
            Ok(response) => return Ok(response),
            Err(NodeError::Io(e)) if retries < config.max_connection_retries => {
                retries += 1;
                warn!("Failed to reach {}: {}. Retrying...", addr, e);
                sleep(Duration::from_millis(config.connection_retry_millis)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
