//! Newline-delimited JSON framing for the worker process pipes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{mlog_trace, Error, Result};

/// Serialize one message as a single line, newline included.
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line. Anything that is not a known message is a protocol error.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::Protocol(format!("unrecognized message {:?}: {}", line.trim(), e)))
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let line = encode(message)?;
    mlog_trace!("ipc >> {}", line.trim_end());
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. Blank lines are skipped; `None` means end of stream.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.trim().is_empty() {
            continue;
        }
        mlog_trace!("ipc << {}", line.trim_end());
        return decode(&line).map(Some);
    }
}
