//! Line-framed async IPC over any byte stream.
//!
//! The master wraps a child's stdin/stdout; the worker wraps its own.
//! Blank lines are skipped.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines};

use crate::error::IpcError;
use crate::protocol::{decode_line, encode_line};

/// Reads one message per line.
pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next decoded message, or `None` on EOF.
    ///
    /// A malformed line yields `IpcError::Decode`; the reader stays usable.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, IpcError> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return decode_line(&line).map(Some),
            }
        }
    }
}

/// Writes one message per line, flushing after each.
pub struct MessageWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), IpcError> {
        let line = encode_line(msg)?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}
