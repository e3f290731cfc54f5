//! Newline-delimited JSON framing for the stdio transport.
//!
//! One message per line in each direction. Serialised output never contains a
//! raw newline, so framing needs no escaping. Only protocol traffic goes to
//! stdout; logs go to stderr.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Line-framed reader/writer pair, stdin/stdout unless built with
/// [`StdioTransport::from_parts`].
pub struct StdioTransport<R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout> {
    reader: R,
    // Bytes of a line whose read was interrupted by a `select!`.
    partial: Vec<u8>,
    writer: W,
}

impl StdioTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader,
            partial: Vec::new(),
            writer,
        }
    }

    /// Next line without its terminator (`\n` or `\r\n`); `None` at EOF.
    ///
    /// Cancel-safe, so it can sit in a `select!`.
    ///
    /// # Errors
    ///
    /// I/O failures. A line that is not UTF-8 is consumed and reported as
    /// `InvalidData`; the next call reads the following line.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.partial).await?;
        if read == 0 && self.partial.is_empty() {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.partial);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Writes `message` followed by `\n` and flushes.
    ///
    /// # Errors
    ///
    /// I/O failures, or `InvalidData` if `message` cannot be serialised.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        let mut frame = serde_json::to_vec(message).map_err(io::Error::from)?;
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }
}
