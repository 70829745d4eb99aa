//! Buffered line I/O over worker pipes.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Default buffer size for IPC (64KB).
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Buffered line reader for a worker's stdout.
pub struct LineReader<R> {
    reader: BufReader<R>,
    line_buffer: String,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read one line of any length, without its terminator.
    /// Returns `None` on EOF.
    ///
    /// Not cancel-safe: a line cut off by a dropped future is lost, which is
    /// fine because a timed-out reader is never used again.
    pub async fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer).await? == 0 {
            return Ok(None);
        }
        if self.line_buffer.ends_with('\n') {
            self.line_buffer.pop();
        }
        if self.line_buffer.ends_with('\r') {
            self.line_buffer.pop();
        }
        Ok(Some(&self.line_buffer))
    }
}

/// Buffered line writer for a worker's stdin.
pub struct LineWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_reader_writer_roundtrip() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = LineWriter::new(client);
        let mut reader = LineReader::new(server);

        let writes = async move {
            writer.write_line("hello").await.unwrap();
            writer.write_line("world\n").await.unwrap();
            writer.write_line("").await.unwrap();
            drop(writer);
        };
        let reads = async {
            assert_eq!(reader.read_line().await.unwrap(), Some("hello"));
            assert_eq!(reader.read_line().await.unwrap(), Some("world"));
            assert_eq!(reader.read_line().await.unwrap(), Some(""));
            // Writer dropped: EOF
            assert_eq!(reader.read_line().await.unwrap(), None);
        };
        tokio::join!(writes, reads);
    }

    #[tokio::test]
    async fn test_long_line_exceeds_buffers() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = LineWriter::new(client);
        let mut reader = LineReader::new(server);
        let long = "x".repeat(DEFAULT_BUFFER_SIZE * 3);

        let expected = long.clone();
        let writes = async move {
            writer.write_line(&long).await.unwrap();
        };
        let reads = async {
            let line = reader.read_line().await.unwrap().map(str::to_owned);
            assert_eq!(line.as_deref(), Some(expected.as_str()));
        };
        tokio::join!(writes, reads);
    }

    #[tokio::test]
    async fn test_crlf_handling() {
        let data: &[u8] = b"line1\r\nline2\n";
        let mut reader = LineReader::new(data);
        assert_eq!(reader.read_line().await.unwrap(), Some("line1"));
        assert_eq!(reader.read_line().await.unwrap(), Some("line2"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }
}
