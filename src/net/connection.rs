// TCP connection wrapper
// Split halves of one device socket; byte-oriented, no line framing

use tokio::net::TcpStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use std::net::SocketAddr;
use std::io;

/// Represents a single TCP connection to a device.
pub struct Connection {
    reader: tokio::io::ReadHalf<TcpStream>,
    writer: BufWriter<tokio::io::WriteHalf<TcpStream>>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Connection {
            reader: read_half,
            writer: BufWriter::new(write_half),
            peer_addr,
        }
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read whatever bytes are available, up to `buf.len()`.
    /// Returns 0 on EOF.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }

    /// Write raw bytes to the connection and flush. Ack byte strings are
    /// small; devices expect them promptly.
    pub async fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}
