use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read side of a line-oriented connection.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    buf: String,
}

impl LineReader {
    pub fn new(read_half: OwnedReadHalf) -> Self {
        Self {
            inner: BufReader::new(read_half),
            buf: String::new(),
        }
    }

    /// Next line without its terminator, or `None` on a clean EOF.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        let n = self.inner.read_line(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// A TCP connection framed as newline-terminated text lines.
pub struct LineConnection {
    reader: LineReader,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl LineConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: LineReader::new(read_half),
            writer,
            peer,
        })
    }

    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.reader.read_line().await
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Sends one line and waits for exactly one line back.
    pub async fn request(&mut self, line: &str) -> io::Result<String> {
        self.write_line(line).await?;
        self.read_line()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"))
    }

    pub fn into_split(self) -> (LineReader, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Connects to a storage node and consumes its welcome line.
pub async fn connect_node(addr: SocketAddr) -> io::Result<LineConnection> {
    let mut conn = LineConnection::connect(addr).await?;
    match conn.read_line().await? {
        Some(welcome) => debug!(%addr, %welcome, "connected to node"),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "node closed connection before welcome",
            ));
        }
    }
    Ok(conn)
}

/// Spawns the task that owns a socket's write half. Lines sent on the returned channel
/// are written in order; the task ends when every sender is dropped or a write fails.
pub fn spawn_writer(mut writer: OwnedWriteHalf) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let result = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
            .await;

            if let Err(e) = result {
                warn!("Writer task stopping: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    tx
}
