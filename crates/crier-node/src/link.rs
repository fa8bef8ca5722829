use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::Bytes;
use crier_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use crier_transport::TransportError;
use tracing::debug;

use crate::error::{NodeError, Result};

struct Conn {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

/// The peer's outbound control connection: one request, one reply.
///
/// Connects lazily. A reply timeout keeps the connection (the broadcaster
/// may just be slow); a transport error tears it down so the next request
/// starts from a clean connection instead of repeating a broken one.
pub struct ControlLink {
    addr: SocketAddr,
    connect_timeout: Duration,
    reply_timeout: Duration,
    conn: Option<Conn>,
}

impl ControlLink {
    pub fn new(addr: SocketAddr, connect_timeout: Duration, reply_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            reply_timeout,
            conn: None,
        }
    }

    /// Drop the current connection; the next request reconnects.
    pub fn reset(&mut self) {
        self.conn = None;
    }

    /// Send one request frame and wait for its single reply.
    pub fn request(&mut self, body: &[u8]) -> Result<Bytes> {
        let conn = self.ensure_connected()?;
        match Self::roundtrip(conn, body) {
            Ok(reply) => Ok(reply),
            Err(FrameError::TimedOut) => Err(NodeError::ReplyTimeout(self.reply_timeout)),
            Err(err) => {
                debug!(addr = %self.addr, %err, "control connection torn down");
                self.conn = None;
                Err(err.into())
            }
        }
    }

    fn roundtrip(conn: &mut Conn, body: &[u8]) -> std::result::Result<Bytes, FrameError> {
        conn.writer.send(body)?;
        conn.reader.read_frame()
    }

    fn ensure_connected(&mut self) -> Result<&mut Conn> {
        if self.conn.is_none() {
            let stream = crier_transport::connect(self.addr, self.connect_timeout)?;
            let read_stream = stream.try_clone().map_err(TransportError::Io)?;

            let config = FrameConfig {
                read_timeout: Some(self.reply_timeout),
                write_timeout: Some(self.reply_timeout),
                ..FrameConfig::default()
            };

            let reader = FrameReader::with_config_tcp(read_stream, config.clone())?;
            let writer = FrameWriter::with_config_tcp(stream, config)?;
            self.conn = Some(Conn { reader, writer });
        }
        Ok(self.conn.as_mut().expect("connection just established"))
    }
}
