use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A bound TCP listener polled non-blockingly by a serve loop.
///
/// Accepted streams are switched to non-blocking mode and `TCP_NODELAY`
/// so the serve loop can interleave many connections without stalling on
/// any single one.
pub struct TcpEndpoint {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on `addr`.
    ///
    /// Bind failure (port in use, invalid address) is returned to the
    /// caller; during broadcaster election it means another process won.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr,
            source: e,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind { addr, source: e })?;
        let addr = listener.local_addr().map_err(TransportError::Io)?;

        info!(%addr, "listening");

        Ok(Self { listener, addr })
    }

    /// Accept a pending connection, if any.
    ///
    /// Returns `Ok(None)` when no connection is waiting; never blocks.
    pub fn try_accept(&self) -> Result<Option<TcpStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true).map_err(TransportError::Accept)?;
                let _ = stream.set_nodelay(true);
                debug!(%peer, "accepted connection");
                Ok(Some(stream))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Connect to `addr` within `timeout`.
///
/// The returned stream is blocking; callers apply their own read/write
/// timeouts.
pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| TransportError::Connect { addr, source: e })?;
    let _ = stream.set_nodelay(true);
    debug!(%addr, "connected");
    Ok(stream)
}

/// Resolve a configured address string and port for binding.
pub fn bind_addr(address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = address.parse().map_err(|e| TransportError::Addr {
        address: address.to_string(),
        source: e,
    })?;
    Ok(SocketAddr::new(ip, port))
}

/// Resolve a configured address string and port for connecting.
///
/// An unspecified bind address (`0.0.0.0` / `::`) is rewritten to
/// loopback: the broadcaster listens on all interfaces, peers reach it
/// locally.
pub fn connect_addr(address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = address.parse().map_err(|e| TransportError::Addr {
        address: address.to_string(),
        source: e,
    })?;
    let ip = if ip.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        ip
    };
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn loopback_any() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn bind_accept_connect() {
        let endpoint = TcpEndpoint::bind(loopback_any()).unwrap();
        assert!(endpoint.try_accept().unwrap().is_none());

        let mut client = connect(endpoint.local_addr(), Duration::from_millis(500)).unwrap();

        let mut server = loop {
            if let Some(stream) = endpoint.try_accept().unwrap() {
                break stream;
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        client.write_all(b"hello").unwrap();

        server.set_nonblocking(false).unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn bind_conflict_is_bind_error() {
        let endpoint = TcpEndpoint::bind(loopback_any()).unwrap();
        let result = TcpEndpoint::bind(endpoint.local_addr());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn connect_to_dead_port_fails() {
        let endpoint = TcpEndpoint::bind(loopback_any()).unwrap();
        let addr = endpoint.local_addr();
        drop(endpoint);

        let result = connect(addr, Duration::from_millis(200));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn connect_addr_rewrites_unspecified() {
        let addr = connect_addr("0.0.0.0", 4000).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(addr.port(), 4000);

        let addr = connect_addr("127.0.0.1", 4001).unwrap();
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[test]
    fn bad_address_is_addr_error() {
        assert!(matches!(
            bind_addr("not-an-ip", 4000),
            Err(TransportError::Addr { .. })
        ));
    }
}
