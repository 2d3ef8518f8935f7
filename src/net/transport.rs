//! Transport Abstraction Layer
//!
//! The listener and the handshake units talk to sockets through the
//! [`Transport`] trait so that the accept loop never blocks the scheduler:
//! every socket is switched to non-blocking mode and readiness is checked
//! with a zero-timeout poll before any accept or read.

use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{EngineError, NetworkErrorKind, Result};

/// Backlog passed to `listen(2)`
const LISTEN_BACKLOG: i32 = 128;

/// Non-blocking stream socket used for peer connections
pub trait Transport: Send {
    /// Bind to `port` on the transport's local address
    fn bind(&mut self, port: u16) -> Result<()>;

    /// Start listening for incoming connections
    fn begin_listen(&mut self) -> Result<()>;

    /// Switch the socket to non-blocking mode
    fn set_non_blocking(&mut self) -> Result<()>;

    /// Zero-timeout readiness check. For a listening transport, readable
    /// means a connection (or an accept error) is pending.
    fn poll_readable(&mut self) -> Result<bool>;

    /// Accept one pending connection
    fn accept_connection(&mut self) -> Result<Box<dyn Transport>>;

    /// Remote address of a connected transport
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// Local address the transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Read available bytes; returns `WouldBlock` when none are pending
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Release the underlying socket
    fn close(&mut self);
}

/// Creates fresh, unbound transports
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn() -> Result<Box<dyn Transport>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn Transport>> {
        self()
    }
}

/// Factory for [`TcpTransport`] bound to a fixed local address
#[derive(Debug, Clone, Copy)]
pub struct TcpTransportFactory {
    bind_address: IpAddr,
}

impl TcpTransportFactory {
    pub fn new(bind_address: IpAddr) -> Self {
        Self { bind_address }
    }
}

impl TransportFactory for TcpTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(TcpTransport::new(self.bind_address)?))
    }
}

/// TCP transport built on `socket2`
pub struct TcpTransport {
    socket: Option<Socket>,
    bind_address: IpAddr,
    listening: bool,
    /// Outcome of an accept performed by `poll_readable`
    pending: Option<io::Result<(Socket, SockAddr)>>,
}

impl TcpTransport {
    /// Create an unbound TCP socket for `bind_address`'s address family
    pub fn new(bind_address: IpAddr) -> Result<Self> {
        let domain = Domain::for_address(SocketAddr::new(bind_address, 0));
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| bind_error("socket", e))?;

        // Allow quick rebinding of a port left in TIME_WAIT
        socket
            .set_reuse_address(true)
            .map_err(|e| bind_error("SO_REUSEADDR", e))?;

        Ok(Self {
            socket: Some(socket),
            bind_address,
            listening: false,
            pending: None,
        })
    }

    fn from_accepted(socket: Socket) -> Self {
        let bind_address = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .map(|a| a.ip())
            .unwrap_or(IpAddr::from([0, 0, 0, 0]));
        Self {
            socket: Some(socket),
            bind_address,
            listening: false,
            pending: None,
        }
    }

    fn socket(&self) -> Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| EngineError::network(NetworkErrorKind::Other, "Socket is closed"))
    }
}

fn bind_error(step: &str, e: io::Error) -> EngineError {
    EngineError::network(NetworkErrorKind::Bind, format!("{} failed: {}", step, e))
}

fn accept_error(e: io::Error) -> EngineError {
    EngineError::network(NetworkErrorKind::Accept, format!("accept failed: {}", e))
}

fn to_socket_addr(addr: SockAddr) -> Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        EngineError::network(NetworkErrorKind::Other, "Address is not an IP socket address")
    })
}

impl Transport for TcpTransport {
    fn bind(&mut self, port: u16) -> Result<()> {
        let addr = SocketAddr::new(self.bind_address, port);
        self.socket()?
            .bind(&addr.into())
            .map_err(|e| bind_error("bind", e))
    }

    fn begin_listen(&mut self) -> Result<()> {
        self.socket()?
            .listen(LISTEN_BACKLOG)
            .map_err(|e| bind_error("listen", e))?;
        self.listening = true;
        Ok(())
    }

    fn set_non_blocking(&mut self) -> Result<()> {
        self.socket()?
            .set_nonblocking(true)
            .map_err(|e| EngineError::network(NetworkErrorKind::Other, e.to_string()))
    }

    fn poll_readable(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }

        if self.listening {
            return match self.socket()?.accept() {
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    Ok(false)
                }
                outcome => {
                    self.pending = Some(outcome);
                    Ok(true)
                }
            };
        }

        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        match self.socket()?.peek(&mut probe) {
            // A zero-length peek means EOF, which a read reports immediately
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(EngineError::network(
                NetworkErrorKind::ConnectionReset,
                e.to_string(),
            )),
        }
    }

    fn accept_connection(&mut self) -> Result<Box<dyn Transport>> {
        let outcome = match self.pending.take() {
            Some(outcome) => outcome,
            None => self.socket()?.accept(),
        };
        let (socket, _) = outcome.map_err(accept_error)?;
        Ok(Box::new(TcpTransport::from_accepted(socket)))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        let addr = self.socket()?.peer_addr().map_err(|e| {
            EngineError::network(NetworkErrorKind::ConnectionReset, e.to_string())
        })?;
        to_socket_addr(addr)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self
            .socket()?
            .local_addr()
            .map_err(|e| EngineError::network(NetworkErrorKind::Other, e.to_string()))?;
        to_socket_addr(addr)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.as_mut() {
            Some(socket) => socket.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket is closed")),
        }
    }

    fn close(&mut self) {
        self.pending = None;
        self.listening = false;
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpListener, TcpStream};
    use std::time::Duration;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn listening_transport() -> TcpTransport {
        let mut transport = TcpTransport::new(loopback()).unwrap();
        transport.bind(0).unwrap();
        transport.begin_listen().unwrap();
        transport.set_non_blocking().unwrap();
        transport
    }

    fn wait_readable(transport: &mut dyn Transport) -> bool {
        for _ in 0..200 {
            if transport.poll_readable().unwrap() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_idle_listener_is_not_readable() {
        let mut transport = listening_transport();
        assert!(!transport.poll_readable().unwrap());
    }

    #[test]
    fn test_accept_reports_peer_and_reads() {
        let mut listener = listening_transport();
        let local = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(local).unwrap();
        assert!(wait_readable(&mut listener));

        let mut conn = listener.accept_connection().unwrap();
        conn.set_non_blocking().unwrap();
        assert_eq!(conn.peer_addr().unwrap(), client.local_addr().unwrap());

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        client.write_all(b"hello").unwrap();
        assert!(wait_readable(conn.as_mut()));
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_bind_conflict_is_bind_error() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut transport = TcpTransport::new(loopback()).unwrap();
        let result = transport.bind(port).and_then(|_| transport.begin_listen());
        match result {
            Err(EngineError::Network { kind, .. }) => assert_eq!(kind, NetworkErrorKind::Bind),
            other => panic!("expected bind failure, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_transport_errors() {
        let mut transport = listening_transport();
        transport.close();
        assert!(transport.local_addr().is_err());
        assert!(transport.accept_connection().is_err());
    }
}
