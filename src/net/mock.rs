//! Scripted in-memory transports for unit tests

use std::collections::{HashSet, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::transport::{Transport, TransportFactory};
use crate::error::{EngineError, NetworkErrorKind, Result};

/// Shared state behind every transport a [`MockNetwork`] hands out
#[derive(Default)]
pub struct MockState {
    /// Ports on which bind + listen succeed
    pub bindable: HashSet<u16>,
    /// Ports where bind succeeds but listen fails
    pub listen_fails: HashSet<u16>,
    /// Every port passed to `bind`, in order
    pub bind_attempts: Vec<u16>,
    /// Number of transports created
    pub created: usize,
    /// Number of transports closed
    pub closed: usize,
    /// Connections waiting on the listening transport
    pub backlog: VecDeque<Result<MockConn>>,
    /// Number of `accept_connection` calls
    pub accept_calls: usize,
    /// Number of `poll_readable` calls on a listening transport
    pub listener_polls: usize,
    /// Upcoming listener polls that fail
    pub poll_failures: usize,
}

/// Connection queued for acceptance
pub struct MockConn {
    pub addr: SocketAddr,
    pub stream: Arc<Mutex<MockStream>>,
}

/// Bytes a connected mock transport will yield
#[derive(Default)]
pub struct MockStream {
    pub data: VecDeque<u8>,
    pub eof: bool,
    pub closed: bool,
}

#[derive(Clone, Default)]
pub struct MockNetwork {
    pub state: Arc<Mutex<MockState>>,
}

impl MockNetwork {
    pub fn with_bindable(ports: &[u16]) -> Self {
        let net = Self::default();
        net.state.lock().bindable.extend(ports.iter().copied());
        net
    }

    /// Queue an inbound connection and return the handle used to feed it
    pub fn push_connection(&self, addr: &str) -> Arc<Mutex<MockStream>> {
        let stream = Arc::new(Mutex::new(MockStream::default()));
        self.state.lock().backlog.push_back(Ok(MockConn {
            addr: addr.parse().unwrap(),
            stream: stream.clone(),
        }));
        stream
    }

    /// Queue an accept that fails
    pub fn push_accept_error(&self) {
        self.state.lock().backlog.push_back(Err(EngineError::network(
            NetworkErrorKind::Accept,
            "connection aborted",
        )));
    }

    pub fn factory(&self) -> Arc<dyn TransportFactory> {
        let net = self.clone();
        Arc::new(move || -> Result<Box<dyn Transport>> {
            net.state.lock().created += 1;
            Ok(Box::new(MockTransport::Unbound {
                state: net.state.clone(),
                port: None,
            }))
        })
    }
}

/// Connected end of an accepted mock connection
pub fn connected(addr: SocketAddr, stream: Arc<Mutex<MockStream>>) -> Box<dyn Transport> {
    Box::new(MockTransport::Connected { addr, stream })
}

pub enum MockTransport {
    Unbound {
        state: Arc<Mutex<MockState>>,
        port: Option<u16>,
    },
    Listening {
        state: Arc<Mutex<MockState>>,
        port: u16,
    },
    Connected {
        addr: SocketAddr,
        stream: Arc<Mutex<MockStream>>,
    },
    Closed,
}

impl Transport for MockTransport {
    fn bind(&mut self, port: u16) -> Result<()> {
        match self {
            Self::Unbound { state, port: bound } => {
                let mut s = state.lock();
                s.bind_attempts.push(port);
                if s.bindable.contains(&port) || s.listen_fails.contains(&port) {
                    *bound = Some(port);
                    Ok(())
                } else {
                    Err(EngineError::network(
                        NetworkErrorKind::Bind,
                        "Address already in use",
                    ))
                }
            }
            _ => Err(EngineError::network(NetworkErrorKind::Bind, "not unbound")),
        }
    }

    fn begin_listen(&mut self) -> Result<()> {
        let (state, port) = match self {
            Self::Unbound {
                state,
                port: Some(port),
            } => (state.clone(), *port),
            _ => return Err(EngineError::network(NetworkErrorKind::Bind, "not bound")),
        };
        if state.lock().listen_fails.contains(&port) {
            return Err(EngineError::network(NetworkErrorKind::Bind, "listen failed"));
        }
        *self = Self::Listening { state, port };
        Ok(())
    }

    fn set_non_blocking(&mut self) -> Result<()> {
        match self {
            Self::Closed => Err(EngineError::network(NetworkErrorKind::Other, "closed")),
            _ => Ok(()),
        }
    }

    fn poll_readable(&mut self) -> Result<bool> {
        match self {
            Self::Listening { state, .. } => {
                let mut s = state.lock();
                s.listener_polls += 1;
                if s.poll_failures > 0 {
                    s.poll_failures -= 1;
                    return Err(EngineError::network(NetworkErrorKind::Other, "poll failed"));
                }
                Ok(!s.backlog.is_empty())
            }
            Self::Connected { stream, .. } => {
                let s = stream.lock();
                Ok(!s.data.is_empty() || s.eof)
            }
            _ => Ok(false),
        }
    }

    fn accept_connection(&mut self) -> Result<Box<dyn Transport>> {
        match self {
            Self::Listening { state, .. } => {
                let mut s = state.lock();
                s.accept_calls += 1;
                match s.backlog.pop_front() {
                    Some(Ok(conn)) => Ok(connected(conn.addr, conn.stream)),
                    Some(Err(e)) => Err(e),
                    None => Err(EngineError::network(NetworkErrorKind::Accept, "would block")),
                }
            }
            _ => Err(EngineError::network(NetworkErrorKind::Accept, "not listening")),
        }
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        match self {
            Self::Connected { addr, .. } => Ok(*addr),
            _ => Err(EngineError::network(NetworkErrorKind::Other, "not connected")),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Self::Listening { port, .. } => Ok(SocketAddr::from(([0, 0, 0, 0], *port))),
            _ => Err(EngineError::network(NetworkErrorKind::Other, "not listening")),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Connected { stream, .. } => {
                let mut s = stream.lock();
                if s.data.is_empty() {
                    return if s.eof {
                        Ok(0)
                    } else {
                        Err(io::ErrorKind::WouldBlock.into())
                    };
                }
                let n = buf.len().min(s.data.len());
                for (slot, byte) in buf.iter_mut().zip(s.data.drain(..n)) {
                    *slot = byte;
                }
                Ok(n)
            }
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self) {
        match std::mem::replace(self, Self::Closed) {
            Self::Unbound { state, .. } | Self::Listening { state, .. } => {
                state.lock().closed += 1;
            }
            Self::Connected { stream, .. } => stream.lock().closed = true,
            Self::Closed => {}
        }
    }
}
