//! Socket plumbing for inbound peer connections

mod port_seq;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use port_seq::{is_valid_port, PortSequence};
pub use transport::{TcpTransport, TcpTransportFactory, Transport, TransportFactory};
