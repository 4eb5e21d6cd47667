//! Transport module for Sockrelay
//!
//! This module provides address resolution and the socket
//! create/bind/connect step for each supported protocol (TCP, UDP).

mod addr;
mod tcp;
mod udp;

pub use addr::{
    AddressFamily, Endpoint, Protocol, ResolvedAddress, Resolver, SocketType, SystemResolver,
};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::bind::{bind_in_range, BindSpec, PortPicker, RangeBindError};
use crate::error::{RelayError, Result};
use crate::options::{OptionSet, Phase};
use async_trait::async_trait;
use socket2::{Domain, Socket};
use std::fmt::Debug;
use std::net::SocketAddr;
use tracing::debug;

/// An established connection and its endpoints
#[derive(Debug)]
pub struct Established<S> {
    /// The connected stream or socket
    pub stream: S,
    /// Local address after bind/connect
    pub local_addr: SocketAddr,
    /// Remote address
    pub peer_addr: SocketAddr,
}

/// Transport trait for different connection types
///
/// One call performs one attempt: create a socket, apply the EARLY options,
/// bind as requested by `local`, connect to `remote`, then apply the LATE
/// options. `options` is the working copy of this attempt and is consumed.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: Debug + Send + 'static;

    /// Socket type this transport creates
    fn socket_type(&self) -> SocketType;

    /// Protocol this transport speaks
    fn protocol(&self) -> Protocol;

    /// Perform one connection attempt
    async fn connect(
        &self,
        remote: &ResolvedAddress,
        local: &BindSpec,
        options: &mut OptionSet,
        picker: &mut PortPicker,
    ) -> Result<Established<Self::Stream>>;
}

/// Create a socket for `remote`, apply EARLY options and bind per `local`
pub(crate) fn open_socket(
    remote: &ResolvedAddress,
    local: &BindSpec,
    options: &mut OptionSet,
    picker: &mut PortPicker,
) -> Result<Socket> {
    let domain = Domain::for_address(remote.address());
    let mut socket = Socket::new(
        domain,
        remote.socket_type().into(),
        Some(remote.protocol().into()),
    )
    .map_err(RelayError::Socket)?;

    options
        .apply_phase(&socket, Phase::Early)
        .map_err(RelayError::Socket)?;

    match *local {
        BindSpec::None => {}
        BindSpec::Explicit(addr) => {
            socket
                .bind(&addr.into())
                .map_err(|source| RelayError::Bind { addr, source })?;
            debug!("Bound local address {}", addr);
        }
        BindSpec::PortRange { ip, range } => {
            match bind_in_range(&mut socket, ip, range, picker) {
                Ok(_) => {}
                Err(RangeBindError::Exhausted) => {
                    return Err(RelayError::PortsExhausted {
                        low: range.low(),
                        high: range.high(),
                    })
                }
                Err(RangeBindError::Fatal(source)) => {
                    return Err(RelayError::Bind {
                        addr: SocketAddr::new(ip, 0),
                        source,
                    })
                }
            }
        }
    }

    socket.set_nonblocking(true).map_err(RelayError::Socket)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::PortRange;
    use crate::options::SocketOption;

    fn remote() -> ResolvedAddress {
        ResolvedAddress::new(
            "127.0.0.1:9".parse().unwrap(),
            SocketType::Stream,
            Protocol::Tcp,
        )
    }

    #[test]
    fn test_open_socket_without_bind() {
        let mut options = OptionSet::new().with(SocketOption::ReuseAddr(true));
        let mut picker = PortPicker::from_seed(0);
        let socket = open_socket(&remote(), &BindSpec::None, &mut options, &mut picker).unwrap();
        assert!(socket.reuse_address().unwrap());
        assert!(options.is_empty());
    }

    #[test]
    fn test_open_socket_explicit_bind() {
        let mut options = OptionSet::new();
        let mut picker = PortPicker::from_seed(0);
        let local = BindSpec::Explicit("127.0.0.1:0".parse().unwrap());
        let socket = open_socket(&remote(), &local, &mut options, &mut picker).unwrap();
        let bound = socket.local_addr().unwrap().as_socket().unwrap();
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
        assert_ne!(bound.port(), 0);
    }

    #[test]
    fn test_open_socket_range_exhausted() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = listener.local_addr().unwrap().port();
        let local = BindSpec::PortRange {
            ip: "127.0.0.1".parse().unwrap(),
            range: PortRange::new(busy, busy).unwrap(),
        };
        let mut options = OptionSet::new();
        let mut picker = PortPicker::from_seed(0);
        let err = open_socket(&remote(), &local, &mut options, &mut picker).unwrap_err();
        assert!(matches!(err, RelayError::PortsExhausted { .. }));
    }

    #[test]
    fn test_open_socket_explicit_bind_in_use() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = listener.local_addr().unwrap();
        let mut options = OptionSet::new();
        let mut picker = PortPicker::from_seed(0);
        let err = open_socket(&remote(), &BindSpec::Explicit(busy), &mut options, &mut picker)
            .unwrap_err();
        assert!(matches!(err, RelayError::Bind { .. }));
    }
}
