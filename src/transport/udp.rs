//! UDP transport implementation
//!
//! A UDP "connection" is a datagram socket with a fixed peer.

use super::{open_socket, Established, Protocol, ResolvedAddress, SocketType, Transport};
use crate::bind::{BindSpec, PortPicker};
use crate::error::{RelayError, Result};
use crate::options::{OptionSet, Phase};
use async_trait::async_trait;
use tokio::net::UdpSocket;

/// UDP transport for connected datagram sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpTransport;

#[async_trait]
impl Transport for UdpTransport {
    type Stream = UdpSocket;

    fn socket_type(&self) -> SocketType {
        SocketType::Datagram
    }

    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn connect(
        &self,
        remote: &ResolvedAddress,
        local: &BindSpec,
        options: &mut OptionSet,
        picker: &mut PortPicker,
    ) -> Result<Established<UdpSocket>> {
        let addr = remote.address();
        let socket = open_socket(remote, local, options, picker)?;

        socket
            .connect(&addr.into())
            .map_err(|source| RelayError::Connect { addr, source })?;
        options
            .apply_phase(&socket, Phase::Late)
            .map_err(RelayError::Socket)?;

        let socket = UdpSocket::from_std(socket.into())?;
        let local_addr = socket.local_addr()?;
        tracing::debug!("UDP socket connected {} -> {}", local_addr, addr);

        Ok(Established {
            stream: socket,
            local_addr,
            peer_addr: addr,
        })
    }
}
