//! TCP transport implementation
//!
//! Provides plain TCP connections with optional local bind.

use super::{open_socket, Established, Protocol, ResolvedAddress, SocketType, Transport};
use crate::bind::{BindSpec, PortPicker};
use crate::error::{RelayError, Result};
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::options::{OptionSet, Phase};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Connection timeout
    connect_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn socket_type(&self) -> SocketType {
        SocketType::Stream
    }

    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn connect(
        &self,
        remote: &ResolvedAddress,
        local: &BindSpec,
        options: &mut OptionSet,
        picker: &mut PortPicker,
    ) -> Result<Established<TcpStream>> {
        let addr = remote.address();
        let socket = open_socket(remote, local, options, picker)?;
        let socket = TcpSocket::from_std_stream(socket.into());

        let stream = match tokio::time::timeout(self.connect_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(RelayError::Connect { addr, source }),
            Err(_) => {
                return Err(RelayError::Connect {
                    addr,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        options
            .apply_phase(&socket2::SockRef::from(&stream), Phase::Late)
            .map_err(RelayError::Socket)?;

        let local_addr = stream.local_addr()?;
        tracing::debug!("TCP connection established {} -> {}", local_addr, addr);

        Ok(Established {
            stream,
            local_addr,
            peer_addr: addr,
        })
    }
}
