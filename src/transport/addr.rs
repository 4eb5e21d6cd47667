//! Endpoint descriptions and address resolution
//!
//! Resolution is never cached: controllers resolve again on every attempt
//! so that changing DNS answers are picked up.

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Address family constraint
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Take whatever the resolver returns first
    #[default]
    Unspecified,
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
}

impl AddressFamily {
    /// Family of a concrete address
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Whether `addr` satisfies this constraint
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Unspecified => true,
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }

    /// Any-address of this family; IPv4 when unspecified
    pub fn wildcard(&self) -> IpAddr {
        match self {
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            AddressFamily::Ipv4 | AddressFamily::Unspecified => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Replace `Unspecified` with `fallback`
    pub fn or(self, fallback: AddressFamily) -> Self {
        match self {
            AddressFamily::Unspecified => fallback,
            family => family,
        }
    }
}

/// Socket type of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Connection oriented byte stream
    Stream,
    /// Datagrams
    Datagram,
}

impl From<SocketType> for socket2::Type {
    fn from(t: SocketType) -> Self {
        match t {
            SocketType::Stream => socket2::Type::STREAM,
            SocketType::Datagram => socket2::Type::DGRAM,
        }
    }
}

/// Transport protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl From<Protocol> for socket2::Protocol {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Tcp => socket2::Protocol::TCP,
            Protocol::Udp => socket2::Protocol::UDP,
        }
    }
}

/// A host/port pair with its resolution constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or literal; `None` means the any-address
    pub host: Option<String>,
    /// Decimal port
    pub port: String,
    /// Family constraint
    pub family: AddressFamily,
    /// Socket type
    pub socket_type: SocketType,
    /// Protocol
    pub protocol: Protocol,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(
        host: Option<&str>,
        port: &str,
        family: AddressFamily,
        socket_type: SocketType,
        protocol: Protocol,
    ) -> Self {
        Endpoint {
            host: host.map(str::to_string),
            port: port.to_string(),
            family,
            socket_type,
            protocol,
        }
    }

    /// Parse the port, which must be decimal
    pub fn port_number(&self) -> Result<u16> {
        self.port
            .parse::<u16>()
            .map_err(|_| RelayError::Resolution(format!("invalid port: {:?}", self.port)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) if host.contains(':') && !host.starts_with('[') => {
                write!(f, "[{}]:{}", host, self.port)
            }
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// Result of a resolution; immutable once produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    address: SocketAddr,
    socket_type: SocketType,
    protocol: Protocol,
}

impl ResolvedAddress {
    /// Create a resolved address
    pub fn new(address: SocketAddr, socket_type: SocketType, protocol: Protocol) -> Self {
        ResolvedAddress {
            address,
            socket_type,
            protocol,
        }
    }

    /// The socket address
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Concrete family of the address
    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    /// Socket type
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

/// Resolves endpoints to concrete addresses
#[async_trait]
pub trait Resolver: Debug + Send + Sync + 'static {
    /// Resolve `endpoint`, honoring its family constraint
    async fn resolve(&self, endpoint: &Endpoint) -> Result<ResolvedAddress>;
}

/// Resolver backed by the system's blocking name service
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, endpoint: &Endpoint) -> Result<ResolvedAddress> {
        let port = endpoint.port_number()?;
        let finish = |addr: SocketAddr| {
            ResolvedAddress::new(addr, endpoint.socket_type, endpoint.protocol)
        };

        let host = match &endpoint.host {
            None => return Ok(finish(SocketAddr::new(endpoint.family.wildcard(), port))),
            Some(host) => host.trim_start_matches('[').trim_end_matches(']').to_string(),
        };

        if let Ok(ip) = host.parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, port);
            if !endpoint.family.matches(&addr) {
                return Err(RelayError::Resolution(format!(
                    "{} is not an {:?} address",
                    ip, endpoint.family
                )));
            }
            return Ok(finish(addr));
        }

        // ToSocketAddrs is blocking
        let family = endpoint.family;
        let name = host.clone();
        let candidates = tokio::task::spawn_blocking(move || {
            (name.as_str(), port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>())
        })
        .await
        .map_err(|e| RelayError::Resolution(format!("resolver task failed: {}", e)))?
        .map_err(|e| RelayError::Resolution(format!("{}: {}", host, e)))?;

        candidates
            .into_iter()
            .find(|addr| family.matches(addr))
            .map(finish)
            .ok_or_else(|| {
                RelayError::Resolution(format!("no {:?} address found for {}", family, host))
            })
    }
}
