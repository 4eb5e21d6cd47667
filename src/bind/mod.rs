//! Local bind preparation
//!
//! Decides from the option set whether an outgoing socket must be bound
//! before connecting, and to what. The options are consumed once by
//! [`BindRequest::prepare`]; the request is then resolved into a
//! [`BindSpec`] on every attempt for the effective address family.

mod range;

pub use range::{bind_in_range, BindProbe, PortPicker, PortRange, RangeBindError};

use crate::error::{RelayError, Result};
use crate::options::{OptionSet, SocketOption};
use crate::transport::{AddressFamily, Endpoint, Protocol, Resolver, SocketType};
use std::net::{IpAddr, SocketAddr};

/// What to bind an outgoing socket to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindSpec {
    /// Let the OS choose
    None,
    /// Exactly this address and port
    Explicit(SocketAddr),
    /// This address with a port searched in `range`
    PortRange {
        /// Local IP, the any-address unless a bind address was given
        ip: IpAddr,
        /// Ports to search
        range: PortRange,
    },
}

impl BindSpec {
    /// Whether an explicit bind call is needed
    pub fn needs_bind(&self) -> bool {
        !matches!(self, BindSpec::None)
    }
}

/// Unresolved local bind configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRequest {
    host: Option<String>,
    port: Option<u16>,
    range: Option<PortRange>,
}

impl BindRequest {
    /// Consume the bind related options from `options`
    ///
    /// A port range combined with an explicit local port (from `bind` or
    /// `sourceport`) is rejected. A range combined with a `bind` host keeps
    /// that host and draws the port from the range.
    pub fn prepare(options: &mut OptionSet) -> Result<Self> {
        let bind = options.retrieve(|o| match o {
            SocketOption::Bind(s) => Some(s.clone()),
            _ => None,
        });
        let source_port = options.retrieve(|o| match o {
            SocketOption::SourcePort(p) => Some(*p),
            _ => None,
        });
        let range = options.retrieve(|o| match o {
            SocketOption::SourcePortRange(r) => Some(*r),
            _ => None,
        });
        let lowport = options.retrieve_flag(&SocketOption::LowPort);

        let (host, bind_port) = match bind.as_deref() {
            Some(spec) => split_bind(spec)?,
            None => (None, None),
        };

        if bind_port.is_some() && source_port.is_some() {
            return Err(conflict("bind port and sourceport"));
        }
        let port = bind_port.or(source_port);

        let range = match (range, lowport) {
            (Some(_), true) => return Err(conflict("sourceport-range and lowport")),
            (Some(r), false) => Some(r),
            (None, true) => Some(PortRange::LOWPORT),
            (None, false) => None,
        };
        if range.is_some() && port.is_some() {
            return Err(conflict("an explicit local port and a source port range"));
        }

        Ok(BindRequest { host, port, range })
    }

    /// Whether the outgoing socket must be bound
    pub fn needs_bind(&self) -> bool {
        self.host.is_some() || self.port.is_some() || self.range.is_some()
    }

    /// The configured source port range
    pub fn range(&self) -> Option<PortRange> {
        self.range
    }

    /// Resolve the request for `family`
    pub async fn resolve<R: Resolver + ?Sized>(
        &self,
        resolver: &R,
        family: AddressFamily,
        socket_type: SocketType,
        protocol: Protocol,
    ) -> Result<BindSpec> {
        if !self.needs_bind() {
            return Ok(BindSpec::None);
        }

        let ip = match &self.host {
            Some(host) => {
                let endpoint =
                    Endpoint::new(Some(host.as_str()), "0", family, socket_type, protocol);
                resolver.resolve(&endpoint).await?.address().ip()
            }
            None => family.wildcard(),
        };

        Ok(match self.range {
            Some(range) => BindSpec::PortRange { ip, range },
            None => BindSpec::Explicit(SocketAddr::new(ip, self.port.unwrap_or(0))),
        })
    }
}

fn conflict(what: &str) -> RelayError {
    RelayError::Config(format!("conflicting bind options: {}", what))
}

/// Split `host`, `host:port`, `:port`, `[v6]:port` or a bare IPv6 literal
pub(crate) fn split_bind(spec: &str) -> Result<(Option<String>, Option<u16>)> {
    let invalid = || RelayError::Config(format!("invalid bind address: {:?}", spec));
    let parse_port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

    if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail {
            "" => None,
            t => Some(parse_port(t.strip_prefix(':').ok_or_else(invalid)?)?),
        };
        return Ok((Some(host.to_string()), port));
    }

    match spec.matches(':').count() {
        0 if spec.is_empty() => Err(invalid()),
        0 => Ok((Some(spec.to_string()), None)),
        1 => {
            let (host, port) = spec.split_once(':').ok_or_else(invalid)?;
            let host = (!host.is_empty()).then(|| host.to_string());
            Ok((host, Some(parse_port(port)?)))
        }
        _ => Ok((Some(spec.to_string()), None)),
    }
}
