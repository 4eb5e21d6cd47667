//! Address target strings
//!
//! A target is `KEYWORD:arg[:arg...]`, for example `tcp:example.com:9000`
//! or `tcp6-listen:8080`. IPv6 literals are written in brackets. Parsing
//! only splits the string; arity is checked by the controllers.

use crate::error::{RelayError, Result};
use crate::transport::{AddressFamily, Protocol, SocketType};
use std::fmt;
use std::str::FromStr;

/// Active or passive endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Connect to `host port`
    Connect,
    /// Listen on `port`
    Listen,
}

impl Mode {
    /// Positional arguments this mode takes
    pub fn arity(&self) -> usize {
        match self {
            Mode::Connect => 2,
            Mode::Listen => 1,
        }
    }
}

/// What an address keyword stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressKind {
    /// Canonical keyword
    pub keyword: &'static str,
    /// Connect or listen
    pub mode: Mode,
    /// Family constraint implied by the keyword
    pub family: AddressFamily,
    /// Socket type
    pub socket_type: SocketType,
    /// Protocol
    pub protocol: Protocol,
}

const fn kind(
    keyword: &'static str,
    mode: Mode,
    family: AddressFamily,
    protocol: Protocol,
) -> AddressKind {
    let socket_type = match protocol {
        Protocol::Tcp => SocketType::Stream,
        Protocol::Udp => SocketType::Datagram,
    };
    AddressKind {
        keyword,
        mode,
        family,
        socket_type,
        protocol,
    }
}

/// All supported address keywords
pub const ADDRESS_KINDS: &[AddressKind] = &[
    kind("tcp", Mode::Connect, AddressFamily::Unspecified, Protocol::Tcp),
    kind("tcp4", Mode::Connect, AddressFamily::Ipv4, Protocol::Tcp),
    kind("tcp6", Mode::Connect, AddressFamily::Ipv6, Protocol::Tcp),
    kind("udp", Mode::Connect, AddressFamily::Unspecified, Protocol::Udp),
    kind("udp4", Mode::Connect, AddressFamily::Ipv4, Protocol::Udp),
    kind("udp6", Mode::Connect, AddressFamily::Ipv6, Protocol::Udp),
    kind("tcp-listen", Mode::Listen, AddressFamily::Unspecified, Protocol::Tcp),
    kind("tcp4-listen", Mode::Listen, AddressFamily::Ipv4, Protocol::Tcp),
    kind("tcp6-listen", Mode::Listen, AddressFamily::Ipv6, Protocol::Tcp),
    kind("udp-listen", Mode::Listen, AddressFamily::Unspecified, Protocol::Udp),
    kind("udp4-listen", Mode::Listen, AddressFamily::Ipv4, Protocol::Udp),
    kind("udp6-listen", Mode::Listen, AddressFamily::Ipv6, Protocol::Udp),
];

impl AddressKind {
    /// Look up a keyword, case-insensitively
    pub fn lookup(keyword: &str) -> Option<AddressKind> {
        ADDRESS_KINDS
            .iter()
            .find(|k| k.keyword.eq_ignore_ascii_case(keyword))
            .copied()
    }
}

/// A parsed target string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Address kind from the keyword
    pub kind: AddressKind,
    /// Positional arguments after the keyword
    pub args: Vec<String>,
}

impl Target {
    /// Build a target from parts
    pub fn new(kind: AddressKind, args: Vec<String>) -> Self {
        Target { kind, args }
    }

    /// The positional arguments, if there are exactly `expected` of them
    pub fn expect_args(&self, expected: usize) -> Result<&[String]> {
        if self.args.len() != expected {
            return Err(RelayError::Config(format!(
                "{}: wrong number of parameters ({} instead of {})",
                self.kind.keyword,
                self.args.len(),
                expected
            )));
        }
        Ok(&self.args)
    }
}

impl FromStr for Target {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        let (keyword, rest) = match s.split_once(':') {
            Some((k, r)) => (k, Some(r)),
            None => (s, None),
        };
        let kind = AddressKind::lookup(keyword)
            .ok_or_else(|| RelayError::Config(format!("unknown address type: {:?}", keyword)))?;
        let args = rest.map(split_args).unwrap_or_default();
        Ok(Target { kind, args })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.keyword)?;
        for arg in &self.args {
            write!(f, ":{}", arg)?;
        }
        Ok(())
    }
}

/// Split on ':' outside of brackets
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ':' if depth == 0 => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);
    args
}
