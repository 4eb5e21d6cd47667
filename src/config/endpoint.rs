//! Endpoint configuration types
//!
//! Defines the retry, fork and bind settings of an endpoint and turns them
//! into the option set consumed by the controllers.

use super::SocketConfig;
use crate::bind::PortRange;
use crate::helper::{duration_from_millis, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INTERVAL_MS};
use crate::options::{OptionSet, SocketOption};
use crate::session::AccessMode;
use crate::transport::AddressFamily;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between attempts in milliseconds
fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

/// Default connect timeout in seconds
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

/// Preferred IP version for listen addresses without a family
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpPreference {
    /// IPv4
    #[default]
    #[serde(rename = "4")]
    V4,
    /// IPv6
    #[serde(rename = "6")]
    V6,
}

impl IpPreference {
    /// The address family this preference stands for
    pub fn family(&self) -> AddressFamily {
        match self {
            IpPreference::V4 => AddressFamily::Ipv4,
            IpPreference::V6 => AddressFamily::Ipv6,
        }
    }
}

/// Endpoint configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Number of retries after a failed attempt
    #[serde(default)]
    pub retry: u32,

    /// Retry without limit
    #[serde(default)]
    pub forever: bool,

    /// Interval between attempts and between forked sessions
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Spawn a session per successful connection and keep connecting
    #[serde(default)]
    pub fork: bool,

    /// Local bind address (`host`, `host:port`, `:port`, `[v6]:port`)
    #[serde(default)]
    pub bind: Option<String>,

    /// Local source port
    #[serde(default)]
    pub sourceport: Option<u16>,

    /// Range the local source port is picked from (`"low:high"`)
    #[serde(default)]
    pub sourceport_range: Option<PortRange>,

    /// Pick the local port from 640..=1023
    #[serde(default)]
    pub lowport: bool,

    /// Force the address family
    #[serde(default)]
    pub pf: AddressFamily,

    /// IP version for listen addresses when no family is given
    #[serde(default)]
    pub default_ip: IpPreference,

    /// Data direction of established sessions
    #[serde(default)]
    pub access: AccessMode,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum number of concurrently running forked sessions
    #[serde(default)]
    pub max_sessions: Option<usize>,

    /// Socket tuning
    #[serde(default)]
    pub socket: SocketConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            retry: 0,
            forever: false,
            interval_ms: default_interval_ms(),
            fork: false,
            bind: None,
            sourceport: None,
            sourceport_range: None,
            lowport: false,
            pf: AddressFamily::Unspecified,
            default_ip: IpPreference::V4,
            access: AccessMode::Duplex,
            connect_timeout_secs: default_connect_timeout(),
            max_sessions: None,
            socket: SocketConfig::default(),
        }
    }
}

impl EndpointConfig {
    /// Interval between attempts
    pub fn interval(&self) -> Duration {
        duration_from_millis(self.interval_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == Some(0) {
            return Err("max_sessions must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        if self.lowport && self.sourceport_range.is_some() {
            return Err("lowport and sourceport_range are mutually exclusive".to_string());
        }
        if self.sourceport.is_some() && (self.lowport || self.sourceport_range.is_some()) {
            return Err("sourceport cannot be combined with a source port range".to_string());
        }
        Ok(())
    }

    /// Build the option set the controllers consume
    pub fn options(&self) -> OptionSet {
        let mut opts = OptionSet::new();

        if self.retry > 0 {
            opts.push(SocketOption::Retry(self.retry));
        }
        if self.forever {
            opts.push(SocketOption::Forever);
        }
        opts.push(SocketOption::Interval(self.interval()));
        if self.fork {
            opts.push(SocketOption::Fork);
        }

        if self.pf != AddressFamily::Unspecified {
            opts.push(SocketOption::ProtocolFamily(self.pf));
        }
        if let Some(bind) = &self.bind {
            opts.push(SocketOption::Bind(bind.clone()));
        }
        if let Some(port) = self.sourceport {
            opts.push(SocketOption::SourcePort(port));
        }
        if let Some(range) = self.sourceport_range {
            opts.push(SocketOption::SourcePortRange(range));
        }
        if self.lowport {
            opts.push(SocketOption::LowPort);
        }

        for opt in self.socket.options() {
            opts.push(opt);
        }
        opts
    }
}
