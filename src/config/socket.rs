//! Socket tuning configuration
//!
//! Socket level options applied during the EARLY and LATE phases.

use crate::options::SocketOption;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default TCP_NODELAY setting
fn default_nodelay() -> bool {
    true
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// Socket option configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Enable TCP_NODELAY on stream sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// TCP keepalive idle time in seconds; keepalive is off when unset
    #[serde(default)]
    pub keepalive_secs: Option<u64>,

    /// TCP keepalive probe interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,

    /// SO_REUSEADDR before bind
    #[serde(default)]
    pub reuseaddr: Option<bool>,

    /// IP TTL / hop limit
    #[serde(default)]
    pub ttl: Option<u32>,

    /// Receive buffer size
    #[serde(default)]
    pub rcvbuf: Option<usize>,

    /// Send buffer size
    #[serde(default)]
    pub sndbuf: Option<usize>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            nodelay: default_nodelay(),
            keepalive_secs: None,
            keepalive_interval: default_keepalive_interval(),
            reuseaddr: None,
            ttl: None,
            rcvbuf: None,
            sndbuf: None,
        }
    }
}

impl SocketConfig {
    /// The socket level options this configuration asks for
    pub fn options(&self) -> Vec<SocketOption> {
        let mut opts = Vec::new();
        if let Some(on) = self.reuseaddr {
            opts.push(SocketOption::ReuseAddr(on));
        }
        if let Some(size) = self.rcvbuf {
            opts.push(SocketOption::RecvBuffer(size));
        }
        if let Some(size) = self.sndbuf {
            opts.push(SocketOption::SendBuffer(size));
        }
        opts.push(SocketOption::NoDelay(self.nodelay));
        if let Some(secs) = self.keepalive_secs {
            opts.push(SocketOption::KeepAlive {
                time: Duration::from_secs(secs),
                interval: Duration::from_secs(self.keepalive_interval),
            });
        }
        if let Some(ttl) = self.ttl {
            opts.push(SocketOption::Ttl(ttl));
        }
        opts
    }
}
