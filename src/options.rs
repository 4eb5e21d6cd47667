//! Phased, one-shot socket option sets
//!
//! An [`OptionSet`] is consumed as it is applied: retrieving an option or
//! applying a phase removes the affected entries. Controllers therefore keep
//! an immutable template and derive a fresh working copy for every attempt.

use crate::bind::PortRange;
use crate::retry::{Attempts, RetryPolicy};
use crate::transport::AddressFamily;
use socket2::{Socket, TcpKeepalive, Type};
use std::io;
use std::time::Duration;
use tracing::debug;

/// Option application phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before any resolution; configures the controller itself
    Init,
    /// After socket creation, before bind
    Early,
    /// After the connection is established
    Late,
}

/// A single option with its phase implied by the variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    /// Number of retries after a failed attempt
    Retry(u32),
    /// Retry without limit
    Forever,
    /// Interval between attempts and between forked sessions
    Interval(Duration),
    /// Spawn a session per successful connection and keep connecting
    Fork,
    /// Force the address family
    ProtocolFamily(AddressFamily),
    /// Explicit local bind address, `host`, `host:port` or `:port`
    Bind(String),
    /// Explicit local source port
    SourcePort(u16),
    /// Pick the local port from this range
    SourcePortRange(PortRange),
    /// Pick the local port from the reserved range 640..=1023
    LowPort,
    /// SO_REUSEADDR
    ReuseAddr(bool),
    /// SO_RCVBUF
    RecvBuffer(usize),
    /// SO_SNDBUF
    SendBuffer(usize),
    /// TCP_NODELAY
    NoDelay(bool),
    /// TCP keepalive time and probe interval
    KeepAlive {
        /// Idle time before the first probe
        time: Duration,
        /// Interval between probes
        interval: Duration,
    },
    /// IP_TTL / IPV6_UNICAST_HOPS
    Ttl(u32),
}

impl SocketOption {
    /// Phase in which this option is consumed
    pub fn phase(&self) -> Phase {
        match self {
            SocketOption::Retry(_)
            | SocketOption::Forever
            | SocketOption::Interval(_)
            | SocketOption::Fork => Phase::Init,
            SocketOption::ProtocolFamily(_)
            | SocketOption::Bind(_)
            | SocketOption::SourcePort(_)
            | SocketOption::SourcePortRange(_)
            | SocketOption::LowPort
            | SocketOption::ReuseAddr(_)
            | SocketOption::RecvBuffer(_)
            | SocketOption::SendBuffer(_) => Phase::Early,
            SocketOption::NoDelay(_) | SocketOption::KeepAlive { .. } | SocketOption::Ttl(_) => {
                Phase::Late
            }
        }
    }

    /// Apply a socket level option; controller level options are ignored
    pub fn apply(&self, socket: &Socket) -> io::Result<()> {
        let stream = matches!(socket.r#type(), Ok(t) if t == Type::STREAM);
        match self {
            SocketOption::ReuseAddr(on) => socket.set_reuse_address(*on),
            SocketOption::RecvBuffer(size) => socket.set_recv_buffer_size(*size),
            SocketOption::SendBuffer(size) => socket.set_send_buffer_size(*size),
            SocketOption::NoDelay(on) if stream => socket.set_nodelay(*on),
            SocketOption::KeepAlive { time, interval } if stream => {
                let keepalive = TcpKeepalive::new()
                    .with_time(*time)
                    .with_interval(*interval);
                socket.set_tcp_keepalive(&keepalive)
            }
            SocketOption::Ttl(ttl) => match socket.local_addr() {
                Ok(addr) if addr.is_ipv6() => socket.set_unicast_hops_v6(*ttl),
                _ => socket.set_ttl(*ttl),
            },
            _ => Ok(()),
        }
    }
}

/// Ordered, consumable collection of options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    opts: Vec<SocketOption>,
}

impl OptionSet {
    /// Create an empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an option
    pub fn push(&mut self, opt: SocketOption) {
        self.opts.push(opt);
    }

    /// Builder style append
    pub fn with(mut self, opt: SocketOption) -> Self {
        self.push(opt);
        self
    }

    /// Number of options not yet consumed
    pub fn len(&self) -> usize {
        self.opts.len()
    }

    /// Whether every option has been consumed
    pub fn is_empty(&self) -> bool {
        self.opts.is_empty()
    }

    /// Iterate over the remaining options
    pub fn iter(&self) -> impl Iterator<Item = &SocketOption> {
        self.opts.iter()
    }

    /// Remove and return the first option selected by `f`
    pub fn retrieve<T>(&mut self, mut f: impl FnMut(&SocketOption) -> Option<T>) -> Option<T> {
        let (idx, value) = self
            .opts
            .iter()
            .enumerate()
            .find_map(|(i, opt)| f(opt).map(|v| (i, v)))?;
        self.opts.remove(idx);
        Some(value)
    }

    /// Remove and return a boolean flag option
    pub fn retrieve_flag(&mut self, flag: &SocketOption) -> bool {
        self.retrieve(|opt| (opt == flag).then_some(())).is_some()
    }

    /// Remove and return every option of a phase, in order
    pub fn take_phase(&mut self, phase: Phase) -> Vec<SocketOption> {
        let (taken, kept) = std::mem::take(&mut self.opts)
            .into_iter()
            .partition(|opt| opt.phase() == phase);
        self.opts = kept;
        taken
    }

    /// Consume the INIT phase into a retry policy
    pub fn take_retry_policy(&mut self, interval: Duration) -> RetryPolicy {
        let mut retries = None;
        let mut forever = false;
        let mut fork = false;
        let mut interval = interval;

        for opt in self.take_phase(Phase::Init) {
            match opt {
                SocketOption::Retry(n) => retries = Some(n),
                SocketOption::Forever => forever = true,
                SocketOption::Interval(d) => interval = d,
                SocketOption::Fork => fork = true,
                _ => {}
            }
        }

        let attempts = if forever {
            Attempts::Forever
        } else {
            Attempts::Finite(retries.unwrap_or(0))
        };

        RetryPolicy::new(interval)
            .with_attempts(attempts)
            .with_fork(fork)
    }

    /// Consume a phase by applying its socket options to `socket`
    pub fn apply_phase(&mut self, socket: &Socket, phase: Phase) -> io::Result<()> {
        for opt in self.take_phase(phase) {
            debug!("Applying {:?} option {:?}", phase, opt);
            opt.apply(socket)?;
        }
        Ok(())
    }
}

impl FromIterator<SocketOption> for OptionSet {
    fn from_iter<I: IntoIterator<Item = SocketOption>>(iter: I) -> Self {
        OptionSet {
            opts: iter.into_iter().collect(),
        }
    }
}
