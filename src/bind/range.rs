//! Source port ranges and the randomized port search
//!
//! The search starts at a uniformly drawn port and then walks downwards,
//! wrapping from `low` to `high`, until a bind succeeds or every port of the
//! range has been probed exactly once.

use crate::error::RelayError;
use crate::helper::micros_since_epoch;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use socket2::Socket;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tracing::debug;

/// Inclusive range of local ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    low: u16,
    high: u16,
}

impl PortRange {
    /// The reserved ports used by the `lowport` option
    pub const LOWPORT: PortRange = PortRange {
        low: 640,
        high: 1023,
    };

    /// Create a range, rejecting `low > high`
    pub fn new(low: u16, high: u16) -> Result<Self, RelayError> {
        if low > high {
            return Err(RelayError::Config(format!(
                "invalid port range {}:{} (low > high)",
                low, high
            )));
        }
        Ok(PortRange { low, high })
    }

    /// Lowest port
    pub fn low(&self) -> u16 {
        self.low
    }

    /// Highest port
    pub fn high(&self) -> u16 {
        self.high
    }

    /// Number of ports in the range
    pub fn len(&self) -> u32 {
        u32::from(self.high) - u32::from(self.low) + 1
    }

    /// Always false; a range holds at least one port
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `port` lies inside the range
    pub fn contains(&self, port: u16) -> bool {
        (self.low..=self.high).contains(&port)
    }

    /// Next candidate below `port`, wrapping to `high`
    fn step_down(&self, port: u16) -> u16 {
        if port <= self.low {
            self.high
        } else {
            port - 1
        }
    }
}

impl FromStr for PortRange {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, high) = s
            .split_once(':')
            .or_else(|| s.split_once('-'))
            .ok_or_else(|| RelayError::Config(format!("invalid port range: {:?}", s)))?;
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| RelayError::Config(format!("invalid port in range: {:?}", s)))
        };
        PortRange::new(parse(low)?, parse(high)?)
    }
}

impl TryFrom<String> for PortRange {
    type Error = RelayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

/// Something a local address can be bound on
pub trait BindProbe {
    /// Bind to `addr`
    fn bind_to(&mut self, addr: SocketAddr) -> io::Result<()>;
}

impl BindProbe for Socket {
    fn bind_to(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.bind(&addr.into())
    }
}

/// Why a range bind gave up
#[derive(Debug)]
pub enum RangeBindError {
    /// Every port of the range was in use
    Exhausted,
    /// A bind failed for a reason other than "address in use"
    Fatal(io::Error),
}

/// Random start port generator, owned by one controller
#[derive(Debug, Clone)]
pub struct PortPicker {
    rng: StdRng,
}

impl PortPicker {
    /// Seed from the microsecond wall clock
    pub fn from_clock() -> Self {
        Self::from_seed(micros_since_epoch())
    }

    /// Deterministic generator
    pub fn from_seed(seed: u64) -> Self {
        PortPicker {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform start port inside `range`
    pub fn start_port(&mut self, range: &PortRange) -> u16 {
        let offset = self.rng.next_u32() % range.len();
        // offset < len <= 65536, and low + offset <= high
        range.low + offset as u16
    }
}

/// Bind `probe` to `ip` and a free port from `range`
pub fn bind_in_range<P: BindProbe + ?Sized>(
    probe: &mut P,
    ip: IpAddr,
    range: PortRange,
    picker: &mut PortPicker,
) -> Result<u16, RangeBindError> {
    let start = picker.start_port(&range);
    let mut port = start;

    loop {
        let addr = SocketAddr::new(ip, port);
        match probe.bind_to(addr) {
            Ok(()) => {
                debug!("Bound source address {}", addr);
                return Ok(port);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("bind({}): {}", addr, e);
            }
            Err(e) => {
                debug!("bind({}) failed, not probing further: {}", addr, e);
                return Err(RangeBindError::Fatal(e));
            }
        }

        port = range.step_down(port);
        if port == start {
            return Err(RangeBindError::Exhausted);
        }
    }
}
