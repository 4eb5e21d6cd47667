//! Retry policy and error classification
//!
//! Shared by the connect controller and the session spawner. The budget is
//! decremented once per failed attempt and never on success.

use std::io;
use std::time::Duration;

/// How the retry loop should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retry immediately, without sleeping
    Now,
    /// Retry after the configured interval
    Later,
    /// Terminal, never retried
    Never,
}

impl From<&io::Error> for RetryClass {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => RetryClass::Now,
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::Interrupted => RetryClass::Later,
            _ => RetryClass::Never,
        }
    }
}

/// Remaining retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    /// A finite number of further attempts
    Finite(u32),
    /// Never give up because of the budget
    Forever,
}

/// Retry, back-off and fork policy of one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    attempts: Attempts,
    fork: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval: Duration::from_secs(1),
            attempts: Attempts::Finite(0),
            fork: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries and no forking
    pub fn new(interval: Duration) -> Self {
        RetryPolicy {
            interval,
            ..Default::default()
        }
    }

    /// Set the retry budget
    pub fn with_attempts(mut self, attempts: Attempts) -> Self {
        self.attempts = attempts;
        self
    }

    /// Enable or disable a new session per successful connection
    pub fn with_fork(mut self, fork: bool) -> Self {
        self.fork = fork;
        self
    }

    /// Back-off interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Remaining budget
    pub fn attempts(&self) -> Attempts {
        self.attempts
    }

    /// Whether successful connections are replicated into sessions
    pub fn fork(&self) -> bool {
        self.fork
    }

    /// Whether any retry is still possible
    pub fn is_retrying(&self) -> bool {
        match self.attempts {
            Attempts::Forever => true,
            Attempts::Finite(n) => n > 0,
        }
    }

    /// Consume one unit of budget; `false` when the budget is exhausted
    pub fn consume(&mut self) -> bool {
        match self.attempts {
            Attempts::Forever => true,
            Attempts::Finite(0) => false,
            Attempts::Finite(n) => {
                self.attempts = Attempts::Finite(n - 1);
                true
            }
        }
    }

    /// Pause before the next attempt for the given class
    pub fn pause_for(&self, class: RetryClass) -> Option<Duration> {
        match class {
            RetryClass::Later => Some(self.interval),
            RetryClass::Now | RetryClass::Never => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class_from_io_error() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(RetryClass::from(&err), RetryClass::Now);

        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(RetryClass::from(&err), RetryClass::Later);

        let err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        assert_eq!(RetryClass::from(&err), RetryClass::Later);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(RetryClass::from(&err), RetryClass::Never);

        let err = io::Error::new(io::ErrorKind::InvalidInput, "bad");
        assert_eq!(RetryClass::from(&err), RetryClass::Never);
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.interval(), Duration::from_secs(1));
        assert_eq!(policy.attempts(), Attempts::Finite(0));
        assert!(!policy.fork());
        assert!(!policy.is_retrying());
    }

    #[test]
    fn test_retry_policy_consume_finite() {
        let mut policy = RetryPolicy::default().with_attempts(Attempts::Finite(2));
        assert!(policy.consume());
        assert!(policy.consume());
        assert!(!policy.consume());
        assert_eq!(policy.attempts(), Attempts::Finite(0));
    }

    #[test]
    fn test_retry_policy_consume_forever() {
        let mut policy = RetryPolicy::default().with_attempts(Attempts::Forever);
        for _ in 0..1000 {
            assert!(policy.consume());
        }
        assert!(policy.is_retrying());
    }

    #[test]
    fn test_retry_policy_pause() {
        let policy = RetryPolicy::new(Duration::from_millis(50));
        assert_eq!(
            policy.pause_for(RetryClass::Later),
            Some(Duration::from_millis(50))
        );
        assert_eq!(policy.pause_for(RetryClass::Now), None);
        assert_eq!(policy.pause_for(RetryClass::Never), None);
    }
}
