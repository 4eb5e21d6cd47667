//! Passive endpoint preparation
//!
//! The listen controller only resolves the local address and hands it, with
//! the remaining options, to an [`Acceptor`]. Accepting and its retries are
//! the acceptor's business.

use crate::bind::split_bind;
use crate::error::{RelayError, Result};
use crate::options::{OptionSet, SocketOption};
use crate::retry::RetryPolicy;
use crate::target::{Mode, Target};
use crate::transport::{
    AddressFamily, Endpoint, Protocol, ResolvedAddress, Resolver, SocketType, SystemResolver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything an acceptor needs to open a listening socket
#[derive(Debug, Clone)]
pub struct ListenRequest {
    /// Resolved local address
    pub local: ResolvedAddress,
    /// Options left for the listening and accepted sockets
    pub options: OptionSet,
    /// Retry and fork policy taken from the options
    pub policy: RetryPolicy,
    /// Effective address family
    pub family: AddressFamily,
    /// Socket type
    pub socket_type: SocketType,
    /// Protocol
    pub protocol: Protocol,
}

/// Opens the listening socket and accepts connections
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Accept on `request.local` until done or `cancel` fires
    async fn accept_loop(
        &self,
        request: ListenRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Prepares passive endpoints
#[derive(Debug, Clone)]
pub struct ListenController {
    resolver: Arc<dyn Resolver>,
    default_family: AddressFamily,
    interval: Duration,
}

impl Default for ListenController {
    fn default() -> Self {
        ListenController {
            resolver: Arc::new(SystemResolver),
            default_family: AddressFamily::Ipv4,
            interval: Duration::from_secs(1),
        }
    }
}

impl ListenController {
    /// Create a controller preferring IPv4 for unspecified families
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Family used when neither the address kind nor the options name one
    pub fn with_default_family(mut self, family: AddressFamily) -> Self {
        self.default_family = family;
        self
    }

    /// Interval used when the options carry none
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Resolve the listen address of `target` without starting to accept
    pub async fn prepare(&self, target: &Target, options: OptionSet) -> Result<ListenRequest> {
        if target.kind.mode != Mode::Listen {
            return Err(RelayError::Config(format!(
                "{} is not a listen address",
                target.kind.keyword
            )));
        }
        let args = target.expect_args(Mode::Listen.arity())?;
        let port = &args[0];

        let mut options = options;
        let policy = options.take_retry_policy(self.interval);
        let family = options
            .retrieve(|o| match o {
                SocketOption::ProtocolFamily(f) => Some(*f),
                _ => None,
            })
            .unwrap_or(target.kind.family)
            .or(self.default_family);

        let host = match options.retrieve(|o| match o {
            SocketOption::Bind(s) => Some(s.clone()),
            _ => None,
        }) {
            Some(spec) => match split_bind(&spec)? {
                (host, None) => host,
                (_, Some(_)) => {
                    return Err(RelayError::Config(format!(
                        "bind address {:?} of a listen address must not carry a port",
                        spec
                    )))
                }
            },
            None => None,
        };

        // Source port selection has no meaning for a listening socket
        while let Some(ignored) = options.retrieve(|o| match o {
            SocketOption::SourcePort(_)
            | SocketOption::SourcePortRange(_)
            | SocketOption::LowPort => Some(o.clone()),
            _ => None,
        }) {
            warn!("Ignoring {:?} on {}", ignored, target.kind.keyword);
        }

        let endpoint = Endpoint::new(
            host.as_deref(),
            port,
            family,
            target.kind.socket_type,
            target.kind.protocol,
        );
        let local = self.resolver.resolve(&endpoint).await?;

        Ok(ListenRequest {
            local,
            options,
            policy,
            family: local.family(),
            socket_type: target.kind.socket_type,
            protocol: target.kind.protocol,
        })
    }

    /// Prepare `target` and run `acceptor` on it
    pub async fn run<A: Acceptor + ?Sized>(
        &self,
        target: &Target,
        options: OptionSet,
        acceptor: &A,
        cancel: CancellationToken,
    ) -> Result<()> {
        let request = self.prepare(target, options).await?;
        info!(
            "Listening on {} ({:?}/{:?})",
            request.local.address(),
            request.socket_type,
            request.protocol
        );

        acceptor
            .accept_loop(request, cancel)
            .await
            .map_err(RelayError::Collaborator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::PortRange;
    use crate::retry::Attempts;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingAcceptor {
        requests: Mutex<Vec<ListenRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl Acceptor for RecordingAcceptor {
        async fn accept_loop(
            &self,
            request: ListenRequest,
            _cancel: CancellationToken,
        ) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                anyhow::bail!("accept failed");
            }
            Ok(())
        }
    }

    async fn prepare(spec: &str, options: OptionSet) -> Result<ListenRequest> {
        ListenController::new()
            .prepare(&spec.parse().unwrap(), options)
            .await
    }

    #[tokio::test]
    async fn test_listen_defaults_to_ipv4_any() {
        let request = prepare("tcp-listen:8080", OptionSet::new()).await.unwrap();
        assert_eq!(request.local.address(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(request.family, AddressFamily::Ipv4);
        assert_eq!(request.socket_type, SocketType::Stream);
        assert_eq!(request.protocol, Protocol::Tcp);
    }

    #[tokio::test]
    async fn test_listen_default_family_preference() {
        let request = ListenController::new()
            .with_default_family(AddressFamily::Ipv6)
            .prepare(&"udp-listen:5353".parse().unwrap(), OptionSet::new())
            .await
            .unwrap();
        assert_eq!(request.local.address(), "[::]:5353".parse().unwrap());
        assert_eq!(request.protocol, Protocol::Udp);
        assert_eq!(request.socket_type, SocketType::Datagram);
    }

    #[tokio::test]
    async fn test_listen_keyword_family_beats_preference() {
        let request = ListenController::new()
            .with_default_family(AddressFamily::Ipv4)
            .prepare(&"tcp6-listen:8080".parse().unwrap(), OptionSet::new())
            .await
            .unwrap();
        assert_eq!(request.family, AddressFamily::Ipv6);
    }

    #[tokio::test]
    async fn test_listen_pf_option_wins() {
        let options = OptionSet::new().with(SocketOption::ProtocolFamily(AddressFamily::Ipv6));
        let request = prepare("tcp-listen:8080", options).await.unwrap();
        assert_eq!(request.family, AddressFamily::Ipv6);
        assert!(request.options.is_empty());
    }

    #[tokio::test]
    async fn test_listen_bind_host() {
        let options = OptionSet::new().with(SocketOption::Bind("127.0.0.1".to_string()));
        let request = prepare("tcp-listen:8080", options).await.unwrap();
        assert_eq!(request.local.address(), "127.0.0.1:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn test_listen_bind_with_port_rejected() {
        let options = OptionSet::new().with(SocketOption::Bind("127.0.0.1:9".to_string()));
        assert!(prepare("tcp-listen:8080", options).await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_listen_wrong_arity() {
        for spec in ["tcp-listen", "tcp-listen:80:extra", "udp6-listen:1:2:3"] {
            let err = prepare(spec, OptionSet::new()).await.unwrap_err();
            assert!(err.is_config(), "{}: {}", spec, err);
        }
    }

    #[tokio::test]
    async fn test_listen_rejects_connect_target() {
        let err = prepare("tcp:example:80", OptionSet::new()).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_listen_options_are_split() {
        let options = OptionSet::new()
            .with(SocketOption::Retry(3))
            .with(SocketOption::Fork)
            .with(SocketOption::ReuseAddr(true))
            .with(SocketOption::SourcePortRange(PortRange::new(1, 2).unwrap()))
            .with(SocketOption::NoDelay(true));
        let request = prepare("tcp-listen:8080", options).await.unwrap();

        assert_eq!(request.policy.attempts(), Attempts::Finite(3));
        assert!(request.policy.fork());
        assert_eq!(
            request.options,
            OptionSet::new()
                .with(SocketOption::ReuseAddr(true))
                .with(SocketOption::NoDelay(true))
        );
    }

    #[tokio::test]
    async fn test_listen_run_hands_request_to_acceptor() {
        let acceptor = RecordingAcceptor::default();
        ListenController::new()
            .run(
                &"tcp-listen:8080".parse().unwrap(),
                OptionSet::new(),
                &acceptor,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let requests = acceptor.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].local.address().port(), 8080);
    }

    #[tokio::test]
    async fn test_listen_acceptor_failure_surfaces() {
        let acceptor = RecordingAcceptor {
            fail: true,
            ..Default::default()
        };
        let err = ListenController::new()
            .run(
                &"tcp-listen:8080".parse().unwrap(),
                OptionSet::new(),
                &acceptor,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Collaborator(_)));
    }

    #[tokio::test]
    async fn test_listen_invalid_port() {
        let err = prepare("tcp-listen:http", OptionSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Resolution(_)));
    }
}
