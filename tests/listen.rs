//! Integration tests for listen preparation

mod common;

use common::{MockAcceptor, StaticResolver};
use sockrelay::controller::ListenController;
use sockrelay::options::{OptionSet, SocketOption};
use sockrelay::retry::Attempts;
use sockrelay::transport::{AddressFamily, Protocol, SocketType};
use sockrelay::Target;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_listen_hands_resolved_address_to_acceptor() {
    let acceptor = MockAcceptor::default();
    let controller = ListenController::new()
        .with_resolver(Arc::new(StaticResolver::new().host("relay.local", "127.0.0.1")));

    let options = OptionSet::new()
        .with(SocketOption::Retry(2))
        .with(SocketOption::Bind("relay.local".to_string()))
        .with(SocketOption::ReuseAddr(true));
    let target: Target = "tcp-listen:8080".parse().unwrap();
    controller
        .run(&target, options, &acceptor, CancellationToken::new())
        .await
        .unwrap();

    let requests = acceptor.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.local.address(), "127.0.0.1:8080".parse().unwrap());
    assert_eq!(request.family, AddressFamily::Ipv4);
    assert_eq!(request.socket_type, SocketType::Stream);
    assert_eq!(request.protocol, Protocol::Tcp);
    assert_eq!(request.policy.attempts(), Attempts::Finite(2));
    assert_eq!(
        request.options,
        OptionSet::new().with(SocketOption::ReuseAddr(true))
    );
}

#[tokio::test]
async fn test_listen_uses_configured_ip_preference() {
    let acceptor = MockAcceptor::default();
    let target: Target = "udp-listen:5353".parse().unwrap();
    ListenController::new()
        .with_default_family(AddressFamily::Ipv6)
        .run(&target, OptionSet::new(), &acceptor, CancellationToken::new())
        .await
        .unwrap();

    let request = &acceptor.requests()[0];
    assert_eq!(request.local.address(), "[::]:5353".parse().unwrap());
    assert_eq!(request.protocol, Protocol::Udp);
}

#[tokio::test]
async fn test_listen_wrong_arity_never_reaches_acceptor() {
    let acceptor = MockAcceptor::default();
    let target: Target = "tcp4-listen:80:81".parse().unwrap();
    let err = ListenController::new()
        .run(&target, OptionSet::new(), &acceptor, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_config());
    assert!(acceptor.requests().is_empty());
}
