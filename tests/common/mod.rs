//! Test utilities and mocks for Sockrelay
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sockrelay::bind::PortRange;
use sockrelay::config::EndpointConfig;
use sockrelay::controller::{Acceptor, ListenRequest};
use sockrelay::error::{RelayError, Result};
use sockrelay::options::OptionSet;
use sockrelay::session::{AccessMode, Finalizer, Session};
use sockrelay::transport::{Endpoint, ResolvedAddress, Resolver};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr.port()
}

/// Resolver with a fixed table of names, counting lookups
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a name
    pub fn host(mut self, name: &str, ip: &str) -> Self {
        self.hosts.insert(name.to_string(), ip.parse().unwrap());
        self
    }

    /// Number of resolutions performed
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, endpoint: &Endpoint) -> Result<ResolvedAddress> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let port = endpoint.port_number()?;
        let ip = match &endpoint.host {
            Some(host) => self
                .hosts
                .get(host)
                .copied()
                .or_else(|| host.parse().ok())
                .ok_or_else(|| RelayError::Resolution(format!("unknown host {}", host)))?,
            None => endpoint.family.wildcard(),
        };
        let addr = SocketAddr::new(ip, port);
        if !endpoint.family.matches(&addr) {
            return Err(RelayError::Resolution(format!("{} has no such family", addr)));
        }
        Ok(ResolvedAddress::new(
            addr,
            endpoint.socket_type,
            endpoint.protocol,
        ))
    }
}

/// What a finalizer saw of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedSession {
    pub id: u64,
    pub access: AccessMode,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    pub leftover_options: usize,
}

/// Finalizer recording sessions and greeting the peer
#[derive(Debug, Default)]
pub struct RecordingFinalizer {
    sessions: Mutex<Vec<FinalizedSession>>,
}

impl RecordingFinalizer {
    /// Sessions finalized so far
    pub fn sessions(&self) -> Vec<FinalizedSession> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Finalizer<TcpStream> for RecordingFinalizer {
    async fn finalize(&self, session: Session<TcpStream>, options: OptionSet) -> anyhow::Result<()> {
        self.sessions.lock().unwrap().push(FinalizedSession {
            id: session.id(),
            access: session.access(),
            local_addr: session.local_addr(),
            peer_addr: session.peer_addr(),
            leftover_options: options.len(),
        });
        let mut stream = session.into_stream();
        stream.write_all(b"hello").await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Acceptor that records the requests it is given
#[derive(Debug, Default)]
pub struct MockAcceptor {
    requests: Mutex<Vec<ListenRequest>>,
}

impl MockAcceptor {
    /// Requests received so far
    pub fn requests(&self) -> Vec<ListenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Acceptor for MockAcceptor {
    async fn accept_loop(
        &self,
        request: ListenRequest,
        _cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

/// Test configuration builder
#[derive(Default)]
pub struct TestConfigBuilder {
    config: EndpointConfig,
}

impl TestConfigBuilder {
    /// Create a new test config builder with a short interval
    pub fn new() -> Self {
        let mut config = EndpointConfig::default();
        config.interval_ms = 10;
        config.connect_timeout_secs = 2;
        TestConfigBuilder { config }
    }

    /// Set the retry budget
    pub fn retry(mut self, retry: u32) -> Self {
        self.config.retry = retry;
        self
    }

    /// Enable fork mode
    pub fn fork(mut self) -> Self {
        self.config.fork = true;
        self
    }

    /// Set the bind address
    pub fn bind(mut self, bind: &str) -> Self {
        self.config.bind = Some(bind.to_string());
        self
    }

    /// Set the source port range
    pub fn sourceport_range(mut self, low: u16, high: u16) -> Self {
        self.config.sourceport_range = Some(PortRange::new(low, high).unwrap());
        self
    }

    /// Build the config
    pub fn build(self) -> EndpointConfig {
        self.config.validate().unwrap();
        self.config
    }
}
