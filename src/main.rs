//! Sockrelay - Socket Relay Endpoint Tool
//!
//! This is the main entry point for the Sockrelay application. The target
//! address is connected to (or listened on) and then relayed to stdio.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use sockrelay::bind::PortRange;
use sockrelay::config::{load_config, Config, EndpointConfig};
use sockrelay::controller::{run_target, Acceptor, Collaborators, ListenRequest};
use sockrelay::options::{OptionSet, Phase};
use sockrelay::session::{AccessMode, Finalizer, Session};
use sockrelay::transport::{AddressFamily, Established, Protocol};
use sockrelay::Target;
use socket2::{SockRef, Socket};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Sockrelay - connect to or listen on an IP endpoint and relay it to stdio
#[derive(Parser, Debug)]
#[command(name = "sockrelay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target address, e.g. tcp:example.com:9000 or udp6-listen:5353
    target: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Retries after a failed attempt
    #[arg(long)]
    retry: Option<u32>,

    /// Retry without limit
    #[arg(long)]
    forever: bool,

    /// Interval between attempts in milliseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Spawn a session per connection and keep connecting
    #[arg(long)]
    fork: bool,

    /// Local bind address (host, host:port or :port)
    #[arg(long)]
    bind: Option<String>,

    /// Local source port
    #[arg(long)]
    sourceport: Option<u16>,

    /// Local source port range, e.g. 40000:40100
    #[arg(long)]
    sourceport_range: Option<PortRange>,

    /// Bind to a random privileged port (640-1023)
    #[arg(long)]
    lowport: bool,

    /// Address family (4 or 6)
    #[arg(long, value_parser = parse_family)]
    pf: Option<AddressFamily>,

    /// Access mode (read-only, write-only, duplex)
    #[arg(long, value_parser = parse_access)]
    access: Option<AccessMode>,

    /// Maximum number of concurrent sessions in fork mode
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// Override file settings with the ones given on the command line
    fn apply(&self, endpoint: &mut EndpointConfig) {
        if let Some(retry) = self.retry {
            endpoint.retry = retry;
        }
        endpoint.forever |= self.forever;
        if let Some(interval) = self.interval {
            endpoint.interval_ms = interval;
        }
        endpoint.fork |= self.fork;
        if self.bind.is_some() {
            endpoint.bind = self.bind.clone();
        }
        if self.sourceport.is_some() {
            endpoint.sourceport = self.sourceport;
        }
        if self.sourceport_range.is_some() {
            endpoint.sourceport_range = self.sourceport_range;
        }
        endpoint.lowport |= self.lowport;
        if let Some(pf) = self.pf {
            endpoint.pf = pf;
        }
        if let Some(access) = self.access {
            endpoint.access = access;
        }
        if self.max_sessions.is_some() {
            endpoint.max_sessions = self.max_sessions;
        }
    }
}

fn parse_family(s: &str) -> std::result::Result<AddressFamily, String> {
    match s.to_lowercase().as_str() {
        "4" | "ip4" | "ipv4" | "inet" => Ok(AddressFamily::Ipv4),
        "6" | "ip6" | "ipv6" | "inet6" => Ok(AddressFamily::Ipv6),
        other => Err(format!("unknown address family: {}", other)),
    }
}

fn parse_access(s: &str) -> std::result::Result<AccessMode, String> {
    match s.to_lowercase().as_str() {
        "read-only" | "rdonly" => Ok(AccessMode::ReadOnly),
        "write-only" | "wronly" => Ok(AccessMode::WriteOnly),
        "duplex" | "rdwr" => Ok(AccessMode::Duplex),
        other => Err(format!("unknown access mode: {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let mut config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };
    args.apply(&mut config.endpoint);
    config
        .endpoint
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    let target: Target = args
        .target
        .parse()
        .with_context(|| format!("Invalid target: {}", args.target))?;

    info!("Sockrelay v{}", sockrelay::VERSION);
    info!("Target: {}", target);

    // Setup shutdown signal
    let cancel = CancellationToken::new();

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            info!("Received Ctrl+C, shutting down...");
                        }
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM, shutting down...");
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to setup SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        shutdown.cancel();
    });

    let finalizer = Arc::new(StdioRelay);
    let collaborators = Collaborators {
        tcp: finalizer.clone(),
        udp: finalizer.clone(),
        acceptor: Arc::new(StdioAcceptor {
            finalizer,
            access: config.endpoint.access,
        }),
    };

    run_target(&target, &config.endpoint, &collaborators, cancel).await?;
    Ok(())
}

/// Relays an established session to stdin/stdout
struct StdioRelay;

#[async_trait]
impl Finalizer<TcpStream> for StdioRelay {
    async fn finalize(&self, session: Session<TcpStream>, _: OptionSet) -> Result<()> {
        let access = session.access();
        let peer = session.peer_addr();
        let (mut rd, mut wr) = session.into_stream().into_split();

        let upload = async {
            if access.writable() {
                tokio::io::copy(&mut tokio::io::stdin(), &mut wr).await?;
                wr.shutdown().await?;
            }
            Ok::<(), io::Error>(())
        };
        let download = async {
            if access.readable() {
                tokio::io::copy(&mut rd, &mut tokio::io::stdout()).await?;
            }
            Ok::<(), io::Error>(())
        };
        tokio::try_join!(upload, download).with_context(|| format!("Relay with {}", peer))?;

        debug!("Relay with {} finished", peer);
        Ok(())
    }
}

#[async_trait]
impl Finalizer<UdpSocket> for StdioRelay {
    async fn finalize(&self, session: Session<UdpSocket>, _: OptionSet) -> Result<()> {
        let access = session.access();
        let peer = session.peer_addr();
        let socket = session.into_stream();

        relay_datagrams(&socket, access, tokio::io::stdin(), tokio::io::stdout())
            .await
            .with_context(|| format!("Relay with {}", peer))?;

        debug!("Relay with {} finished", peer);
        Ok(())
    }
}

/// Relay a connected datagram socket to a byte stream pair
///
/// Datagrams have no end of stream, so a duplex relay stops as soon as the
/// input side reaches EOF.
async fn relay_datagrams<R, W>(
    socket: &UdpSocket,
    access: AccessMode,
    input: R,
    output: W,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match (access.writable(), access.readable()) {
        (true, true) => {
            tokio::select! {
                r = send_datagrams(socket, input) => r,
                r = recv_datagrams(socket, output) => r,
            }
        }
        (true, false) => send_datagrams(socket, input).await,
        (false, true) => recv_datagrams(socket, output).await,
        (false, false) => Ok(()),
    }
}

async fn send_datagrams<R: AsyncRead + Unpin>(socket: &UdpSocket, mut input: R) -> io::Result<()> {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        socket.send(&buf[..n]).await?;
    }
}

async fn recv_datagrams<W: AsyncWrite + Unpin>(socket: &UdpSocket, mut output: W) -> io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let n = socket.recv(&mut buf).await?;
        output.write_all(&buf[..n]).await?;
        output.flush().await?;
    }
}

/// Opens the listening socket and relays accepted peers to stdio
struct StdioAcceptor {
    finalizer: Arc<StdioRelay>,
    access: AccessMode,
}

impl StdioAcceptor {
    fn open(request: &mut ListenRequest) -> Result<Socket> {
        let local = request.local;
        let socket = Socket::new(
            socket2::Domain::for_address(local.address()),
            local.socket_type().into(),
            Some(local.protocol().into()),
        )?;
        request.options.apply_phase(&socket, Phase::Early)?;
        socket
            .bind(&local.address().into())
            .with_context(|| format!("Failed to bind {}", local.address()))?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    async fn accept_tcp(&self, mut request: ListenRequest, cancel: CancellationToken) -> Result<()> {
        let socket = Self::open(&mut request)?;
        socket.listen(128)?;
        let listener = TcpListener::from_std(socket.into())?;
        let mut sessions = 0u64;

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = cancel.cancelled() => return Ok(()),
            };
            sessions += 1;
            info!("Accepted connection from {}", peer);

            let mut options = request.options.clone();
            options.apply_phase(&SockRef::from(&stream), Phase::Late)?;
            let established = Established {
                local_addr: stream.local_addr()?,
                peer_addr: peer,
                stream,
            };
            let session = Session::orient(established, self.access, sessions);

            if !request.policy.fork() {
                return self.finalizer.finalize(session, options).await;
            }
            let finalizer = self.finalizer.clone();
            tokio::spawn(async move {
                if let Err(e) = finalizer.finalize(session, options).await {
                    warn!("Session with {} failed: {:#}", peer, e);
                }
            });
        }
    }

    async fn accept_udp(&self, mut request: ListenRequest, cancel: CancellationToken) -> Result<()> {
        let socket = Self::open(&mut request)?;
        let socket = UdpSocket::from_std(socket.into())?;

        // The first datagram decides the peer
        let mut buf = vec![0u8; 65536];
        let (n, peer) = tokio::select! {
            received = socket.recv_from(&mut buf) => received?,
            _ = cancel.cancelled() => return Ok(()),
        };
        info!("Received first datagram from {}", peer);
        socket.connect(peer).await?;
        if self.access.readable() {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&buf[..n]).await?;
            stdout.flush().await?;
        }

        let mut options = request.options;
        options.apply_phase(&SockRef::from(&socket), Phase::Late)?;
        let established = Established {
            local_addr: socket.local_addr()?,
            peer_addr: peer,
            stream: socket,
        };
        let session = Session::orient(established, self.access, 1);
        self.finalizer.finalize(session, options).await
    }
}

#[async_trait]
impl Acceptor for StdioAcceptor {
    async fn accept_loop(&self, request: ListenRequest, cancel: CancellationToken) -> Result<()> {
        match request.protocol {
            Protocol::Tcp => self.accept_tcp(request, cancel).await,
            Protocol::Udp => self.accept_udp(request, cancel).await,
        }
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr, stdout carries relayed data
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
