//! Endpoint controllers
//!
//! [`ConnectController`] drives the active side with retries and optional
//! forking; [`ListenController`] prepares the passive side for an
//! [`Acceptor`]. [`run_target`] picks the right one for a parsed target.

mod connect;
mod listen;

pub use connect::{AttemptResult, Completion, ConnectController};
pub use listen::{Acceptor, ListenController, ListenRequest};

use crate::config::EndpointConfig;
use crate::error::Result;
use crate::session::{Finalizer, SessionSpawner, TokioSpawner};
use crate::target::{Mode, Target};
use crate::transport::{Protocol, TcpTransport, UdpTransport};
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The collaborators that take over established endpoints
#[derive(Clone)]
pub struct Collaborators {
    /// Finalizes connected TCP sessions
    pub tcp: Arc<dyn Finalizer<TcpStream>>,
    /// Finalizes connected UDP sessions
    pub udp: Arc<dyn Finalizer<UdpSocket>>,
    /// Accepts on prepared listen addresses
    pub acceptor: Arc<dyn Acceptor>,
}

/// Run the controller matching `target` with the settings of `config`
pub async fn run_target(
    target: &Target,
    config: &EndpointConfig,
    collaborators: &Collaborators,
    cancel: CancellationToken,
) -> Result<()> {
    let options = config.options();

    match (target.kind.mode, target.kind.protocol) {
        (Mode::Connect, Protocol::Tcp) => {
            let transport =
                TcpTransport::with_defaults().with_connect_timeout(config.connect_timeout());
            let completion = ConnectController::new(transport, collaborators.tcp.clone())
                .with_access(config.access)
                .with_interval(config.interval())
                .with_spawner(spawner(config))
                .run(target, options, cancel)
                .await?;
            info!("{} finished: {:?}", target, completion);
        }
        (Mode::Connect, Protocol::Udp) => {
            let completion = ConnectController::new(UdpTransport, collaborators.udp.clone())
                .with_access(config.access)
                .with_interval(config.interval())
                .with_spawner(spawner(config))
                .run(target, options, cancel)
                .await?;
            info!("{} finished: {:?}", target, completion);
        }
        (Mode::Listen, _) => {
            ListenController::new()
                .with_default_family(config.default_ip.family())
                .with_interval(config.interval())
                .run(target, options, collaborators.acceptor.as_ref(), cancel)
                .await?;
            info!("{} finished", target);
        }
    }

    Ok(())
}

fn spawner(config: &EndpointConfig) -> Arc<dyn SessionSpawner> {
    match config.max_sessions {
        Some(max) => Arc::new(TokioSpawner::with_limit(max)),
        None => Arc::new(TokioSpawner::new()),
    }
}
