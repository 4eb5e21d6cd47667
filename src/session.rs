//! Established sessions and the collaborators that take them over
//!
//! A [`Session`] is an established, oriented connection. It is handed to a
//! [`Finalizer`] either inline or, when forking, inside a task started by a
//! [`SessionSpawner`].

use crate::error::RelayError;
use crate::options::OptionSet;
use crate::transport::Established;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Requested data direction of a session
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// Only read from the peer
    ReadOnly,
    /// Only write to the peer
    WriteOnly,
    /// Both directions over the same socket
    #[default]
    Duplex,
}

impl AccessMode {
    /// Whether the session has a read side
    pub fn readable(&self) -> bool {
        !matches!(self, AccessMode::WriteOnly)
    }

    /// Whether the session has a write side
    pub fn writable(&self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// An established connection oriented according to its access mode
#[derive(Debug)]
pub struct Session<S> {
    id: u64,
    stream: S,
    access: AccessMode,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl<S> Session<S> {
    /// Orient an established connection
    pub fn orient(established: Established<S>, access: AccessMode, id: u64) -> Self {
        Session {
            id,
            stream: established.stream,
            access,
            local_addr: established.local_addr,
            peer_addr: established.peer_addr,
        }
    }

    /// Sequence number of the session within its controller, starting at 1
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Access mode
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Read side; the same socket as the write side when duplex
    pub fn reader(&self) -> Option<&S> {
        self.access.readable().then_some(&self.stream)
    }

    /// Write side; the same socket as the read side when duplex
    pub fn writer(&self) -> Option<&S> {
        self.access.writable().then_some(&self.stream)
    }

    /// Local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Take the underlying stream
    pub fn into_stream(self) -> S {
        self.stream
    }
}

/// Takes over an established session (encryption, buffering, data transfer)
#[async_trait]
pub trait Finalizer<S>: Send + Sync + 'static {
    /// Finish setting up `session`; `options` holds what the attempt left over
    async fn finalize(&self, session: Session<S>, options: OptionSet) -> anyhow::Result<()>;
}

/// A detached session task
pub type SessionTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A task the spawner refused to start, handed back for another try
pub struct Rejected {
    /// Why the task was not started
    pub reason: RelayError,
    /// The task, not yet polled
    pub task: SessionTask,
}

impl Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Starts independent session tasks
pub trait SessionSpawner: Debug + Send + Sync {
    /// Start `task`, or hand it back unstarted
    fn spawn(&self, task: SessionTask) -> std::result::Result<(), Rejected>;
}

/// Spawns sessions on the tokio runtime, optionally bounded
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    limit: Option<(usize, Arc<Semaphore>)>,
}

impl TokioSpawner {
    /// Unbounded spawner
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner refusing new sessions while `max` are running
    pub fn with_limit(max: usize) -> Self {
        TokioSpawner {
            limit: Some((max, Arc::new(Semaphore::new(max)))),
        }
    }

    /// Number of sessions currently running, if bounded
    pub fn active(&self) -> Option<usize> {
        self.limit
            .as_ref()
            .map(|(max, sem)| max - sem.available_permits())
    }
}

impl SessionSpawner for TokioSpawner {
    fn spawn(&self, task: SessionTask) -> std::result::Result<(), Rejected> {
        let permit = match &self.limit {
            Some((max, sem)) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Err(Rejected {
                        reason: RelayError::Spawn(format!("session limit of {} reached", max)),
                        task,
                    })
                }
            },
            None => None,
        };

        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn established() -> Established<u32> {
        Established {
            stream: 7,
            local_addr: "127.0.0.1:40000".parse().unwrap(),
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
        }
    }

    #[test]
    fn test_access_mode_default() {
        assert_eq!(AccessMode::default(), AccessMode::Duplex);
    }

    #[test]
    fn test_session_orient_duplex() {
        let session = Session::orient(established(), AccessMode::Duplex, 1);
        assert_eq!(session.reader(), Some(&7));
        assert_eq!(session.writer(), Some(&7));
        assert!(std::ptr::eq(
            session.reader().unwrap(),
            session.writer().unwrap()
        ));
        assert_eq!(session.id(), 1);
        assert_eq!(session.peer_addr().port(), 9000);
    }

    #[test]
    fn test_session_orient_one_way() {
        let session = Session::orient(established(), AccessMode::ReadOnly, 1);
        assert!(session.reader().is_some());
        assert!(session.writer().is_none());

        let session = Session::orient(established(), AccessMode::WriteOnly, 2);
        assert!(session.reader().is_none());
        assert!(session.writer().is_some());
        assert_eq!(session.into_stream(), 7);
    }

    #[test]
    fn test_access_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            access: AccessMode,
        }
        let w: Wrapper = toml::from_str("access = \"read-only\"").unwrap();
        assert_eq!(w.access, AccessMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_tokio_spawner_runs_task() {
        let (tx, rx) = oneshot::channel();
        TokioSpawner::new()
            .spawn(Box::pin(async move {
                let _ = tx.send(42);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_tokio_spawner_limit() {
        let spawner = TokioSpawner::with_limit(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        spawner
            .spawn(Box::pin(async move {
                let _ = release_rx.await;
            }))
            .unwrap();
        assert_eq!(spawner.active(), Some(1));

        let rejected = spawner.spawn(Box::pin(async {})).unwrap_err();
        assert!(matches!(rejected.reason, RelayError::Spawn(_)));

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while spawner.active() != Some(0) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(spawner.spawn(Box::pin(async {})).is_ok());
    }
}
