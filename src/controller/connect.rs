//! Active endpoint establishment
//!
//! The connect controller resolves, binds and connects in a strictly
//! sequential loop. Transient failures consume the retry budget; with
//! forking enabled every successful connection is handed to a new session
//! task while the controller keeps connecting.

use crate::bind::{BindRequest, PortPicker};
use crate::error::{RelayError, Result};
use crate::helper::sleep_or_cancel;
use crate::options::{OptionSet, SocketOption};
use crate::retry::{RetryClass, RetryPolicy};
use crate::session::{AccessMode, Finalizer, Session, SessionSpawner, SessionTask, TokioSpawner};
use crate::target::{Mode, Target};
use crate::transport::{Endpoint, Established, Resolver, SystemResolver, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a single connection attempt
#[derive(Debug)]
pub enum AttemptResult<S> {
    /// Connected
    Success(Established<S>),
    /// Transient failure, retry without waiting
    RetryNow(RelayError),
    /// Transient failure, retry after the interval
    RetryLater(RelayError),
    /// Terminal failure
    Fatal(RelayError),
}

impl<S> From<Result<Established<S>>> for AttemptResult<S> {
    fn from(result: Result<Established<S>>) -> Self {
        match result {
            Ok(established) => AttemptResult::Success(established),
            Err(e) => match e.retry_class() {
                RetryClass::Now => AttemptResult::RetryNow(e),
                RetryClass::Later => AttemptResult::RetryLater(e),
                RetryClass::Never => AttemptResult::Fatal(e),
            },
        }
    }
}

/// How a connect controller finished without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A connection was established and finalized inline
    Finalized,
    /// Cancelled; `sessions` were handed to spawned tasks before that
    Cancelled {
        /// Number of sessions spawned
        sessions: u64,
    },
}

/// Retry/fork loop for one connect target
pub struct ConnectController<T: Transport> {
    transport: T,
    finalizer: Arc<dyn Finalizer<T::Stream>>,
    resolver: Arc<dyn Resolver>,
    spawner: Arc<dyn SessionSpawner>,
    access: AccessMode,
    interval: Duration,
    picker: PortPicker,
}

impl<T: Transport> ConnectController<T> {
    /// Create a controller with the system resolver and an unbounded spawner
    pub fn new(transport: T, finalizer: Arc<dyn Finalizer<T::Stream>>) -> Self {
        ConnectController {
            transport,
            finalizer,
            resolver: Arc::new(SystemResolver),
            spawner: Arc::new(TokioSpawner::new()),
            access: AccessMode::Duplex,
            interval: Duration::from_secs(1),
            picker: PortPicker::from_clock(),
        }
    }

    /// Use a different resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use a different session spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn SessionSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Set the access mode of established sessions
    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    /// Interval used when the options carry none
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Use a specific source port generator
    pub fn with_picker(mut self, picker: PortPicker) -> Self {
        self.picker = picker;
        self
    }

    /// Run the controller for `target` until it finalizes, fails or is cancelled
    pub async fn run(
        &mut self,
        target: &Target,
        options: OptionSet,
        cancel: CancellationToken,
    ) -> Result<Completion> {
        if target.kind.mode != Mode::Connect {
            return Err(RelayError::Config(format!(
                "{} is not a connect address",
                target.kind.keyword
            )));
        }
        if target.kind.protocol != self.transport.protocol() {
            return Err(RelayError::Config(format!(
                "{} does not match a {:?} transport",
                target.kind.keyword,
                self.transport.protocol()
            )));
        }
        let args = target.expect_args(Mode::Connect.arity())?;
        let (host, port) = (&args[0], &args[1]);

        let mut template = options;
        let mut policy = template.take_retry_policy(self.interval);
        let family = template
            .retrieve(|o| match o {
                SocketOption::ProtocolFamily(f) => Some(*f),
                _ => None,
            })
            .unwrap_or(target.kind.family);
        let bind = BindRequest::prepare(&mut template)?;

        let endpoint = Endpoint::new(
            Some(host.as_str()),
            port,
            family,
            self.transport.socket_type(),
            self.transport.protocol(),
        );

        info!("Starting connect loop to {}", endpoint);

        let mut attempts: u64 = 0;
        let mut sessions: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Connect loop to {} cancelled", endpoint);
                return Ok(Completion::Cancelled { sessions });
            }

            attempts += 1;
            let mut working = template.clone();
            let result = self.attempt(&endpoint, &bind, &mut working).await;

            let (e, class) = match AttemptResult::from(result) {
                AttemptResult::Success(established) => {
                    sessions += 1;
                    let session = Session::orient(established, self.access, sessions);

                    if !policy.fork() {
                        info!(
                            "Connected {} -> {}",
                            session.local_addr(),
                            session.peer_addr()
                        );
                        self.finalizer
                            .finalize(session, working)
                            .await
                            .map_err(RelayError::Collaborator)?;
                        return Ok(Completion::Finalized);
                    }

                    if !self
                        .spawn_session(session, working, &mut policy, attempts, &cancel)
                        .await?
                    {
                        return Ok(Completion::Cancelled { sessions });
                    }
                    attempts = 0;

                    // The spawned task owns the connection; only pace the next one
                    if !sleep_or_cancel(policy.interval(), &cancel).await {
                        return Ok(Completion::Cancelled { sessions });
                    }
                    continue;
                }
                AttemptResult::Fatal(e) => {
                    warn!("Connect to {} failed: {}", endpoint, e);
                    return Err(e);
                }
                AttemptResult::RetryNow(e) => (e, RetryClass::Now),
                AttemptResult::RetryLater(e) => (e, RetryClass::Later),
            };

            if !policy.consume() {
                warn!("Connect to {} failed: {}", endpoint, e);
                return Err(exhausted(attempts, e));
            }

            info!(
                "Connect to {} failed: {}; retrying (attempt {}, {:?})",
                endpoint,
                e,
                attempts,
                policy.attempts()
            );

            // A zero pause still yields so cancellation can be observed
            let pause = policy.pause_for(class).unwrap_or(Duration::ZERO);
            if !sleep_or_cancel(pause, &cancel).await {
                return Ok(Completion::Cancelled { sessions });
            }
        }
    }

    /// Resolve both ends and perform one transport attempt
    async fn attempt(
        &mut self,
        endpoint: &Endpoint,
        bind: &BindRequest,
        options: &mut OptionSet,
    ) -> Result<Established<T::Stream>> {
        let remote = self.resolver.resolve(endpoint).await?;
        debug!("Opening connection to {}", remote.address());

        let local = bind
            .resolve(
                self.resolver.as_ref(),
                remote.family(),
                remote.socket_type(),
                remote.protocol(),
            )
            .await?;

        self.transport
            .connect(&remote, &local, options, &mut self.picker)
            .await
    }

    /// Hand `session` to a new task, retrying refused spawns against the budget
    ///
    /// Returns `Ok(false)` when cancelled while waiting to retry.
    async fn spawn_session(
        &self,
        session: Session<T::Stream>,
        options: OptionSet,
        policy: &mut RetryPolicy,
        attempts: u64,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let id = session.id();
        let peer = session.peer_addr();
        let finalizer = self.finalizer.clone();

        // The session only finalizes; it never forks or retries
        let mut task: SessionTask = Box::pin(async move {
            debug!("Session {} to {} started", id, peer);
            if let Err(e) = finalizer.finalize(session, options).await {
                warn!("Session {} to {} failed: {:#}", id, peer, e);
            }
        });

        loop {
            match self.spawner.spawn(task) {
                Ok(()) => {
                    info!("Spawned session {} to {}", id, peer);
                    return Ok(true);
                }
                Err(rejected) => {
                    if !policy.consume() {
                        warn!("Could not spawn session {}: {}", id, rejected.reason);
                        return Err(exhausted(attempts, rejected.reason));
                    }
                    warn!(
                        "Could not spawn session {}: {}; retrying",
                        id, rejected.reason
                    );
                    if !sleep_or_cancel(policy.interval(), cancel).await {
                        return Ok(false);
                    }
                    task = rejected.task;
                }
            }
        }
    }
}

/// Turn the pending transient error into a terminal one
fn exhausted(attempts: u64, last: RelayError) -> RelayError {
    RelayError::RetriesExhausted {
        attempts,
        last: Box::new(last),
    }
}
