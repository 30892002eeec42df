//! Crash recovery
//!
//! The supervisor owns the current session. When the session's receive loop
//! reports a failure, it closes that session, waits a fixed delay and connects
//! a new one, publishing each milestone as a [`SupervisorEvent`]. A stop
//! request wins over any pending reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Handlers};
use crate::error::{Error, Result};
use crate::roster::Roster;
use crate::session::{Session, SessionConfig, SessionFailure};

/// Default pause between losing the connection and reconnecting
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Lifecycle of the supervised connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The current session failed and is being torn down
    FatalError,
    Stopping,
    Stopped,
}

/// Milestones published to the owner of the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(SessionState),
    /// The session died; a reconnect follows after `retry_in`
    Crashed { retry_in: Duration },
    Reconnecting,
    Reconnected,
    /// A reconnect attempt failed; another `Crashed` follows
    ConnectFailed(String),
}

/// Handle to the supervised chat connection. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
    stop: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

struct Shared {
    state: RwLock<SessionState>,
    alive: AtomicBool,
    current: RwLock<Option<Arc<Session>>>,
    roster: Roster,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Supervisor {
    /// Connect and start supervising. Fails if the first connection attempt
    /// fails; later failures are recovered automatically.
    pub async fn start(
        config: SessionConfig,
        reconnect_delay: Duration,
        handlers: Handlers,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SupervisorEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();

        let roster = Roster::new();
        let dispatcher = Arc::new(Dispatcher::new(
            config.nick.clone(),
            Arc::new(handlers),
            roster.clone(),
        ));

        let shared = Arc::new(Shared {
            state: RwLock::new(SessionState::Disconnected),
            alive: AtomicBool::new(false),
            current: RwLock::new(None),
            roster,
            events: event_tx,
        });
        let stop = CancellationToken::new();

        let mut worker = Worker {
            last_session_id: 0,
            config,
            reconnect_delay,
            dispatcher,
            shared: shared.clone(),
            stop: stop.clone(),
            failure_tx,
            failure_rx,
        };

        // No stop can arrive before `start` returns; the connect timeout bounds this
        worker.set_state(SessionState::Connecting).await;
        let session = match worker.connect().await {
            Ok(session) => session,
            Err(e) => {
                worker.set_state(SessionState::Disconnected).await;
                return Err(e);
            }
        };
        let session_id = session.id();
        worker.install(session).await;
        worker.set_state(SessionState::Connected).await;

        let task = tokio::spawn(worker.run(session_id));

        Ok((
            Self {
                shared,
                stop,
                task: Arc::new(Mutex::new(Some(task))),
            },
            event_rx,
        ))
    }

    /// Post a chat line through the current session
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        match self.current().await {
            Some(session) => session.send_chat(text).await,
            None => Err(Error::NotConnected),
        }
    }

    /// Drop the current connection to exercise recovery
    pub async fn kill(&self) -> Result<()> {
        match self.current().await {
            Some(session) => session.kill().await,
            None => Err(Error::NotConnected),
        }
    }

    /// The installed session. The lock is released before any socket I/O so
    /// a stalled write never blocks teardown.
    async fn current(&self) -> Option<Arc<Session>> {
        self.shared.current.read().await.clone()
    }

    /// Display identities of everyone in the channel, in join order
    pub fn online_users(&self) -> Vec<String> {
        self.shared.roster.snapshot()
    }

    /// True while a session is connected
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> SessionState {
        *self.shared.state.read().await
    }

    /// Close the session and stop supervising. Idempotent.
    pub async fn stop(&self) {
        self.stop.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Supervisor task ended abnormally");
            }
        }
    }
}

/// State owned by the supervisor task
struct Worker {
    last_session_id: u64,
    config: SessionConfig,
    reconnect_delay: Duration,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<Shared>,
    stop: CancellationToken,
    failure_tx: mpsc::UnboundedSender<SessionFailure>,
    failure_rx: mpsc::UnboundedReceiver<SessionFailure>,
}

impl Worker {
    async fn run(mut self, mut session_id: u64) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                failure = self.failure_rx.recv() => {
                    let Some(failure) = failure else { break };
                    if failure.session_id != session_id {
                        debug!(session_id = failure.session_id, "Ignoring failure from old session");
                        continue;
                    }
                    warn!(session_id, error = %failure.error, "Session failed");
                    match self.recover().await {
                        Some(id) => session_id = id,
                        None => break,
                    }
                }
            }
        }
        self.shutdown().await;
    }

    /// Tear down the failed session and reconnect until it works or a stop
    /// is requested. Returns the new session id.
    async fn recover(&mut self) -> Option<u64> {
        self.set_state(SessionState::FatalError).await;
        self.teardown().await;

        loop {
            self.emit(SupervisorEvent::Crashed {
                retry_in: self.reconnect_delay,
            });
            self.set_state(SessionState::Disconnected).await;

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return None,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            self.emit(SupervisorEvent::Reconnecting);
            self.set_state(SessionState::Connecting).await;

            // Bounded by the connect timeout; a stop abandons the attempt
            let stop = self.stop.clone();
            let attempt = tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(session) => {
                    if self.stop.is_cancelled() {
                        session.close().await;
                        return None;
                    }
                    let id = session.id();
                    self.install(session).await;
                    self.set_state(SessionState::Connected).await;
                    self.emit(SupervisorEvent::Reconnected);
                    info!(session_id = id, "Reconnected");
                    return Some(id);
                }
                Err(e) => {
                    warn!(error = %e, "Reconnect attempt failed");
                    self.emit(SupervisorEvent::ConnectFailed(e.to_string()));
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<Arc<Session>> {
        self.last_session_id += 1;
        let session = Session::connect(
            self.last_session_id,
            &self.config,
            self.dispatcher.clone(),
            self.failure_tx.clone(),
        )
        .await?;
        Ok(Arc::new(session))
    }

    async fn install(&self, session: Arc<Session>) {
        *self.shared.current.write().await = Some(session);
    }

    async fn teardown(&self) {
        let session = self.shared.current.write().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    async fn shutdown(&self) {
        self.set_state(SessionState::Stopping).await;
        self.teardown().await;
        self.set_state(SessionState::Stopped).await;
        info!("Supervisor stopped");
    }

    async fn set_state(&self, state: SessionState) {
        *self.shared.state.write().await = state;
        self.shared
            .alive
            .store(state == SessionState::Connected, Ordering::SeqCst);
        debug!(state = ?state, "Session state changed");
        self.emit(SupervisorEvent::StateChanged(state));
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.shared.events.send(event);
    }
}
