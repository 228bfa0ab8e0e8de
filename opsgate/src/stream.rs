//! Long-lived log tailing and exec sessions.
//!
//! A UI holds a session for minutes while the transport underneath drops and
//! recovers. Log sessions reconnect with capped doubling backoff and
//! revalidate credentials before every attempt; exec sessions never
//! reconnect, a dropped connection terminates the remote shell.
use std::{
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use opsgate_core::{Error, ExecOptions, LogOptions, Result};

use crate::cluster::{ClusterClient, ExecChannel, ExecEvent};

/// Observable lifecycle of a log session.
///
/// `Closed` is the only terminal state; when the session ends with an
/// error, the error itself is delivered once on the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// The first connection attempt is in flight.
    Connecting,
    /// Lines are flowing.
    Open,
    /// The connection dropped; waiting out the backoff before attempt `attempt`.
    Reconnecting {
        /// 1-based reconnect attempt number.
        attempt: u32,
    },
    /// The session is over.
    Closed,
}

/// Reconnect policy for log sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Delay before the first reconnect attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the per-attempt delay.
    pub max_backoff: Duration,
    /// Consecutive failed attempts tolerated before the session fails.
    pub max_attempts: u32,
    /// Event channel capacity.
    pub buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            max_attempts: 5,
            buffer: 256,
        }
    }
}

// Doubling delay with a cap; a successful connection resets the budget.
struct Backoff {
    next: Duration,
    max: Duration,
    attempt: u32,
    budget: u32,
}

impl Backoff {
    fn new(settings: &StreamSettings) -> Self {
        Self {
            next: settings.initial_backoff,
            max: settings.max_backoff,
            attempt: 0,
            budget: settings.max_attempts,
        }
    }

    fn reset(&mut self, settings: &StreamSettings) {
        *self = Self::new(settings);
    }

    fn next_delay(&mut self) -> Option<(u32, Duration)> {
        if self.attempt >= self.budget {
            return None;
        }
        self.attempt += 1;
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        Some((self.attempt, delay))
    }
}

/// Checks that a session's credentials are still acceptable.
///
/// Consulted before every connection attempt, including reconnects, so a
/// token revoked mid-session ends it on the next drop instead of riding the
/// old connection indefinitely.
#[async_trait::async_trait]
pub trait TokenValidator: Send + Sync {
    /// Fail with [`Error::Unauthorized`] or [`Error::Forbidden`] to end the session.
    async fn validate(&self) -> Result<()>;
}

/// Validator for deployments without per-session credentials.
pub struct AlwaysValid;

#[async_trait::async_trait]
impl TokenValidator for AlwaysValid {
    async fn validate(&self) -> Result<()> {
        Ok(())
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A live log tailing session for one pod container.
///
/// Lines and the terminal error (if any) arrive via [`LogSession::recv`];
/// state transitions are observable via [`LogSession::state_changes`].
/// Dropping the session cancels its pump task.
pub struct LogSession {
    id: u64,
    opened_at: DateTime<Utc>,
    namespace: String,
    pod: String,
    container: Option<String>,
    events: mpsc::Receiver<Result<String>>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

impl LogSession {
    /// Open a session; the connection is established by a background task.
    pub fn open(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        pod: impl Into<String>,
        options: LogOptions,
        validator: Arc<dyn TokenValidator>,
        settings: StreamSettings,
    ) -> Self {
        let namespace = namespace.into();
        let pod = pod.into();
        let container = options.container.clone();
        let (event_tx, event_rx) = mpsc::channel(settings.buffer);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let cancel = CancellationToken::new();
        tokio::spawn(pump_logs(
            client,
            namespace.clone(),
            pod.clone(),
            options,
            validator,
            settings,
            event_tx,
            state_tx,
            cancel.clone(),
        ));
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            opened_at: Utc::now(),
            namespace,
            pod,
            container,
            events: event_rx,
            state: state_rx,
            cancel,
        }
    }

    /// Process-wide unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Namespace of the pod being tailed.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the pod being tailed.
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// The container, when the session targets a specific one.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// Next line, or the terminal error; `None` once the session is over.
    pub async fn recv(&mut self) -> Option<Result<String>> {
        self.events.recv().await
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A watch over state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// End the session. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump_logs(
    client: Arc<dyn ClusterClient>,
    namespace: String,
    pod: String,
    options: LogOptions,
    validator: Arc<dyn TokenValidator>,
    settings: StreamSettings,
    events: mpsc::Sender<Result<String>>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(&settings);
    let mut connected_once = false;
    loop {
        if let Err(err) = validator.validate().await {
            fail(&events, &state, err).await;
            return;
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = state.send(SessionState::Closed);
                return;
            }
            outcome = client.pod_logs(&namespace, &pod, &options) => outcome,
        };
        match outcome {
            Ok(mut stream) => {
                let _ = state.send(SessionState::Open);
                backoff.reset(&settings);
                connected_once = true;
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = state.send(SessionState::Closed);
                            return;
                        }
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(line)) => {
                            if events.send(Ok(line)).await.is_err() {
                                // Receiver gone; nobody is watching anymore.
                                let _ = state.send(SessionState::Closed);
                                return;
                            }
                        }
                        Some(Err(err)) if err.is_transport() => {
                            tracing::debug!(pod = %pod, error = %err, "log stream dropped");
                            break;
                        }
                        Some(Err(err)) => {
                            fail(&events, &state, err.into()).await;
                            return;
                        }
                        // A followed stream ending means the source went away
                        // underneath us; reconnect to find out why.
                        None if options.follow => break,
                        None => {
                            let _ = state.send(SessionState::Closed);
                            return;
                        }
                    }
                }
            }
            Err(err) if err.is_transport() => {
                tracing::debug!(pod = %pod, error = %err, "log connection failed");
            }
            Err(err) => {
                let classified = match Error::from(err) {
                    // The pod vanished mid-session; distinct from a bad
                    // address on the first connect.
                    Error::NotFound(msg) if connected_once => {
                        Error::StreamTerminated(format!("pod {pod:?} is gone: {msg}"))
                    }
                    other => other,
                };
                fail(&events, &state, classified).await;
                return;
            }
        }
        match backoff.next_delay() {
            Some((attempt, delay)) => {
                tracing::info!(pod = %pod, attempt, ?delay, "reconnecting log stream");
                let _ = state.send(SessionState::Reconnecting { attempt });
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = state.send(SessionState::Closed);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                fail(
                    &events,
                    &state,
                    Error::StreamTerminated(format!(
                        "gave up on pod {pod:?} after {} reconnect attempts",
                        settings.max_attempts
                    )),
                )
                .await;
                return;
            }
        }
    }
}

// State flips before the error is delivered so a caller that just received
// the error already observes the terminal state.
async fn fail(events: &mpsc::Sender<Result<String>>, state: &watch::Sender<SessionState>, err: Error) {
    tracing::warn!(error = %err, "log session failed");
    let _ = state.send(SessionState::Closed);
    let _ = events.send(Err(err)).await;
}

/// An interactive shell session in a pod container.
///
/// No reconnect: the remote process's lifetime is bound to this connection,
/// so a drop terminates the shell and the session with it. The state
/// machine is degenerate next to [`LogSession`]'s: [`ExecSession::open`]
/// returns an already-`Open` session and the only transition left is to
/// `Closed`, `Reconnecting` is never entered.
pub struct ExecSession {
    id: u64,
    opened_at: DateTime<Utc>,
    namespace: String,
    pod: String,
    container: Option<String>,
    input: Option<mpsc::Sender<Vec<u8>>>,
    events: mpsc::Receiver<ExecEvent>,
    state: watch::Sender<SessionState>,
}

impl ExecSession {
    /// Start a shell in the given pod container.
    pub async fn open(
        client: &dyn ClusterClient,
        namespace: &str,
        pod: &str,
        options: &ExecOptions,
        validator: &dyn TokenValidator,
    ) -> Result<Self> {
        validator.validate().await?;
        let ExecChannel { input, events } = client.pod_exec(namespace, pod, options).await?;
        let (state, _) = watch::channel(SessionState::Open);
        Ok(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            opened_at: Utc::now(),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: options.container.clone(),
            input: Some(input),
            events,
            state,
        })
    }

    /// Process-wide unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Namespace of the pod the shell runs in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the pod the shell runs in.
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// The container, when the session targets a specific one.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A watch over state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Send bytes to the remote shell's stdin.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| Error::StreamTerminated("exec session is closed".into()))?;
        input.send(bytes).await.map_err(|_| {
            self.state.send_replace(SessionState::Closed);
            Error::StreamTerminated("exec connection dropped".into())
        })
    }

    /// Next event from the container; `None` after the process exited and
    /// the channel drained.
    pub async fn recv(&mut self) -> Option<ExecEvent> {
        let event = self.events.recv().await;
        if matches!(event, Some(ExecEvent::Exited(_)) | None) {
            self.state.send_replace(SessionState::Closed);
        }
        event
    }

    /// Close stdin, terminating the remote shell. Idempotent.
    ///
    /// Events already in flight, including the final
    /// [`ExecEvent::Exited`], stay receivable after the close.
    pub fn close(&mut self) {
        self.input = None;
        self.state.send_replace(SessionState::Closed);
    }
}
