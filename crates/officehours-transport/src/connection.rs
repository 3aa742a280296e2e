//! Live connection manager.
//!
//! [`ConnectionManager`] owns exactly one [`Channel`] at a time. Every close
//! event is classified:
//! - `1000` is an intentional close: nothing is surfaced, nothing retried.
//! - `1006` (no close frame) is recoverable: a new channel is opened
//!   according to the configured [`ReconnectPolicy`], without surfacing an
//!   error. Consecutive failures before an `Open` double the reconnect delay,
//!   up to `max_reconnect_delay`.
//! - Any other code is surfaced through the error signal and not retried.
//!
//! The manager is driven by one task ([`ConnectionManager::spawn`]) that
//! serializes channel events, visibility changes, reconnect delays and
//! shutdown. The same steps are exposed synchronously
//! ([`ConnectionManager::handle_event`] and friends) for hosts that run
//! their own event loop.

use std::time::Duration;

use officehours_core::{
    Channel, ChannelError, ChannelEvent, Connector, ReadyState,
    channel::{CLOSE_ABNORMAL, CLOSE_NORMAL},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{ConnectionError, ErrorSignal},
    router::{MessageRouter, RouteError},
};

/// Delay before the first reconnect attempt after an abnormal closure.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 250;
/// Upper bound of the doubled reconnect delay.
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 5_000;

/// How the manager recovers from an abnormal closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Set a pending flag; the driver opens a new channel after the
    /// reconnect delay.
    #[default]
    Flag,
    /// Reconnect after the reconnect delay while the page is visible;
    /// otherwise wait for the page to come back to the foreground.
    Visibility,
}

/// Whether the host page is in the foreground.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Connection lifecycle as seen by the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Closed on purpose, by either side.
    ClosedClean,
    /// Closed by the server with an error that is not retried.
    ClosedError,
    /// Lost without a close frame; a new channel will be opened.
    PendingReconnect,
}

/// Classification of a close code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    Normal,
    Abnormal,
    Application(ConnectionError),
}

impl Closure {
    #[must_use]
    pub fn classify(code: u16) -> Self {
        match code {
            CLOSE_NORMAL => Self::Normal,
            CLOSE_ABNORMAL => Self::Abnormal,
            other => Self::Application(ConnectionError::from_close_code(other)),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Channel URL of the subscribed resource.
    pub url: String,
    #[serde(default)]
    pub policy: ReconnectPolicy,
    /// Delay before the first reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Cap for the doubled delay of consecutive attempts, in milliseconds.
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
}

const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

const fn default_max_reconnect_delay_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms))
    }
}

/// Owns the live channel of one subscription.
pub struct ConnectionManager<C: Connector, T> {
    connector: C,
    config: ConnectionConfig,
    router: MessageRouter<T>,
    channel: Option<C::Channel>,
    connection_id: Uuid,
    generation: u64,
    state: watch::Sender<ConnectionState>,
    errors: ErrorSignal,
    visibility: Option<watch::Receiver<Visibility>>,
    foreground: Visibility,
    last_closure_abnormal: bool,
    reconnect_pending: bool,
    /// Delay of the pending reconnect.
    retry_delay: Duration,
    /// Delay for the next abnormal closure; reset once a channel opens.
    backoff: Duration,
}

enum Wake {
    Shutdown,
    Visibility(Option<Visibility>),
    Outbound(String),
    Channel(Option<ChannelEvent>),
}

impl<C: Connector, T: DeserializeOwned> ConnectionManager<C, T> {
    /// Create the manager and open its first channel.
    #[must_use]
    pub fn new(connector: C, config: ConnectionConfig, router: MessageRouter<T>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let backoff = config.reconnect_delay();
        let mut manager = Self {
            connector,
            config,
            router,
            channel: None,
            connection_id: Uuid::nil(),
            generation: 0,
            state,
            errors: ErrorSignal::new(),
            visibility: None,
            foreground: Visibility::Visible,
            last_closure_abnormal: false,
            reconnect_pending: false,
            retry_delay: backoff,
            backoff,
        };
        manager.connect();
        manager
    }

    /// Follow the host page's visibility.
    ///
    /// Without a visibility signal the page is assumed to be visible.
    #[must_use]
    pub fn with_visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
        self.foreground = *visibility.borrow();
        self.visibility = Some(visibility);
        self
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn current_error(&self) -> Option<ConnectionError> {
        self.errors.current()
    }

    #[must_use]
    pub const fn errors(&self) -> &ErrorSignal {
        &self.errors
    }

    /// Number of channels opened so far, including the live one.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a delayed reconnect is waiting to run.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Delay the driver waits before running the pending reconnect.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Close and drop the live channel, if any.
    fn retire_channel(&mut self, reason: &str) {
        if let Some(mut channel) = self.channel.take() {
            if !matches!(channel.ready_state(), ReadyState::Closing | ReadyState::Closed) {
                channel.close(CLOSE_NORMAL, reason);
            }
            debug!(connection_id = %self.connection_id, reason, "channel retired");
        }
    }

    fn connect(&mut self) {
        self.retire_channel("replaced");
        self.generation += 1;
        self.connection_id = Uuid::new_v4();
        debug!(
            url = %self.config.url,
            connection_id = %self.connection_id,
            generation = self.generation,
            "opening channel"
        );
        self.channel = Some(self.connector.open(&self.config.url));
        self.reconnect_pending = false;
        self.last_closure_abnormal = false;
        self.errors.clear();
        self.set_state(ConnectionState::Connecting);
    }

    /// Replace the live channel with a new one.
    pub fn reconnect(&mut self) {
        self.connect();
    }

    /// Send a text message on the live channel.
    ///
    /// # Errors
    /// Returns error if there is no open channel.
    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        self.channel.as_ref().ok_or(ChannelError::Closed)?.send(text)
    }

    /// Process one event of the live channel.
    ///
    /// # Errors
    /// Returns [`ConnectionError::UnexpectedDeleted`] when a `deleted`
    /// message arrives without a delete handler. The connection should not
    /// be used afterwards.
    pub fn handle_event(&mut self, event: ChannelEvent) -> Result<(), ConnectionError> {
        match event {
            ChannelEvent::Open => {
                info!(
                    url = %self.config.url,
                    connection_id = %self.connection_id,
                    generation = self.generation,
                    "channel open"
                );
                self.backoff = self.config.reconnect_delay();
                self.set_state(ConnectionState::Open);
            }
            ChannelEvent::Message(text) => match self.router.route(&text, &self.errors) {
                Ok(()) => {}
                Err(RouteError::Malformed(e)) => {
                    warn!(connection_id = %self.connection_id, error = %e, "ignoring invalid message");
                }
                Err(RouteError::UnexpectedDeleted) => {
                    error!(connection_id = %self.connection_id, "deleted message without a delete handler");
                    return Err(ConnectionError::UnexpectedDeleted);
                }
            },
            ChannelEvent::Close { code, reason } => self.handle_close(code, &reason),
            ChannelEvent::Error(detail) => {
                self.errors.set(ConnectionError::Transport(detail));
            }
        }
        Ok(())
    }

    fn handle_close(&mut self, code: u16, reason: &str) {
        match Closure::classify(code) {
            Closure::Normal => {
                info!(connection_id = %self.connection_id, code, reason, "channel closed");
                self.set_state(ConnectionState::ClosedClean);
            }
            Closure::Abnormal => {
                self.last_closure_abnormal = true;
                self.set_state(ConnectionState::PendingReconnect);
                if self.config.policy == ReconnectPolicy::Visibility
                    && self.foreground == Visibility::Hidden
                {
                    debug!(connection_id = %self.connection_id, "page hidden, reconnect deferred");
                    return;
                }
                self.schedule_reconnect();
            }
            Closure::Application(err) => {
                warn!(connection_id = %self.connection_id, code, reason, "channel closed by server");
                self.set_state(ConnectionState::ClosedError);
                self.errors.set(err);
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.retry_delay = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(self.config.max_reconnect_delay());
        self.reconnect_pending = true;
        info!(
            connection_id = %self.connection_id,
            delay_ms = duration_ms(self.retry_delay),
            "channel lost, will reconnect"
        );
    }

    /// Run the pending reconnect once its delay has passed.
    fn reconnect_due(&mut self) {
        self.reconnect_pending = false;
        if let Some(visibility) = &self.visibility {
            self.foreground = *visibility.borrow();
        }
        if self.config.policy == ReconnectPolicy::Visibility && self.foreground == Visibility::Hidden {
            debug!(connection_id = %self.connection_id, "page hidden, reconnect deferred");
            return;
        }
        self.connect();
    }

    /// Process a visibility change of the host page.
    ///
    /// Under [`ReconnectPolicy::Visibility`], returning to the foreground
    /// after an abnormal closure opens a new channel.
    pub fn handle_visibility(&mut self, visibility: Visibility) {
        let previous = std::mem::replace(&mut self.foreground, visibility);
        if self.config.policy != ReconnectPolicy::Visibility
            || visibility != Visibility::Visible
            || previous == Visibility::Visible
        {
            return;
        }

        let closed = self
            .channel
            .as_ref()
            .is_none_or(|channel| channel.ready_state() == ReadyState::Closed);
        if closed && self.last_closure_abnormal && !self.reconnect_pending {
            info!(connection_id = %self.connection_id, "page visible again, reconnecting");
            self.connect();
        }
    }

    /// Cancel any pending reconnect and close the live channel normally.
    pub fn dispose(&mut self) {
        self.reconnect_pending = false;
        self.last_closure_abnormal = false;
        self.retire_channel("disposed");
        self.set_state(ConnectionState::ClosedClean);
    }

    fn polling_channel(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        )
    }
}

async fn next_channel_event<Ch: Channel>(
    channel: Option<&mut Ch>,
    polling: bool,
) -> Option<ChannelEvent> {
    match channel {
        Some(channel) if polling => channel.next_event().await,
        _ => std::future::pending().await,
    }
}

async fn next_visibility(visibility: Option<&mut watch::Receiver<Visibility>>) -> Option<Visibility> {
    match visibility {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

impl<C, T> ConnectionManager<C, T>
where
    C: Connector + 'static,
    T: DeserializeOwned + Send + 'static,
{
    /// Drive the manager until shutdown or a protocol violation.
    ///
    /// `outbound` carries messages to send on the live channel.
    ///
    /// # Errors
    /// Returns [`ConnectionError::UnexpectedDeleted`] on a `deleted`
    /// message without a delete handler.
    pub async fn run(
        mut self,
        mut shutdown: oneshot::Receiver<()>,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) -> Result<(), ConnectionError> {
        loop {
            if self.reconnect_pending {
                let delay = self.retry_delay;
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        self.dispose();
                        return Ok(());
                    }
                    () = tokio::time::sleep(delay) => self.reconnect_due(),
                }
                continue;
            }

            let polling = self.polling_channel();
            let wake = tokio::select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                visibility = next_visibility(self.visibility.as_mut()) => Wake::Visibility(visibility),
                Some(text) = outbound.recv() => Wake::Outbound(text),
                event = next_channel_event(self.channel.as_mut(), polling) => Wake::Channel(event),
            };

            match wake {
                Wake::Shutdown => {
                    self.dispose();
                    return Ok(());
                }
                Wake::Visibility(Some(visibility)) => self.handle_visibility(visibility),
                Wake::Visibility(None) => {
                    debug!("visibility signal gone, assuming visible");
                    self.visibility = None;
                    self.handle_visibility(Visibility::Visible);
                }
                Wake::Outbound(text) => {
                    if let Err(e) = self.send(text) {
                        warn!(connection_id = %self.connection_id, error = %e, "dropping outbound message");
                    }
                }
                Wake::Channel(event) => {
                    let event = event.unwrap_or_else(|| {
                        warn!(connection_id = %self.connection_id, "channel ended without a close event");
                        ChannelEvent::close(CLOSE_ABNORMAL)
                    });
                    if let Err(err) = self.handle_event(event) {
                        self.errors.set(err.clone());
                        self.dispose();
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Run the manager on its own task.
    #[must_use]
    pub fn spawn(self) -> ConnectionHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let errors = self.errors.subscribe();
        let states = self.state.subscribe();
        let task = tokio::spawn(self.run(shutdown_rx, outbound_rx));
        ConnectionHandle {
            errors,
            states,
            outbound: outbound_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Open a subscription with the default configuration and run it.
#[must_use]
pub fn open<C, T>(connector: C, url: impl Into<String>, router: MessageRouter<T>) -> ConnectionHandle
where
    C: Connector + 'static,
    T: DeserializeOwned + Send + 'static,
{
    ConnectionManager::new(connector, ConnectionConfig::new(url), router).spawn()
}

/// Handle to a spawned [`ConnectionManager`].
///
/// Dropping the handle disposes the connection.
pub struct ConnectionHandle {
    errors: watch::Receiver<Option<ConnectionError>>,
    states: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ConnectionError>>>,
}

impl ConnectionHandle {
    /// Error to show to the user, if any.
    #[must_use]
    pub fn current_error(&self) -> Option<ConnectionError> {
        self.errors.borrow().clone()
    }

    /// Receiver that observes every change of the current error.
    #[must_use]
    pub fn errors(&self) -> watch::Receiver<Option<ConnectionError>> {
        self.errors.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.states.borrow()
    }

    #[must_use]
    pub fn states(&self) -> watch::Receiver<ConnectionState> {
        self.states.clone()
    }

    /// Queue a text message for the live channel.
    ///
    /// # Errors
    /// Returns error if the connection task has stopped.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        self.outbound
            .send(text.into())
            .map_err(|_| ChannelError::Closed)
    }

    /// Wait for the connection task to stop on its own.
    ///
    /// Cancel safe: dropping the future keeps the task attached.
    ///
    /// # Errors
    /// Returns the error that stopped the task.
    pub async fn wait(&mut self) -> Result<(), ConnectionError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(|e| ConnectionError::Task(e.to_string()))?
    }

    /// Close the connection and wait for the task to finish.
    ///
    /// # Errors
    /// Returns the error that stopped the task, if it stopped before.
    pub async fn dispose(mut self) -> Result<(), ConnectionError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.wait().await
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}
