//! Connection manager and channel handle.
//!
//! The manager is a single spawned task owning the transport handle, the
//! state machine, the retry timer, and the polling scheduler. Commands,
//! transport events, timer fires, and fetch completions are all serialized
//! through one `select!` loop, so no two transitions of the same channel
//! ever run concurrently. Dropping every [`Channel`] handle closes the
//! channel the same way an explicit `close()` does.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::fetch::FallbackFetcher;
use crate::polling::{PollOutcome, PollingScheduler};
use crate::status::{
    ConnectionState, LatestPayload, PayloadSource, StatusPublisher, StatusSnapshot, Subscription,
};
use crate::transport::{TransportEvent, TransportFactory, TransportHandle};

type ConnectFuture = Pin<Box<dyn Future<Output = ChannelResult<Box<dyn TransportHandle>>> + Send>>;

const COMMAND_BUFFER: usize = 16;

enum Command {
    Connect(oneshot::Sender<ChannelResult<()>>),
    Reconnect(oneshot::Sender<ChannelResult<()>>),
    Close(oneshot::Sender<()>),
}

/// Builder for a [`Channel`].
pub struct ChannelBuilder<T> {
    config: ChannelConfig,
    factory: Arc<dyn TransportFactory>,
    fetcher: Option<Arc<dyn FallbackFetcher<T>>>,
    backoff: Option<Arc<dyn Backoff>>,
}

impl<T> ChannelBuilder<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Configure the pull fallback. Without one the channel only ever
    /// retries the push transport.
    #[must_use]
    pub fn with_fallback_fetcher(mut self, fetcher: Arc<dyn FallbackFetcher<T>>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Override the backoff policy. Defaults to deterministic
    /// [`ExponentialBackoff`] derived from the config.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Validate the configuration and spawn the manager task. Construction
    /// acquires no transport; the channel starts `Idle` until `connect()`.
    ///
    /// # Errors
    /// Returns [`ChannelError::Config`] for an invalid configuration.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn build(self) -> ChannelResult<Channel<T>> {
        self.config.validate()?;

        let backoff = self
            .backoff
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::from(&self.config)));
        let publisher = Arc::new(StatusPublisher::new());
        let poller = self
            .fetcher
            .map(|fetcher| PollingScheduler::new(fetcher, self.config.polling_interval));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let manager = ConnectionManager {
            config: self.config,
            factory: self.factory,
            backoff,
            publisher: Arc::clone(&publisher),
            commands: commands_rx,
            poller,
            state: ConnectionState::Idle,
            attempt: 0,
            generation: 0,
            transport: None,
            connecting: None,
            retry: None,
            latest_payload: None,
            last_error: None,
        };
        tokio::spawn(manager.run());

        Ok(Channel {
            commands: commands_tx,
            publisher,
        })
    }
}

/// Handle to a resilient live data channel.
///
/// Cheap to clone; all clones drive the same manager. `T` is the decoded
/// payload type.
pub struct Channel<T> {
    commands: mpsc::Sender<Command>,
    publisher: Arc<StatusPublisher<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T> Channel<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start building a channel for `config` over `factory`.
    pub fn builder(config: ChannelConfig, factory: Arc<dyn TransportFactory>) -> ChannelBuilder<T> {
        ChannelBuilder {
            config,
            factory,
            fetcher: None,
            backoff: None,
        }
    }

    /// Open the push transport, tearing down any existing one first.
    ///
    /// Resolves once the manager has accepted the request and transitioned
    /// to `Connecting`; the outcome of the attempt itself is delivered
    /// through status updates, never to this caller.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] after `close()`.
    pub async fn connect(&self) -> ChannelResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(tx))
            .await
            .map_err(|_| ChannelError::Closed)?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Cancel any pending retry timer, reset the attempt counter to zero,
    /// and connect immediately.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] after `close()`.
    pub async fn reconnect(&self) -> ChannelResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Reconnect(tx))
            .await
            .map_err(|_| ChannelError::Closed)?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Close the channel: cancel timers and polling, release the transport,
    /// and transition to the terminal `Closed` state.
    ///
    /// Idempotent; callable from any state.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).await.is_ok() {
            // The manager may already be gone; both ways the channel is closed.
            let _ = rx.await;
        }
    }

    /// Register a status listener. See [`StatusPublisher::subscribe`].
    pub fn subscribe(
        &self,
        listener: impl Fn(&StatusSnapshot<T>) + Send + Sync + 'static,
    ) -> Subscription<T> {
        self.publisher.subscribe(listener)
    }

    /// Current status snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot<T> {
        self.publisher.snapshot()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.snapshot().state
    }

    /// Consecutive failed reconnect attempts since the last success.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.snapshot().attempt
    }

    /// Latest payload, if any has arrived.
    #[must_use]
    pub fn latest_payload(&self) -> Option<LatestPayload<T>> {
        self.snapshot().latest_payload
    }

    /// Most recent non-fatal failure.
    #[must_use]
    pub fn last_error(&self) -> Option<ChannelError> {
        self.snapshot().last_error
    }

    /// Watch receiver observing every status change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot<T>> {
        self.publisher.watch()
    }

    /// Status changes as an async stream.
    #[must_use]
    pub fn updates(&self) -> WatchStream<StatusSnapshot<T>> {
        WatchStream::new(self.publisher.watch())
    }
}

enum Step<T> {
    Command(Option<Command>),
    Opened(ChannelResult<Box<dyn TransportHandle>>),
    Transport(TransportEvent),
    RetryFired,
    Poll(PollOutcome<T>),
}

/// Owns the state machine and every live resource of one channel.
struct ConnectionManager<T> {
    config: ChannelConfig,
    factory: Arc<dyn TransportFactory>,
    backoff: Arc<dyn Backoff>,
    publisher: Arc<StatusPublisher<T>>,
    commands: mpsc::Receiver<Command>,
    poller: Option<PollingScheduler<T>>,
    state: ConnectionState,
    attempt: u32,
    /// Bumped whenever the authoritative data source changes (successful
    /// connect, manual connect, close); completions tagged with an older
    /// generation are discarded.
    generation: u64,
    transport: Option<Box<dyn TransportHandle>>,
    connecting: Option<ConnectFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    latest_payload: Option<LatestPayload<T>>,
    last_error: Option<ChannelError>,
}

impl<T> ConnectionManager<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                result = await_connect(&mut self.connecting) => Step::Opened(result),
                event = await_event(&mut self.transport) => Step::Transport(event),
                () = await_retry(&mut self.retry) => Step::RetryFired,
                outcome = await_poll(&mut self.poller) => Step::Poll(outcome),
            };

            match step {
                Step::Command(None) => {
                    debug!("All channel handles dropped, closing");
                    self.shutdown().await;
                    return;
                }
                Step::Command(Some(Command::Close(reply))) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
                Step::Command(Some(Command::Connect(reply))) => {
                    self.manual_connect().await;
                    let _ = reply.send(Ok(()));
                }
                Step::Command(Some(Command::Reconnect(reply))) => {
                    info!("Manual reconnect requested");
                    self.retry = None;
                    self.attempt = 0;
                    self.manual_connect().await;
                    let _ = reply.send(Ok(()));
                }
                Step::Opened(result) => {
                    self.connecting = None;
                    match result {
                        Ok(handle) => self.on_transport_open(handle),
                        Err(error) => {
                            warn!(error = %error, "Connect attempt failed");
                            self.on_disconnect(error).await;
                        }
                    }
                }
                Step::Transport(event) => self.on_transport_event(event).await,
                Step::RetryFired => {
                    self.retry = None;
                    debug!(attempt = self.attempt, "Reconnect timer fired");
                    // Timer-driven attempts stay in Reconnecting so polling
                    // keeps running across the retry window.
                    self.begin_attempt().await;
                }
                Step::Poll(outcome) => self.on_poll_outcome(outcome),
            }
        }
    }

    /// `connect()` / `reconnect()` entry: supersedes any scheduled retry,
    /// invalidates in-flight fallback work, and opens a fresh transport.
    async fn manual_connect(&mut self) {
        self.retry = None;
        self.generation += 1;
        if let Some(poller) = self.poller.as_mut() {
            poller.stop();
        }
        self.set_state(ConnectionState::Connecting);
        self.begin_attempt().await;
    }

    /// Tear down any current transport and start an open attempt under the
    /// current state.
    async fn begin_attempt(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            // Replaced handle is closed without routing through the
            // disconnect path.
            transport.close().await;
        }

        let factory = Arc::clone(&self.factory);
        let endpoint = self.config.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;
        self.connecting = Some(Box::pin(async move {
            let open = factory.open(&endpoint);
            match connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, open).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::Timeout(limit)),
                },
                None => open.await,
            }
        }));
    }

    fn on_transport_open(&mut self, handle: Box<dyn TransportHandle>) {
        info!(endpoint = %self.config.endpoint, "Push transport connected");
        // Anything still in flight from the down window is now stale.
        self.generation += 1;
        self.transport = Some(handle);
        self.attempt = 0;
        if let Some(poller) = self.poller.as_mut() {
            poller.stop();
        }
        self.last_error = None;
        self.set_state(ConnectionState::Connected);
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(raw) => self.on_message(&raw),
            TransportEvent::Closed { reason } => {
                warn!(%reason, "Push transport closed");
                self.release_transport().await;
                self.on_disconnect(ChannelError::Transport(reason)).await;
            }
            TransportEvent::Failed(error) => {
                warn!(error = %error, "Push transport failed");
                self.release_transport().await;
                self.on_disconnect(ChannelError::Transport(error)).await;
            }
        }
    }

    fn on_message(&mut self, raw: &str) {
        match serde_json::from_str::<T>(raw) {
            Ok(value) => self.apply_payload(value, PayloadSource::Push),
            Err(error) => {
                // A malformed single message is not a transport failure.
                warn!(error = %error, "Dropping undecodable message");
                self.last_error = Some(ChannelError::Decode(error.to_string()));
                self.publish();
            }
        }
    }

    fn apply_payload(&mut self, value: T, source: PayloadSource) {
        self.latest_payload = Some(LatestPayload {
            value,
            received_at: Instant::now(),
            source,
        });
        self.publish();
    }

    /// Shared disconnect path for transport close, transport error, and
    /// failed connect attempts.
    async fn on_disconnect(&mut self, error: ChannelError) {
        if self.state.is_terminal() {
            return;
        }

        self.attempt += 1;
        self.last_error = Some(error);
        self.set_state(ConnectionState::Reconnecting);

        if let Some(poller) = self.poller.as_mut() {
            poller.start(self.generation);
        }

        if self.backoff.attempts_allowed(self.attempt) {
            // Retry delays are 0-indexed: the first retry waits delay(0).
            let delay = self.backoff.delay(self.attempt - 1);
            debug!(attempt = self.attempt, ?delay, "Scheduling reconnect");
            self.retry = Some(Box::pin(tokio::time::sleep(delay)));
        } else {
            info!(
                attempt = self.attempt,
                "Automatic reconnects exhausted, polling is the sole data source"
            );
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn on_poll_outcome(&mut self, outcome: PollOutcome<T>) {
        if outcome.generation != self.generation {
            // The push transport took over while this fetch was in flight.
            debug!("Discarding stale fallback fetch result");
            return;
        }
        match outcome.result {
            Ok(value) => self.apply_payload(value, PayloadSource::Poll),
            Err(error) => {
                warn!(error = %error, "Fallback fetch failed");
                self.last_error = Some(error);
                self.publish();
            }
        }
    }

    /// Terminal teardown. Publishes `Closed` exactly once.
    async fn shutdown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        info!("Closing channel");

        self.generation += 1;
        self.retry = None;
        self.connecting = None;
        if let Some(poller) = self.poller.as_mut() {
            poller.stop();
        }
        if let Some(mut transport) = self.transport.take() {
            // Closed without observing further events, so the transport
            // cannot re-enter the reconnect path.
            transport.close().await;
        }

        self.set_state(ConnectionState::Closed);
    }

    async fn release_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "State transition");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.publisher.publish(StatusSnapshot {
            state: self.state,
            attempt: self.attempt,
            latest_payload: self.latest_payload.clone(),
            last_error: self.last_error.clone(),
        });
    }
}

async fn await_connect(
    connecting: &mut Option<ConnectFuture>,
) -> ChannelResult<Box<dyn TransportHandle>> {
    match connecting.as_mut() {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn await_event(transport: &mut Option<Box<dyn TransportHandle>>) -> TransportEvent {
    match transport.as_mut() {
        Some(handle) => handle.next_event().await,
        None => std::future::pending().await,
    }
}

async fn await_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn await_poll<T: Send + 'static>(poller: &mut Option<PollingScheduler<T>>) -> PollOutcome<T> {
    match poller.as_mut() {
        Some(poller) => poller.next_outcome().await,
        None => std::future::pending().await,
    }
}
