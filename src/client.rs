use crate::commands::Commands;
use crate::config::SoundbarConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionState};
use crate::dispatcher::{Dispatcher, HandlerId, Route};
use crate::error::{Result, SoundbarError};
use crate::poll::PollScheduler;
use crate::protocol::{Message, View};
use crate::state::{DeviceState, StateStore};
use crate::subscription::StateReceiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Client for one LG soundbar
///
/// Owns the connection, keeps a [`DeviceState`] mirror current from push
/// events and periodic polling, and exposes typed [`Commands`].
pub struct SoundbarClient {
    config: SoundbarConfig,
    connection: Arc<Connection>,
    state: Arc<StateStore>,
    commands: Commands,
    message_tx: broadcast::Sender<Message>,
    /// Set while the caller wants the connection up
    wanted: Arc<AtomicBool>,
    background: Mutex<Option<Background>>,
}

/// Tasks living for as long as the caller wants the connection up
struct Background {
    poller: PollScheduler,
    supervisor: Option<Supervisor>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SoundbarClient {
    /// Create a client. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: SoundbarConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let state = Arc::new(StateStore::new());
        state.attach(&dispatcher);

        let (message_tx, _) = broadcast::channel(100);
        let forward = message_tx.clone();
        dispatcher.register(Route::Any, move |message: &Message| {
            let _ = forward.send(message.clone());
        });

        let connection = Arc::new(Connection::new(dispatcher));
        let commands = Commands::new(connection.clone(), state.clone(), config.volume_step);

        Self {
            config,
            connection,
            state,
            commands,
            message_tx,
            wanted: Arc::new(AtomicBool::new(false)),
            background: Mutex::new(None),
        }
    }

    /// Connect, retrying with backoff per the configuration
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lg_soundbar::{SoundbarClient, SoundbarConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = SoundbarClient::new(SoundbarConfig::new("192.168.1.50"));
    ///     client.connect().await?;
    ///     client.commands().set_mute(true).await?;
    ///     client.disconnect().await;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(&self) -> Result<()> {
        self.config.validate()?;
        let mut background = self.background.lock().await;

        if let Err(e) = connect_with_retry(&self.connection, &self.config).await {
            // The supervisor may have won the race to reconnect
            if !self.connection.is_connected() {
                return Err(e);
            }
            tracing::debug!("Already connected: {}", e);
        }
        self.wanted.store(true, Ordering::SeqCst);

        if background.is_none() {
            let poller = PollScheduler::start(
                self.commands.clone(),
                self.connection.watch_state(),
                self.connection.subscribe_events(),
                self.config.poll_interval,
            );
            let supervisor = self.config.auto_reconnect.then(|| {
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(supervise(
                    self.connection.clone(),
                    self.config.clone(),
                    self.wanted.clone(),
                    cancel.clone(),
                ));
                Supervisor { cancel, handle }
            });
            *background = Some(Background { poller, supervisor });
        }

        Ok(())
    }

    /// Disconnect and stop polling and reconnecting
    pub async fn disconnect(&self) {
        self.wanted.store(false, Ordering::SeqCst);
        let mut background = self.background.lock().await;

        if let Some(tasks) = background.take() {
            if let Some(supervisor) = tasks.supervisor {
                supervisor.cancel.cancel();
                let _ = supervisor.handle.await;
            }
            tasks.poller.stop().await;
        }

        self.connection.disconnect().await;
    }

    /// Tear the session down and connect again
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Snapshot of the device state
    pub fn state(&self) -> DeviceState {
        self.state.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn config(&self) -> &SoundbarConfig {
        &self.config
    }

    /// Typed command operations
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Subscribe to state deltas
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lg_soundbar::{SoundbarClient, SoundbarConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = SoundbarClient::new(SoundbarConfig::new("192.168.1.50"));
    ///     let mut rx = client.subscribe_state();
    ///     client.connect().await?;
    ///
    ///     while let Ok(change) = rx.recv().await {
    ///         println!("{}: {:?}", change.msg, change.changed);
    ///     }
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe_state(&self) -> StateReceiver {
        self.state.subscribe()
    }

    /// Watch connection state transitions
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Connect/disconnect notifications, including transport error text
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe_events()
    }

    /// Every decoded message, known or not
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.message_tx.subscribe()
    }

    /// Register a raw message handler
    ///
    /// The handler runs on the receive task and must not block.
    pub fn on_message<F>(&self, route: impl Into<Route>, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.connection.dispatcher().register(route, handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.connection.dispatcher().unregister(id)
    }

    /// Query a view and wait for the next message of that view
    ///
    /// The protocol has no request ids, so any message of the same view
    /// arriving after the query satisfies the wait.
    pub async fn query_and_wait(&self, view: View, wait: Duration) -> Result<Message> {
        let mut rx = self.message_tx.subscribe();
        self.commands.query(view).await?;

        timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok(message) if message.msg == view.as_str() => return Ok(message),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Skipped {} messages while waiting for {}", n, view);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SoundbarError::ConnectionClosed)
                    }
                }
            }
        })
        .await
        .map_err(|_| SoundbarError::Timeout)?
    }
}

impl Drop for SoundbarClient {
    fn drop(&mut self) {
        if let Some(tasks) = self.background.get_mut().take() {
            if let Some(supervisor) = tasks.supervisor {
                supervisor.cancel.cancel();
            }
        }
    }
}

/// Connect, retrying `connect_retries` times with exponential backoff.
/// Already being connected counts as success.
async fn connect_with_retry(connection: &Connection, config: &SoundbarConfig) -> Result<()> {
    let mut attempt = 0;
    loop {
        if connection.is_connected() {
            return Ok(());
        }
        match connection
            .connect(&config.host, config.port, config.connect_timeout)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if attempt < config.connect_retries => {
                attempt += 1;
                let backoff = config.backoff_for(attempt);
                tracing::warn!(
                    "Connect attempt {} failed: {}; retrying in {:?}",
                    attempt,
                    e,
                    backoff
                );
                sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reconnect after unsolicited drops until cancelled
async fn supervise(
    connection: Arc<Connection>,
    config: SoundbarConfig,
    wanted: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut state_rx = connection.watch_state();
    let mut backoff = Duration::from_secs(0);

    loop {
        let disconnected = *state_rx.borrow_and_update() == ConnectionState::Disconnected;
        if !disconnected || !wanted.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
            }
        }

        if backoff > Duration::from_secs(0) {
            tracing::info!("Reconnecting in {:?}", backoff);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(backoff) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        if !wanted.load(Ordering::SeqCst) {
            continue;
        }

        match connection
            .connect(&config.host, config.port, config.connect_timeout)
            .await
        {
            Ok(()) => {
                tracing::info!("Reconnected to {}:{}", config.host, config.port);
                backoff = Duration::from_secs(0);
            }
            Err(e) => {
                tracing::error!("Reconnect failed: {}", e);
                // 1s, 2s, 4s, ... up to MAX_BACKOFF
                backoff = if backoff == Duration::from_secs(0) {
                    config.retry_backoff
                } else {
                    (backoff * 2).min(crate::config::MAX_BACKOFF)
                };
            }
        }
    }
}
