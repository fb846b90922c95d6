use crate::codec;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SoundbarError};
use crate::protocol::Message;
use crate::reassembler::FrameReassembler;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const READ_BUFFER_SIZE: usize = 4096;

/// Longest a single frame write may stall before the session is failed
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Notification emitted on connection transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The socket is open and the receive loop is running
    Connected(SocketAddr),

    /// The session ended. `error` is set when it ended because of a
    /// transport failure rather than an explicit disconnect.
    Disconnected { error: Option<String> },
}

/// State shared between the foreground handle and the receive loop
struct Shared {
    dispatcher: Arc<Dispatcher>,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn cancel_session(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Tear down after a transport failure
    async fn fail(&self, error: &SoundbarError) {
        self.cancel_session();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.set_state(ConnectionState::Disconnected);
        let _ = self.event_tx.send(ConnectionEvent::Disconnected {
            error: Some(error.to_string()),
        });
    }
}

/// Receive task handle for one live socket
struct Session {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Low-level TCP connection to one soundbar
///
/// Owns at most one socket and at most one receive loop at a time. Decoded
/// messages are handed to the dispatcher from the receive loop.
pub struct Connection {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl Connection {
    /// Create a disconnected connection feeding the given dispatcher
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                state_tx,
                event_tx,
                writer: Mutex::new(None),
                cancel: std::sync::Mutex::new(CancellationToken::new()),
            }),
            session: Mutex::new(None),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Whether the connection is usable for sending
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to connect/disconnect notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// The dispatcher receiving decoded messages
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.shared.dispatcher.clone()
    }

    /// Open the socket and start the receive loop
    ///
    /// Does not retry. Any receive loop left over from an earlier session is
    /// joined before the new socket is opened.
    pub async fn connect(&self, host: &str, port: u16, connect_timeout: Duration) -> Result<()> {
        let mut session = self.session.lock().await;

        match self.state() {
            ConnectionState::Disconnected => {}
            state => {
                return Err(SoundbarError::Connection(format!(
                    "cannot connect while {:?}",
                    state
                )))
            }
        }

        if let Some(previous) = session.take() {
            previous.cancel.cancel();
            if let Err(e) = previous.reader.await {
                tracing::warn!("Previous receive loop ended abnormally: {}", e);
            }
        }

        tracing::info!("Connecting to {}:{}", host, port);
        self.shared.set_state(ConnectionState::Connecting);

        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::error!("Failed to connect to {}:{}: {}", host, port, e);
                return Err(SoundbarError::Connection(e.to_string()));
            }
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::error!("Timed out connecting to {}:{}", host, port);
                return Err(SoundbarError::Connection(format!(
                    "timed out after {:?}",
                    connect_timeout
                )));
            }
        };

        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(SoundbarError::Connection(e.to_string()));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (read_half, write_half) = stream.into_split();

        let cancel = CancellationToken::new();
        *self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        *self.shared.writer.lock().await = Some(write_half);

        self.shared.set_state(ConnectionState::Connected);
        let _ = self.shared.event_tx.send(ConnectionEvent::Connected(peer));
        tracing::info!("Connected to {}", peer);

        let reader = tokio::spawn(receive_loop(
            self.shared.clone(),
            read_half,
            cancel.clone(),
        ));
        *session = Some(Session { cancel, reader });

        Ok(())
    }

    /// Encode and write a message
    ///
    /// A write failure, or a write stalled for longer than `WRITE_TIMEOUT`,
    /// ends the session and is reported as `Send`; the write is not retried.
    /// A write interrupted by `disconnect` also returns `Send` but leaves the
    /// teardown to `disconnect`.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(SoundbarError::NotConnected);
        }

        let bytes = codec::encode(message)?;

        let mut writer = self.shared.writer.lock().await;
        let stream = writer.as_mut().ok_or(SoundbarError::NotConnected)?;
        let cancel = self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tracing::debug!(
            "Sending: {}",
            serde_json::to_string(message).unwrap_or_default()
        );

        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Send interrupted by disconnect");
                return Err(SoundbarError::Send("connection is closing".to_string()));
            }
            result = timeout(WRITE_TIMEOUT, write) => match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => SoundbarError::Send(e.to_string()),
                Err(_) => {
                    SoundbarError::Send(format!("write stalled for {:?}", WRITE_TIMEOUT))
                }
            },
        };

        tracing::error!("Failed to send message: {}", error);
        drop(writer);
        self.shared.fail(&error).await;
        Err(error)
    }

    /// Close the socket and wait for the receive loop to finish
    ///
    /// No dispatcher call happens after this returns. Calling it while
    /// already disconnected does nothing.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return;
        };

        tracing::info!("Disconnecting");
        let was_connected = self.is_connected();
        if was_connected {
            self.shared.set_state(ConnectionState::Closing);
        }

        active.cancel.cancel();
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Err(e) = active.reader.await {
            tracing::warn!("Receive loop ended abnormally: {}", e);
        }

        self.shared.set_state(ConnectionState::Disconnected);
        if was_connected {
            let _ = self
                .shared
                .event_tx
                .send(ConnectionEvent::Disconnected { error: None });
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.cancel_session();
    }
}

/// Read bytes until cancelled or the socket fails, dispatching every
/// complete frame that decodes.
async fn receive_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, cancel: CancellationToken) {
    let mut reassembler = FrameReassembler::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    let error = loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            read = reader.read(&mut buffer) => read,
        };

        let n = match read {
            Ok(0) => {
                if reassembler.is_mid_frame() {
                    tracing::warn!(
                        "Peer closed mid-frame, dropping {} buffered bytes",
                        reassembler.buffered()
                    );
                }
                tracing::info!("Connection closed by peer");
                break Some(SoundbarError::ConnectionClosed);
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Socket read error: {}", e);
                break Some(SoundbarError::Io(e));
            }
        };

        let frames = match reassembler.feed(&buffer[..n]) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!("Lost frame sync: {}", e);
                break Some(e);
            }
        };

        for frame in frames {
            if cancel.is_cancelled() {
                break;
            }
            match codec::decode(&frame) {
                Ok(message) => {
                    tracing::debug!("Received: {} {:?}", message.msg, message.data);
                    shared.dispatcher.dispatch(&message);
                }
                Err(e) => {
                    tracing::warn!("Dropping undecodable frame ({} bytes): {}", frame.len(), e);
                }
            }
        }
    };

    if let Some(error) = error {
        shared.fail(&error).await;
    }
    tracing::debug!("Receive loop stopped");
}
