use crate::error::{Result, SoundbarError};
use crate::protocol::{Data, View};
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;

/// Attribute delta produced when a message changes the device state
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// Message category that carried the change
    pub msg: String,

    /// Only the keys whose value differs from the previous snapshot
    pub changed: Data,
}

impl StateChange {
    /// Known view the change came from, if any
    pub fn view(&self) -> Option<View> {
        View::from_wire(&self.msg)
    }
}

/// Receiver for state changes
pub struct StateReceiver {
    rx: broadcast::Receiver<StateChange>,
}

impl StateReceiver {
    /// Create a new state receiver
    pub(crate) fn new(rx: broadcast::Receiver<StateChange>) -> Self {
        Self { rx }
    }

    /// Receive the next state change
    ///
    /// Fails with `ConnectionClosed` once the state store has been dropped.
    pub async fn recv(&mut self) -> Result<StateChange> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => SoundbarError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => {
                SoundbarError::ChannelError(format!("Lagged by {} messages", n))
            }
        })
    }

    /// Try to receive a state change without blocking
    ///
    /// Returns `None` if no change is available.
    pub fn try_recv(&mut self) -> Result<Option<StateChange>> {
        match self.rx.try_recv() {
            Ok(change) => Ok(Some(change)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(SoundbarError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                Err(SoundbarError::ChannelError(format!("Lagged by {} messages", n)))
            }
        }
    }

    /// Turn the receiver into a stream of changes
    ///
    /// Lagged gaps are skipped with a warning; the stream ends when the
    /// state store is dropped.
    pub fn into_stream(self) -> impl Stream<Item = StateChange> + Send + 'static {
        stream::unfold(self.rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("State stream lagged by {} changes", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}
