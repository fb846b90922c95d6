use crate::commands::Commands;
use crate::connection::{ConnectionEvent, ConnectionState};
use crate::protocol::View;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodic info queries bounding how stale the state store can get
///
/// Ticks are skipped while disconnected. Every (re)connect triggers an
/// immediate round and restarts the interval.
pub struct PollScheduler {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    rounds: Arc<AtomicU64>,
}

impl PollScheduler {
    /// Spawn the scheduler
    pub fn start(
        commands: Commands,
        state_rx: watch::Receiver<ConnectionState>,
        events: broadcast::Receiver<ConnectionEvent>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let rounds = Arc::new(AtomicU64::new(0));
        let handle = tokio::spawn(run(
            commands,
            state_rx,
            events,
            interval,
            rounds.clone(),
            cancel.clone(),
        ));
        Self {
            cancel,
            handle: Some(handle),
            rounds,
        }
    }

    /// Number of query rounds sent in full so far
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::SeqCst)
    }

    /// Stop the scheduler and wait for it to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    commands: Commands,
    state_rx: watch::Receiver<ConnectionState>,
    mut events: broadcast::Receiver<ConnectionEvent>,
    interval: Duration,
    rounds: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    tracing::debug!("Polling every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent::Connected(peer)) => {
                    tracing::debug!("Polling {} after connect", peer);
                    ticker.reset();
                    poll_once(&commands, &rounds).await;
                }
                Ok(ConnectionEvent::Disconnected { .. }) => {
                    tracing::debug!("Polling paused");
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                let connected = *state_rx.borrow() == ConnectionState::Connected;
                if connected {
                    poll_once(&commands, &rounds).await;
                }
            }
        }
    }
    tracing::debug!("Poll scheduler stopped");
}

/// Query every view in rotation order, giving up at the first failure
async fn poll_once(commands: &Commands, rounds: &AtomicU64) {
    for view in View::ALL {
        if let Err(e) = commands.query(view).await {
            tracing::debug!("Poll of {} failed: {}", view, e);
            return;
        }
    }
    rounds.fetch_add(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::connection::Connection;
    use crate::dispatcher::Dispatcher;
    use crate::reassembler::FrameReassembler;
    use crate::state::StateStore;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};

    const TICK: Duration = Duration::from_millis(20);

    async fn next_query(peer: &mut TcpStream, reassembler: &mut FrameReassembler) -> String {
        let mut buffer = [0u8; 1024];
        loop {
            let n = peer.read(&mut buffer).await.unwrap();
            assert!(n > 0, "connection closed");
            if let Some(frame) = reassembler.feed(&buffer[..n]).unwrap().into_iter().next() {
                return codec::decode(&frame).unwrap().msg;
            }
        }
    }

    #[tokio::test]
    async fn test_no_polling_while_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection = Arc::new(Connection::new(Arc::new(Dispatcher::new())));
        let commands = Commands::new(connection.clone(), Arc::new(StateStore::new()), 1);
        let scheduler = PollScheduler::start(
            commands,
            connection.watch_state(),
            connection.subscribe_events(),
            TICK,
        );

        // Several ticks pass with no session
        sleep(TICK * 6).await;
        assert_eq!(scheduler.rounds(), 0);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        connection
            .connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let (mut peer, _) = accept.await.unwrap();

        let mut reassembler = FrameReassembler::new();
        let first = timeout(Duration::from_secs(5), next_query(&mut peer, &mut reassembler))
            .await
            .unwrap();
        assert_eq!(first, View::Equalizer.as_str());
        timeout(Duration::from_secs(5), async {
            while scheduler.rounds() == 0 {
                sleep(TICK).await;
            }
        })
        .await
        .unwrap();

        connection.disconnect().await;
        sleep(TICK * 2).await;
        let settled = scheduler.rounds();
        sleep(TICK * 6).await;
        assert_eq!(scheduler.rounds(), settled);

        scheduler.stop().await;
    }
}
