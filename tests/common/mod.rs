//! Mock soundbar speaking the framed, encrypted protocol over loopback TCP.

#![allow(dead_code)]

use lg_soundbar::{codec, FrameReassembler, Message, SoundbarConfig};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockDevice {
    listener: TcpListener,
    port: u16,
}

impl MockDevice {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client config pointing at this device, polling rarely
    pub fn config(&self) -> SoundbarConfig {
        SoundbarConfig::new("127.0.0.1")
            .with_port(self.port)
            .with_connect_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_secs(3600))
            .with_connect_retries(0, Duration::from_millis(10))
    }

    pub async fn accept(&self) -> DeviceSession {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        DeviceSession {
            stream,
            reassembler: FrameReassembler::new(),
            pending: VecDeque::new(),
        }
    }
}

pub struct DeviceSession {
    stream: TcpStream,
    reassembler: FrameReassembler,
    pending: VecDeque<Message>,
}

impl DeviceSession {
    /// Next message written by the client
    pub async fn recv(&mut self) -> Message {
        let mut buffer = [0u8; 1024];
        loop {
            if let Some(message) = self.pending.pop_front() {
                return message;
            }
            let n = timeout(WAIT, self.stream.read(&mut buffer))
                .await
                .expect("client sent nothing")
                .unwrap();
            assert!(n > 0, "client closed the connection");
            for frame in self.reassembler.feed(&buffer[..n]).unwrap() {
                self.pending.push_back(codec::decode(&frame).unwrap());
            }
        }
    }

    /// Skip messages until one matches
    pub async fn recv_where(&mut self, pred: impl Fn(&Message) -> bool) -> Message {
        loop {
            let message = self.recv().await;
            if pred(&message) {
                return message;
            }
        }
    }

    /// Send an inbound message given as JSON
    pub async fn send(&mut self, json: serde_json::Value) {
        let message: Message = serde_json::from_value(json).unwrap();
        let bytes = codec::encode(&message).unwrap();
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
