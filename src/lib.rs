//! Rust library for controlling LG networked soundbars
//!
//! This library speaks the soundbar's proprietary TCP protocol: AES-encrypted
//! JSON messages in length-prefixed frames on port 9741. It supports:
//!
//! - A persistent connection with a background receive loop
//! - Volume, mute, input source and sound mode control
//! - Night mode and subwoofer level settings
//! - A local mirror of device state kept fresh by push events and polling
//! - State change subscriptions and raw message handlers
//! - Automatic reconnection with exponential backoff
//!
//! # Quick Start
//!
//! ```no_run
//! use lg_soundbar::{SoundbarClient, SoundbarConfig, View};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SoundbarClient::new(SoundbarConfig::new("192.168.1.50"));
//!     client.connect().await?;
//!
//!     // Ask for volume info and wait for the answer
//!     client
//!         .query_and_wait(View::Speaker, Duration::from_secs(2))
//!         .await?;
//!     println!("Volume: {:?}", client.state().volume());
//!
//!     client.commands().set_volume(15).await?;
//!     client.commands().select_source_by_name("Optical").await?;
//!
//!     // Subscribe to state updates
//!     let mut updates = client.subscribe_state();
//!     if let Ok(change) = updates.recv().await {
//!         println!("State change: {:?}", change);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: Connection lifecycle, retries, polling and subscriptions
//! - **Commands**: Typed, validated, fire-and-forget device commands
//! - **State**: Last-known device attributes, merged from incoming messages
//! - **Dispatcher**: Routes decoded messages to handlers by message type
//! - **Connection**: TCP socket ownership and the background receive loop
//! - **Reassembler** / **Codec**: Framing and encryption of the wire format
//! - **Protocol** / **Types**: JSON message structures and firmware tables

mod client;
pub mod codec;
mod commands;
mod config;
mod connection;
mod dispatcher;
mod error;
mod poll;
mod protocol;
mod reassembler;
mod state;
mod subscription;
mod types;

// Public exports
pub use client::SoundbarClient;
pub use codec::{decode, encode, BLOCK_SIZE, FRAME_TAG, HEADER_LEN};
pub use commands::{Commands, VolumeStep};
pub use config::{SoundbarConfig, DEFAULT_PORT, MAX_BACKOFF};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use dispatcher::{Dispatcher, Handler, HandlerId, Route};
pub use error::{Result, SoundbarError};
pub use poll::PollScheduler;
pub use protocol::{keys, Command, Data, Message, View};
pub use reassembler::{FrameReassembler, ReassemblyState};
pub use state::{DeviceState, StateStore};
pub use subscription::{StateChange, StateReceiver};
pub use types::{
    sound_mode_index, sound_mode_name, source_index, source_name, VolumeLevel, INPUT_SOURCES,
    MAX_VOLUME, SOUND_MODES,
};
