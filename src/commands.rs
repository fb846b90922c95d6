use crate::connection::Connection;
use crate::error::{Result, SoundbarError};
use crate::protocol::{keys, Message, View};
use crate::state::StateStore;
use crate::types::{self, VolumeLevel, INPUT_SOURCES, MAX_VOLUME, SOUND_MODES};
use std::sync::Arc;

/// Direction of a relative volume change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

/// Typed commands sent to the soundbar
///
/// Every operation is fire-and-forget: success means the command was written
/// to the socket, not that the device applied it. Applied state shows up in
/// the state store once the device reports it.
#[derive(Clone)]
pub struct Commands {
    connection: Arc<Connection>,
    state: Arc<StateStore>,
    volume_step: VolumeLevel,
}

impl Commands {
    pub fn new(connection: Arc<Connection>, state: Arc<StateStore>, volume_step: VolumeLevel) -> Self {
        Self {
            connection,
            state,
            volume_step,
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.connection.send(&message).await
    }

    // ========== Volume Control ==========

    /// Set the absolute volume (0..=100)
    ///
    /// Out-of-range values are rejected, not clamped.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use lg_soundbar::{SoundbarClient, SoundbarConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = SoundbarClient::new(SoundbarConfig::new("192.168.1.50"));
    /// client.connect().await?;
    /// client.commands().set_volume(20).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_volume(&self, volume: i64) -> Result<()> {
        if !(0..=MAX_VOLUME as i64).contains(&volume) {
            return Err(SoundbarError::InvalidArgument(format!(
                "volume {} outside 0..={}",
                volume, MAX_VOLUME
            )));
        }
        self.send(Message::set_one(View::Speaker, keys::VOLUME, volume))
            .await
    }

    /// Step the volume up or down from the last observed level
    ///
    /// The device has no relative volume command, so the new level is
    /// computed from the state store and clamped to the reported range.
    pub async fn step_volume(&self, step: VolumeStep) -> Result<()> {
        let state = self.state.snapshot();
        let current = state.volume().ok_or_else(|| {
            SoundbarError::InvalidArgument("current volume has not been observed yet".to_string())
        })?;
        let min = state.volume_min().unwrap_or(0).max(0);
        let max = state
            .volume_max()
            .unwrap_or(MAX_VOLUME as i64)
            .min(MAX_VOLUME as i64);

        let delta = self.volume_step as i64;
        let target = match step {
            VolumeStep::Up => current + delta,
            VolumeStep::Down => current - delta,
        }
        .clamp(min, max.max(min));

        self.set_volume(target).await
    }

    pub async fn volume_up(&self) -> Result<()> {
        self.step_volume(VolumeStep::Up).await
    }

    pub async fn volume_down(&self) -> Result<()> {
        self.step_volume(VolumeStep::Down).await
    }

    // ========== Mute Control ==========

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.send(Message::set_one(View::Speaker, keys::MUTE, mute))
            .await
    }

    // ========== Input Selection ==========

    /// Select an input source by its index in [`INPUT_SOURCES`]
    pub async fn select_source(&self, index: usize) -> Result<()> {
        if index >= INPUT_SOURCES.len() {
            return Err(SoundbarError::InvalidArgument(format!(
                "source index {} outside 0..{}",
                index,
                INPUT_SOURCES.len()
            )));
        }
        self.send(Message::set_one(View::Function, keys::FUNCTION, index))
            .await
    }

    /// Select an input source by name
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use lg_soundbar::{SoundbarClient, SoundbarConfig};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = SoundbarClient::new(SoundbarConfig::new("192.168.1.50"));
    /// # client.connect().await?;
    /// client.commands().select_source_by_name("HDMI").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn select_source_by_name(&self, name: &str) -> Result<()> {
        let index = types::source_index(name)
            .ok_or_else(|| SoundbarError::InvalidArgument(format!("unknown source {}", name)))?;
        self.select_source(index).await
    }

    // ========== Sound Mode ==========

    /// Select a sound mode by its index in [`SOUND_MODES`]
    pub async fn select_sound_mode(&self, index: usize) -> Result<()> {
        if index >= SOUND_MODES.len() {
            return Err(SoundbarError::InvalidArgument(format!(
                "sound mode index {} outside 0..{}",
                index,
                SOUND_MODES.len()
            )));
        }
        self.send(Message::set_one(View::Equalizer, keys::EQUALIZER, index))
            .await
    }

    pub async fn select_sound_mode_by_name(&self, name: &str) -> Result<()> {
        let index = types::sound_mode_index(name)
            .ok_or_else(|| SoundbarError::InvalidArgument(format!("unknown sound mode {}", name)))?;
        self.select_sound_mode(index).await
    }

    // ========== Advanced Settings ==========

    pub async fn set_night_mode(&self, enabled: bool) -> Result<()> {
        self.send(Message::set_one(View::Settings, keys::NIGHT_MODE, enabled))
            .await
    }

    /// Set the subwoofer level. The accepted range is model dependent.
    pub async fn set_woofer_level(&self, level: i64) -> Result<()> {
        self.send(Message::set_one(View::Settings, keys::WOOFER_LEVEL, level))
            .await
    }

    // ========== Queries ==========

    /// Ask the device to report one view
    pub async fn query(&self, view: View) -> Result<()> {
        self.send(Message::get(view)).await
    }

    /// Query every known view once, stopping at the first failure
    pub async fn refresh(&self) -> Result<()> {
        for view in View::ALL {
            self.query(view).await?;
        }
        Ok(())
    }
}
