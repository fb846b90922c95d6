//! Firmware-defined enumerations. The index into each table is the wire value.

/// Input sources, in firmware order
pub const INPUT_SOURCES: [&str; 20] = [
    "Wifi",
    "Bluetooth",
    "Portable",
    "Aux",
    "Optical",
    "CP",
    "HDMI",
    "ARC",
    "Spotify",
    "Optical2",
    "HDMI2",
    "HDMI3",
    "LG TV",
    "Mic",
    "Chromecast",
    "Optical/HDMI ARC",
    "LG Optical",
    "FM",
    "USB_old",
    "USB",
];

/// Sound modes (equalizer presets), in firmware order
pub const SOUND_MODES: [&str; 19] = [
    "Standard",
    "Bass",
    "Flat",
    "Boost",
    "Treble and Bass",
    "User",
    "Music",
    "Cinema",
    "Night",
    "News",
    "Voice",
    "ia_sound",
    "Adaptive Sound Control",
    "Movie",
    "Bass Blast",
    "Dolby Atmos",
    "DTS Virtual X",
    "Bass Boost Plus",
    "DTS:X",
];

/// Volume level on the device's 0..=100 scale
pub type VolumeLevel = u8;

/// Highest volume the protocol accepts
pub const MAX_VOLUME: VolumeLevel = 100;

/// Name of the input source at `index`
pub fn source_name(index: usize) -> Option<&'static str> {
    INPUT_SOURCES.get(index).copied()
}

/// Index of the input source called `name`
pub fn source_index(name: &str) -> Option<usize> {
    INPUT_SOURCES.iter().position(|source| *source == name)
}

/// Name of the sound mode at `index`
pub fn sound_mode_name(index: usize) -> Option<&'static str> {
    SOUND_MODES.get(index).copied()
}

/// Index of the sound mode called `name`
pub fn sound_mode_index(name: &str) -> Option<usize> {
    SOUND_MODES.iter().position(|mode| *mode == name)
}
