use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Open-ended attribute payload carried by a message
pub type Data = Map<String, Value>;

/// Wire message structure
///
/// Outbound messages carry a `cmd`; inbound messages omit it. The `data`
/// payload is not schema-checked, unknown keys pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Command>,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Data>,
}

/// Command verbs understood by the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Get,
    Set,
}

/// Known message categories (the `msg` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Equalizer / sound mode info
    Equalizer,
    /// Speaker list and volume info
    Speaker,
    /// Input function info
    Function,
    /// Advanced settings
    Settings,
    /// Product identification
    Product,
}

impl View {
    /// Every known view, in poll rotation order
    pub const ALL: [View; 5] = [
        View::Equalizer,
        View::Speaker,
        View::Function,
        View::Settings,
        View::Product,
    ];

    /// Wire name of this view
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Equalizer => "EQ_VIEW_INFO",
            View::Speaker => "SPK_LIST_VIEW_INFO",
            View::Function => "FUNC_VIEW_INFO",
            View::Settings => "SETTING_VIEW_INFO",
            View::Product => "PRODUCT_INFO",
        }
    }

    /// Look up a view by its wire name
    pub fn from_wire(msg: &str) -> Option<Self> {
        View::ALL.into_iter().find(|view| view.as_str() == msg)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field keys used by the known views
pub mod keys {
    pub const VOLUME: &str = "i_vol";
    pub const VOLUME_MIN: &str = "i_vol_min";
    pub const VOLUME_MAX: &str = "i_vol_max";
    pub const MUTE: &str = "b_mute";
    pub const FUNCTION: &str = "i_curr_func";
    pub const FUNCTION_LIST: &str = "ai_func_list";
    pub const EQUALIZER: &str = "i_curr_eq";
    pub const EQUALIZER_LIST: &str = "ai_eq_list";
    pub const BASS: &str = "i_bass";
    pub const TREBLE: &str = "i_treble";
    pub const WOOFER_LEVEL: &str = "i_woofer_level";
    pub const REAR_LEVEL: &str = "i_rear_level";
    pub const NIGHT_MODE: &str = "b_night_mode";
}

impl Message {
    /// Create a `get` query for a view
    pub fn get(view: View) -> Self {
        Self {
            cmd: Some(Command::Get),
            msg: view.as_str().to_string(),
            data: None,
        }
    }

    /// Create a `set` command for a view with the given attributes
    pub fn set(view: View, data: Data) -> Self {
        Self {
            cmd: Some(Command::Set),
            msg: view.as_str().to_string(),
            data: Some(data),
        }
    }

    /// Create a `set` command carrying a single attribute
    pub fn set_one(view: View, key: &str, value: impl Into<Value>) -> Self {
        let mut data = Data::new();
        data.insert(key.to_string(), value.into());
        Self::set(view, data)
    }

    /// Known view this message belongs to, if any
    pub fn view(&self) -> Option<View> {
        View::from_wire(&self.msg)
    }
}
