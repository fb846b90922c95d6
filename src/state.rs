use crate::dispatcher::{Dispatcher, HandlerId};
use crate::protocol::{keys, Data, Message, View};
use crate::subscription::{StateChange, StateReceiver};
use crate::types::{self, MAX_VOLUME};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Snapshot of the last-known device state
///
/// Fields appear as their message categories are first received. A missing
/// field means it was never observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    fields: Data,
    views: BTreeMap<String, Data>,
}

impl DeviceState {
    /// Raw value of any field, including ones unknown to this crate
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All observed fields
    pub fn fields(&self) -> &Data {
        &self.fields
    }

    /// Whether nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merged data last received for a view
    pub fn view(&self, view: View) -> Option<&Data> {
        self.views.get(view.as_str())
    }

    /// Product identification data
    pub fn product(&self) -> Option<&Data> {
        self.view(View::Product)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    fn index(&self, key: &str) -> Option<usize> {
        self.fields
            .get(key)
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    fn index_list(&self, key: &str) -> Vec<usize> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_u64)
                    .map(|i| i as usize)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn volume(&self) -> Option<i64> {
        self.int(keys::VOLUME)
    }

    pub fn volume_min(&self) -> Option<i64> {
        self.int(keys::VOLUME_MIN)
    }

    pub fn volume_max(&self) -> Option<i64> {
        self.int(keys::VOLUME_MAX)
    }

    /// Volume as a fraction of the device's maximum
    pub fn volume_level(&self) -> Option<f64> {
        let max = self.volume_max().unwrap_or(MAX_VOLUME as i64);
        let volume = self.volume()?;
        if max == 0 {
            return Some(0.0);
        }
        Some(volume as f64 / max as f64)
    }

    pub fn muted(&self) -> Option<bool> {
        self.flag(keys::MUTE)
    }

    pub fn source_index(&self) -> Option<usize> {
        self.index(keys::FUNCTION)
    }

    /// Name of the active input source
    pub fn source(&self) -> Option<&'static str> {
        self.source_index().and_then(types::source_name)
    }

    /// Names of the sources the device reports as available, sorted
    pub fn available_sources(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .index_list(keys::FUNCTION_LIST)
            .into_iter()
            .filter_map(types::source_name)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn sound_mode_index(&self) -> Option<usize> {
        self.index(keys::EQUALIZER)
    }

    /// Name of the active sound mode
    pub fn sound_mode(&self) -> Option<&'static str> {
        self.sound_mode_index().and_then(types::sound_mode_name)
    }

    /// Names of the sound modes the device reports as available, sorted
    pub fn available_sound_modes(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .index_list(keys::EQUALIZER_LIST)
            .into_iter()
            .filter_map(types::sound_mode_name)
            .collect();
        names.sort_unstable();
        names
    }

    pub fn bass(&self) -> Option<i64> {
        self.int(keys::BASS)
    }

    pub fn treble(&self) -> Option<i64> {
        self.int(keys::TREBLE)
    }

    pub fn woofer_level(&self) -> Option<i64> {
        self.int(keys::WOOFER_LEVEL)
    }

    pub fn rear_level(&self) -> Option<i64> {
        self.int(keys::REAR_LEVEL)
    }

    pub fn night_mode(&self) -> Option<bool> {
        self.flag(keys::NIGHT_MODE)
    }
}

/// Mutable mirror of the device state
///
/// Written only from dispatcher callbacks on the receive task. Readers get a
/// cloned snapshot and never observe a half-applied message.
pub struct StateStore {
    state: RwLock<DeviceState>,
    change_tx: broadcast::Sender<StateChange>,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(100);
        Self {
            state: RwLock::new(DeviceState::default()),
            change_tx,
        }
    }

    /// Merge a message's data into the snapshot
    ///
    /// Keys present in the message overwrite earlier values, all other keys
    /// are left alone. Returns the delta, or `None` when nothing changed.
    pub fn apply(&self, message: &Message) -> Option<StateChange> {
        let data = message.data.as_ref()?;

        let mut changed = Data::new();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let view = state.views.entry(message.msg.clone()).or_default();
            for (key, value) in data {
                view.insert(key.clone(), value.clone());
            }
            for (key, value) in data {
                if state.fields.get(key) != Some(value) {
                    state.fields.insert(key.clone(), value.clone());
                    changed.insert(key.clone(), value.clone());
                }
            }
        }

        if changed.is_empty() {
            return None;
        }

        let change = StateChange {
            msg: message.msg.clone(),
            changed,
        };
        tracing::debug!("State changed via {}: {:?}", change.msg, change.changed);
        // No receivers is not an error
        let _ = self.change_tx.send(change.clone());
        Some(change)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> DeviceState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.change_tx.subscribe())
    }

    /// Forget everything observed so far
    pub fn reset(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = DeviceState::default();
    }

    /// Register one handler per known view that feeds this store
    pub fn attach(self: &Arc<Self>, dispatcher: &Dispatcher) -> Vec<HandlerId> {
        View::ALL
            .into_iter()
            .map(|view| {
                let store = self.clone();
                dispatcher.register(view, move |message: &Message| {
                    store.apply(message);
                })
            })
            .collect()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(msg: &str, data: Value) -> Message {
        serde_json::from_value(json!({ "msg": msg, "data": data })).unwrap()
    }

    #[test]
    fn test_merge_is_non_destructive() {
        let store = StateStore::new();
        store.apply(&inbound("SPK_LIST_VIEW_INFO", json!({"a": 1, "b": 2})));
        store.apply(&inbound("SPK_LIST_VIEW_INFO", json!({"a": 1})));

        let state = store.snapshot();
        assert_eq!(state.get("a"), Some(&json!(1)));
        assert_eq!(state.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_volume_and_mute() {
        let store = StateStore::new();
        let state = store.snapshot();
        assert_eq!(state.volume(), None);
        assert_eq!(state.muted(), None);

        store.apply(&inbound(
            "SPK_LIST_VIEW_INFO",
            json!({"i_vol": 35, "b_mute": false}),
        ));
        let state = store.snapshot();
        assert_eq!(state.volume(), Some(35));
        assert_eq!(state.muted(), Some(false));
        assert_eq!(state.volume_level(), Some(0.35));
    }

    #[test]
    fn test_delta_contains_only_changed_keys() {
        let store = StateStore::new();
        store.apply(&inbound("EQ_VIEW_INFO", json!({"i_curr_eq": 7, "i_bass": 2})));
        let change = store
            .apply(&inbound("EQ_VIEW_INFO", json!({"i_curr_eq": 8, "i_bass": 2})))
            .unwrap();
        assert_eq!(change.changed.len(), 1);
        assert_eq!(change.changed.get("i_curr_eq"), Some(&json!(8)));
        assert_eq!(change.view(), Some(View::Equalizer));

        assert!(store
            .apply(&inbound("EQ_VIEW_INFO", json!({"i_curr_eq": 8})))
            .is_none());
    }

    #[test]
    fn test_overlapping_views_last_write_wins() {
        let store = StateStore::new();
        store.apply(&inbound("FUNC_VIEW_INFO", json!({"i_curr_func": 4})));
        store.apply(&inbound("SPK_LIST_VIEW_INFO", json!({"i_curr_func": 6})));
        let state = store.snapshot();
        assert_eq!(state.source_index(), Some(6));
        assert_eq!(state.source(), Some("HDMI"));
    }

    #[test]
    fn test_named_lists_and_unknown_keys() {
        let store = StateStore::new();
        store.apply(&inbound(
            "EQ_VIEW_INFO",
            json!({"ai_eq_list": [0, 7, 99], "i_curr_eq": 7, "s_future": "x"}),
        ));
        let state = store.snapshot();
        assert_eq!(state.available_sound_modes(), vec!["Cinema", "Standard"]);
        assert_eq!(state.sound_mode(), Some("Cinema"));
        assert_eq!(state.get("s_future"), Some(&json!("x")));
    }

    #[test]
    fn test_product_view() {
        let store = StateStore::new();
        store.apply(&inbound("PRODUCT_INFO", json!({"s_product_name": "SL8YG"})));
        let state = store.snapshot();
        assert_eq!(
            state.product().and_then(|p| p.get("s_product_name")),
            Some(&json!("SL8YG"))
        );
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = StateStore::new();
        store.apply(&inbound("SETTING_VIEW_INFO", json!({"i_woofer_level": 3})));
        let before = store.snapshot();
        store.apply(&inbound("SETTING_VIEW_INFO", json!({"i_woofer_level": -2})));
        assert_eq!(before.woofer_level(), Some(3));
        assert_eq!(store.snapshot().woofer_level(), Some(-2));
    }

    #[tokio::test]
    async fn test_attached_store_broadcasts_changes() {
        let store = Arc::new(StateStore::new());
        let dispatcher = Dispatcher::new();
        store.attach(&dispatcher);
        let mut rx = store.subscribe();

        dispatcher.dispatch(&inbound("SETTING_VIEW_INFO", json!({"b_night_mode": true})));

        let change = rx.recv().await.unwrap();
        assert_eq!(change.msg, "SETTING_VIEW_INFO");
        assert_eq!(store.snapshot().night_mode(), Some(true));
    }
}
