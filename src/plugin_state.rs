//! Per-plugin metadata kept beside the live plugin table.
//!
//! Records whether each known plugin is loaded and, after a failed load, the
//! error message, the state a diagnostics view reads. Entries survive
//! unregistration so a failed or removed plugin stays inspectable.

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginState {
    pub id: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Declared grant set; `None` for built-in (unrestricted) plugins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Default)]
pub struct PluginStateStore {
    states: DashMap<String, PluginState>,
}

impl PluginStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_loaded(&self, id: &str, capabilities: Option<Vec<String>>) {
        self.states.insert(
            id.to_string(),
            PluginState {
                id: id.to_string(),
                loaded: true,
                error: None,
                capabilities,
            },
        );
    }

    pub(crate) fn set_failed(&self, id: &str, capabilities: Option<Vec<String>>, error: String) {
        self.states.insert(
            id.to_string(),
            PluginState {
                id: id.to_string(),
                loaded: false,
                error: Some(error),
                capabilities,
            },
        );
    }

    pub(crate) fn set_unloaded(&self, id: &str) {
        if let Some(mut state) = self.states.get_mut(id) {
            state.loaded = false;
        }
    }

    pub fn get(&self, id: &str) -> Option<PluginState> {
        self.states.get(id).map(|s| s.clone())
    }

    pub fn all(&self) -> Vec<PluginState> {
        let mut states: Vec<PluginState> = self.states.iter().map(|s| s.clone()).collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    pub fn clear(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loaded_then_unloaded_keeps_entry() {
        let store = PluginStateStore::new();
        store.set_loaded("p1", None);
        assert!(store.get("p1").unwrap().loaded);

        store.set_unloaded("p1");
        let state = store.get("p1").unwrap();
        assert!(!state.loaded);
        assert!(state.error.is_none());
    }

    #[test]
    fn failed_records_error_and_capabilities() {
        let store = PluginStateStore::new();
        store.set_failed("p1", Some(vec!["pty:write".into()]), "onload failed".into());

        let state = store.get("p1").unwrap();
        assert!(!state.loaded);
        assert_eq!(state.error.as_deref(), Some("onload failed"));
        assert_eq!(state.capabilities, Some(vec!["pty:write".to_string()]));
    }

    #[test]
    fn reload_clears_previous_error() {
        let store = PluginStateStore::new();
        store.set_failed("p1", None, "boom".into());
        store.set_loaded("p1", None);

        let state = store.get("p1").unwrap();
        assert!(state.loaded);
        assert!(state.error.is_none());
    }

    #[test]
    fn all_is_sorted_by_id() {
        let store = PluginStateStore::new();
        store.set_loaded("zeta", None);
        store.set_loaded("alpha", None);

        let ids: Vec<String> = store.all().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn unknown_id_answers_none() {
        let store = PluginStateStore::new();
        assert!(store.get("nope").is_none());
        store.set_unloaded("nope"); // no entry created
        assert!(store.get("nope").is_none());
    }
}
