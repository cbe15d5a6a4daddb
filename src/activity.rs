//! Activity feed store: sections registered by plugins and the items they
//! publish into them.
//!
//! The runtime owns this store and forwards add/remove/update calls from the
//! host facade; rendering is entirely the UI's concern. Section registrations
//! under the same id form a last-registered-wins stack; disposing the most
//! recent restores the previous one.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A section of the activity feed, e.g. "Pull Requests" or "Plans".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySection {
    pub id: String,
    pub label: String,
    pub priority: i32,
    pub can_dismiss_all: bool,
}

/// One entry in the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub plugin_id: String,
    pub section_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub icon: String,
    pub dismissible: bool,
    /// Markdown content URI opened when the item is activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_uri: Option<String>,
}

struct SectionEntry {
    registration_id: u64,
    plugin_id: String,
    section: ActivitySection,
}

/// Store for activity sections and items.
#[derive(Default)]
pub struct ActivityStore {
    /// Registration stack per section id; the most recent entry is active.
    sections: Mutex<HashMap<String, Vec<SectionEntry>>>,
    items: Mutex<Vec<ActivityItem>>,
}

impl ActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_section(
        &self,
        registration_id: u64,
        plugin_id: &str,
        section: ActivitySection,
    ) {
        self.sections
            .lock()
            .entry(section.id.clone())
            .or_default()
            .push(SectionEntry {
                registration_id,
                plugin_id: plugin_id.to_string(),
                section,
            });
    }

    /// Remove one section registration by id, restoring whatever it shadowed.
    pub(crate) fn dispose_section(&self, section_id: &str, registration_id: u64) -> bool {
        let mut sections = self.sections.lock();
        let Some(stack) = sections.get_mut(section_id) else {
            return false;
        };
        let before = stack.len();
        stack.retain(|e| e.registration_id != registration_id);
        let removed = stack.len() != before;
        if stack.is_empty() {
            sections.remove(section_id);
        }
        removed
    }

    /// The currently active sections (top of each stack), highest priority
    /// first, ties broken by id.
    pub fn active_sections(&self) -> Vec<ActivitySection> {
        let sections = self.sections.lock();
        let mut active: Vec<ActivitySection> = sections
            .values()
            .filter_map(|stack| stack.last())
            .map(|e| e.section.clone())
            .collect();
        active.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        active
    }

    /// The active registration for a section id, if any.
    pub fn section(&self, section_id: &str) -> Option<ActivitySection> {
        self.sections
            .lock()
            .get(section_id)
            .and_then(|stack| stack.last())
            .map(|e| e.section.clone())
    }

    /// Insert or replace an item, keyed by `(plugin_id, id)`.
    pub(crate) fn upsert_item(&self, item: ActivityItem) {
        let mut items = self.items.lock();
        match items
            .iter_mut()
            .find(|i| i.plugin_id == item.plugin_id && i.id == item.id)
        {
            Some(slot) => *slot = item,
            None => items.push(item),
        }
    }

    /// Replace an existing item; returns false when the item is unknown.
    pub(crate) fn update_item(&self, item: ActivityItem) -> bool {
        let mut items = self.items.lock();
        match items
            .iter_mut()
            .find(|i| i.plugin_id == item.plugin_id && i.id == item.id)
        {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_item(&self, plugin_id: &str, item_id: &str) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|i| !(i.plugin_id == plugin_id && i.id == item_id));
        items.len() != before
    }

    /// All items in insertion order.
    pub fn items(&self) -> Vec<ActivityItem> {
        self.items.lock().clone()
    }

    pub fn items_for_section(&self, section_id: &str) -> Vec<ActivityItem> {
        self.items
            .lock()
            .iter()
            .filter(|i| i.section_id == section_id)
            .cloned()
            .collect()
    }

    /// Sweep every section registration and item a plugin owns.
    pub(crate) fn remove_plugin(&self, plugin_id: &str) {
        let mut sections = self.sections.lock();
        sections.retain(|_, stack| {
            stack.retain(|e| e.plugin_id != plugin_id);
            !stack.is_empty()
        });
        drop(sections);
        self.items.lock().retain(|i| i.plugin_id != plugin_id);
    }

    pub fn clear(&self) {
        self.sections.lock().clear();
        self.items.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(id: &str, priority: i32) -> ActivitySection {
        ActivitySection {
            id: id.to_string(),
            label: id.to_uppercase(),
            priority,
            can_dismiss_all: false,
        }
    }

    fn item(plugin_id: &str, id: &str, section_id: &str) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            plugin_id: plugin_id.to_string(),
            section_id: section_id.to_string(),
            title: id.to_string(),
            subtitle: None,
            icon: "dot".to_string(),
            dismissible: true,
            content_uri: None,
        }
    }

    #[test]
    fn sections_sorted_by_priority_desc() {
        let store = ActivityStore::new();
        store.register_section(1, "a", section("low", 1));
        store.register_section(2, "a", section("high", 10));
        store.register_section(3, "b", section("mid", 5));

        let ids: Vec<String> = store
            .active_sections()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[test]
    fn same_id_registration_shadows_then_restores() {
        let store = ActivityStore::new();
        store.register_section(1, "a", section("prs", 5));
        let mut shadow = section("prs", 9);
        shadow.label = "SHADOW".to_string();
        store.register_section(2, "b", shadow);

        assert_eq!(store.section("prs").unwrap().label, "SHADOW");

        assert!(store.dispose_section("prs", 2));
        assert_eq!(store.section("prs").unwrap().label, "PRS");

        assert!(store.dispose_section("prs", 1));
        assert!(store.section("prs").is_none());
    }

    #[test]
    fn dispose_unknown_registration_is_noop() {
        let store = ActivityStore::new();
        assert!(!store.dispose_section("missing", 42));
        store.register_section(1, "a", section("prs", 5));
        assert!(!store.dispose_section("prs", 42));
        assert!(store.section("prs").is_some());
    }

    #[test]
    fn upsert_replaces_same_key() {
        let store = ActivityStore::new();
        store.upsert_item(item("p1", "i1", "s"));
        let mut updated = item("p1", "i1", "s");
        updated.title = "new title".to_string();
        store.upsert_item(updated);

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "new title");
    }

    #[test]
    fn items_scoped_per_plugin() {
        let store = ActivityStore::new();
        store.upsert_item(item("p1", "shared", "s"));
        store.upsert_item(item("p2", "shared", "s"));
        assert_eq!(store.items().len(), 2);

        assert!(store.remove_item("p1", "shared"));
        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].plugin_id, "p2");
    }

    #[test]
    fn update_requires_existing_item() {
        let store = ActivityStore::new();
        assert!(!store.update_item(item("p1", "i1", "s")));
        store.upsert_item(item("p1", "i1", "s"));
        assert!(store.update_item(item("p1", "i1", "s")));
    }

    #[test]
    fn remove_plugin_sweeps_sections_and_items() {
        let store = ActivityStore::new();
        store.register_section(1, "p1", section("s1", 1));
        store.register_section(2, "p2", section("s2", 1));
        store.upsert_item(item("p1", "i1", "s1"));
        store.upsert_item(item("p2", "i2", "s2"));

        store.remove_plugin("p1");

        assert!(store.section("s1").is_none());
        assert!(store.section("s2").is_some());
        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].plugin_id, "p2");
    }

    #[test]
    fn items_for_section_filters() {
        let store = ActivityStore::new();
        store.upsert_item(item("p", "a", "s1"));
        store.upsert_item(item("p", "b", "s2"));
        store.upsert_item(item("p", "c", "s1"));

        let s1: Vec<String> = store
            .items_for_section("s1")
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(s1, vec!["a", "c"]);
    }
}
