//! Extension point registry.
//!
//! # Responsibility
//! - Hold contributions addressed by `(host, outlet)` anchors that other
//!   components expose, independent of the composition tree.
//! - Produce enabled-only snapshots sorted by priority.
//!
//! # Invariants
//! - Entry ids are unique within one `(host, outlet)`; re-adding an id
//!   replaces the entry and keeps its insertion sequence.
//! - Higher `priority` sorts first; equal priorities keep insertion order.

use crate::composition::tree::{ComponentRef, Contribution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Contribution to one outlet, as handed to [`Outlet::add`].
#[derive(Debug, Clone)]
pub struct Extension {
    pub id: String,
    pub contribution: Contribution,
    pub priority: i32,
    pub props: Option<Value>,
    pub meta: Option<Value>,
}

impl Extension {
    pub fn new(id: impl Into<String>, contribution: impl Into<Contribution>) -> Self {
        Self {
            id: id.into(),
            contribution: contribution.into(),
            priority: 0,
            props: None,
            meta: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

#[derive(Debug, Clone)]
struct LiveEntry {
    extension: Extension,
    enabled: bool,
    seq: u64,
}

/// Serializable, sorted extension entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionEntry {
    pub id: String,
    pub component: ComponentRef,
    pub priority: i32,
    pub enabled: bool,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ExtensionEntry {
    pub fn component_name(&self) -> Option<&str> {
        self.component.name()
    }
}

/// `host -> outlet -> ordered entries`.
pub type ExtensionMap = BTreeMap<String, BTreeMap<String, Vec<ExtensionEntry>>>;

/// Live `(host, outlet)` registry. Created per request/navigation.
#[derive(Debug, Default)]
pub struct ExtensionPoints {
    hosts: BTreeMap<String, BTreeMap<String, Vec<LiveEntry>>>,
    next_seq: u64,
}

impl ExtensionPoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent accessor for one outlet of one host.
    pub fn outlet(&mut self, host: &str, outlet: &str) -> Outlet<'_> {
        Outlet {
            points: self,
            host: host.trim().to_string(),
            outlet: outlet.trim().to_string(),
        }
    }

    /// Total live entries, disabled ones included.
    pub fn len(&self) -> usize {
        self.hosts
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enabled entries per `(host, outlet)`, highest priority first.
    pub fn snapshot_sorted(&self) -> ExtensionMap {
        let mut snapshot = ExtensionMap::new();
        for (host, outlets) in &self.hosts {
            for (outlet, entries) in outlets {
                let mut visible: Vec<ExtensionEntry> = entries
                    .iter()
                    .filter(|entry| entry.enabled)
                    .map(to_snapshot_entry)
                    .collect();
                if visible.is_empty() {
                    continue;
                }
                visible.sort_by(|left, right| {
                    right
                        .priority
                        .cmp(&left.priority)
                        .then(left.seq.cmp(&right.seq))
                });
                snapshot
                    .entry(host.clone())
                    .or_default()
                    .insert(outlet.clone(), visible);
            }
        }
        snapshot
    }

    fn entries_mut(&mut self, host: &str, outlet: &str) -> Option<&mut Vec<LiveEntry>> {
        self.hosts.get_mut(host)?.get_mut(outlet)
    }
}

fn to_snapshot_entry(entry: &LiveEntry) -> ExtensionEntry {
    ExtensionEntry {
        id: entry.extension.id.clone(),
        component: ComponentRef::from(&entry.extension.contribution),
        priority: entry.extension.priority,
        enabled: entry.enabled,
        seq: entry.seq,
        props: entry.extension.props.clone(),
        meta: entry.extension.meta.clone(),
    }
}

/// Handle to one `(host, outlet)` pair.
pub struct Outlet<'p> {
    points: &'p mut ExtensionPoints,
    host: String,
    outlet: String,
}

impl Outlet<'_> {
    pub fn add(&mut self, extension: Extension) -> &mut Self {
        let seq = self.points.next_seq;
        let entries = self
            .points
            .hosts
            .entry(self.host.clone())
            .or_default()
            .entry(self.outlet.clone())
            .or_default();
        match entries
            .iter_mut()
            .find(|entry| entry.extension.id == extension.id)
        {
            Some(existing) => {
                existing.extension = extension;
                existing.enabled = true;
            }
            None => {
                entries.push(LiveEntry {
                    extension,
                    enabled: true,
                    seq,
                });
                self.points.next_seq += 1;
            }
        }
        self
    }

    /// Removes one entry. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(entries) = self.points.entries_mut(&self.host, &self.outlet) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.extension.id != id);
        entries.len() != before
    }

    pub fn enable(&mut self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&mut self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    /// Removes every entry of this outlet.
    pub fn clear(&mut self) {
        if let Some(entries) = self.points.entries_mut(&self.host, &self.outlet) {
            entries.clear();
        }
    }

    /// Entry ids in insertion order, disabled ones included.
    pub fn ids(&self) -> Vec<String> {
        self.points
            .hosts
            .get(&self.host)
            .and_then(|outlets| outlets.get(&self.outlet))
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| entry.extension.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(entries) = self.points.entries_mut(&self.host, &self.outlet) else {
            return false;
        };
        match entries.iter_mut().find(|entry| entry.extension.id == id) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Extension, ExtensionPoints};
    use serde_json::json;

    fn ids(points: &ExtensionPoints, host: &str, outlet: &str) -> Vec<String> {
        points
            .snapshot_sorted()
            .get(host)
            .and_then(|outlets| outlets.get(outlet))
            .map(|entries| entries.iter().map(|entry| entry.id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn higher_priority_sorts_first_and_ties_keep_insertion_order() {
        let mut points = ExtensionPoints::new();
        points
            .outlet("ProductCard", "badges")
            .add(Extension::new("new", "NewBadge"))
            .add(Extension::new("sale", "SaleBadge").priority(10))
            .add(Extension::new("eco", "EcoBadge"));

        assert_eq!(ids(&points, "ProductCard", "badges"), vec!["sale", "new", "eco"]);
    }

    #[test]
    fn disabled_entries_are_hidden_until_enabled() {
        let mut points = ExtensionPoints::new();
        {
            let mut outlet = points.outlet("Cart", "summary");
            outlet.add(Extension::new("coupon", "CouponField"));
            outlet.add(Extension::new("gift", "GiftWrap"));
            assert!(outlet.disable("coupon"));
            assert!(!outlet.disable("missing"));
        }
        assert_eq!(ids(&points, "Cart", "summary"), vec!["gift"]);

        points.outlet("Cart", "summary").enable("coupon");
        assert_eq!(ids(&points, "Cart", "summary"), vec!["coupon", "gift"]);
    }

    #[test]
    fn re_adding_an_id_replaces_entry_and_keeps_sequence() {
        let mut points = ExtensionPoints::new();
        points
            .outlet("Cart", "summary")
            .add(Extension::new("a", "A"))
            .add(Extension::new("b", "B"))
            .add(Extension::new("a", "A2").props(json!({"variant": 2})));

        let snapshot = points.snapshot_sorted();
        let entries = &snapshot["Cart"]["summary"];
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a");
        assert_eq!(entries[0].component_name(), Some("A2"));
        assert_eq!(entries[0].props, Some(json!({"variant": 2})));
    }

    #[test]
    fn remove_and_clear_drop_entries() {
        let mut points = ExtensionPoints::new();
        {
            let mut outlet = points.outlet("Header", "actions");
            outlet.add(Extension::new("a", "A")).add(Extension::new("b", "B"));
            assert!(outlet.remove("a"));
            assert!(!outlet.remove("a"));
            assert_eq!(outlet.ids(), vec!["b"]);
            outlet.clear();
        }
        assert!(points.is_empty());
        assert!(points.snapshot_sorted().is_empty());
    }

    #[test]
    fn outlets_of_different_hosts_are_independent() {
        let mut points = ExtensionPoints::new();
        points.outlet("A", "x").add(Extension::new("one", "One"));
        points.outlet("B", "x").add(Extension::new("one", "Other"));
        assert_eq!(points.len(), 2);
        let snapshot = points.snapshot_sorted();
        assert_eq!(snapshot["A"]["x"][0].component_name(), Some("One"));
        assert_eq!(snapshot["B"]["x"][0].component_name(), Some("Other"));
    }
}
