//! Client-side mirror of the controller's state tree
//!
//! The controller publishes partial documents; `StateCache::merge_update`
//! folds them into the mirror and reports which leaves changed.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

// ----------------------------------------------------------------------------
// State Path
// ----------------------------------------------------------------------------

/// Ordered key segments addressing a node in the state tree
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatePath(SmallVec<[String; 4]>);

impl StatePath {
    /// The empty path, addressing the tree root
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path (`ecu.engine`); the empty string is the root
    pub fn from_dotted(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self::new(dotted.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// This path extended by one segment
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    /// Whether `prefix` is this path or one of its ancestors
    pub fn starts_with(&self, prefix: &StatePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for StatePath {
    fn from(dotted: &str) -> Self {
        Self::from_dotted(dotted)
    }
}

// ----------------------------------------------------------------------------
// Change Set
// ----------------------------------------------------------------------------

/// Leaf paths whose value differs after a merge
///
/// A `None` value marks a leaf that no longer exists because an ancestor
/// changed shape. Serializes as a map from dotted path to new value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<StatePath, Option<Value>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, path: StatePath, value: Option<Value>) {
        self.changes.insert(path, value);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, path: &StatePath) -> bool {
        self.changes.contains_key(path)
    }

    pub fn contains_dotted(&self, dotted: &str) -> bool {
        self.contains(&StatePath::from_dotted(dotted))
    }

    /// New value of a changed leaf; `Some(None)` when the leaf vanished
    pub fn get(&self, path: &StatePath) -> Option<Option<&Value>> {
        self.changes.get(path).map(Option::as_ref)
    }

    pub fn paths(&self) -> impl Iterator<Item = &StatePath> {
        self.changes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatePath, Option<&Value>)> {
        self.changes.iter().map(|(path, value)| (path, value.as_ref()))
    }

    /// Changes at or below `prefix`
    pub fn under(&self, prefix: &StatePath) -> ChangeSet {
        let changes = self
            .changes
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        ChangeSet { changes }
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.changes
                .iter()
                .map(|(path, value)| (path.to_string(), value)),
        )
    }
}

impl IntoIterator for ChangeSet {
    type Item = (StatePath, Option<Value>);
    type IntoIter = std::collections::btree_map::IntoIter<StatePath, Option<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

// ----------------------------------------------------------------------------
// State Cache
// ----------------------------------------------------------------------------

/// Right-biased deep-merge mirror of the controller state
///
/// Mappings combine recursively; anything else replaces wholesale. Lists are
/// atomic. There is no delete primitive: a key only disappears when an
/// ancestor is overwritten by a non-mapping value or the cache is cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateCache {
    root: Map<String, Value>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a partial document into the cache
    pub fn merge_update(&mut self, partial: Map<String, Value>) -> ChangeSet {
        let mut changes = ChangeSet::new();
        merge_map(&mut self.root, partial, &StatePath::root(), &mut changes);
        changes
    }

    pub fn get(&self, path: &StatePath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.root.get(first)?;
        for segment in rest {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }

    pub fn get_dotted(&self, dotted: &str) -> Option<&Value> {
        self.get(&StatePath::from_dotted(dotted))
    }

    /// Every leaf path currently held, in order
    pub fn leaf_paths(&self) -> Vec<StatePath> {
        let mut leaves = BTreeMap::new();
        for (key, value) in &self.root {
            collect_leaves(value, StatePath::root().child(key), &mut leaves);
        }
        leaves.into_keys().collect()
    }

    /// Copy of the whole tree
    pub fn snapshot(&self) -> Value {
        Value::Object(self.root.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Drop everything, returning the leaf paths that were held
    pub fn clear(&mut self) -> Vec<StatePath> {
        let paths = self.leaf_paths();
        self.root.clear();
        paths
    }
}

fn merge_map(
    target: &mut Map<String, Value>,
    partial: Map<String, Value>,
    prefix: &StatePath,
    changes: &mut ChangeSet,
) {
    for (key, incoming) in partial {
        let path = prefix.child(&key);

        let incoming = match (target.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                let was_empty = existing.is_empty();
                merge_map(existing, incoming, &path, changes);
                if was_empty && !existing.is_empty() {
                    // the empty mapping leaf was replaced by its new children
                    changes.record(path, None);
                }
                continue;
            }
            (_, incoming) => incoming,
        };

        let previous = target.insert(key.clone(), incoming);

        let mut before = BTreeMap::new();
        if let Some(old) = &previous {
            collect_leaves(old, path.clone(), &mut before);
        }
        let mut after = BTreeMap::new();
        if let Some(new) = target.get(&key) {
            collect_leaves(new, path, &mut after);
        }

        for (leaf, value) in &after {
            if before.get(leaf) != Some(value) {
                changes.record(leaf.clone(), Some((*value).clone()));
            }
        }
        for leaf in before.keys() {
            if !after.contains_key(leaf) {
                changes.record(leaf.clone(), None);
            }
        }
    }
}

fn collect_leaves<'a>(value: &'a Value, path: StatePath, out: &mut BTreeMap<StatePath, &'a Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                collect_leaves(child, path.child(key), out);
            }
        }
        _ => {
            out.insert(path, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_empty_merge_is_noop() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"ecu": {"idle": true}})));
        let before = cache.snapshot();

        let changes = cache.merge_update(Map::new());
        assert!(changes.is_empty());
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn test_mapping_replaces_scalar() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"a": 5})));

        let changes = cache.merge_update(doc(json!({"a": {"b": 1}})));
        assert_eq!(cache.snapshot(), json!({"a": {"b": 1}}));
        assert_eq!(changes.get(&"a.b".into()), Some(Some(&json!(1))));
        assert_eq!(changes.get(&"a".into()), Some(None));
    }

    #[test]
    fn test_scalar_replaces_mapping() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"a": {"b": 1, "c": 2}})));

        let changes = cache.merge_update(doc(json!({"a": 5})));
        assert_eq!(cache.snapshot(), json!({"a": 5}));
        assert_eq!(changes.get(&"a".into()), Some(Some(&json!(5))));
        assert_eq!(changes.get(&"a.b".into()), Some(None));
        assert_eq!(changes.get(&"a.c".into()), Some(None));
    }

    #[test]
    fn test_sibling_keys_survive_nested_merge() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"ecu": {"idle": true}})));

        let changes = cache.merge_update(doc(json!({"ecu": {"engine": true}})));
        assert_eq!(cache.snapshot(), json!({"ecu": {"idle": true, "engine": true}}));
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_dotted("ecu.engine"));
    }

    #[test]
    fn test_unchanged_values_are_not_reported() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"ecu": {"rpm": 800, "gear": "N"}})));

        let changes = cache.merge_update(doc(json!({"ecu": {"rpm": 800, "gear": "D"}})));
        assert_eq!(changes.paths().map(|p| p.to_string()).collect::<Vec<_>>(), vec!["ecu.gear"]);
    }

    #[test]
    fn test_lists_are_atomic() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"wifi": {"nets": ["home", "shop"]}})));

        let changes = cache.merge_update(doc(json!({"wifi": {"nets": ["home"]}})));
        assert_eq!(cache.get_dotted("wifi.nets"), Some(&json!(["home"])));
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_dotted("wifi.nets"));
    }

    #[test]
    fn test_empty_mapping_is_a_leaf() {
        let mut cache = StateCache::new();
        let changes = cache.merge_update(doc(json!({"io": {}})));
        assert_eq!(changes.get(&"io".into()), Some(Some(&json!({}))));

        let changes = cache.merge_update(doc(json!({"io": {"led": false}})));
        assert_eq!(changes.get(&"io".into()), Some(None));
        assert_eq!(changes.get(&"io.led".into()), Some(Some(&json!(false))));
    }

    #[test]
    fn test_clear_returns_displayed_paths() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"ecu": {"idle": true, "engine": false}, "uptime": 12})));

        let cleared = cache.clear();
        let dotted: Vec<String> = cleared.iter().map(ToString::to_string).collect();
        assert_eq!(dotted, vec!["ecu.engine", "ecu.idle", "uptime"]);
        assert!(cache.is_empty());
        assert!(cache.leaf_paths().is_empty());
    }

    #[test]
    fn test_change_set_under_prefix() {
        let mut cache = StateCache::new();
        let changes = cache.merge_update(doc(json!({"ecu": {"idle": true}, "wifi": {"rssi": -60}})));

        let ecu = changes.under(&"ecu".into());
        assert_eq!(ecu.len(), 1);
        assert!(ecu.contains_dotted("ecu.idle"));
        assert!(!ecu.contains_dotted("wifi.rssi"));
    }

    #[test]
    fn test_change_set_serializes_dotted_keys() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"ecu": {"mode": {"eco": true}}})));
        let changes = cache.merge_update(doc(json!({"ecu": {"idle": 850, "mode": 2}})));

        assert_eq!(
            serde_json::to_value(&changes).unwrap(),
            json!({"ecu.idle": 850, "ecu.mode": 2, "ecu.mode.eco": null})
        );
        assert_eq!(serde_json::to_value(ChangeSet::new()).unwrap(), json!({}));
    }

    #[test]
    fn test_path_lookup_through_scalar_fails() {
        let mut cache = StateCache::new();
        cache.merge_update(doc(json!({"a": 5})));
        assert_eq!(cache.get_dotted("a.b"), None);
        assert_eq!(cache.get(&StatePath::root()), None);
    }

    #[test]
    fn test_state_path_display_and_prefix() {
        let path = StatePath::new(["ecu", "engine"]);
        assert_eq!(path.to_string(), "ecu.engine");
        assert!(path.starts_with(&StatePath::from_dotted("ecu")));
        assert!(path.starts_with(&StatePath::root()));
        assert!(!path.starts_with(&StatePath::from_dotted("ec")));
    }
}
