//! Diff Engine
//!
//! Computes which leaves a patch actually changes.
//!
//! # How Diffing Works
//!
//! The comparison follows the shape of the patch, not the shape of the
//! data. For every key present in a patch object:
//!
//! - if both the patch value and the current value are objects, the diff
//!   recurses into them;
//! - otherwise the patch value is a leaf and is compared with the current
//!   value as a whole.
//!
//! Keys absent from the patch are never inspected, however deep the data
//! goes. Arrays are leaves.

use serde_json::Value;

use super::path::KeyPath;

/// A leaf written by a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: KeyPath,
    pub value: Value,
}

/// Result of diffing a patch against the current data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    leaves: Vec<Change>,
    /// Object paths the diff walked into that hold a changed leaf, deepest
    /// first.
    containers: Vec<KeyPath>,
}

impl ChangeSet {
    pub fn leaves(&self) -> &[Change] {
        &self.leaves
    }

    pub fn containers(&self) -> &[KeyPath] {
        &self.containers
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of changed leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the leaf at `path` changed.
    pub fn contains(&self, path: &KeyPath) -> bool {
        self.leaves.iter().any(|change| &change.path == path)
    }
}

/// Diff `patch`, applied at `at`, against `current` (the value found at
/// `at`, if any).
pub fn diff(current: Option<&Value>, patch: &Value, at: &KeyPath) -> ChangeSet {
    let mut changes = ChangeSet::default();
    diff_into(current, patch, at, &mut changes);
    changes
}

fn diff_into(current: Option<&Value>, patch: &Value, at: &KeyPath, changes: &mut ChangeSet) {
    match (current, patch) {
        (Some(Value::Object(current)), Value::Object(patch)) => {
            let before = changes.leaves.len();
            for (key, value) in patch {
                diff_into(current.get(key), value, &at.join(key.as_str()), changes);
            }
            if changes.leaves.len() > before {
                changes.containers.push(at.clone());
            }
        }
        (current, patch) => {
            if current != Some(patch) {
                changes.leaves.push(Change {
                    path: at.clone(),
                    value: patch.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> KeyPath {
        KeyPath::parse(s).unwrap()
    }

    #[test]
    fn only_changed_leaves_are_reported() {
        let current = json!({ "user": { "firstName": "John", "lastName": "Smith" } });
        let patch = json!({ "user": { "firstName": "Jake" } });

        let changes = diff(Some(&current), &patch, &KeyPath::root());
        assert_eq!(changes.len(), 1);
        assert!(changes.contains(&path("user.firstName")));
        assert!(!changes.contains(&path("user.lastName")));
        assert_eq!(changes.containers(), &[path("user"), KeyPath::root()]);
    }

    #[test]
    fn equal_patch_is_empty() {
        let current = json!({ "a": 1, "b": { "c": [1, 2] } });
        let patch = json!({ "a": 1, "b": { "c": [1, 2] } });

        let changes = diff(Some(&current), &patch, &KeyPath::root());
        assert!(changes.is_empty());
        assert!(changes.containers().is_empty());
    }

    #[test]
    fn object_replacing_scalar_is_a_leaf() {
        let current = json!({ "a": 1 });
        let patch = json!({ "a": { "b": 2 } });

        let changes = diff(Some(&current), &patch, &KeyPath::root());
        assert_eq!(
            changes.leaves(),
            &[Change {
                path: path("a"),
                value: json!({ "b": 2 }),
            }]
        );
    }

    #[test]
    fn arrays_compare_whole() {
        let current = json!({ "items": [1, 2, 3] });
        let patch = json!({ "items": [1, 2] });

        let changes = diff(Some(&current), &patch, &KeyPath::root());
        assert!(changes.contains(&path("items")));
    }

    #[test]
    fn new_keys_are_changes() {
        let current = json!({});
        let patch = json!({ "fresh": null });

        let changes = diff(Some(&current), &patch, &KeyPath::root());
        assert!(changes.contains(&path("fresh")));
    }

    #[test]
    fn diff_at_nested_path() {
        let current = json!({ "x": 1, "y": 2 });
        let patch = json!({ "y": 3 });

        let changes = diff(Some(&current), &patch, &path("point"));
        assert!(changes.contains(&path("point.y")));
        assert_eq!(changes.containers(), &[path("point")]);
    }

    #[test]
    fn scalar_patch_at_missing_path() {
        let changes = diff(None, &json!(5), &path("count"));
        assert!(changes.contains(&path("count")));
    }
}
