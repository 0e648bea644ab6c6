//! Key Paths
//!
//! A key path addresses a value inside nested object data, one object key
//! per segment. Paths are written with dots: `user.firstName`. The empty
//! path addresses the root.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::{ReactiveError, Result};

/// Path from the root of a container to one of its values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath(SmallVec<[String; 4]>);

impl KeyPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. The empty string is the root.
    ///
    /// Empty segments (`a..b`, `.a`) are rejected.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        path.split('.')
            .map(|segment| {
                if segment.is_empty() {
                    Err(ReactiveError::InvalidPatch {
                        path: path.to_string(),
                        reason: "empty path segment".into(),
                    })
                } else {
                    Ok(segment.to_string())
                }
            })
            .collect::<Result<SmallVec<_>>>()
            .map(Self)
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

    /// Extend the path by one key.
    pub fn join(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    /// The enclosing path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
    }

    /// Every strict ancestor, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = KeyPath> + '_ {
        (0..self.0.len())
            .rev()
            .map(|len| Self(self.0[..len].iter().cloned().collect()))
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The segments left after removing `prefix`.
    pub fn strip_prefix(&self, prefix: &KeyPath) -> Option<&[String]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Look the path up in `root`.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        lookup_segments(root, &self.0)
    }

    /// Write `value` at this path inside `root`.
    ///
    /// Missing intermediate objects are created. Walking through an
    /// existing value that is not an object is an error.
    pub fn assign(&self, root: &mut Value, value: Value) -> Result<()> {
        let Some((last, parents)) = self.0.split_last() else {
            *root = value;
            return Ok(());
        };

        let mut current = root;
        for (depth, key) in parents.iter().enumerate() {
            let object = self.as_object(current, depth)?;
            current = object
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        self.as_object(current, parents.len())?
            .insert(last.clone(), value);
        Ok(())
    }

    /// Check that every existing value strictly above this path is an
    /// object.
    pub fn check_walkable(&self, root: &Value) -> Result<()> {
        let mut current = root;
        for (depth, key) in self.0.iter().enumerate() {
            match current {
                Value::Object(map) => match map.get(key) {
                    Some(next) => current = next,
                    None => return Ok(()),
                },
                _ => return Err(self.not_an_object(depth)),
            }
        }
        Ok(())
    }

    fn as_object<'a>(&self, value: &'a mut Value, depth: usize) -> Result<&'a mut Map<String, Value>> {
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(self.not_an_object(depth)),
        }
    }

    fn not_an_object(&self, depth: usize) -> ReactiveError {
        ReactiveError::InvalidPatch {
            path: self.to_string(),
            reason: format!("`{}` is not an object", Self(self.0[..depth].iter().cloned().collect())),
        }
    }
}

pub(crate) fn lookup_segments<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |value, key| value.as_object()?.get(key))
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = ReactiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
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
    fn parse_and_display() {
        assert!(path("").is_root());
        assert_eq!(path("user.firstName").segments(), ["user", "firstName"]);
        assert_eq!(path("user.firstName").to_string(), "user.firstName");
        assert_eq!(KeyPath::root().to_string(), "<root>");
        assert!(KeyPath::parse("a..b").is_err());
        assert!(KeyPath::parse(".a").is_err());
    }

    #[test]
    fn ancestors_nearest_first() {
        let ancestors: Vec<String> = path("a.b.c").ancestors().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["a.b", "a", "<root>"]);
        assert_eq!(path("a").parent(), Some(KeyPath::root()));
        assert_eq!(KeyPath::root().parent(), None);
    }

    #[test]
    fn prefixes() {
        assert!(path("a.b").starts_with(&path("a")));
        assert!(path("a.b").starts_with(&KeyPath::root()));
        assert!(!path("a").starts_with(&path("a.b")));
        assert_eq!(path("a.b.c").strip_prefix(&path("a")), Some(&["b".to_string(), "c".to_string()][..]));
    }

    #[test]
    fn lookup_walks_objects_only() {
        let data = json!({ "user": { "name": "Ada" }, "list": [1, 2] });
        assert_eq!(path("user.name").lookup(&data), Some(&json!("Ada")));
        assert_eq!(path("list.0").lookup(&data), None);
        assert_eq!(path("missing.key").lookup(&data), None);
        assert_eq!(KeyPath::root().lookup(&data), Some(&data));
    }

    #[test]
    fn assign_creates_intermediates() {
        let mut data = json!({});
        path("a.b.c").assign(&mut data, json!(1)).unwrap();
        assert_eq!(data, json!({ "a": { "b": { "c": 1 } } }));
    }

    #[test]
    fn assign_through_scalar_fails() {
        let mut data = json!({ "a": 5 });
        let err = path("a.b").assign(&mut data, json!(1)).unwrap_err();
        assert!(matches!(err, ReactiveError::InvalidPatch { .. }));
        assert!(path("a.b").check_walkable(&data).is_err());
        assert!(path("x.y").check_walkable(&data).is_ok());
    }
}
