//! State Container
//!
//! A [`StateContainer`] wraps nested JSON-like data and exposes every key
//! path as a reactive value.
//!
//! # How It Works
//!
//! 1. The container keeps a shadow copy of the raw data. Signals are only
//!    created for paths that are actually read (materialized), so memory
//!    grows with the paths touched, not with the size of the data.
//!
//! 2. `set` diffs the patch against the shadow copy. Only the leaves that
//!    differ are written, together with any materialized signal above or
//!    below them whose value changed as a result. All of those writes land
//!    in one batch and flush together.
//!
//! 3. Inside a computation body the patch is validated and diffed at once,
//!    but the shadow copy and the signals change only when the run commits.
//!    A failing run leaves both untouched.
//!
//! 4. `select` binds keys to sources. A selected key is fed only by its
//!    source; patches that touch it are rejected.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::diff::{diff, ChangeSet};
use super::path::{lookup_segments, KeyPath};
use crate::error::{ReactiveError, Result};
use crate::reactive::{PendingWrite, ReactiveContext, Runtime, Scope, Signal};
use crate::selector::{self, Binding, SelectorStatus, SelectorTask, Source};

struct Shared {
    /// Last known raw data, without selector values.
    data: Value,
    /// Materialized signals, including selector destinations.
    signals: IndexMap<KeyPath, Signal<Value>>,
    /// Status signal of every selected key.
    selectors: IndexMap<KeyPath, Signal<SelectorStatus>>,
}

impl Shared {
    /// The selected key at or above `path`, if any.
    fn selector_above(&self, path: &KeyPath) -> Option<&KeyPath> {
        self.selectors.keys().find(|selected| path.starts_with(selected))
    }

    fn check_writable(&self, at: &KeyPath, patch: &Value) -> Result<()> {
        for selected in self.selectors.keys() {
            let touched = at.starts_with(selected)
                || selected
                    .strip_prefix(at)
                    .is_some_and(|rest| touches(patch, rest));
            if touched {
                return Err(ReactiveError::ReadOnlyPath {
                    path: selected.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Materialized paths whose value a change set touches: the changed
    /// leaves and everything below them, plus the containers above. Selected
    /// keys are left out.
    fn affected_paths<'a>(&'a self, at: &KeyPath, changes: &ChangeSet) -> IndexSet<&'a KeyPath> {
        let mut paths: IndexSet<&KeyPath> = IndexSet::new();

        for change in changes.leaves() {
            paths.extend(
                self.signals
                    .keys()
                    .filter(|materialized| materialized.starts_with(&change.path)),
            );
        }
        for container in changes.containers().iter().chain(&at.ancestors().collect::<Vec<_>>()) {
            if let Some((path, _)) = self.signals.get_key_value(container) {
                paths.insert(path);
            }
        }

        paths.retain(|path| !self.selectors.contains_key(*path));
        paths
    }

    /// Materialized signals whose value changed, paired with the new value.
    fn affected(&self, at: &KeyPath, changes: &ChangeSet) -> Vec<(Signal<Value>, Value)> {
        self.affected_paths(at, changes)
            .into_iter()
            .filter_map(|path| {
                let value = path.lookup(&self.data).cloned().unwrap_or(Value::Null);
                self.signals.get(path).map(|signal| (signal.clone(), value))
            })
            .collect()
    }
}

/// Whether `patch` writes the key at `rest` below its own root, or replaces
/// an object on the way there.
fn touches(patch: &Value, rest: &[String]) -> bool {
    let mut current = patch;
    for key in rest {
        match current {
            Value::Object(map) => match map.get(key) {
                Some(next) => current = next,
                None => return false,
            },
            _ => return true,
        }
    }
    true
}

/// Reactive wrapper around nested data.
///
/// Cloning shares the same container.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use tidepool_core::StateContainer;
///
/// let state = StateContainer::new(json!({
///     "user": { "firstName": "John", "lastName": "Smith" }
/// }))
/// .unwrap();
///
/// let changes = state.set(json!({ "user": { "firstName": "Jake" } })).unwrap();
/// assert_eq!(changes.len(), 1);
/// assert_eq!(state.get("user.firstName").unwrap(), json!("Jake"));
/// assert_eq!(state.get("user.lastName").unwrap(), json!("Smith"));
/// ```
#[derive(Clone)]
pub struct StateContainer {
    scope: Scope,
    shared: Arc<Mutex<Shared>>,
}

impl StateContainer {
    /// Create a container on a runtime of its own.
    pub fn new(initial: impl Serialize) -> Result<Self> {
        Self::with_runtime(&Runtime::new(), initial)
    }

    /// Create a container under a new root scope of `runtime`.
    pub fn with_runtime(runtime: &Runtime, initial: impl Serialize) -> Result<Self> {
        Self::from_scope(runtime.scope(), initial)
    }

    /// Create a container in a child scope of `parent`; it is disposed with
    /// the parent.
    pub fn new_in(parent: &Scope, initial: impl Serialize) -> Result<Self> {
        Self::from_scope(parent.child()?, initial)
    }

    fn from_scope(scope: Scope, initial: impl Serialize) -> Result<Self> {
        let data = serde_json::to_value(initial)?;
        Ok(Self {
            scope,
            shared: Arc::new(Mutex::new(Shared {
                data,
                signals: IndexMap::new(),
                selectors: IndexMap::new(),
            })),
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn runtime(&self) -> &Runtime {
        self.scope.runtime()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read the value at `path`, registering a dependency when called from
    /// a running computation.
    ///
    /// Paths with no data read as `null` and still notify once written.
    pub fn get(&self, path: &str) -> Result<Value> {
        let path = KeyPath::parse(path)?;
        let (signal, rest) = self.materialize(&path)?;
        if rest.is_empty() {
            signal.get()
        } else {
            signal.with(|value| lookup_segments(value, &rest).cloned().unwrap_or(Value::Null))
        }
    }

    /// Read and deserialize the value at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(path)?)?)
    }

    /// The signal backing `path`, materializing it if needed.
    pub fn signal(&self, path: &str) -> Result<Signal<Value>> {
        let path = KeyPath::parse(path)?;
        let (signal, rest) = self.materialize(&path)?;
        if !rest.is_empty() {
            return Err(ReactiveError::InvalidPatch {
                path: path.to_string(),
                reason: "path lies inside a selected value".into(),
            });
        }
        Ok(signal)
    }

    /// Status of the selector bound at `path`, or `None` if the key is not
    /// selected. Tracked like [`get`](Self::get).
    pub fn status(&self, path: &str) -> Result<Option<SelectorStatus>> {
        let path = KeyPath::parse(path)?;
        self.scope.ensure_alive()?;
        let status = self.shared.lock().selectors.get(&path).cloned();
        status.map(|signal| signal.get()).transpose()
    }

    /// The raw data with every selector's current value merged in.
    ///
    /// Untracked.
    pub fn snapshot(&self) -> Result<Value> {
        self.scope.ensure_alive()?;
        let (mut data, selected) = {
            let shared = self.shared.lock();
            let selected: Vec<(KeyPath, Signal<Value>)> = shared
                .selectors
                .keys()
                .filter_map(|path| shared.signals.get(path).map(|s| (path.clone(), s.clone())))
                .collect();
            (shared.data.clone(), selected)
        };

        for (path, signal) in selected {
            let value = signal.get_untracked()?;
            if let Err(err) = path.assign(&mut data, value) {
                warn!(path = %path, error = %err, "selector value left out of snapshot");
            }
        }
        Ok(data)
    }

    /// Find or create the signal serving `path`.
    ///
    /// Paths inside a selected key are served by the selector's signal; the
    /// remaining segments are returned alongside it.
    fn materialize(&self, path: &KeyPath) -> Result<(Signal<Value>, Vec<String>)> {
        self.scope.ensure_alive()?;
        let mut shared = self.shared.lock();

        if let Some(selected) = shared.selector_above(path).cloned() {
            let rest = path.strip_prefix(&selected).map(<[String]>::to_vec).unwrap_or_default();
            if let Some(signal) = shared.signals.get(&selected) {
                return Ok((signal.clone(), rest));
            }
        }
        if let Some(signal) = shared.signals.get(path) {
            return Ok((signal.clone(), Vec::new()));
        }

        let initial = path.lookup(&shared.data).cloned().unwrap_or(Value::Null);
        let signal = self.scope.signal(initial)?;
        debug!(path = %path, signal = %signal.id(), "materialized signal");
        shared.signals.insert(path.clone(), signal.clone());
        Ok((signal, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Merge `patch` into the data at the root.
    ///
    /// The patch must be an object. Keys absent from it are left alone;
    /// only leaves whose value actually differs are written.
    ///
    /// Called from a computation body, the returned changes are those the
    /// patch makes against the data as it is now; they apply once the run
    /// commits.
    pub fn set(&self, patch: impl Serialize) -> Result<ChangeSet> {
        self.apply(&KeyPath::root(), serde_json::to_value(patch)?)
    }

    /// Merge `patch` into the data at `path`.
    pub fn set_at(&self, path: &str, patch: impl Serialize) -> Result<ChangeSet> {
        let path = KeyPath::parse(path)?;
        self.apply(&path, serde_json::to_value(patch)?)
    }

    fn apply(&self, at: &KeyPath, patch: Value) -> Result<ChangeSet> {
        self.scope.ensure_alive()?;
        if at.is_root() && !patch.is_object() {
            return Err(ReactiveError::InvalidPatch {
                path: at.to_string(),
                reason: "a root patch must be an object".into(),
            });
        }

        let runtime = self.runtime().id();
        if !ReactiveContext::is_tracking(runtime) {
            return self.commit(at, &patch);
        }

        let (changes, signals) = {
            let shared = self.shared.lock();
            shared.check_writable(at, &patch)?;
            at.check_walkable(&shared.data)?;

            let changes = diff(at.lookup(&shared.data), &patch, at);
            let signals: Vec<_> = shared
                .affected_paths(at, &changes)
                .into_iter()
                .filter_map(|path| shared.signals.get(path).map(|signal| signal.id()))
                .collect();
            (changes, signals)
        };
        if changes.is_empty() {
            trace!(path = %at, "patch changes nothing");
            return Ok(changes);
        }

        trace!(path = %at, leaves = changes.len(), "patch deferred to commit");
        let (this, at) = (self.clone(), at.clone());
        let write: PendingWrite = Box::new(move || {
            let _ctx = ReactiveContext::untracked(runtime);
            this.commit(&at, &patch).map(|_| ())
        });
        match ReactiveContext::defer_write(runtime, &signals, write) {
            Ok(()) => Ok(changes),
            Err(write) => write().map(|()| changes),
        }
    }

    /// Diff `patch` against the shadow copy, apply it and write the affected
    /// signals in one batch.
    fn commit(&self, at: &KeyPath, patch: &Value) -> Result<ChangeSet> {
        self.scope.ensure_alive()?;
        let (changes, writes) = {
            let mut shared = self.shared.lock();
            shared.check_writable(at, patch)?;
            at.check_walkable(&shared.data)?;

            let changes = diff(at.lookup(&shared.data), patch, at);
            if changes.is_empty() {
                trace!(path = %at, "patch changes nothing");
                return Ok(changes);
            }
            for change in changes.leaves() {
                change.path.assign(&mut shared.data, change.value.clone())?;
            }
            let writes = shared.affected(at, &changes);
            (changes, writes)
        };

        debug!(
            path = %at,
            leaves = changes.len(),
            signals = writes.len(),
            "applying patch"
        );
        self.runtime().batch(|| {
            writes
                .into_iter()
                .try_for_each(|(signal, value)| signal.set(value))
        })??;
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Selectors
    // ------------------------------------------------------------------

    /// Bind keys to sources.
    ///
    /// Function sources run immediately. Async sources return a task each,
    /// which must be polled or spawned for their values to arrive. Selected
    /// keys become read-only to `set`; the binding is torn down with the
    /// current owner (the running computation, or the container).
    pub fn select<I, K>(&self, bindings: I) -> Result<Vec<SelectorTask>>
    where
        I: IntoIterator<Item = (K, Source)>,
        K: AsRef<str>,
    {
        let mut tasks = Vec::new();
        for (key, source) in bindings {
            let binding = self.register(&KeyPath::parse(key.as_ref())?)?;
            if let Some(task) = selector::bind(binding, source)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    fn register(&self, path: &KeyPath) -> Result<Binding> {
        self.scope.ensure_alive()?;
        if path.is_root() {
            return Err(ReactiveError::InvalidPatch {
                path: path.to_string(),
                reason: "the root cannot be selected".into(),
            });
        }

        let mut shared = self.shared.lock();
        if let Some(existing) = shared
            .selectors
            .keys()
            .find(|selected| selected.starts_with(path) || path.starts_with(selected))
        {
            return Err(ReactiveError::InvalidPatch {
                path: path.to_string(),
                reason: format!("overlaps selector `{existing}`"),
            });
        }

        let destination = match shared.signals.get(path) {
            Some(signal) => signal.clone(),
            None => {
                let initial = path.lookup(&shared.data).cloned().unwrap_or(Value::Null);
                let signal = self.scope.signal(initial)?;
                shared.signals.insert(path.clone(), signal.clone());
                signal
            }
        };
        let status = self.scope.signal(SelectorStatus::Pending)?;
        shared.selectors.insert(path.clone(), status.clone());

        let weak = Arc::downgrade(&self.shared);
        let (key, old_status) = (path.clone(), status.clone());
        self.scope.on_cleanup(move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().selectors.shift_remove(&key);
            }
            old_status.dispose();
        })?;

        debug!(path = %path, "selector registered");
        Ok(Binding {
            selector: path.to_string(),
            scope: self.scope.clone(),
            destination,
            status,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }

    /// Tear down every selector, computation and signal of the container.
    pub fn dispose(&self) {
        self.scope.dispose();
        let mut shared = self.shared.lock();
        shared.signals.clear();
        shared.selectors.clear();
    }
}

impl std::fmt::Debug for StateContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("StateContainer")
            .field("scope", &self.scope.id())
            .field("materialized", &shared.signals.len())
            .field("selectors", &shared.selectors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn signals_materialize_lazily() {
        let state = StateContainer::new(json!({ "a": 1, "b": { "c": 2 } })).unwrap();
        assert_eq!(state.runtime().signal_count(), 0);

        assert_eq!(state.get("b.c").unwrap(), json!(2));
        assert_eq!(state.runtime().signal_count(), 1);

        state.get("b.c").unwrap();
        assert_eq!(state.runtime().signal_count(), 1);
    }

    #[test]
    fn missing_path_reads_null_then_updates() {
        let state = StateContainer::new(json!({})).unwrap();
        assert_eq!(state.get("later").unwrap(), Value::Null);

        state.set(json!({ "later": true })).unwrap();
        assert_eq!(state.get("later").unwrap(), json!(true));
    }

    #[test]
    fn root_patch_must_be_object() {
        let state = StateContainer::new(json!({ "a": 1 })).unwrap();
        assert!(matches!(
            state.set(json!(5)),
            Err(ReactiveError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn set_at_through_scalar_fails() {
        let state = StateContainer::new(json!({ "a": 1 })).unwrap();
        assert!(matches!(
            state.set_at("a.b", json!(2)),
            Err(ReactiveError::InvalidPatch { .. })
        ));
        assert_eq!(state.get("a").unwrap(), json!(1));
    }

    #[test]
    fn unchanged_leaves_are_not_written() {
        let state = StateContainer::new(json!({
            "user": { "firstName": "John", "lastName": "Smith" }
        }))
        .unwrap();
        let last = state.signal("user.lastName").unwrap();
        let first = state.signal("user.firstName").unwrap();

        state.set(json!({ "user": { "firstName": "Jake" } })).unwrap();
        assert_eq!(first.version().unwrap(), 1);
        assert_eq!(last.version().unwrap(), 0);
    }

    #[test]
    fn ancestors_observe_nested_change() {
        let state = StateContainer::new(json!({ "user": { "name": "a", "age": 1 } })).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));

        let (s, r) = (state.clone(), runs.clone());
        state
            .scope()
            .computation(move || {
                s.get("user")?;
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        state.set_at("user", json!({ "age": 2 })).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(state.get("user").unwrap(), json!({ "name": "a", "age": 2 }));
    }

    #[test]
    fn descendants_refresh_when_subtree_replaced() {
        let state = StateContainer::new(json!({ "point": { "x": 1 } })).unwrap();
        let x = state.signal("point.x").unwrap();

        state.set(json!({ "point": 7 })).unwrap();
        assert_eq!(x.get().unwrap(), Value::Null);
        assert_eq!(state.get("point").unwrap(), json!(7));
    }

    #[test]
    fn get_as_deserializes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            name: String,
        }

        let state = StateContainer::new(json!({ "user": { "name": "Ada" } })).unwrap();
        let user: User = state.get_as("user").unwrap();
        assert_eq!(user, User { name: "Ada".into() });
        assert!(matches!(
            state.get_as::<u32>("user"),
            Err(ReactiveError::Serialization(_))
        ));
    }

    #[test]
    fn selected_keys_are_read_only() {
        let state = StateContainer::new(json!({ "first": "Ada", "last": "Lovelace" })).unwrap();
        let s = state.clone();
        state
            .select([(
                "full",
                Source::function(move || {
                    Ok(format!("{} {}", s.get_as::<String>("first")?, s.get_as::<String>("last")?))
                }),
            )])
            .unwrap();

        assert_eq!(state.get("full").unwrap(), json!("Ada Lovelace"));
        assert_eq!(state.status("full").unwrap(), Some(SelectorStatus::Ready));
        assert_eq!(state.status("first").unwrap(), None);
        assert_eq!(
            state.set(json!({ "full": "x" })).map(|_| ()),
            Err(ReactiveError::ReadOnlyPath { path: "full".into() })
        );

        state.set(json!({ "first": "Grace" })).unwrap();
        assert_eq!(state.get("full").unwrap(), json!("Grace Lovelace"));
    }

    #[test]
    fn overlapping_selectors_rejected() {
        let state = StateContainer::new(json!({})).unwrap();
        state
            .select([("a", Source::function(|| Ok(json!({ "b": 1 }))))])
            .unwrap();

        assert!(state
            .select([("a.b", Source::function(|| Ok(1)))])
            .is_err());
        assert_eq!(state.get("a.b").unwrap(), json!(1));
    }

    #[test]
    fn snapshot_merges_selectors() {
        let state = StateContainer::new(json!({ "n": 2 })).unwrap();
        let s = state.clone();
        state
            .select([("double", Source::function(move || Ok(s.get_as::<i64>("n")? * 2)))])
            .unwrap();

        assert_eq!(state.snapshot().unwrap(), json!({ "n": 2, "double": 4 }));
    }

    #[test]
    fn set_inside_body_applies_on_commit() {
        let state = StateContainer::new(json!({ "input": 1, "output": 0 })).unwrap();
        let s = state.clone();
        state
            .scope()
            .computation(move || {
                let input: i64 = s.get_as("input")?;
                let changes = s.set(json!({ "output": input * 2 }))?;
                assert_eq!(changes.len(), 1);
                Ok(())
            })
            .unwrap();
        assert_eq!(state.get("output").unwrap(), json!(2));

        state.set(json!({ "input": 5 })).unwrap();
        assert_eq!(state.get("output").unwrap(), json!(10));
        assert_eq!(state.snapshot().unwrap(), json!({ "input": 5, "output": 10 }));
    }

    #[test]
    fn disposed_container_fails_loudly() {
        let state = StateContainer::new(json!({ "a": 1 })).unwrap();
        let signal = state.signal("a").unwrap();
        state.dispose();

        assert!(state.is_disposed());
        assert!(signal.is_disposed());
        assert!(matches!(
            state.get("a"),
            Err(ReactiveError::DisposedAccess { .. })
        ));
        assert!(matches!(
            state.set(json!({ "a": 2 })),
            Err(ReactiveError::DisposedAccess { .. })
        ));
    }
}
