use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::tracker::{ChangeTracker, Subscription};

/// Value types that can live in a tracked cell.
///
/// Serialization lets dynamically typed consumers (Lua plugins, the CLI
/// summary) read and publish the same cell as JSON.
pub trait Trackable: Clone + Serialize + DeserializeOwned + 'static {}

impl<T> Trackable for T where T: Clone + Serialize + DeserializeOwned + 'static {}

/// One of the three read-only registry views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Tracked,
    Shared,
    Types,
}

impl ViewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tracked => "tracked",
            Self::Shared => "shared",
            Self::Types => "types",
        }
    }

    /// Maps a runtime field name to its view.
    pub fn from_field(name: &str) -> Option<Self> {
        match name {
            "tracked" => Some(Self::Tracked),
            "shared" => Some(Self::Shared),
            "types" => Some(Self::Types),
            _ => None,
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("`{name}` holds {found}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("registry view `{0}` is read-only")]
    ReadOnly(ViewKind),
    #[error("failed to convert `{name}` to or from JSON: {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Name of a tracked cell together with the type it holds.
pub struct TrackedKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TrackedKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for TrackedKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TrackedKey<T> {}

impl<T> fmt::Debug for TrackedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedKey").field(&self.name).finish()
    }
}

type JsonCallback = Box<dyn Fn(JsonValue)>;

trait ErasedTracker {
    fn as_any(&self) -> &dyn Any;
    fn value_type(&self) -> &'static str;
    fn has_value(&self) -> bool;
    fn value_json(&self) -> Result<Option<JsonValue>, serde_json::Error>;
    fn set_json(&self, value: JsonValue) -> Result<(), serde_json::Error>;
    fn subscribe_json(&self, name: &str, kind: Subscription, callback: JsonCallback);
}

impl<T: Trackable> ErasedTracker for ChangeTracker<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn value_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn has_value(&self) -> bool {
        ChangeTracker::has_value(self)
    }

    fn value_json(&self) -> Result<Option<JsonValue>, serde_json::Error> {
        self.value().map(serde_json::to_value).transpose()
    }

    fn set_json(&self, value: JsonValue) -> Result<(), serde_json::Error> {
        let value: T = serde_json::from_value(value)?;
        self.set_value(value);
        Ok(())
    }

    fn subscribe_json(&self, name: &str, kind: Subscription, callback: JsonCallback) {
        let name = name.to_string();
        self.subscribe(kind, move |value: &T| match serde_json::to_value(value) {
            Ok(json) => callback(json),
            Err(err) => error!("cannot deliver `{name}` as JSON: {err}"),
        });
    }
}

/// Type-erased handle to a tracked cell that speaks JSON.
#[derive(Clone)]
pub struct DynamicTracker {
    name: String,
    tracker: Rc<dyn ErasedTracker>,
}

impl DynamicTracker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name of the values held by the cell.
    pub fn value_type(&self) -> &'static str {
        self.tracker.value_type()
    }

    pub fn has_value(&self) -> bool {
        self.tracker.has_value()
    }

    pub fn value(&self) -> Result<Option<JsonValue>, RegistryError> {
        self.tracker
            .value_json()
            .map_err(|source| self.serialization_error(source))
    }

    /// Publishes `value` after converting it to the cell's value type.
    pub fn set_value(&self, value: JsonValue) -> Result<(), RegistryError> {
        self.tracker
            .set_json(value)
            .map_err(|source| self.serialization_error(source))
    }

    pub fn subscribe<F>(&self, kind: Subscription, callback: F)
    where
        F: Fn(JsonValue) + 'static,
    {
        debug!("{kind:?} subscriber added to `{}`", self.name);
        self.tracker
            .subscribe_json(&self.name, kind, Box::new(callback));
    }

    fn serialization_error(&self, source: serde_json::Error) -> RegistryError {
        RegistryError::Serialization {
            name: self.name.clone(),
            source,
        }
    }
}

impl fmt::Debug for DynamicTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicTracker")
            .field("name", &self.name)
            .field("value_type", &self.value_type())
            .field("has_value", &self.has_value())
            .finish()
    }
}

/// Entry point of a shared type for dynamically typed plugins: JSON
/// arguments in, the constructed value as JSON out.
pub type ScriptConstructor = Rc<dyn Fn(Vec<JsonValue>) -> anyhow::Result<JsonValue>>;

type JsonSnapshot = Rc<dyn Fn() -> Result<JsonValue, serde_json::Error>>;

struct Stored<B> {
    value: Rc<dyn Any>,
    type_name: &'static str,
    bridge: Option<B>,
}

impl<B: Clone> Clone for Stored<B> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
            type_name: self.type_name,
            bridge: self.bridge.clone(),
        }
    }
}

type StoredMap<B> = RefCell<BTreeMap<String, Stored<B>>>;

#[derive(Default)]
struct RegistryInner {
    tracked: RefCell<BTreeMap<String, Rc<dyn ErasedTracker>>>,
    shared: StoredMap<JsonSnapshot>,
    types: StoredMap<ScriptConstructor>,
}

/// Name-keyed store of tracked cells, shared values and shared types.
///
/// The registry is an explicit context handle: clone it into every plugin
/// that needs cross-module lookup. Entries are created lazily and never
/// removed; a name keeps the same cell for the registry's lifetime.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell stored under `name`, creating an empty one if needed.
    ///
    /// Fails only when `name` already holds a cell of another value type.
    pub fn tracker<T: Trackable>(&self, name: &str) -> Result<ChangeTracker<T>, RegistryError> {
        let entry = self.entry_or_insert_with(name, || -> Rc<dyn ErasedTracker> {
            Rc::new(ChangeTracker::<T>::new())
        });
        entry
            .as_any()
            .downcast_ref::<ChangeTracker<T>>()
            .cloned()
            .ok_or_else(|| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
                found: entry.value_type(),
            })
    }

    pub fn tracker_for<T: Trackable>(
        &self,
        key: TrackedKey<T>,
    ) -> Result<ChangeTracker<T>, RegistryError> {
        self.tracker(key.name())
    }

    /// Returns a JSON handle to the cell under `name`, creating a
    /// JSON-valued cell if none exists.
    pub fn dynamic(&self, name: &str) -> DynamicTracker {
        let tracker = self.entry_or_insert_with(name, || -> Rc<dyn ErasedTracker> {
            Rc::new(ChangeTracker::<JsonValue>::new())
        });
        DynamicTracker {
            name: name.to_string(),
            tracker,
        }
    }

    /// Looks up an existing cell without creating one.
    pub fn find(&self, name: &str) -> Option<DynamicTracker> {
        let tracker = Rc::clone(self.inner.tracked.borrow().get(name)?);
        Some(DynamicTracker {
            name: name.to_string(),
            tracker,
        })
    }

    /// Stores a plain shared value; a later call with the same name replaces it.
    pub fn set_shared<V: Serialize + 'static>(&self, name: &str, value: V) {
        let value = Rc::new(value);
        let source = Rc::clone(&value);
        let snapshot: JsonSnapshot = Rc::new(move || serde_json::to_value(&*source));
        store(&self.inner.shared, name, value, Some(snapshot));
    }

    pub fn shared<V: 'static>(&self, name: &str) -> Result<Option<Rc<V>>, RegistryError> {
        load(&self.inner.shared, name)
    }

    /// Returns the shared value under `name` as JSON, whatever its Rust type.
    pub fn shared_json(&self, name: &str) -> Result<Option<JsonValue>, RegistryError> {
        let Some(stored) = self.inner.shared.borrow().get(name).cloned() else {
            return Ok(None);
        };
        let Some(snapshot) = stored.bridge else {
            return Ok(None);
        };
        snapshot()
            .map(Some)
            .map_err(|source| RegistryError::Serialization {
                name: name.to_string(),
                source,
            })
    }

    /// Publishes a constructor under `name` so other plugins can build the
    /// type without importing it.
    ///
    /// The constructor is only reachable from Rust; use
    /// [`Registry::set_scripted_type`] to make it callable from scripts too.
    pub fn set_shared_type<C: 'static>(&self, name: &str, constructor: C) {
        store(&self.inner.types, name, Rc::new(constructor), None);
    }

    /// Publishes a constructor together with its JSON entry point.
    pub fn set_scripted_type<C, F>(&self, name: &str, constructor: C, script: F)
    where
        C: 'static,
        F: Fn(Vec<JsonValue>) -> anyhow::Result<JsonValue> + 'static,
    {
        let script: ScriptConstructor = Rc::new(script);
        store(&self.inner.types, name, Rc::new(constructor), Some(script));
    }

    /// Returns `Ok(None)` while no constructor has been published under `name`.
    pub fn shared_type<C: 'static>(&self, name: &str) -> Result<Option<Rc<C>>, RegistryError> {
        load(&self.inner.types, name)
    }

    /// JSON entry point of the shared type under `name`, if it has one.
    pub fn script_constructor(&self, name: &str) -> Option<ScriptConstructor> {
        self.inner.types.borrow().get(name)?.bridge.clone()
    }

    pub fn tracked(&self) -> RegistryView {
        self.view(ViewKind::Tracked)
    }

    pub fn shared_values(&self) -> RegistryView {
        self.view(ViewKind::Shared)
    }

    pub fn types(&self) -> RegistryView {
        self.view(ViewKind::Types)
    }

    pub fn view(&self, kind: ViewKind) -> RegistryView {
        RegistryView {
            kind,
            registry: self.clone(),
        }
    }

    fn entry_or_insert_with(
        &self,
        name: &str,
        create: impl FnOnce() -> Rc<dyn ErasedTracker>,
    ) -> Rc<dyn ErasedTracker> {
        let mut tracked = self.inner.tracked.borrow_mut();
        if let Some(entry) = tracked.get(name) {
            return Rc::clone(entry);
        }
        let entry = create();
        debug!("tracking `{name}` as {}", entry.value_type());
        tracked.insert(name.to_string(), Rc::clone(&entry));
        entry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tracked", &self.tracked().names())
            .field("shared", &self.shared_values().names())
            .field("types", &self.types().names())
            .finish()
    }
}

fn store<V: 'static, B>(map: &StoredMap<B>, name: &str, value: Rc<V>, bridge: Option<B>) {
    debug!("storing `{name}` as {}", type_name::<V>());
    map.borrow_mut().insert(
        name.to_string(),
        Stored {
            value,
            type_name: type_name::<V>(),
            bridge,
        },
    );
}

fn load<V: 'static, B: Clone>(
    map: &StoredMap<B>,
    name: &str,
) -> Result<Option<Rc<V>>, RegistryError> {
    let Some(stored) = map.borrow().get(name).cloned() else {
        return Ok(None);
    };
    stored
        .value
        .downcast::<V>()
        .map(Some)
        .map_err(|_| RegistryError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<V>(),
            found: stored.type_name,
        })
}

/// Read-only listing of one registry map.
///
/// Views have no mutators; all writes go through [`Registry`] methods.
#[derive(Clone)]
pub struct RegistryView {
    kind: ViewKind,
    registry: Registry,
}

impl RegistryView {
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let inner = &self.registry.inner;
        match self.kind {
            ViewKind::Tracked => inner.tracked.borrow().keys().cloned().collect(),
            ViewKind::Shared => inner.shared.borrow().keys().cloned().collect(),
            ViewKind::Types => inner.types.borrow().keys().cloned().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = &self.registry.inner;
        match self.kind {
            ViewKind::Tracked => inner.tracked.borrow().contains_key(name),
            ViewKind::Shared => inner.shared.borrow().contains_key(name),
            ViewKind::Types => inner.types.borrow().contains_key(name),
        }
    }

    pub fn len(&self) -> usize {
        let inner = &self.registry.inner;
        match self.kind {
            ViewKind::Tracked => inner.tracked.borrow().len(),
            ViewKind::Shared => inner.shared.borrow().len(),
            ViewKind::Types => inner.types.borrow().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RegistryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryView")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}
