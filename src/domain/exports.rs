//! Module exports
//!
//! A module's exports are whatever its factory produced. The loader never
//! inspects them, it only caches and hands out shared references, so they
//! are stored type-erased behind an `Arc`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Marker passed in place of a dependency whose edge was broken as a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Undefined;

/// Shared, type-erased exports value of a loaded module
///
/// Cloning an `Exports` clones the handle, not the value: every consumer of a
/// cached module sees the same allocation (see [`Exports::ptr_eq`]).
#[derive(Clone)]
pub struct Exports(Arc<dyn Any + Send + Sync>);

impl Exports {
    /// Wraps an arbitrary value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wraps an already shared value without reallocating
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    /// Wraps a JSON value (the representation used by manifest modules)
    pub fn json(value: Value) -> Self {
        Self::new(value)
    }

    /// An empty JSON object, the export of placeholder modules
    pub fn empty_object() -> Self {
        Self::json(Value::Object(Map::new()))
    }

    /// The value handed to a factory for a dependency that could not be satisfied
    pub fn undefined() -> Self {
        Self::new(Undefined)
    }

    /// Returns true if this is the [`Undefined`] marker
    pub fn is_undefined(&self) -> bool {
        self.0.is::<Undefined>()
    }

    /// Returns true if this is an empty JSON object
    pub fn is_empty_object(&self) -> bool {
        matches!(self.as_json(), Some(Value::Object(map)) if map.is_empty())
    }

    /// Borrows the value as `T` if that is its concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns a shared handle to the value as `T` if that is its concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }

    /// Borrows the value as JSON, if it is JSON
    pub fn as_json(&self) -> Option<&Value> {
        self.downcast_ref::<Value>()
    }

    /// Returns true if both handles point at the same value
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(json) = self.as_json() {
            write!(f, "Exports({})", json)
        } else if self.is_undefined() {
            f.write_str("Exports(undefined)")
        } else {
            f.write_str("Exports(<opaque>)")
        }
    }
}

impl From<Value> for Exports {
    fn from(value: Value) -> Self {
        Self::json(value)
    }
}
