//! Real framework objects
//!
//! Objects are reference counted and compared by identity. Each object knows
//! its class and the runtime that created it, so calls can be made on it
//! from anywhere.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use shade_error::DispatchError;

use crate::instrument::InstrumentedClass;
use crate::runtime::{Runtime, RuntimeInner};
use crate::throwable::CallResult;
use crate::value::Value;

/// Stable identity of an object within a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

pub struct RealObject {
    id: ObjectId,
    class: Arc<InstrumentedClass>,
    fields: Mutex<HashMap<String, Value>>,
    runtime: Weak<RuntimeInner>,
}

/// Shared handle to a real object
#[derive(Clone)]
pub struct ObjectRef(Arc<RealObject>);

impl ObjectRef {
    pub(crate) fn new(id: ObjectId, class: Arc<InstrumentedClass>, runtime: Weak<RuntimeInner>) -> Self {
        let fields = class.instance_field_defaults();
        Self(Arc::new(RealObject {
            id,
            class,
            fields: Mutex::new(fields),
            runtime,
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn class(&self) -> &Arc<InstrumentedClass> {
        &self.0.class
    }

    pub fn class_name(&self) -> &str {
        self.0.class.name()
    }

    pub fn is_instance_of(&self, class_name: &str) -> bool {
        self.0.class.is_subclass_of(class_name)
    }

    /// Read an instance field directly
    pub fn get_field(&self, name: &str) -> Result<Value, DispatchError> {
        self.0
            .fields
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::NoSuchField(self.class_name().to_string(), name.to_string()))
    }

    /// Write an instance field directly
    pub fn set_field(&self, name: &str, value: Value) -> Result<(), DispatchError> {
        let mut fields = self.0.fields.lock();
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DispatchError::NoSuchField(
                self.class_name().to_string(),
                name.to_string(),
            )),
        }
    }

    /// The runtime this object belongs to
    pub fn runtime(&self) -> Result<Runtime, DispatchError> {
        self.0
            .runtime
            .upgrade()
            .map(Runtime::from_inner)
            .ok_or(DispatchError::RuntimeGone(self.0.id.as_u64()))
    }

    /// Invoke instance method `name` through dispatch
    pub fn call(&self, name: &str, args: Vec<Value>) -> CallResult {
        self.runtime()?.invoke(self, name, args)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class_name(), self.0.id)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("class", &self.class_name())
            .field("id", &self.0.id)
            .finish()
    }
}

/// Non-owning handle to a real object
#[derive(Clone)]
pub struct WeakObjectRef(Weak<RealObject>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(obj) => write!(f, "WeakObjectRef({})", obj),
            None => write!(f, "WeakObjectRef(<dropped>)"),
        }
    }
}
