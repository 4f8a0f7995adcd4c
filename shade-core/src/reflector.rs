//! Reflector passthrough
//!
//! Lets a shadow reach the original behaviour of the class it replaces:
//! calls run the original method bodies without consulting shadows, and
//! field access reads and writes raw storage. Calls made from inside those
//! bodies dispatch normally.

use std::fmt;
use std::sync::Arc;

use shade_error::DispatchError;

use crate::class::MethodKind;
use crate::instrument::InstrumentedClass;
use crate::object::ObjectRef;
use crate::runtime::Runtime;
use crate::throwable::{CallResult, InvokeError};
use crate::value::Value;

pub struct Reflector {
    runtime: Runtime,
    class: Arc<InstrumentedClass>,
    target: Option<ObjectRef>,
}

impl Reflector {
    pub(crate) fn new(runtime: Runtime, class: Arc<InstrumentedClass>, target: Option<ObjectRef>) -> Self {
        Self {
            runtime,
            class,
            target,
        }
    }

    pub fn class(&self) -> &Arc<InstrumentedClass> {
        &self.class
    }

    pub fn target(&self) -> Option<&ObjectRef> {
        self.target.as_ref()
    }

    /// Run the original body of `name`, starting resolution at this
    /// reflector's class
    pub fn call(&self, name: &str, args: Vec<Value>) -> CallResult {
        let kind = if self.target.is_some() {
            MethodKind::Instance
        } else {
            MethodKind::Static
        };
        let method = self
            .class
            .resolve(name, &args, kind)
            .ok_or_else(|| DispatchError::NoSuchMethod(self.class.name().to_string(), name.to_string()))?;
        self.runtime.ensure_initialized(&method.class)?;
        self.runtime.call_direct(&method, self.target.clone(), args)
    }

    pub fn get_field(&self, name: &str) -> Result<Value, InvokeError> {
        Ok(self.receiver(name)?.get_field(name)?)
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), InvokeError> {
        Ok(self.receiver(name)?.set_field(name, value)?)
    }

    /// Read a static field of this class or its superclasses
    pub fn get_static(&self, name: &str) -> Result<Value, InvokeError> {
        let owner = self.static_owner(name)?;
        self.runtime.ensure_initialized(&owner)?;
        owner
            .get_static_raw(name)
            .ok_or_else(|| self.no_such_field(name))
    }

    pub fn set_static(&self, name: &str, value: Value) -> Result<(), InvokeError> {
        let owner = self.static_owner(name)?;
        self.runtime.ensure_initialized(&owner)?;
        if owner.set_static_raw(name, value) {
            Ok(())
        } else {
            Err(self.no_such_field(name))
        }
    }

    fn receiver(&self, member: &str) -> Result<&ObjectRef, InvokeError> {
        self.target.as_ref().ok_or_else(|| {
            DispatchError::MissingReceiver(format!("{}.{}", self.class.name(), member)).into()
        })
    }

    fn static_owner(&self, name: &str) -> Result<Arc<InstrumentedClass>, InvokeError> {
        self.class
            .static_owner(name)
            .ok_or_else(|| self.no_such_field(name))
    }

    fn no_such_field(&self, name: &str) -> InvokeError {
        DispatchError::NoSuchField(self.class.name().to_string(), name.to_string()).into()
    }
}

impl fmt::Debug for Reflector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reflector")
            .field("class", &self.class.name())
            .field("target", &self.target)
            .finish()
    }
}
