//! Method interceptors
//!
//! Calls into a few classes that are never instrumented (the JDK clock
//! methods) are redirected to handlers installed by the sandbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::class::MethodBody;
use crate::dispatch::Invocation;
use crate::throwable::CallResult;

#[derive(Clone, Default)]
pub struct Interceptors {
    handlers: HashMap<String, HashMap<String, MethodBody>>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route calls to `class_name.method` into `handler`
    pub fn add<F>(&mut self, class_name: &str, method: &str, handler: F)
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        log::debug!("Intercepting {}.{}", class_name, method);
        self.handlers
            .entry(class_name.to_string())
            .or_default()
            .insert(method.to_string(), Arc::new(handler));
    }

    pub fn get(&self, class_name: &str, method: &str) -> Option<&MethodBody> {
        self.handlers.get(class_name)?.get(method)
    }

    pub fn intercepts_class(&self, class_name: &str) -> bool {
        self.handlers.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self
            .handlers
            .iter()
            .flat_map(|(class, methods)| methods.keys().map(move |m| format!("{}.{}", class, m)))
            .collect();
        names.sort();
        f.debug_struct("Interceptors").field("methods", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_add_and_get() {
        let mut interceptors = Interceptors::new();
        assert!(interceptors.is_empty());
        interceptors.add("java.lang.System", "nanoTime", |_| Ok(Value::Long(1)));

        assert!(interceptors.get("java.lang.System", "nanoTime").is_some());
        assert!(interceptors.get("java.lang.System", "currentTimeMillis").is_none());
        assert!(interceptors.intercepts_class("java.lang.System"));
        assert_eq!(interceptors.len(), 1);
        assert!(format!("{:?}", interceptors).contains("java.lang.System.nanoTime"));
    }
}
