//! Class path
//!
//! Catalogue of every class definition a sandbox may load. One class name
//! can have several definitions as long as their SDK ranges are disjoint,
//! which is how API differences between SDK levels are modelled.

use std::collections::HashMap;
use std::sync::Arc;

use shade_error::{InstrumentationError, ShadeResult};

use super::definition::{ClassDefinition, OBJECT_CLASS};
use crate::value::{TypeDesc, Value};

/// `java.lang.System`, whose clock methods are intercepted
pub const SYSTEM_CLASS: &str = "java.lang.System";

#[derive(Debug, Clone)]
pub struct ClassPath {
    classes: HashMap<String, Vec<Arc<ClassDefinition>>>,
}

impl ClassPath {
    /// A class path holding only the core `java.lang` classes
    pub fn new() -> Self {
        let mut classes: HashMap<String, Vec<Arc<ClassDefinition>>> = HashMap::new();
        for def in core_classes() {
            classes.insert(def.name.clone(), vec![Arc::new(def)]);
        }
        Self { classes }
    }

    /// Add a definition
    ///
    /// Fails if another definition of the same class covers any of the same
    /// SDK levels.
    pub fn define(&mut self, definition: ClassDefinition) -> ShadeResult<()> {
        let defs = self.classes.entry(definition.name.clone()).or_default();
        if defs
            .iter()
            .any(|existing| existing.sdk_range.overlaps(&definition.sdk_range))
        {
            return Err(InstrumentationError::OverlappingDefinitions(definition.name).into());
        }
        log::trace!(
            "Defined class {} for SDK {}",
            definition.name,
            definition.sdk_range
        );
        defs.push(Arc::new(definition));
        Ok(())
    }

    /// Builder-style [`define`](Self::define)
    pub fn with(mut self, definition: ClassDefinition) -> ShadeResult<Self> {
        self.define(definition)?;
        Ok(self)
    }

    /// Find the definition of `name` that exists at `sdk`
    pub fn find(&self, name: &str, sdk: i32) -> ShadeResult<Arc<ClassDefinition>> {
        let defs = self
            .classes
            .get(name)
            .ok_or_else(|| InstrumentationError::ClassNotFound(name.to_string()))?;
        defs.iter()
            .find(|def| def.sdk_range.contains(sdk))
            .cloned()
            .ok_or_else(|| InstrumentationError::ClassNotAvailableAtSdk(name.to_string(), sdk).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassPath {
    fn default() -> Self {
        Self::new()
    }
}

fn core_classes() -> Vec<ClassDefinition> {
    let object = ClassDefinition::builder(OBJECT_CLASS)
        .method("hashCode", &[], TypeDesc::Int, |inv| {
            let this = inv.this()?;
            Ok((this.id().as_u64() as i32).into())
        })
        .finalizer(|_| Ok(Value::Void))
        .build();

    let system = ClassDefinition::builder(SYSTEM_CLASS)
        .native_static_method("currentTimeMillis", &[], TypeDesc::Long)
        .native_static_method("nanoTime", &[], TypeDesc::Long)
        .static_method("identityHashCode", &[TypeDesc::Object], TypeDesc::Int, |inv| {
            match inv.arg_opt_object(0)? {
                Some(obj) => Ok((obj.id().as_u64() as i32).into()),
                None => Ok(0.into()),
            }
        })
        .build();

    vec![object, system]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiRange;
    use shade_error::ShadeError;

    #[test]
    fn test_core_classes_present() {
        let path = ClassPath::new();
        assert!(path.contains(OBJECT_CLASS));
        assert!(path.contains(SYSTEM_CLASS));
        assert!(path.find(OBJECT_CLASS, 34).is_ok());
    }

    #[test]
    fn test_find_by_sdk() {
        let mut path = ClassPath::new();
        path.define(
            ClassDefinition::builder("android.media.AudioDeviceInfo")
                .since(23)
                .build(),
        )
        .expect("define");

        assert!(path.find("android.media.AudioDeviceInfo", 23).is_ok());
        match path.find("android.media.AudioDeviceInfo", 22) {
            Err(ShadeError::Instrumentation {
                source: InstrumentationError::ClassNotAvailableAtSdk(name, sdk),
                ..
            }) => {
                assert_eq!(name, "android.media.AudioDeviceInfo");
                assert_eq!(sdk, 22);
            }
            other => panic!("unexpected {:?}", other.map(|d| d.name.clone())),
        }
    }

    #[test]
    fn test_missing_class() {
        let path = ClassPath::new();
        let err = path.find("android.os.Nope", 34).expect_err("missing");
        assert!(err.to_string().contains("android.os.Nope"));
    }

    #[test]
    fn test_disjoint_definitions() {
        let mut path = ClassPath::new();
        path.define(
            ClassDefinition::builder("android.os.Foo")
                .sdk(ApiRange::up_to(28))
                .build(),
        )
        .expect("old");
        path.define(ClassDefinition::builder("android.os.Foo").since(29).build())
            .expect("new");
        assert!(path
            .define(ClassDefinition::builder("android.os.Foo").since(30).build())
            .is_err());

        assert_eq!(path.find("android.os.Foo", 28).map(|d| d.sdk_range).ok(), Some(ApiRange::up_to(28)));
        assert_eq!(path.find("android.os.Foo", 33).map(|d| d.sdk_range).ok(), Some(ApiRange::since(29)));
    }
}
