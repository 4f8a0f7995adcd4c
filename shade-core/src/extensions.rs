//! Typed per-runtime storage
//!
//! Holds one value per type. The runtime keeps two of these: long-lived
//! services installed at sandbox bring-up (the clock, the schedulers) and
//! per-test state that shadows use in place of statics, cleared on reset.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
pub struct Extensions {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any previous value of the same type
    pub fn insert<T: Any + Send + Sync>(&self, value: Arc<T>) {
        self.values.insert(TypeId::of::<T>(), value);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = Arc::clone(self.values.get(&TypeId::of::<T>())?.value());
        value.downcast::<T>().ok()
    }

    /// The value of type `T`, created with `T::default()` on first use
    pub fn get_or_default<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        let value = Arc::clone(
            self.values
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Arc::new(T::default()) as Arc<dyn Any + Send + Sync>)
                .value(),
        );
        match value.downcast::<T>() {
            Ok(typed) => typed,
            // entries are keyed by their own TypeId
            Err(_) => Arc::new(T::default()),
        }
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let (_, value) = self.values.remove(&TypeId::of::<T>())?;
        value.downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn clear(&self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[test]
    fn test_insert_and_get() {
        let ext = Extensions::new();
        assert!(ext.get::<String>().is_none());
        ext.insert(Arc::new("hello".to_string()));
        assert_eq!(ext.get::<String>().as_deref().map(String::as_str), Some("hello"));
        assert!(ext.contains::<String>());
    }

    #[test]
    fn test_get_or_default_is_shared() {
        let ext = Extensions::new();
        ext.get_or_default::<Counter>().0.fetch_add(1, Ordering::SeqCst);
        ext.get_or_default::<Counter>().0.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ext.get_or_default::<Counter>().0.load(Ordering::SeqCst), 2);

        ext.clear();
        assert_eq!(ext.get_or_default::<Counter>().0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove() {
        let ext = Extensions::new();
        ext.insert(Arc::new(5u32));
        assert_eq!(ext.remove::<u32>().as_deref(), Some(&5));
        assert!(ext.is_empty());
    }
}
