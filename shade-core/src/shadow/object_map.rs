//! Object-Shadow Map
//!
//! Identity-keyed table from real objects to their shadow state. The first
//! lookup of an object creates its record; every later lookup returns the
//! same record. Creation is guarded per key, so concurrent first lookups of
//! one object still produce a single record.

use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use super::shadow_class::ShadowInstance;
use crate::object::ObjectId;

/// Shadow state contributed by one shadow class
#[derive(Clone)]
pub struct ShadowFacet {
    shadow_name: String,
    instance: ShadowInstance,
}

impl ShadowFacet {
    pub fn new(shadow_name: impl Into<String>, instance: ShadowInstance) -> Self {
        Self {
            shadow_name: shadow_name.into(),
            instance,
        }
    }

    pub fn shadow_name(&self) -> &str {
        &self.shadow_name
    }

    pub fn instance(&self) -> &ShadowInstance {
        &self.instance
    }
}

impl fmt::Debug for ShadowFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShadowFacet").field(&self.shadow_name).finish()
    }
}

/// Shadow of an object whose class has no registered shadow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultShadow {
    pub class_name: String,
}

/// All shadow state attached to one real object
///
/// Facets are ordered most specific first: the shadow of the object's own
/// class, then those of its ancestors.
#[derive(Debug)]
pub struct ShadowRecord {
    class_name: String,
    facets: Vec<ShadowFacet>,
    is_default: bool,
}

impl ShadowRecord {
    pub fn new(class_name: impl Into<String>, facets: Vec<ShadowFacet>) -> Self {
        let class_name = class_name.into();
        if facets.is_empty() {
            let default = DefaultShadow {
                class_name: class_name.clone(),
            };
            return Self {
                class_name,
                facets: vec![ShadowFacet::new("DefaultShadow", Arc::new(default))],
                is_default: true,
            };
        }
        Self {
            class_name,
            facets,
            is_default: false,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The most specific facet
    pub fn primary(&self) -> &ShadowFacet {
        // never empty, see new()
        &self.facets[0]
    }

    pub fn facets(&self) -> &[ShadowFacet] {
        &self.facets
    }

    /// Whether no shadow class applies to the object
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// State of type `S`, searching facets most specific first
    pub fn get<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        self.facets
            .iter()
            .find_map(|facet| Arc::clone(&facet.instance).downcast::<S>().ok())
    }

    pub fn shadow_names(&self) -> Vec<&str> {
        self.facets.iter().map(ShadowFacet::shadow_name).collect()
    }
}

type Slot = Arc<OnceLock<Arc<ShadowRecord>>>;

/// Concurrent identity map from objects to shadow records
#[derive(Default)]
pub struct ObjectShadowMap {
    records: DashMap<ObjectId, Slot>,
    created: AtomicU64,
}

impl ObjectShadowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for `id`, created by `create` on first access
    ///
    /// `create` runs at most once per object and without any map shard lock
    /// held, so it may look up other objects.
    pub fn get_or_create<F>(&self, id: ObjectId, create: F) -> Arc<ShadowRecord>
    where
        F: FnOnce() -> ShadowRecord,
    {
        let slot: Slot = match self.records.get(&id) {
            Some(existing) => Arc::clone(existing.value()),
            None => Arc::clone(self.records.entry(id).or_default().value()),
        };
        Arc::clone(slot.get_or_init(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            Arc::new(create())
        }))
    }

    /// The record for `id` if it has been created
    pub fn get(&self, id: ObjectId) -> Option<Arc<ShadowRecord>> {
        self.records
            .get(&id)
            .and_then(|slot| slot.value().get().cloned())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&self, id: ObjectId) -> Option<Arc<ShadowRecord>> {
        self.records
            .remove(&id)
            .and_then(|(_, slot)| slot.get().cloned())
    }

    /// Drop every record; used between tests
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records ever created
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ObjectShadowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectShadowMap")
            .field("len", &self.records.len())
            .field("created", &self.created_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Debug, Default)]
    struct ShadowThing {
        value: i32,
    }

    fn record() -> ShadowRecord {
        ShadowRecord::new(
            "android.os.Thing",
            vec![ShadowFacet::new("ShadowThing", Arc::new(ShadowThing { value: 3 }))],
        )
    }

    #[test]
    fn test_identity_stable() {
        let map = ObjectShadowMap::new();
        let id = ObjectId::new(1);
        let first = map.get_or_create(id, record);
        let second = map.get_or_create(id, || panic!("must not create twice"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(map.created_count(), 1);
    }

    #[test]
    fn test_typed_access() {
        let rec = record();
        let thing = rec.get::<ShadowThing>().expect("facet");
        assert_eq!(thing.value, 3);
        assert!(rec.get::<DefaultShadow>().is_none());
        assert!(!rec.is_default());
    }

    #[test]
    fn test_default_shadow() {
        let rec = ShadowRecord::new("android.os.Unshadowed", Vec::new());
        assert!(rec.is_default());
        let default = rec.get::<DefaultShadow>().expect("default");
        assert_eq!(default.class_name, "android.os.Unshadowed");
        assert_eq!(rec.primary().shadow_name(), "DefaultShadow");
    }

    #[test]
    fn test_concurrent_first_access() {
        let map = Arc::new(ObjectShadowMap::new());
        let barrier = Arc::new(Barrier::new(8));
        let id = ObjectId::new(42);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    map.get_or_create(id, record)
                })
            })
            .collect();

        let records: Vec<Arc<ShadowRecord>> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert!(records.iter().all(|r| Arc::ptr_eq(r, &records[0])));
        assert_eq!(map.created_count(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let map = ObjectShadowMap::new();
        map.get_or_create(ObjectId::new(1), record);
        map.get_or_create(ObjectId::new(2), record);
        assert_eq!(map.len(), 2);
        assert!(map.remove(ObjectId::new(1)).is_some());
        assert!(!map.contains(ObjectId::new(1)));
        map.clear();
        assert!(map.is_empty());
    }
}
