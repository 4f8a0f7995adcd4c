// 插桩类加载器（Instrumenting Class Loader）
//
// 类在第一次使用时加载。被插桩的类的每个方法都经过分发引擎，
// 未插桩的类直接执行原始方法体。每个加载器是一代（generation），
// 缓存的类、静态字段和初始化状态都属于这一代。

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shade_common::utils::IdGenerator;
use shade_error::{InstrumentationError, ShadeError, ShadeResult};

use super::config::InstrumentationConfiguration;
use crate::class::{
    ClassDefinition, ClassPath, MethodBody, MethodKind, MethodSignature, STATIC_INITIALIZER,
};
use crate::shadow::{ShadowClass, ShadowMap, ShadowMapping};
use crate::throwable::InvokeError;
use crate::value::{TypeDesc, Value};

static NEXT_GENERATION: IdGenerator = IdGenerator::new(1);

/// How a method slot is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Through the dispatch engine
    Intercepted,
    /// Straight into the original body
    Direct,
}

/// A method of a loaded class
#[derive(Clone)]
pub struct MethodSlot {
    pub signature: MethodSignature,
    pub kind: MethodKind,
    pub is_native: bool,
    pub is_abstract: bool,
    pub routing: Routing,
    pub original: Option<MethodBody>,
}

impl MethodSlot {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn return_type(&self) -> TypeDesc {
        self.signature.ret
    }
}

impl fmt::Debug for MethodSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSlot")
            .field("signature", &self.signature.to_string())
            .field("kind", &self.kind)
            .field("routing", &self.routing)
            .field("is_native", &self.is_native)
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}

/// Static initialisation progress of a class
#[derive(Debug, Clone, PartialEq, Eq)]
enum InitState {
    Uninitialized,
    InProgress,
    Initialized,
    Failed(String),
}

/// A method found by [`InstrumentedClass::resolve`]
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub class: Arc<InstrumentedClass>,
    pub index: usize,
}

impl ResolvedMethod {
    pub fn slot(&self) -> &MethodSlot {
        &self.class.slots[self.index]
    }
}

/// A class as loaded into one generation
pub struct InstrumentedClass {
    definition: Arc<ClassDefinition>,
    superclass: Option<Arc<InstrumentedClass>>,
    instrumented: bool,
    generation: u64,
    slots: Vec<MethodSlot>,
    exact_mapping: Option<ShadowMapping>,
    shadow_chain: Vec<Arc<ShadowClass>>,
    statics: Mutex<HashMap<String, Value>>,
    init: ReentrantMutex<RefCell<InitState>>,
    initialized: AtomicBool,
}

impl InstrumentedClass {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<ClassDefinition> {
        &self.definition
    }

    pub fn superclass(&self) -> Option<&Arc<InstrumentedClass>> {
        self.superclass.as_ref()
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    pub fn is_abstract(&self) -> bool {
        self.definition.is_abstract
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn slots(&self) -> &[MethodSlot] {
        &self.slots
    }

    /// Mapping registered for exactly this class, if any
    pub fn exact_mapping(&self) -> Option<&ShadowMapping> {
        self.exact_mapping.as_ref()
    }

    /// Shadow classes of this class and its instrumented ancestors, most
    /// specific first
    pub fn shadow_chain(&self) -> &[Arc<ShadowClass>] {
        &self.shadow_chain
    }

    /// This class followed by its superclasses up to `java.lang.Object`
    pub fn lineage(&self) -> impl Iterator<Item = &InstrumentedClass> {
        std::iter::successors(Some(self), |class| class.superclass.as_deref())
    }

    pub fn is_subclass_of(&self, class_name: &str) -> bool {
        self.lineage().any(|class| class.name() == class_name)
    }

    /// Find the method `name` accepting `args`, walking up the hierarchy for
    /// instance and static methods
    pub fn resolve(self: &Arc<Self>, name: &str, args: &[Value], kind: MethodKind) -> Option<ResolvedMethod> {
        let mut class = Some(self);
        while let Some(current) = class {
            let found = current.slots.iter().position(|slot| {
                slot.kind == kind && slot.name() == name && slot.signature.matches_args(args)
            });
            if let Some(index) = found {
                return Some(ResolvedMethod {
                    class: Arc::clone(current),
                    index,
                });
            }
            if matches!(kind, MethodKind::Constructor | MethodKind::StaticInitializer) {
                return None;
            }
            class = current.superclass.as_ref();
        }
        None
    }

    pub fn find_constructor(self: &Arc<Self>, args: &[Value]) -> Option<ResolvedMethod> {
        self.resolve(crate::class::CONSTRUCTOR, args, MethodKind::Constructor)
    }

    pub fn static_initializer(self: &Arc<Self>) -> Option<ResolvedMethod> {
        self.resolve(STATIC_INITIALIZER, &[], MethodKind::StaticInitializer)
    }

    /// The class in the hierarchy declaring static field `name`
    pub fn static_owner(self: &Arc<Self>, name: &str) -> Option<Arc<InstrumentedClass>> {
        let mut class = Some(self);
        while let Some(current) = class {
            if current.definition.static_fields().any(|f| f.name == name) {
                return Some(Arc::clone(current));
            }
            class = current.superclass.as_ref();
        }
        None
    }

    /// Initial values of every instance field in the hierarchy
    pub fn instance_field_defaults(&self) -> HashMap<String, Value> {
        let mut fields = HashMap::new();
        let lineage: Vec<&InstrumentedClass> = self.lineage().collect();
        for class in lineage.into_iter().rev() {
            for field in class.definition.instance_fields() {
                fields.insert(field.name.clone(), field.initial.clone());
            }
        }
        fields
    }

    /// Read a static field of this class without triggering initialisation
    pub fn get_static_raw(&self, name: &str) -> Option<Value> {
        self.statics.lock().get(name).cloned()
    }

    /// Write a static field declared by this class
    pub fn set_static_raw(&self, name: &str, value: Value) -> bool {
        if self.definition.static_fields().all(|f| f.name != name) {
            return false;
        }
        self.statics.lock().insert(name.to_string(), value);
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Run static initialisation once per generation
    ///
    /// Static fields receive their declared values, then `run_clinit` runs
    /// with the class lock held. Re-entry from the initialising thread sees
    /// the class as initialised; other threads wait.
    pub(crate) fn initialize_with<F>(&self, run_clinit: F) -> Result<(), InvokeError>
    where
        F: FnOnce() -> Result<(), InvokeError>,
    {
        if self.is_initialized() {
            return Ok(());
        }
        let guard = self.init.lock();
        let state = guard.borrow().clone();
        match state {
            InitState::Initialized | InitState::InProgress => return Ok(()),
            InitState::Failed(reason) => {
                return Err(ShadeError::from(InstrumentationError::StaticInitializerFailed(
                    self.name().to_string(),
                    reason,
                ))
                .into());
            }
            InitState::Uninitialized => {}
        }

        *guard.borrow_mut() = InitState::InProgress;
        self.reset_static_values();
        log::trace!("Initializing {} (generation {})", self.name(), self.generation);

        match run_clinit() {
            Ok(()) => {
                *guard.borrow_mut() = InitState::Initialized;
                self.initialized.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                log::warn!("Static initializer of {} failed: {}", self.name(), e);
                *guard.borrow_mut() = InitState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Forget static state so the next use initialises the class again
    pub fn reset_statics(&self) {
        let guard = self.init.lock();
        *guard.borrow_mut() = InitState::Uninitialized;
        self.initialized.store(false, Ordering::Release);
        self.statics.lock().clear();
    }

    fn reset_static_values(&self) {
        let mut statics = self.statics.lock();
        statics.clear();
        for field in self.definition.static_fields() {
            statics.insert(field.name.clone(), field.initial.clone());
        }
    }
}

impl fmt::Debug for InstrumentedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedClass")
            .field("name", &self.definition.name)
            .field("superclass", &self.superclass.as_ref().map(|s| s.name().to_string()))
            .field("instrumented", &self.instrumented)
            .field("generation", &self.generation)
            .field(
                "shadow_chain",
                &self.shadow_chain.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Loads and instruments classes for one sandbox generation
pub struct InstrumentingClassLoader {
    class_path: Arc<ClassPath>,
    config: InstrumentationConfiguration,
    shadow_map: Arc<ShadowMap>,
    sdk: i32,
    generation: u64,
    classes: RwLock<HashMap<String, Arc<InstrumentedClass>>>,
}

impl InstrumentingClassLoader {
    pub fn new(
        class_path: Arc<ClassPath>,
        config: InstrumentationConfiguration,
        shadow_map: Arc<ShadowMap>,
        sdk: i32,
    ) -> Self {
        let generation = NEXT_GENERATION.next_id();
        log::debug!("Created class loader generation {} for SDK {}", generation, sdk);
        Self {
            class_path,
            config,
            shadow_map,
            sdk,
            generation,
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn sdk(&self) -> i32 {
        self.sdk
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn shadow_map(&self) -> &Arc<ShadowMap> {
        &self.shadow_map
    }

    pub fn config(&self) -> &InstrumentationConfiguration {
        &self.config
    }

    /// Load `name`, loading its superclasses first
    pub fn load_class(&self, name: &str) -> ShadeResult<Arc<InstrumentedClass>> {
        if let Some(class) = self.classes.read().get(name) {
            return Ok(Arc::clone(class));
        }
        let mut loading = Vec::new();
        self.load_with_stack(name, &mut loading)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn loaded_classes(&self) -> Vec<Arc<InstrumentedClass>> {
        self.classes.read().values().cloned().collect()
    }

    /// Whether `name` would be loaded instrumented
    pub fn should_instrument(&self, name: &str) -> bool {
        self.config.should_instrument(name)
            || (self.shadow_map.has_mapping(name) && !self.config.is_excluded(name))
    }

    /// Reset static state of every loaded class
    pub fn reset_statics(&self) -> usize {
        let classes = self.loaded_classes();
        for class in &classes {
            class.reset_statics();
        }
        classes.len()
    }

    fn load_with_stack(
        &self,
        name: &str,
        loading: &mut Vec<String>,
    ) -> ShadeResult<Arc<InstrumentedClass>> {
        if let Some(class) = self.classes.read().get(name) {
            return Ok(Arc::clone(class));
        }
        if loading.iter().any(|n| n == name) {
            return Err(InstrumentationError::CircularHierarchy(name.to_string()).into());
        }

        let definition = self.class_path.find(name, self.sdk)?;
        loading.push(name.to_string());
        let superclass = match &definition.superclass {
            Some(super_name) => Some(self.load_with_stack(super_name, loading)?),
            None => None,
        };
        loading.pop();

        let class = Arc::new(self.instrument(definition, superclass));
        let mut classes = self.classes.write();
        Ok(Arc::clone(
            classes.entry(name.to_string()).or_insert(class),
        ))
    }

    fn instrument(
        &self,
        definition: Arc<ClassDefinition>,
        superclass: Option<Arc<InstrumentedClass>>,
    ) -> InstrumentedClass {
        let instrumented = self.should_instrument(&definition.name);

        let mut slots: Vec<MethodSlot> = definition
            .methods
            .iter()
            .map(|method| MethodSlot {
                signature: method.signature.clone(),
                kind: method.kind,
                is_native: method.is_native,
                is_abstract: method.is_abstract,
                routing: if instrumented && !method.is_abstract {
                    Routing::Intercepted
                } else {
                    Routing::Direct
                },
                original: method.body.clone(),
            })
            .collect();
        if definition.static_initializer().is_none() {
            slots.push(MethodSlot {
                signature: MethodSignature::new(STATIC_INITIALIZER, &[], TypeDesc::Void),
                kind: MethodKind::StaticInitializer,
                is_native: false,
                is_abstract: false,
                routing: if instrumented {
                    Routing::Intercepted
                } else {
                    Routing::Direct
                },
                original: None,
            });
        }

        let exact_mapping = if instrumented {
            self.shadow_map.lookup(&definition.name, self.sdk).cloned()
        } else {
            None
        };

        let mut shadow_chain: Vec<Arc<ShadowClass>> = Vec::new();
        if let Some(shadow) = exact_mapping.as_ref().and_then(ShadowMapping::shadow_class) {
            shadow_chain.push(Arc::clone(shadow));
        }
        if let Some(parent) = &superclass {
            for shadow in parent.shadow_chain() {
                if shadow_chain.iter().all(|s| s.name() != shadow.name()) {
                    shadow_chain.push(Arc::clone(shadow));
                }
            }
        }

        log::debug!(
            "Loaded {} (instrumented: {}, shadow: {}) in generation {}",
            definition.name,
            instrumented,
            exact_mapping
                .as_ref()
                .map(ShadowMapping::shadow_name)
                .unwrap_or("-"),
            self.generation
        );

        InstrumentedClass {
            definition,
            superclass,
            instrumented,
            generation: self.generation,
            slots,
            exact_mapping,
            shadow_chain,
            statics: Mutex::new(HashMap::new()),
            init: ReentrantMutex::new(RefCell::new(InitState::Uninitialized)),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Drop for InstrumentingClassLoader {
    fn drop(&mut self) {
        // statics may hold objects whose class points back here
        for class in self.classes.get_mut().values() {
            class.statics.lock().clear();
        }
    }
}

impl fmt::Debug for InstrumentingClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentingClassLoader")
            .field("sdk", &self.sdk)
            .field("generation", &self.generation)
            .field("loaded", &self.classes.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassDefinition, OBJECT_CLASS};
    use crate::shadow::{ShadowClass, ShadowMapBuilder, ShadowMapping};
    use shade_error::ShadeError;

    fn loader_with(path: ClassPath, map: ShadowMap) -> InstrumentingClassLoader {
        InstrumentingClassLoader::new(
            Arc::new(path),
            InstrumentationConfiguration::android_default(),
            Arc::new(map),
            34,
        )
    }

    #[test]
    fn test_load_hierarchy() {
        let path = ClassPath::new()
            .with(ClassDefinition::builder("android.os.Base").build())
            .and_then(|p| p.with(ClassDefinition::builder("android.os.Derived").extends("android.os.Base").build()))
            .expect("class path");
        let loader = loader_with(path, ShadowMap::empty());

        let derived = loader.load_class("android.os.Derived").expect("load");
        assert!(derived.is_instrumented());
        assert!(derived.is_subclass_of("android.os.Base"));
        assert!(derived.is_subclass_of(OBJECT_CLASS));
        assert!(loader.is_loaded("android.os.Base"));

        let object = loader.load_class(OBJECT_CLASS).expect("object");
        assert!(!object.is_instrumented());

        let again = loader.load_class("android.os.Derived").expect("cached");
        assert!(Arc::ptr_eq(&derived, &again));
    }

    #[test]
    fn test_cycle_detected() {
        let path = ClassPath::new()
            .with(ClassDefinition::builder("android.a.A").extends("android.a.B").build())
            .and_then(|p| p.with(ClassDefinition::builder("android.a.B").extends("android.a.A").build()))
            .expect("class path");
        let loader = loader_with(path, ShadowMap::empty());

        match loader.load_class("android.a.A") {
            Err(ShadeError::Instrumentation {
                source: InstrumentationError::CircularHierarchy(_),
                ..
            }) => {}
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_shadow_mapping_forces_instrumentation() {
        let path = ClassPath::new()
            .with(ClassDefinition::builder("com.example.Widget").build())
            .expect("class path");
        let shadow = ShadowClass::builder::<()>("ShadowWidget").build();
        let map = ShadowMapBuilder::new()
            .add(ShadowMapping::shadow("com.example.Widget", shadow))
            .build()
            .expect("map");
        let loader = loader_with(path, map);

        let widget = loader.load_class("com.example.Widget").expect("load");
        assert!(widget.is_instrumented());
        assert_eq!(widget.shadow_chain().len(), 1);
        assert!(widget.exact_mapping().is_some());
    }

    #[test]
    fn test_resolve_walks_superclasses() {
        let path = ClassPath::new()
            .with(
                ClassDefinition::builder("android.os.Base")
                    .method("describe", &[], TypeDesc::String, |_| Ok("base".into()))
                    .build(),
            )
            .and_then(|p| p.with(ClassDefinition::builder("android.os.Derived").extends("android.os.Base").build()))
            .expect("class path");
        let loader = loader_with(path, ShadowMap::empty());
        let derived = loader.load_class("android.os.Derived").expect("load");

        let resolved = derived
            .resolve("describe", &[], MethodKind::Instance)
            .expect("inherited method");
        assert_eq!(resolved.class.name(), "android.os.Base");
        assert!(derived.resolve("missing", &[], MethodKind::Instance).is_none());
        assert!(derived.static_initializer().is_some());
    }

    #[test]
    fn test_statics_reset() {
        let path = ClassPath::new()
            .with(
                ClassDefinition::builder("android.os.Build")
                    .static_field("FINGERPRINT", TypeDesc::String, Value::from("robolectric"))
                    .build(),
            )
            .expect("class path");
        let loader = loader_with(path, ShadowMap::empty());
        let build = loader.load_class("android.os.Build").expect("load");

        build.initialize_with(|| Ok(())).expect("init");
        assert_eq!(build.get_static_raw("FINGERPRINT"), Some(Value::from("robolectric")));
        assert!(build.set_static_raw("FINGERPRINT", Value::from("test_fingerprint")));
        assert!(!build.set_static_raw("NOPE", Value::Null));

        assert_eq!(loader.reset_statics(), loader.loaded_classes().len());
        assert!(!build.is_initialized());
        build.initialize_with(|| Ok(())).expect("re-init");
        assert_eq!(build.get_static_raw("FINGERPRINT"), Some(Value::from("robolectric")));
    }

    #[test]
    fn test_failed_initializer_is_sticky() {
        let path = ClassPath::new()
            .with(ClassDefinition::builder("android.os.Broken").build())
            .expect("class path");
        let loader = loader_with(path, ShadowMap::empty());
        let broken = loader.load_class("android.os.Broken").expect("load");

        let first = broken.initialize_with(|| Err(crate::throwable::Throwable::runtime("boom").into()));
        assert!(first.is_err());
        let second = broken.initialize_with(|| Ok(()));
        assert!(matches!(second, Err(InvokeError::Shade(_))));
    }
}
