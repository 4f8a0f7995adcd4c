// 运行时（Runtime）
//
// 一个运行时对应一个沙箱代（generation）：插桩类加载器、影子注册表、
// 对象影子表、拦截器以及服务/状态扩展。测试结束时调用`reset()`
// 清除对象影子、静态字段和每测试状态，但保留已加载的类。

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use shade_common::utils::IdGenerator;
use shade_error::{ConfigError, DispatchError, ShadeError, ShadeResult};

use crate::class::{CONSTRUCTOR, ClassPath, FINALIZER, MethodKind};
use crate::dispatch::{DispatchStats, DispatchStatsSnapshot, Invocation};
use crate::extensions::Extensions;
use crate::instrument::{
    InstrumentationConfiguration, InstrumentedClass, InstrumentingClassLoader, Interceptors,
};
use crate::object::{ObjectId, ObjectRef};
use crate::reflector::Reflector;
use crate::shadow::{ObjectShadowMap, ShadowFacet, ShadowMap, ShadowRecord};
use crate::throwable::{CallResult, InvokeError};
use crate::value::Value;

pub(crate) struct RuntimeInner {
    loader: InstrumentingClassLoader,
    objects: ObjectShadowMap,
    interceptors: Interceptors,
    services: Extensions,
    state: Extensions,
    object_ids: IdGenerator,
    stats: DispatchStats,
}

/// Handle to one sandbox generation
///
/// Cheap to clone; all clones share the same classes, shadows and state.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// Builder for [`Runtime`]
pub struct RuntimeBuilder {
    class_path: Arc<ClassPath>,
    shadow_map: Arc<ShadowMap>,
    instrumentation: InstrumentationConfiguration,
    sdk: i32,
    interceptors: Interceptors,
    services: Extensions,
}

impl RuntimeBuilder {
    pub fn sdk(mut self, sdk: i32) -> Self {
        self.sdk = sdk;
        self
    }

    pub fn shadow_map(mut self, shadow_map: impl Into<Arc<ShadowMap>>) -> Self {
        self.shadow_map = shadow_map.into();
        self
    }

    pub fn instrumentation(mut self, config: InstrumentationConfiguration) -> Self {
        self.instrumentation = config;
        self
    }

    pub fn interceptor<F>(mut self, class_name: &str, method: &str, handler: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.interceptors.add(class_name, method, handler);
        self
    }

    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn service<T: Any + Send + Sync>(self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Create the runtime
    ///
    /// Every shadow mapping that applies at the configured SDK must name a
    /// loadable class; otherwise this fails with
    /// [`ConfigError::MissingShadowTarget`].
    pub fn build(self) -> ShadeResult<Runtime> {
        let mut instrumentation = self.instrumentation.to_builder();
        for package in self.shadow_map.instrumented_packages() {
            instrumentation = instrumentation.add_instrumented_package(package);
        }

        let loader = InstrumentingClassLoader::new(
            self.class_path,
            instrumentation.build(),
            Arc::clone(&self.shadow_map),
            self.sdk,
        );

        for mapping in self.shadow_map.mappings().filter(|m| m.applies_to(self.sdk)) {
            if let Err(e) = loader.load_class(mapping.real_class()) {
                log::error!(
                    "Shadow {} targets {} which cannot be loaded at SDK {}: {}",
                    mapping.shadow_name(),
                    mapping.real_class(),
                    self.sdk,
                    e
                );
                return Err(ConfigError::MissingShadowTarget(
                    mapping.real_class().to_string(),
                    self.sdk,
                )
                .into());
            }
        }

        log::info!(
            "Runtime ready: SDK {}, generation {}, {} shadowed classes, {} interceptors",
            self.sdk,
            loader.generation(),
            self.shadow_map.len(),
            self.interceptors.len()
        );

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                loader,
                objects: ObjectShadowMap::new(),
                interceptors: self.interceptors,
                services: self.services,
                state: Extensions::new(),
                object_ids: IdGenerator::default(),
                stats: DispatchStats::default(),
            }),
        })
    }
}

impl Runtime {
    pub fn builder(class_path: impl Into<Arc<ClassPath>>) -> RuntimeBuilder {
        RuntimeBuilder {
            class_path: class_path.into(),
            shadow_map: Arc::new(ShadowMap::empty()),
            instrumentation: InstrumentationConfiguration::android_default(),
            sdk: shade_common::DEFAULT_SDK,
            interceptors: Interceptors::new(),
            services: Extensions::new(),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn sdk(&self) -> i32 {
        self.inner.loader.sdk()
    }

    pub fn generation(&self) -> u64 {
        self.inner.loader.generation()
    }

    pub fn loader(&self) -> &InstrumentingClassLoader {
        &self.inner.loader
    }

    pub fn shadow_map(&self) -> &Arc<ShadowMap> {
        self.inner.loader.shadow_map()
    }

    pub(crate) fn dispatch_stats(&self) -> &DispatchStats {
        &self.inner.stats
    }

    pub(crate) fn interceptors(&self) -> &Interceptors {
        &self.inner.interceptors
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn load_class(&self, name: &str) -> ShadeResult<Arc<InstrumentedClass>> {
        self.inner.loader.load_class(name)
    }

    /// Install a long-lived service, replacing any of the same type
    pub fn register_service<T: Any + Send + Sync>(&self, service: Arc<T>) {
        self.inner.services.insert(service);
    }

    pub fn service<T: Any + Send + Sync>(&self) -> ShadeResult<Arc<T>> {
        self.inner
            .services
            .get::<T>()
            .ok_or_else(|| DispatchError::MissingService(type_name::<T>().to_string()).into())
    }

    /// The service of type `T`, installing `T::default()` on first use
    ///
    /// Like every service it survives [`reset`](Self::reset), so it lives
    /// exactly as long as the runtime generation.
    pub fn service_or_default<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        self.inner.services.get_or_default::<T>()
    }

    /// Per-test state of type `T`, cleared by [`reset`](Self::reset)
    pub fn state<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        self.inner.state.get_or_default::<T>()
    }

    /// The shadow record of `obj`, created on first request
    pub fn shadow_of(&self, obj: &ObjectRef) -> Arc<ShadowRecord> {
        self.inner
            .objects
            .get_or_create(obj.id(), || Self::create_record(obj.class()))
    }

    /// The shadow state of type `S` attached to `obj`
    pub fn extract<S: Any + Send + Sync>(&self, obj: &ObjectRef) -> ShadeResult<Arc<S>> {
        self.shadow_of(obj).get::<S>().ok_or_else(|| {
            DispatchError::ShadowTypeMismatch(obj.to_string(), type_name::<S>().to_string()).into()
        })
    }

    /// Construct `class_name` through its constructor matching `args`
    ///
    /// The shadow is attached before any constructor runs, so shadow
    /// constructors see their own state. No-arg constructors of the
    /// superclasses run first, root first.
    pub fn new_instance(&self, class_name: &str, args: Vec<Value>) -> Result<ObjectRef, InvokeError> {
        let class = self.load_class(class_name)?;
        if class.is_abstract() {
            return Err(DispatchError::AbstractInstantiation(class_name.to_string()).into());
        }
        self.ensure_initialized(&class)?;
        let constructor = class.find_constructor(&args).ok_or_else(|| {
            DispatchError::NoSuchMethod(class_name.to_string(), CONSTRUCTOR.to_string())
        })?;

        let obj = self.allocate(&class);
        let mut ancestors: Vec<&Arc<InstrumentedClass>> =
            std::iter::successors(class.superclass(), |c| c.superclass()).collect();
        ancestors.reverse();
        for ancestor in ancestors {
            if let Some(super_constructor) = ancestor.find_constructor(&[]) {
                self.dispatch(&super_constructor, Some(obj.clone()), Vec::new())?;
            }
        }
        self.dispatch(&constructor, Some(obj.clone()), args)?;
        Ok(obj)
    }

    /// Allocate `class_name` without running any constructor
    pub fn new_instance_of(&self, class_name: &str) -> Result<ObjectRef, InvokeError> {
        let class = self.load_class(class_name)?;
        if class.is_abstract() {
            return Err(DispatchError::AbstractInstantiation(class_name.to_string()).into());
        }
        self.ensure_initialized(&class)?;
        Ok(self.allocate(&class))
    }

    /// Call instance method `name` on `obj`
    pub fn invoke(&self, obj: &ObjectRef, name: &str, args: Vec<Value>) -> CallResult {
        let class = obj.class();
        self.ensure_initialized(class)?;
        let method = class
            .resolve(name, &args, MethodKind::Instance)
            .ok_or_else(|| DispatchError::NoSuchMethod(class.name().to_string(), name.to_string()))?;
        self.dispatch(&method, Some(obj.clone()), args)
    }

    /// Call static method `class_name.name`
    pub fn invoke_static(&self, class_name: &str, name: &str, args: Vec<Value>) -> CallResult {
        let class = self.load_class(class_name)?;
        let method = class
            .resolve(name, &args, MethodKind::Static)
            .ok_or_else(|| DispatchError::NoSuchMethod(class_name.to_string(), name.to_string()))?;
        self.ensure_initialized(&method.class)?;
        self.dispatch(&method, None, args)
    }

    pub fn get_static(&self, class_name: &str, field: &str) -> Result<Value, InvokeError> {
        let owner = self.static_owner(class_name, field)?;
        self.ensure_initialized(&owner)?;
        owner.get_static_raw(field).ok_or_else(|| {
            DispatchError::NoSuchField(class_name.to_string(), field.to_string()).into()
        })
    }

    pub fn set_static(&self, class_name: &str, field: &str, value: Value) -> Result<(), InvokeError> {
        let owner = self.static_owner(class_name, field)?;
        self.ensure_initialized(&owner)?;
        if owner.set_static_raw(field, value) {
            Ok(())
        } else {
            Err(DispatchError::NoSuchField(class_name.to_string(), field.to_string()).into())
        }
    }

    /// Run the finalizer of `obj` and drop its shadow record
    pub fn finalize(&self, obj: &ObjectRef) -> CallResult {
        let class = obj.class();
        let method = class
            .resolve(FINALIZER, &[], MethodKind::Finalizer)
            .ok_or_else(|| DispatchError::NoSuchMethod(class.name().to_string(), FINALIZER.to_string()))?;
        let result = self.dispatch(&method, Some(obj.clone()), Vec::new());
        self.inner.objects.remove(obj.id());
        result
    }

    /// Direct access to the original behaviour of `obj`
    pub fn reflector(&self, obj: &ObjectRef) -> Reflector {
        Reflector::new(self.clone(), Arc::clone(obj.class()), Some(obj.clone()))
    }

    /// Direct access to `obj` as an instance of its ancestor `class_name`
    pub fn reflector_as(&self, obj: &ObjectRef, class_name: &str) -> ShadeResult<Reflector> {
        let class = obj
            .class()
            .lineage()
            .find(|c| c.name() == class_name)
            .map(|c| c.name().to_string())
            .ok_or_else(|| {
                DispatchError::ShadowTypeMismatch(obj.to_string(), class_name.to_string())
            })?;
        let class = self.load_class(&class)?;
        Ok(Reflector::new(self.clone(), class, Some(obj.clone())))
    }

    /// Direct access to the static members of `class_name`
    pub fn static_reflector(&self, class_name: &str) -> ShadeResult<Reflector> {
        let class = self.load_class(class_name)?;
        Ok(Reflector::new(self.clone(), class, None))
    }

    /// End-of-test reset
    ///
    /// Runs shadow resetters in shadow name order, drops every object's
    /// shadow record, re-arms static initialisation and clears per-test
    /// state. Every resetter runs even if an earlier one fails; the first
    /// failure is returned.
    pub fn reset(&self) -> ShadeResult<()> {
        let mut first_error: Option<ShadeError> = None;
        for shadow in self.shadow_map().resetters(self.sdk()) {
            let Some(resetter) = shadow.resetter() else {
                continue;
            };
            if let Err(e) = resetter(self) {
                log::warn!("Resetter of {} failed: {}", shadow.name(), e);
                if first_error.is_none() {
                    first_error = Some(match e {
                        InvokeError::Shade(err) => err,
                        InvokeError::Thrown(t) => {
                            ShadeError::generic(format!("resetter of {} threw {}", shadow.name(), t))
                        }
                    });
                }
            }
        }

        let objects = self.inner.objects.len();
        self.inner.objects.clear();
        let classes = self.inner.loader.reset_statics();
        self.inner.state.clear();
        log::debug!(
            "Runtime generation {} reset: {} shadowed objects dropped, {} classes re-armed",
            self.generation(),
            objects,
            classes
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of objects with a shadow record
    pub fn shadowed_object_count(&self) -> usize {
        self.inner.objects.len()
    }

    /// Initialise `class` and its superclasses if needed
    pub(crate) fn ensure_initialized(&self, class: &Arc<InstrumentedClass>) -> Result<(), InvokeError> {
        if class.is_initialized() {
            return Ok(());
        }
        if let Some(parent) = class.superclass() {
            self.ensure_initialized(parent)?;
        }
        class.initialize_with(|| {
            let clinit = class.static_initializer().ok_or_else(|| {
                DispatchError::NoSuchMethod(
                    class.name().to_string(),
                    crate::class::STATIC_INITIALIZER.to_string(),
                )
            })?;
            self.dispatch(&clinit, None, Vec::new()).map(|_| ())
        })
    }

    fn static_owner(&self, class_name: &str, field: &str) -> Result<Arc<InstrumentedClass>, InvokeError> {
        let class = self.load_class(class_name)?;
        class.static_owner(field).ok_or_else(|| {
            DispatchError::NoSuchField(class_name.to_string(), field.to_string()).into()
        })
    }

    fn allocate(&self, class: &Arc<InstrumentedClass>) -> ObjectRef {
        let id = ObjectId::new(self.inner.object_ids.next_id());
        let obj = ObjectRef::new(id, Arc::clone(class), self.downgrade());
        self.shadow_of(&obj);
        obj
    }

    fn create_record(class: &InstrumentedClass) -> ShadowRecord {
        let facets = class
            .shadow_chain()
            .iter()
            .map(|shadow| ShadowFacet::new(shadow.name(), shadow.new_instance()))
            .collect();
        ShadowRecord::new(class.name(), facets)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("sdk", &self.sdk())
            .field("generation", &self.generation())
            .field("objects", &self.inner.objects)
            .field("interceptors", &self.inner.interceptors)
            .finish()
    }
}
