//! Shadow classes
//!
//! A [`ShadowClass`] describes substitute behaviour for one framework class:
//! how to create the per-object shadow state and which methods, constructors
//! and static initializers it replaces. Shadow method bodies receive the
//! same [`Invocation`] as original bodies and can call through to them.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::api::ApiRange;
use crate::class::{MethodBody, MethodKind};
use crate::dispatch::Invocation;
use crate::instrument::MethodSlot;
use crate::runtime::Runtime;
use crate::throwable::{CallResult, InvokeError};
use crate::value::TypeDesc;

/// Per-object shadow state
pub type ShadowInstance = Arc<dyn Any + Send + Sync>;

/// Creates fresh shadow state for a new object
pub type ShadowFactory = Arc<dyn Fn() -> ShadowInstance + Send + Sync>;

/// Clears static shadow state at the end of a test
pub type Resetter = Arc<dyn Fn(&Runtime) -> Result<(), InvokeError> + Send + Sync>;

/// One replacement method
#[derive(Clone)]
pub struct ShadowMethod {
    name: String,
    params: Option<Vec<TypeDesc>>,
    api_range: ApiRange,
    body: MethodBody,
}

impl ShadowMethod {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_range(&self) -> ApiRange {
        self.api_range
    }

    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Whether this method replaces `slot` at `sdk`. Without declared
    /// parameter types every overload of the name is replaced.
    pub fn matches(&self, slot: &MethodSlot, sdk: i32) -> bool {
        self.name == slot.name()
            && self.api_range.contains(sdk)
            && self
                .params
                .as_ref()
                .is_none_or(|params| params == &slot.signature.params)
    }
}

impl fmt::Debug for ShadowMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("api_range", &self.api_range.to_string())
            .finish()
    }
}

/// Substitute behaviour for a framework class
pub struct ShadowClass {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    factory: ShadowFactory,
    methods: Vec<ShadowMethod>,
    static_methods: Vec<ShadowMethod>,
    constructors: Vec<ShadowMethod>,
    static_initializer: Option<MethodBody>,
    resetter: Option<Resetter>,
    call_through_by_default: bool,
}

impl ShadowClass {
    /// Builder for a shadow whose state starts as `S::default()`
    pub fn builder<S>(name: impl Into<String>) -> ShadowClassBuilder<S>
    where
        S: Any + Send + Sync + Default,
    {
        ShadowClassBuilder::new(name.into(), Arc::new(|| Arc::new(S::default()) as ShadowInstance))
    }

    /// Builder for a shadow whose state is made by `factory`
    pub fn builder_with<S, F>(name: impl Into<String>, factory: F) -> ShadowClassBuilder<S>
    where
        S: Any + Send + Sync,
        F: Fn() -> S + Send + Sync + 'static,
    {
        ShadowClassBuilder::new(
            name.into(),
            Arc::new(move || Arc::new(factory()) as ShadowInstance),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type of the state produced by [`new_instance`](Self::new_instance)
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn new_instance(&self) -> ShadowInstance {
        (self.factory)()
    }

    pub fn call_through_by_default(&self) -> bool {
        self.call_through_by_default
    }

    pub fn resetter(&self) -> Option<&Resetter> {
        self.resetter.as_ref()
    }

    /// Replacement for `slot` at `sdk`, if this shadow provides one
    pub fn find_method(&self, slot: &MethodSlot, sdk: i32) -> Option<&MethodBody> {
        let candidates = match slot.kind {
            MethodKind::Instance | MethodKind::Finalizer => &self.methods,
            MethodKind::Static => &self.static_methods,
            MethodKind::Constructor => &self.constructors,
            MethodKind::StaticInitializer => return self.static_initializer.as_ref(),
        };
        candidates
            .iter()
            .find(|method| method.matches(slot, sdk))
            .map(ShadowMethod::body)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods
            .iter()
            .chain(&self.static_methods)
            .map(ShadowMethod::name)
    }
}

impl fmt::Debug for ShadowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowClass")
            .field("name", &self.name)
            .field("state", &self.type_name)
            .field("methods", &self.methods)
            .field("static_methods", &self.static_methods)
            .field("constructors", &self.constructors.len())
            .field("static_initializer", &self.static_initializer.is_some())
            .field("resetter", &self.resetter.is_some())
            .field("call_through_by_default", &self.call_through_by_default)
            .finish()
    }
}

/// Typed builder for [`ShadowClass`]
///
/// Instance method bodies get the object's shadow state as `&S`.
pub struct ShadowClassBuilder<S> {
    class: ShadowClass,
    _state: PhantomData<fn() -> S>,
}

impl<S> ShadowClassBuilder<S>
where
    S: Any + Send + Sync,
{
    fn new(name: String, factory: ShadowFactory) -> Self {
        Self {
            class: ShadowClass {
                name,
                type_id: TypeId::of::<S>(),
                type_name: std::any::type_name::<S>(),
                factory,
                methods: Vec::new(),
                static_methods: Vec::new(),
                constructors: Vec::new(),
                static_initializer: None,
                resetter: None,
                call_through_by_default: true,
            },
            _state: PhantomData,
        }
    }

    fn typed<F>(f: F) -> MethodBody
    where
        F: Fn(&S, &mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        Arc::new(move |inv: &mut Invocation<'_>| {
            let shadow = inv.shadow::<S>()?;
            f(&shadow, inv)
        })
    }

    fn entry(name: &str, params: Option<&[TypeDesc]>, api_range: ApiRange, body: MethodBody) -> ShadowMethod {
        ShadowMethod {
            name: name.to_string(),
            params: params.map(<[TypeDesc]>::to_vec),
            api_range,
            body,
        }
    }

    /// Replace every overload of instance method `name`
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&S, &mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        let method = Self::entry(name, None, ApiRange::ALL, Self::typed(f));
        self.class.methods.push(method);
        self
    }

    /// Replace the overload of `name` taking exactly `params`
    pub fn method_with_params<F>(mut self, name: &str, params: &[TypeDesc], f: F) -> Self
    where
        F: Fn(&S, &mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        let method = Self::entry(name, Some(params), ApiRange::ALL, Self::typed(f));
        self.class.methods.push(method);
        self
    }

    /// Replace `name` only on SDK levels inside `range`
    pub fn method_in<F>(mut self, name: &str, range: ApiRange, f: F) -> Self
    where
        F: Fn(&S, &mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        let method = Self::entry(name, None, range, Self::typed(f));
        self.class.methods.push(method);
        self
    }

    pub fn static_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.static_method_in(name, ApiRange::ALL, f)
    }

    pub fn static_method_in<F>(mut self, name: &str, range: ApiRange, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        let method = Self::entry(name, None, range, Arc::new(f));
        self.class.static_methods.push(method);
        self
    }

    /// Runs instead of the real constructor; the shadow is already attached
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn(&S, &mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        let method = Self::entry(
            crate::class::CONSTRUCTOR,
            None,
            ApiRange::ALL,
            Self::typed(f),
        );
        self.class.constructors.push(method);
        self
    }

    /// Runs instead of the class static initializer
    pub fn static_initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.class.static_initializer = Some(Arc::new(f));
        self
    }

    pub fn resetter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Runtime) -> Result<(), InvokeError> + Send + Sync + 'static,
    {
        self.class.resetter = Some(Arc::new(f));
        self
    }

    /// When false, methods without a replacement return the default value
    /// of their type instead of running the original body
    pub fn call_through_by_default(mut self, call_through: bool) -> Self {
        self.class.call_through_by_default = call_through;
        self
    }

    pub fn build(self) -> Arc<ShadowClass> {
        Arc::new(self.class)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiRange, MethodKind, MethodSlot, ShadowClass, TypeDesc, TypeId};
    use crate::value::Value;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ShadowCounter {
        hits: Mutex<u32>,
    }

    #[test]
    fn test_builder_records_methods() {
        let shadow = ShadowClass::builder::<ShadowCounter>("ShadowCounter")
            .method("hit", |state, _| {
                *state.hits.lock() += 1;
                Ok(Value::Void)
            })
            .method_in("newer", ApiRange::since(30), |_, _| Ok(Value::Int(1)))
            .static_method("create", |_| Ok(Value::Null))
            .call_through_by_default(false)
            .build();

        assert_eq!(shadow.name(), "ShadowCounter");
        assert_eq!(shadow.type_id(), TypeId::of::<ShadowCounter>());
        assert!(!shadow.call_through_by_default());
        let names: Vec<&str> = shadow.method_names().collect();
        assert_eq!(names, vec!["hit", "newer", "create"]);
    }

    #[test]
    fn test_new_instance_uses_factory() {
        let shadow = ShadowClass::builder_with("ShadowCounter", || ShadowCounter {
            hits: Mutex::new(7),
        })
        .build();
        let instance = shadow.new_instance();
        let state = instance.downcast_ref::<ShadowCounter>().expect("state type");
        assert_eq!(*state.hits.lock(), 7);
    }

    #[test]
    fn test_method_api_range() {
        let shadow = ShadowClass::builder::<()>("ShadowThing")
            .method_in("getThing", ApiRange::since(30), |_, _| Ok(Value::Int(1)))
            .build();
        let slot = MethodSlot {
            signature: crate::class::MethodSignature::new("getThing", &[], TypeDesc::Int),
            kind: MethodKind::Instance,
            is_native: false,
            is_abstract: false,
            routing: crate::instrument::Routing::Intercepted,
            original: None,
        };
        assert!(shadow.find_method(&slot, 30).is_some());
        assert!(shadow.find_method(&slot, 29).is_none());
    }
}
