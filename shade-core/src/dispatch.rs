// 方法分发引擎（Method Dispatch Engine）
//
// 每次调用被插桩类的方法都进入`Runtime::dispatch`，按以下顺序决定执行什么：
// 拦截器 → 直接路由 → 没有精确映射或直通映射时执行原始方法体 →
// 影子方法（最具体的影子优先）→ 默认调用原始方法体或返回默认值。
// 影子方法抛出的异常原样返回给调用者。

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shade_error::DispatchError;

use crate::class::MethodKind;
use crate::instrument::{InstrumentedClass, MethodSlot, ResolvedMethod, Routing};
use crate::object::ObjectRef;
use crate::runtime::Runtime;
use crate::throwable::{CallResult, InvokeError, Throwable, classes};
use crate::value::Value;

/// 分发统计
#[derive(Debug, Default)]
pub struct DispatchStats {
    calls: AtomicU64,
    shadowed: AtomicU64,
    passthrough: AtomicU64,
    defaulted: AtomicU64,
    intercepted: AtomicU64,
}

/// 分发统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    /// 进入分发的调用总数
    pub calls: u64,
    /// 由影子方法处理的调用
    pub shadowed: u64,
    /// 执行原始方法体的调用
    pub passthrough: u64,
    /// 返回默认值的调用
    pub defaulted: u64,
    /// 由拦截器处理的调用
    pub intercepted: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            shadowed: self.shadowed.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            defaulted: self.defaulted.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// 一次方法调用的上下文
///
/// 原始方法体、影子方法和拦截器都通过它访问接收者、参数、影子状态和运行时。
pub struct Invocation<'a> {
    runtime: &'a Runtime,
    class: &'a Arc<InstrumentedClass>,
    slot: &'a MethodSlot,
    this: Option<ObjectRef>,
    args: Vec<Value>,
}

impl<'a> Invocation<'a> {
    fn new(
        runtime: &'a Runtime,
        class: &'a Arc<InstrumentedClass>,
        slot: &'a MethodSlot,
        this: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            runtime,
            class,
            slot,
            this,
            args,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn sdk(&self) -> i32 {
        self.runtime.sdk()
    }

    /// 声明该方法的类
    pub fn class(&self) -> &Arc<InstrumentedClass> {
        self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn method_name(&self) -> &str {
        self.slot.name()
    }

    pub fn slot(&self) -> &MethodSlot {
        self.slot
    }

    /// 接收者对象
    pub fn this(&self) -> Result<&ObjectRef, InvokeError> {
        self.this.as_ref().ok_or_else(|| {
            DispatchError::MissingReceiver(format!("{}.{}", self.class.name(), self.slot.name())).into()
        })
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Result<&Value, InvokeError> {
        self.args.get(index).ok_or_else(|| self.arg_error(index))
    }

    pub fn arg_bool(&self, index: usize) -> Result<bool, InvokeError> {
        self.arg(index)?.as_bool().ok_or_else(|| self.arg_error(index))
    }

    pub fn arg_int(&self, index: usize) -> Result<i32, InvokeError> {
        self.arg(index)?.as_int().ok_or_else(|| self.arg_error(index))
    }

    pub fn arg_long(&self, index: usize) -> Result<i64, InvokeError> {
        self.arg(index)?.as_long().ok_or_else(|| self.arg_error(index))
    }

    pub fn arg_float(&self, index: usize) -> Result<f32, InvokeError> {
        self.arg(index)?.as_float().ok_or_else(|| self.arg_error(index))
    }

    pub fn arg_double(&self, index: usize) -> Result<f64, InvokeError> {
        self.arg(index)?.as_double().ok_or_else(|| self.arg_error(index))
    }

    /// 字符串参数；`null`抛出`NullPointerException`
    pub fn arg_str(&self, index: usize) -> Result<&str, InvokeError> {
        match self.arg(index)? {
            Value::Str(s) => Ok(s.as_str()),
            Value::Null => Err(self.null_argument(index)),
            _ => Err(self.arg_error(index)),
        }
    }

    pub fn arg_opt_str(&self, index: usize) -> Result<Option<&str>, InvokeError> {
        match self.arg(index)? {
            Value::Str(s) => Ok(Some(s.as_str())),
            Value::Null => Ok(None),
            _ => Err(self.arg_error(index)),
        }
    }

    /// 对象参数；`null`抛出`NullPointerException`
    pub fn arg_object(&self, index: usize) -> Result<ObjectRef, InvokeError> {
        match self.arg(index)? {
            Value::Object(obj) => Ok(obj.clone()),
            Value::Null => Err(self.null_argument(index)),
            _ => Err(self.arg_error(index)),
        }
    }

    pub fn arg_opt_object(&self, index: usize) -> Result<Option<ObjectRef>, InvokeError> {
        match self.arg(index)? {
            Value::Object(obj) => Ok(Some(obj.clone())),
            Value::Null => Ok(None),
            _ => Err(self.arg_error(index)),
        }
    }

    /// 接收者的影子状态
    pub fn shadow<S: Any + Send + Sync>(&self) -> Result<Arc<S>, InvokeError> {
        let this = self.this()?;
        Ok(self.runtime.extract::<S>(this)?)
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, InvokeError> {
        Ok(self.runtime.service::<T>()?)
    }

    /// 每测试状态，测试结束时清除
    pub fn state<T: Any + Send + Sync + Default>(&self) -> Arc<T> {
        self.runtime.state::<T>()
    }

    /// 返回类型的默认值（0、false、null）
    pub fn default_return(&self) -> Value {
        self.slot.return_type().default_value()
    }

    /// 执行被替换的原始方法体
    ///
    /// 没有方法体的native方法在插桩类中返回默认值，在未插桩类中抛出
    /// `UnsatisfiedLinkError`；抽象方法抛出`AbstractMethodError`。
    pub fn call_original(&mut self) -> CallResult {
        if let Some(body) = &self.slot.original {
            let body = Arc::clone(body);
            return body(self);
        }
        let qualified = format!("{}.{}", self.class.name(), self.slot.signature);
        if self.slot.is_abstract {
            return Err(Throwable::abstract_method(qualified).into());
        }
        if self.slot.is_native && !self.class.is_instrumented() {
            return Err(Throwable::new(classes::UNSATISFIED_LINK, qualified).into());
        }
        Ok(self.default_return())
    }

    pub fn invoke(&self, obj: &ObjectRef, name: &str, args: Vec<Value>) -> CallResult {
        self.runtime.invoke(obj, name, args)
    }

    pub fn invoke_static(&self, class_name: &str, name: &str, args: Vec<Value>) -> CallResult {
        self.runtime.invoke_static(class_name, name, args)
    }

    pub fn new_instance(&self, class_name: &str, args: Vec<Value>) -> Result<ObjectRef, InvokeError> {
        self.runtime.new_instance(class_name, args)
    }

    /// 读取接收者的实例字段
    pub fn get_field(&self, name: &str) -> Result<Value, InvokeError> {
        Ok(self.this()?.get_field(name)?)
    }

    pub fn set_field(&self, name: &str, value: Value) -> Result<(), InvokeError> {
        Ok(self.this()?.set_field(name, value)?)
    }

    /// 读取声明类（或其父类）的静态字段
    pub fn get_static(&self, name: &str) -> Result<Value, InvokeError> {
        self.runtime.get_static(self.class.name(), name)
    }

    pub fn set_static(&self, name: &str, value: Value) -> Result<(), InvokeError> {
        self.runtime.set_static(self.class.name(), name, value)
    }

    fn arg_error(&self, index: usize) -> InvokeError {
        DispatchError::ArgumentType(format!("{}.{}", self.class.name(), self.slot.signature), index).into()
    }

    fn null_argument(&self, index: usize) -> InvokeError {
        Throwable::null_pointer(format!(
            "argument {} of {}.{} is null",
            index,
            self.class.name(),
            self.slot.name()
        ))
        .into()
    }
}

impl Runtime {
    /// 分发一次调用
    pub(crate) fn dispatch(
        &self,
        method: &ResolvedMethod,
        this: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> CallResult {
        let class = &method.class;
        let slot = method.slot();
        let stats = self.dispatch_stats();
        DispatchStats::bump(&stats.calls);

        if slot.kind.has_receiver() && this.is_none() {
            return Err(DispatchError::MissingReceiver(format!("{}.{}", class.name(), slot.name())).into());
        }
        let mut inv = Invocation::new(self, class, slot, this, args);

        if let Some(handler) = self.interceptors().get(class.name(), slot.name()) {
            DispatchStats::bump(&stats.intercepted);
            log::trace!("{}.{} intercepted", class.name(), slot.name());
            return handler(&mut inv);
        }

        if slot.routing == Routing::Direct {
            DispatchStats::bump(&stats.passthrough);
            return inv.call_original();
        }

        // Only the exact mapping of the declaring class decides; methods of
        // unshadowed subclasses run their real code.
        let Some(mapping) = class.exact_mapping().filter(|m| !m.is_passthrough()) else {
            DispatchStats::bump(&stats.passthrough);
            return inv.call_original();
        };

        let sdk = self.sdk();
        let replacement = match slot.kind {
            MethodKind::Constructor | MethodKind::StaticInitializer => mapping
                .shadow_class()
                .and_then(|shadow| shadow.find_method(slot, sdk).map(|body| (shadow, body))),
            MethodKind::Instance | MethodKind::Static | MethodKind::Finalizer => class
                .shadow_chain()
                .iter()
                .find_map(|shadow| shadow.find_method(slot, sdk).map(|body| (shadow, body))),
        };

        if let Some((shadow, body)) = replacement {
            DispatchStats::bump(&stats.shadowed);
            log::trace!("{}.{} -> {}", class.name(), slot.name(), shadow.name());
            let body = Arc::clone(body);
            return body(&mut inv);
        }

        let call_through = mapping
            .shadow_class()
            .is_none_or(|shadow| shadow.call_through_by_default());
        if call_through {
            DispatchStats::bump(&stats.passthrough);
            inv.call_original()
        } else {
            DispatchStats::bump(&stats.defaulted);
            Ok(inv.default_return())
        }
    }

    /// 绕过影子直接执行原始方法体
    pub(crate) fn call_direct(
        &self,
        method: &ResolvedMethod,
        this: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> CallResult {
        let slot = method.slot();
        if slot.kind.has_receiver() && this.is_none() {
            return Err(DispatchError::MissingReceiver(format!(
                "{}.{}",
                method.class.name(),
                slot.name()
            ))
            .into());
        }
        let mut inv = Invocation::new(self, &method.class, slot, this, args);
        inv.call_original()
    }
}
