//! shade核心库
//!
//! 在宿主进程内模拟框架类：类插桩、影子注册表、对象影子表与方法分发。
//!
//! A [`Runtime`] loads [`ClassDefinition`]s from a [`ClassPath`] through an
//! instrumenting class loader. Calls on instrumented classes go through the
//! dispatch engine, which picks the shadow method, the original body or a
//! default return value per call.

pub mod api;
pub mod class;
pub mod dispatch;
pub mod extensions;
pub mod instrument;
pub mod object;
pub mod parcel;
pub mod reflector;
pub mod runtime;
pub mod shadow;
pub mod throwable;
pub mod value;

// 重新导出主要类型
pub use api::ApiRange;
pub use class::{ClassDefinition, ClassDefinitionBuilder, ClassPath, MethodKind, MethodSignature};
pub use dispatch::{DispatchStatsSnapshot, Invocation};
pub use extensions::Extensions;
pub use instrument::{
    InstrumentationConfiguration, InstrumentedClass, InstrumentingClassLoader, Interceptors,
};
pub use object::{ObjectId, ObjectRef, WeakObjectRef};
pub use parcel::Parcel;
pub use reflector::Reflector;
pub use runtime::{Runtime, RuntimeBuilder};
pub use shadow::{
    DefaultShadow, ShadowClass, ShadowClassBuilder, ShadowMap, ShadowMapBuilder, ShadowMapping,
    ShadowProvider, ShadowRecord,
};
pub use throwable::{CallResult, InvokeError, Throwable, classes};
pub use value::{TypeDesc, Value};
