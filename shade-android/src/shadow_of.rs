// 类型化影子访问（Typed shadow access）
//
// 每个影子状态类型声明它所替换的真实类，`shadow_of`据此先检查对象的类型，
// 再从对象影子表中取出影子状态。

use std::any::{Any, type_name};
use std::sync::Arc;

use shade_core::ObjectRef;
use shade_error::{DispatchError, ShadeResult};

/// Shadow state bound to one real framework class
pub trait ShadowType: Any + Send + Sync {
    /// Fully qualified name of the shadowed class
    const REAL_CLASS: &'static str;
}

/// The shadow of `obj`, typed
///
/// `obj` must be an instance of `S::REAL_CLASS` (or a subclass); the same
/// shadow instance is returned on every call for the lifetime of the
/// object's sandbox.
pub fn shadow_of<S: ShadowType>(obj: &ObjectRef) -> ShadeResult<Arc<S>> {
    if !obj.is_instance_of(S::REAL_CLASS) {
        return Err(DispatchError::ShadowTypeMismatch(obj.to_string(), type_name::<S>().to_string()).into());
    }
    obj.runtime()?.extract::<S>(obj)
}
