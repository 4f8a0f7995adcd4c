// 系统时钟（android.os.SystemClock）
//
// 所有方法都是native方法，影子从沙箱的虚拟时钟读取时间。
// `sleep`经由调度器集合推进时钟，Legacy模式下同时执行主Looper到期的任务。

use std::sync::Arc;
use std::time::Duration;

use shade_core::{ClassDefinition, Invocation, InvokeError, ShadowClass, ShadowMapping, TypeDesc, Value};
use shade_scheduler::{Schedulers, VirtualClock};

pub const SYSTEM_CLOCK_CLASS: &str = "android.os.SystemClock";

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(SYSTEM_CLOCK_CLASS)
        .native_static_method("uptimeMillis", &[], TypeDesc::Long)
        .native_static_method("elapsedRealtime", &[], TypeDesc::Long)
        .native_static_method("elapsedRealtimeNanos", &[], TypeDesc::Long)
        .native_static_method("currentThreadTimeMillis", &[], TypeDesc::Long)
        .native_static_method("currentTimeMillis", &[], TypeDesc::Long)
        .native_static_method("setCurrentTimeMillis", &[TypeDesc::Long], TypeDesc::Boolean)
        .native_static_method("sleep", &[TypeDesc::Long], TypeDesc::Void)
        .build();
    vec![class]
}

fn clock(inv: &Invocation<'_>) -> Result<Arc<VirtualClock>, InvokeError> {
    inv.service::<VirtualClock>()
}

fn millis(value: u64) -> Value {
    Value::Long(i64::try_from(value).unwrap_or(i64::MAX))
}

fn nanos(value: u64) -> Value {
    Value::Long(i64::try_from(value).unwrap_or(i64::MAX))
}

/// `SystemClock` backed by the virtual clock
#[derive(Debug, Default)]
pub struct ShadowSystemClock;

impl ShadowSystemClock {
    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowSystemClock>("ShadowSystemClock")
            .static_method("uptimeMillis", |inv| Ok(millis(clock(inv)?.uptime_millis())))
            .static_method("elapsedRealtime", |inv| Ok(millis(clock(inv)?.elapsed_realtime())))
            .static_method("elapsedRealtimeNanos", |inv| Ok(nanos(clock(inv)?.nano_time())))
            .static_method("currentThreadTimeMillis", |inv| Ok(millis(clock(inv)?.uptime_millis())))
            .static_method("currentTimeMillis", |inv| Ok(millis(clock(inv)?.current_time_millis())))
            .static_method("setCurrentTimeMillis", |inv| {
                let target = inv.arg_long(0)?;
                if target < 0 {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(clock(inv)?.set_current_time_millis(target as u64)))
            })
            .static_method("sleep", |inv| {
                let ms = inv.arg_long(0)?;
                if ms > 0 {
                    inv.service::<Schedulers>()?.sleep(Duration::from_millis(ms as u64));
                }
                Ok(Value::Void)
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(SYSTEM_CLOCK_CLASS, ShadowSystemClock::shadow_class())]
}
