// 应用组件（android.app）
//
// `ContextImpl.startService`：影子记录每一次启动请求并把启动回调提交到
// 主线程，可以在任意线程上并发调用。
// `QueuedWork`：进程级的待写入工作队列，全部状态都在静态字段里，
// 影子的重置器在每个测试结束时清空它。

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shade_core::{ClassDefinition, InvokeError, Runtime, ShadowClass, ShadowMapping, TypeDesc, Value};
use shade_scheduler::{Runnable, Schedulers};

use crate::shadow_of::ShadowType;

pub const CONTEXT_IMPL_CLASS: &str = "android.app.ContextImpl";
pub const QUEUED_WORK_CLASS: &str = "android.app.QueuedWork";

pub fn definitions() -> Vec<ClassDefinition> {
    let context = ClassDefinition::builder(CONTEXT_IMPL_CLASS)
        .constructor(&[], |_| Ok(Value::Void))
        .native_method("startService", &[TypeDesc::String], TypeDesc::String)
        .native_method("stopService", &[TypeDesc::String], TypeDesc::Boolean)
        .build();

    let queued_work = ClassDefinition::builder(QUEUED_WORK_CLASS)
        .static_field("sWork", TypeDesc::Array, Value::Array(Vec::new()))
        .static_field("sFinishers", TypeDesc::Array, Value::Array(Vec::new()))
        .static_field("sCanDelay", TypeDesc::Boolean, Value::Bool(true))
        .static_method("queue", &[TypeDesc::String, TypeDesc::Boolean], TypeDesc::Void, |inv| {
            let work = inv.arg_str(0)?.to_string();
            let should_delay = inv.arg_bool(1)?;
            append(inv.runtime(), "sWork", work.into())?;
            if !should_delay {
                inv.set_static("sCanDelay", Value::Bool(false))?;
            }
            Ok(Value::Void)
        })
        .static_method("addFinisher", &[TypeDesc::String], TypeDesc::Void, |inv| {
            let finisher = inv.arg_str(0)?.to_string();
            append(inv.runtime(), "sFinishers", finisher.into())?;
            Ok(Value::Void)
        })
        .static_method("removeFinisher", &[TypeDesc::String], TypeDesc::Void, |inv| {
            let finisher = inv.arg(0)?.clone();
            let mut finishers = static_array(inv.runtime(), "sFinishers")?;
            if let Some(index) = finishers.iter().position(|f| *f == finisher) {
                finishers.remove(index);
            }
            inv.set_static("sFinishers", Value::Array(finishers))?;
            Ok(Value::Void)
        })
        .static_method("hasPendingWork", &[], TypeDesc::Boolean, |inv| {
            Ok(Value::Bool(!static_array(inv.runtime(), "sWork")?.is_empty()))
        })
        .static_method("waitToFinish", &[], TypeDesc::Void, |inv| {
            inv.set_static("sWork", Value::Array(Vec::new()))?;
            inv.set_static("sCanDelay", Value::Bool(true))?;
            Ok(Value::Void)
        })
        .build();

    vec![context, queued_work]
}

fn static_array(rt: &Runtime, field: &str) -> Result<Vec<Value>, InvokeError> {
    let value = rt.get_static(QUEUED_WORK_CLASS, field)?;
    Ok(value.as_array().map(<[Value]>::to_vec).unwrap_or_default())
}

fn append(rt: &Runtime, field: &str, item: Value) -> Result<(), InvokeError> {
    let mut items = static_array(rt, field)?;
    items.push(item);
    rt.set_static(QUEUED_WORK_CLASS, field, Value::Array(items))
}

/// Services started in the current test
#[derive(Debug, Default)]
pub struct StartedServices {
    started: Mutex<VecDeque<String>>,
    stopped: Mutex<Vec<String>>,
    delivered: AtomicU64,
}

impl StartedServices {
    /// Every `startService` call not yet consumed, oldest first
    pub fn all(&self) -> Vec<String> {
        self.started.lock().iter().cloned().collect()
    }

    /// Consume the oldest `startService` call
    pub fn next(&self) -> Option<String> {
        self.started.lock().pop_front()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }

    /// Start callbacks that ran on the main looper
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ShadowContextImpl;

impl ShadowType for ShadowContextImpl {
    const REAL_CLASS: &'static str = CONTEXT_IMPL_CLASS;
}

impl ShadowContextImpl {
    /// The services started in the current test of `rt`
    pub fn started_services(rt: &Runtime) -> Arc<StartedServices> {
        rt.state::<StartedServices>()
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowContextImpl>("ShadowContextImpl")
            .method("startService", |_, inv| {
                let service = inv.arg_str(0)?.to_string();
                let record = inv.state::<StartedServices>();
                record.started.lock().push_back(service.clone());

                let schedulers = inv.service::<Schedulers>()?;
                let delivered = Arc::clone(&record);
                schedulers.main_handler().post(Runnable::new(move || {
                    delivered.delivered.fetch_add(1, Ordering::SeqCst);
                }));
                Ok(service.into())
            })
            .method("stopService", |_, inv| {
                let service = inv.arg_str(0)?.to_string();
                let record = inv.state::<StartedServices>();
                let was_started = record.started.lock().contains(&service);
                record.stopped.lock().push(service);
                Ok(Value::Bool(was_started))
            })
            .build()
    }
}

#[derive(Debug, Default)]
pub struct ShadowQueuedWork;

impl ShadowQueuedWork {
    /// Drop all queued work and finishers
    pub fn reset(rt: &Runtime) -> Result<(), InvokeError> {
        let statics = rt.static_reflector(QUEUED_WORK_CLASS)?;
        statics.set_static("sWork", Value::Array(Vec::new()))?;
        statics.set_static("sFinishers", Value::Array(Vec::new()))?;
        statics.set_static("sCanDelay", Value::Bool(true))?;
        Ok(())
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowQueuedWork>("ShadowQueuedWork")
            .resetter(ShadowQueuedWork::reset)
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![
        ShadowMapping::shadow(CONTEXT_IMPL_CLASS, ShadowContextImpl::shadow_class()),
        ShadowMapping::shadow(QUEUED_WORK_CLASS, ShadowQueuedWork::shadow_class()),
    ]
}
