// 异步加载器（android.content.AsyncTaskLoader）
//
// 真实实现把`loadInBackground`交给线程池。影子把它提交到后台调度器，
// 结果再提交到前台调度器交付，测试通过驱动两个调度器观察每一步。

use std::sync::Arc;

use shade_core::{ClassDefinition, ObjectRef, ShadowClass, ShadowMapping, TypeDesc, Value};
use shade_scheduler::{Runnable, Scheduler, Schedulers};

use crate::shadow_of::ShadowType;

pub const ASYNC_TASK_LOADER_CLASS: &str = "android.content.AsyncTaskLoader";

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(ASYNC_TASK_LOADER_CLASS)
        .abstract_class()
        .constructor(&[], |_| Ok(Value::Void))
        .method("forceLoad", &[], TypeDesc::Void, |inv| {
            let this = inv.this()?.clone();
            inv.invoke(&this, "onForceLoad", vec![])
        })
        .method("onForceLoad", &[], TypeDesc::Void, |_| Ok(Value::Void))
        .abstract_method("loadInBackground", &[], TypeDesc::Object)
        .method("deliverResult", &[TypeDesc::Object], TypeDesc::Void, |_| Ok(Value::Void))
        .build();
    vec![class]
}

#[derive(Debug, Default)]
pub struct ShadowAsyncTaskLoader;

impl ShadowType for ShadowAsyncTaskLoader {
    const REAL_CLASS: &'static str = ASYNC_TASK_LOADER_CLASS;
}

fn deliver(loader: ObjectRef, result: Value) -> Runnable {
    Runnable::new(move || {
        if let Err(e) = loader.call("deliverResult", vec![result.clone()]) {
            log::warn!("deliverResult of {} failed: {}", loader, e);
        }
    })
}

fn load(loader: ObjectRef, foreground: Arc<Scheduler>) -> Runnable {
    Runnable::new(move || match loader.call("loadInBackground", vec![]) {
        Ok(result) => foreground.post(deliver(loader.clone(), result)),
        Err(e) => log::warn!("loadInBackground of {} failed: {}", loader, e),
    })
}

pub fn mappings() -> Vec<ShadowMapping> {
    let shadow = ShadowClass::builder::<ShadowAsyncTaskLoader>("ShadowAsyncTaskLoader")
        .method("onForceLoad", |_, inv| {
            let schedulers = inv.service::<Schedulers>()?;
            let loader = inv.this()?.clone();
            log::trace!("{}: loading on the background scheduler", loader);
            schedulers
                .background()
                .post(load(loader, Arc::clone(schedulers.foreground())));
            Ok(Value::Void)
        })
        .build();
    vec![ShadowMapping::shadow(ASYNC_TASK_LOADER_CLASS, shadow)]
}
