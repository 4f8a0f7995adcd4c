// 属性动画（android.animation.ValueAnimator）
//
// 真实的动画由Choreographer按帧驱动。影子把每一帧作为延迟16ms的任务
// 提交到主线程，每一帧再提交下一帧，直到动画结束；测试通过推进或清空
// 主线程调度器驱动动画。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use shade_core::{ClassDefinition, ObjectRef, ShadowClass, ShadowMapping, Throwable, TypeDesc, Value};
use shade_scheduler::{Runnable, Schedulers, VirtualClock};

use crate::os::SYSTEM_CLOCK_CLASS;
use crate::shadow_of::ShadowType;

pub const VALUE_ANIMATOR_CLASS: &str = "android.animation.ValueAnimator";

/// Interval between animation frames
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Duration of an animator nobody configured
pub const DEFAULT_DURATION_MILLIS: i64 = 300;

fn float_field(value: Value) -> f32 {
    value.as_float().unwrap_or(0.0)
}

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(VALUE_ANIMATOR_CLASS)
        .field_with("mStartValue", TypeDesc::Float, Value::Float(0.0))
        .field_with("mEndValue", TypeDesc::Float, Value::Float(1.0))
        .field_with("mDuration", TypeDesc::Long, Value::Long(DEFAULT_DURATION_MILLIS))
        .field_with("mStartTime", TypeDesc::Long, Value::Long(0))
        .field_with("mFraction", TypeDesc::Float, Value::Float(0.0))
        .field_with("mRunning", TypeDesc::Boolean, Value::Bool(false))
        .constructor(&[], |_| Ok(Value::Void))
        .static_method("ofFloat", &[TypeDesc::Float, TypeDesc::Float], TypeDesc::Object, |inv| {
            let start = inv.arg_float(0)?;
            let end = inv.arg_float(1)?;
            let animator = inv.new_instance(VALUE_ANIMATOR_CLASS, vec![])?;
            animator.set_field("mStartValue", start.into())?;
            animator.set_field("mEndValue", end.into())?;
            Ok(animator.into())
        })
        .method("setDuration", &[TypeDesc::Long], TypeDesc::Object, |inv| {
            let duration = inv.arg_long(0)?;
            if duration < 0 {
                return Err(Throwable::illegal_argument(format!(
                    "Animators cannot have negative duration: {}",
                    duration
                ))
                .into());
            }
            inv.set_field("mDuration", Value::Long(duration))?;
            Ok(inv.this()?.clone().into())
        })
        .method("getDuration", &[], TypeDesc::Long, |inv| inv.get_field("mDuration"))
        .method("start", &[], TypeDesc::Void, |inv| {
            let now = inv.invoke_static(SYSTEM_CLOCK_CLASS, "uptimeMillis", vec![])?;
            inv.set_field("mStartTime", now)?;
            inv.set_field("mFraction", Value::Float(0.0))?;
            inv.set_field("mRunning", Value::Bool(true))?;
            let this = inv.this()?.clone();
            inv.invoke(&this, "postFrameCallback", vec![])
        })
        .native_method("postFrameCallback", &[], TypeDesc::Void)
        .method("doAnimationFrame", &[TypeDesc::Long], TypeDesc::Boolean, |inv| {
            if inv.get_field("mRunning")?.as_bool() != Some(true) {
                return Ok(Value::Bool(true));
            }
            let now = inv.arg_long(0)?;
            let start = inv.get_field("mStartTime")?.as_long().unwrap_or(now);
            let duration = inv.get_field("mDuration")?.as_long().unwrap_or(0);
            let fraction = if duration <= 0 {
                1.0
            } else {
                ((now - start) as f32 / duration as f32).clamp(0.0, 1.0)
            };
            inv.set_field("mFraction", Value::Float(fraction))?;
            if fraction >= 1.0 {
                inv.set_field("mRunning", Value::Bool(false))?;
                return Ok(Value::Bool(true));
            }
            let this = inv.this()?.clone();
            inv.invoke(&this, "postFrameCallback", vec![])?;
            Ok(Value::Bool(false))
        })
        .method("cancel", &[], TypeDesc::Void, |inv| {
            inv.set_field("mRunning", Value::Bool(false))?;
            Ok(Value::Void)
        })
        .method("end", &[], TypeDesc::Void, |inv| {
            inv.set_field("mFraction", Value::Float(1.0))?;
            inv.set_field("mRunning", Value::Bool(false))?;
            Ok(Value::Void)
        })
        .method("isRunning", &[], TypeDesc::Boolean, |inv| inv.get_field("mRunning"))
        .method("getAnimatedFraction", &[], TypeDesc::Float, |inv| inv.get_field("mFraction"))
        .method("getAnimatedValue", &[], TypeDesc::Object, |inv| {
            let start = float_field(inv.get_field("mStartValue")?);
            let end = float_field(inv.get_field("mEndValue")?);
            let fraction = float_field(inv.get_field("mFraction")?);
            Ok(Value::Float(start + (end - start) * fraction))
        })
        .build();
    vec![class]
}

/// Frame scheduling for one animator
#[derive(Debug, Default)]
pub struct ShadowValueAnimator {
    frames: AtomicU64,
}

impl ShadowType for ShadowValueAnimator {
    const REAL_CLASS: &'static str = VALUE_ANIMATOR_CLASS;
}

impl ShadowValueAnimator {
    /// Frames run so far
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    fn frame(animator: ObjectRef, shadow: Arc<ShadowValueAnimator>, clock: Arc<VirtualClock>) -> Runnable {
        Runnable::new(move || {
            shadow.frames.fetch_add(1, Ordering::SeqCst);
            let now = Value::Long(clock.uptime_millis() as i64);
            if let Err(e) = animator.call("doAnimationFrame", vec![now]) {
                log::warn!("Animation frame of {} failed: {}", animator, e);
            }
        })
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowValueAnimator>("ShadowValueAnimator")
            .method("postFrameCallback", |_, inv| {
                let schedulers = inv.service::<Schedulers>()?;
                let frame = Self::frame(
                    inv.this()?.clone(),
                    inv.shadow::<ShadowValueAnimator>()?,
                    Arc::clone(schedulers.clock()),
                );
                schedulers.main_handler().post_delayed(frame, FRAME_INTERVAL);
                Ok(Value::Void)
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(VALUE_ANIMATOR_CLASS, ShadowValueAnimator::shadow_class())]
}
