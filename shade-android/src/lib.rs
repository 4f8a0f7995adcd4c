//! shade安卓框架夹具
//!
//! 一小组直接针对shade核心编写的框架类及其影子。
//!
//! Each module defines the real classes of one framework area
//! ([`ClassDefinition`]s) and the shadows that replace their native or
//! device-dependent parts. [`AndroidShadows`] registers all of the shadows
//! with a sandbox environment; [`shadow_of`] gives typed access to the
//! shadow of an object.

pub mod animation;
pub mod app;
pub mod content;
pub mod media;
pub mod os;
pub mod res;
pub mod shadow_of;
pub mod telephony;

use shade_core::{ClassDefinition, ClassPath, ShadowMapping, ShadowProvider};
use shade_error::ShadeResult;
use shade_sandbox::{Environment, EnvironmentBuilder};

// 重新导出主要类型
pub use animation::ShadowValueAnimator;
pub use app::{ShadowContextImpl, ShadowQueuedWork, StartedServices};
pub use content::ShadowAsyncTaskLoader;
pub use media::{AudioDeviceInfoBuilder, ShadowAudioDeviceInfo};
pub use os::{ShadowBinder, ShadowBuild, ShadowParcel, ShadowSystemClock};
pub use res::{ApkAssetsCache, ShadowApkAssets};
pub use shadow_of::{ShadowType, shadow_of};
pub use telephony::{
    CellSignalStrengthLteBuilder, CellSignalStrengthNrBuilder, ShadowSignalStrength, SignalStrengthBuilder,
};

/// Package prefix of every fixture class
pub const ANDROID_PACKAGE: &str = "android";

/// Every fixture class
pub fn definitions() -> Vec<ClassDefinition> {
    [
        os::definitions(),
        media::definitions(),
        telephony::definitions(),
        content::definitions(),
        app::definitions(),
        animation::definitions(),
        res::definitions(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Every fixture shadow
pub fn mappings() -> Vec<ShadowMapping> {
    [
        os::mappings(),
        media::mappings(),
        telephony::mappings(),
        content::mappings(),
        app::mappings(),
        animation::mappings(),
        res::mappings(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Class path with `java.lang` and every fixture class
pub fn class_path() -> ShadeResult<ClassPath> {
    let mut path = ClassPath::new();
    for definition in definitions() {
        path.define(definition)?;
    }
    Ok(path)
}

/// The shadows of the fixture classes, always registered
#[derive(Debug, Default, Clone, Copy)]
pub struct AndroidShadows;

impl ShadowProvider for AndroidShadows {
    fn name(&self) -> &str {
        "android"
    }

    fn mappings(&self) -> Vec<ShadowMapping> {
        mappings()
    }

    fn instrumented_packages(&self) -> Vec<String> {
        vec![ANDROID_PACKAGE.to_string()]
    }
}

/// An environment builder with the fixture classes and [`AndroidShadows`]
///
/// Tests add their own classes (application code, subclasses of framework
/// classes) before building.
pub fn environment_builder() -> ShadeResult<EnvironmentBuilder> {
    Ok(Environment::builder()
        .define_all(definitions())?
        .provider(AndroidShadows))
}
