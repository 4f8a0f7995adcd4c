// APK资源（android.content.res.ApkAssets）
//
// 加载一个APK的native资源表代价很高，影子按路径缓存native指针。
// 缓存是沙箱级服务：同一沙箱中的测试共享指针，新沙箱重新加载。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use shade_common::IdGenerator;
use shade_core::{ClassDefinition, Runtime, ShadowClass, ShadowMapping, TypeDesc, Value};

use crate::shadow_of::ShadowType;

pub const APK_ASSETS_CLASS: &str = "android.content.res.ApkAssets";

static NATIVE_PTRS: IdGenerator = IdGenerator::new(0x1000);

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(APK_ASSETS_CLASS)
        .field_with("mNativePtr", TypeDesc::Long, Value::Long(0))
        .field("mAssetPath", TypeDesc::String)
        .constructor(&[TypeDesc::String], |inv| {
            let path = inv.arg(0)?.clone();
            let native_ptr = inv.invoke_static(APK_ASSETS_CLASS, "nativeLoad", vec![path.clone()])?;
            inv.set_field("mAssetPath", path)?;
            inv.set_field("mNativePtr", native_ptr)?;
            Ok(Value::Void)
        })
        .static_method("loadFromPath", &[TypeDesc::String], TypeDesc::Object, |inv| {
            let path = inv.arg_str(0)?.to_string();
            Ok(inv.new_instance(APK_ASSETS_CLASS, vec![path.into()])?.into())
        })
        .native_static_method("nativeLoad", &[TypeDesc::String], TypeDesc::Long)
        .method("getAssetPath", &[], TypeDesc::String, |inv| inv.get_field("mAssetPath"))
        .build();
    vec![class]
}

/// Native pointers of loaded APKs, by path
#[derive(Debug, Default)]
pub struct ApkAssetsCache {
    pointers: Mutex<HashMap<String, i64>>,
}

impl ApkAssetsCache {
    /// The pointer for `path`, loading it on first use
    pub fn load(&self, path: &str) -> i64 {
        *self
            .pointers
            .lock()
            .entry(path.to_string())
            .or_insert_with(|| {
                let pointer = NATIVE_PTRS.next_id() as i64;
                log::debug!("Loaded APK assets {} at {:#x}", path, pointer);
                pointer
            })
    }

    pub fn len(&self) -> usize {
        self.pointers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.lock().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ShadowApkAssets;

impl ShadowType for ShadowApkAssets {
    const REAL_CLASS: &'static str = APK_ASSETS_CLASS;
}

impl ShadowApkAssets {
    /// The APK cache of the sandbox running on `rt`
    pub fn cache(rt: &Runtime) -> Arc<ApkAssetsCache> {
        rt.service_or_default::<ApkAssetsCache>()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    let shadow = ShadowClass::builder::<ShadowApkAssets>("ShadowApkAssets")
        .static_method("nativeLoad", |inv| {
            let path = inv.arg_str(0)?;
            Ok(Value::Long(ShadowApkAssets::cache(inv.runtime()).load(path)))
        })
        .build();
    vec![ShadowMapping::shadow(APK_ASSETS_CLASS, shadow)]
}
