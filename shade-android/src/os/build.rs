// 设备信息（android.os.Build）
//
// `Build`的静态字段由静态初始化器通过native方法`getString`读取系统属性。
// 影子提供属性表；测试可以改写字段，测试结束时静态字段被重置。

use std::sync::Arc;

use shade_core::{
    ClassDefinition, InvokeError, Runtime, ShadowClass, ShadowMapping, TypeDesc, Value,
};

pub const BUILD_CLASS: &str = "android.os.Build";
pub const VERSION_CLASS: &str = "android.os.Build$VERSION";

/// Value of every string property the device does not define
pub const UNKNOWN: &str = "unknown";

const SDK_PROPERTY: &str = "ro.build.version.sdk";
const RELEASE_PROPERTY: &str = "ro.build.version.release";

// (field, system property)
const BUILD_FIELDS: [(&str, &str); 6] = [
    ("FINGERPRINT", "ro.build.fingerprint"),
    ("MODEL", "ro.product.model"),
    ("DEVICE", "ro.product.device"),
    ("PRODUCT", "ro.product.name"),
    ("MANUFACTURER", "ro.product.manufacturer"),
    ("TYPE", "ro.build.type"),
];

pub fn definitions() -> Vec<ClassDefinition> {
    let mut build = ClassDefinition::builder(BUILD_CLASS);
    for (field, _) in BUILD_FIELDS {
        build = build.static_field(field, TypeDesc::String, Value::Null);
    }
    let build = build
        .static_initializer(|inv| {
            for (field, property) in BUILD_FIELDS {
                let value = inv.invoke_static(BUILD_CLASS, "getString", vec![property.into()])?;
                inv.set_static(field, value)?;
            }
            Ok(Value::Void)
        })
        .native_static_method("getString", &[TypeDesc::String], TypeDesc::String)
        .build();

    let version = ClassDefinition::builder(VERSION_CLASS)
        .static_field("SDK_INT", TypeDesc::Int, Value::Int(0))
        .static_field("RELEASE", TypeDesc::String, Value::Null)
        .static_initializer(|inv| {
            let sdk = inv.invoke_static(BUILD_CLASS, "getString", vec![SDK_PROPERTY.into()])?;
            let sdk = sdk.as_str().and_then(|s| s.parse::<i32>().ok()).unwrap_or(0);
            inv.set_static("SDK_INT", Value::Int(sdk))?;
            let release = inv.invoke_static(BUILD_CLASS, "getString", vec![RELEASE_PROPERTY.into()])?;
            inv.set_static("RELEASE", release)?;
            Ok(Value::Void)
        })
        .build();

    vec![build, version]
}

/// Release name shipped with `sdk`
pub fn release_name(sdk: i32) -> &'static str {
    match sdk {
        21 => "5.0.2",
        22 => "5.1",
        23 => "6.0",
        24 => "7.0",
        25 => "7.1",
        26 => "8.0.0",
        27 => "8.1.0",
        28 => "9",
        29 => "10",
        30 => "11",
        31 | 32 => "12",
        33 => "13",
        34 => "14",
        35 => "15",
        _ => UNKNOWN,
    }
}

/// System properties as seen by `Build`
#[derive(Debug, Default)]
pub struct ShadowBuild;

impl ShadowBuild {
    /// The property table of the simulated device
    pub fn property(name: &str, sdk: i32) -> String {
        match name {
            "ro.build.fingerprint" | "ro.product.model" | "ro.product.device" | "ro.product.name" => {
                "robolectric".to_string()
            }
            "ro.build.type" => "user".to_string(),
            SDK_PROPERTY => sdk.to_string(),
            RELEASE_PROPERTY => release_name(sdk).to_string(),
            _ => UNKNOWN.to_string(),
        }
    }

    pub fn set_fingerprint(rt: &Runtime, fingerprint: &str) -> Result<(), InvokeError> {
        rt.set_static(BUILD_CLASS, "FINGERPRINT", fingerprint.into())
    }

    pub fn set_model(rt: &Runtime, model: &str) -> Result<(), InvokeError> {
        rt.set_static(BUILD_CLASS, "MODEL", model.into())
    }

    pub fn set_manufacturer(rt: &Runtime, manufacturer: &str) -> Result<(), InvokeError> {
        rt.set_static(BUILD_CLASS, "MANUFACTURER", manufacturer.into())
    }

    pub fn set_type(rt: &Runtime, build_type: &str) -> Result<(), InvokeError> {
        rt.set_static(BUILD_CLASS, "TYPE", build_type.into())
    }

    /// Override `Build.VERSION.RELEASE`
    pub fn set_version_release(rt: &Runtime, release: &str) -> Result<(), InvokeError> {
        rt.set_static(VERSION_CLASS, "RELEASE", release.into())
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowBuild>("ShadowBuild")
            .static_method("getString", |inv| {
                let name = inv.arg_str(0)?;
                Ok(ShadowBuild::property(name, inv.sdk()).into())
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(BUILD_CLASS, ShadowBuild::shadow_class())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_table() {
        assert_eq!(ShadowBuild::property("ro.build.fingerprint", 30), "robolectric");
        assert_eq!(ShadowBuild::property("ro.build.type", 30), "user");
        assert_eq!(ShadowBuild::property(SDK_PROPERTY, 30), "30");
        assert_eq!(ShadowBuild::property(RELEASE_PROPERTY, 30), "11");
        assert_eq!(ShadowBuild::property("ro.product.manufacturer", 30), UNKNOWN);
        assert_eq!(ShadowBuild::property("ro.nothing", 30), UNKNOWN);
    }

    #[test]
    fn test_release_names() {
        assert_eq!(release_name(21), "5.0.2");
        assert_eq!(release_name(34), "14");
        assert_eq!(release_name(99), UNKNOWN);
    }
}
