// 音频设备（android.media.AudioDeviceInfo）
//
// 真实对象包装一个native音频端口，测试中没有端口，所以通过构建器
// 绕过构造函数创建对象并直接写入字段。

use std::sync::Arc;

use shade_core::{ApiRange, ClassDefinition, InvokeError, ObjectRef, Runtime, ShadowClass, ShadowMapping, TypeDesc, Value};

use crate::shadow_of::ShadowType;

pub const AUDIO_DEVICE_INFO_CLASS: &str = "android.media.AudioDeviceInfo";

/// First SDK with `AudioDeviceInfo`
pub const AUDIO_DEVICE_INFO_SINCE: i32 = 23;

pub const TYPE_UNKNOWN: i32 = 0;
pub const TYPE_BUILTIN_EARPIECE: i32 = 1;
pub const TYPE_BUILTIN_SPEAKER: i32 = 2;
pub const TYPE_WIRED_HEADSET: i32 = 3;
pub const TYPE_BLUETOOTH_A2DP: i32 = 8;

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(AUDIO_DEVICE_INFO_CLASS)
        .since(AUDIO_DEVICE_INFO_SINCE)
        .field_with("mType", TypeDesc::Int, Value::Int(TYPE_UNKNOWN))
        .field("mProductName", TypeDesc::String)
        .field("mAddress", TypeDesc::String)
        .native_method("getId", &[], TypeDesc::Int)
        .method("getType", &[], TypeDesc::Int, |inv| inv.get_field("mType"))
        .method("getProductName", &[], TypeDesc::String, |inv| inv.get_field("mProductName"))
        .method("getAddress", &[], TypeDesc::String, |inv| {
            let address = inv.get_field("mAddress")?;
            Ok(if address.is_null() { Value::from("") } else { address })
        })
        .method("isSink", &[], TypeDesc::Boolean, |inv| {
            let device_type = inv.get_field("mType")?.as_int().unwrap_or(TYPE_UNKNOWN);
            Ok(matches!(
                device_type,
                TYPE_BUILTIN_EARPIECE | TYPE_BUILTIN_SPEAKER | TYPE_WIRED_HEADSET | TYPE_BLUETOOTH_A2DP
            )
            .into())
        })
        .build();
    vec![class]
}

#[derive(Debug, Default)]
pub struct ShadowAudioDeviceInfo;

impl ShadowType for ShadowAudioDeviceInfo {
    const REAL_CLASS: &'static str = AUDIO_DEVICE_INFO_CLASS;
}

pub fn mappings() -> Vec<ShadowMapping> {
    let shadow = ShadowClass::builder::<ShadowAudioDeviceInfo>("ShadowAudioDeviceInfo").build();
    vec![
        ShadowMapping::shadow(AUDIO_DEVICE_INFO_CLASS, shadow)
            .with_api_range(ApiRange::since(AUDIO_DEVICE_INFO_SINCE)),
    ]
}

/// Creates `AudioDeviceInfo` objects without an audio port
#[derive(Debug, Clone, Default)]
pub struct AudioDeviceInfoBuilder {
    device_type: Option<i32>,
    product_name: Option<String>,
    address: Option<String>,
}

impl AudioDeviceInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_type(mut self, device_type: i32) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn product_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn build(self, rt: &Runtime) -> Result<ObjectRef, InvokeError> {
        let device = rt.new_instance_of(AUDIO_DEVICE_INFO_CLASS)?;
        let fields = rt.reflector(&device);
        if let Some(device_type) = self.device_type {
            fields.set_field("mType", device_type.into())?;
        }
        if let Some(name) = self.product_name {
            fields.set_field("mProductName", name.into())?;
        }
        if let Some(address) = self.address {
            fields.set_field("mAddress", address.into())?;
        }
        Ok(device)
    }
}
