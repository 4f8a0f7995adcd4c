// 序列化容器（android.os.Parcel）
//
// Parcel的数据全部在native层。影子为每个对象持有一个`shade_core::Parcel`
// 缓冲区，所有读写方法都落到它上面。

use parking_lot::Mutex;
use std::sync::Arc;

use shade_core::{ClassDefinition, Parcel, ShadowClass, ShadowMapping, Throwable, TypeDesc, Value};
use shade_error::ParcelError;

use crate::shadow_of::ShadowType;

pub const PARCEL_CLASS: &str = "android.os.Parcel";

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(PARCEL_CLASS)
        .constructor(&[], |_| Ok(Value::Void))
        .static_method("obtain", &[], TypeDesc::Object, |inv| {
            Ok(inv.new_instance(PARCEL_CLASS, vec![])?.into())
        })
        .native_method("writeInt", &[TypeDesc::Int], TypeDesc::Void)
        .native_method("readInt", &[], TypeDesc::Int)
        .native_method("writeLong", &[TypeDesc::Long], TypeDesc::Void)
        .native_method("readLong", &[], TypeDesc::Long)
        .native_method("writeFloat", &[TypeDesc::Float], TypeDesc::Void)
        .native_method("readFloat", &[], TypeDesc::Float)
        .native_method("writeDouble", &[TypeDesc::Double], TypeDesc::Void)
        .native_method("readDouble", &[], TypeDesc::Double)
        .native_method("writeBoolean", &[TypeDesc::Boolean], TypeDesc::Void)
        .native_method("readBoolean", &[], TypeDesc::Boolean)
        .native_method("writeString", &[TypeDesc::String], TypeDesc::Void)
        .native_method("readString", &[], TypeDesc::String)
        .native_method("writeValue", &[TypeDesc::Object], TypeDesc::Void)
        .native_method("readValue", &[], TypeDesc::Object)
        .native_method("dataSize", &[], TypeDesc::Int)
        .native_method("dataPosition", &[], TypeDesc::Int)
        .native_method("setDataPosition", &[TypeDesc::Int], TypeDesc::Void)
        .native_method("dataAvail", &[], TypeDesc::Int)
        .native_method("writeNoException", &[], TypeDesc::Void)
        .native_method("readException", &[], TypeDesc::Void)
        .native_method("recycle", &[], TypeDesc::Void)
        .build();
    vec![class]
}

/// Native buffer of one `Parcel`
#[derive(Debug, Default)]
pub struct ShadowParcel {
    parcel: Mutex<Parcel>,
}

impl ShadowType for ShadowParcel {
    const REAL_CLASS: &'static str = PARCEL_CLASS;
}

fn size(value: usize) -> Value {
    Value::Int(i32::try_from(value).unwrap_or(i32::MAX))
}

impl ShadowParcel {
    /// Write `exception` as a binder reply header
    pub fn write_exception(&self, exception: &Throwable) -> Result<(), ParcelError> {
        self.parcel.lock().write_exception(exception)
    }

    pub fn set_data_position(&self, position: usize) {
        self.parcel.lock().set_data_position(position);
    }

    /// Raw bytes of the buffer
    pub fn marshall(&self) -> Vec<u8> {
        self.parcel.lock().marshall()
    }

    /// Replace the buffer with `bytes`, positioned at the start
    pub fn unmarshall(&self, bytes: &[u8]) {
        *self.parcel.lock() = Parcel::unmarshall(bytes);
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowParcel>("ShadowParcel")
            .method("writeInt", |s, inv| {
                let value = inv.arg_int(0)?;
                s.parcel.lock().write_int(value);
                Ok(Value::Void)
            })
            .method("readInt", |s, _| Ok(s.parcel.lock().read_int()?.into()))
            .method("writeLong", |s, inv| {
                let value = inv.arg_long(0)?;
                s.parcel.lock().write_long(value);
                Ok(Value::Void)
            })
            .method("readLong", |s, _| Ok(s.parcel.lock().read_long()?.into()))
            .method("writeFloat", |s, inv| {
                let value = inv.arg_float(0)?;
                s.parcel.lock().write_float(value);
                Ok(Value::Void)
            })
            .method("readFloat", |s, _| Ok(s.parcel.lock().read_float()?.into()))
            .method("writeDouble", |s, inv| {
                let value = inv.arg_double(0)?;
                s.parcel.lock().write_double(value);
                Ok(Value::Void)
            })
            .method("readDouble", |s, _| Ok(s.parcel.lock().read_double()?.into()))
            .method("writeBoolean", |s, inv| {
                let value = inv.arg_bool(0)?;
                s.parcel.lock().write_bool(value);
                Ok(Value::Void)
            })
            .method("readBoolean", |s, _| Ok(s.parcel.lock().read_bool()?.into()))
            .method("writeString", |s, inv| {
                let value = inv.arg_opt_str(0)?;
                s.parcel.lock().write_string(value);
                Ok(Value::Void)
            })
            .method("readString", |s, _| {
                Ok(s.parcel.lock().read_string()?.map_or(Value::Null, Value::from))
            })
            .method("writeValue", |s, inv| {
                s.parcel.lock().write_value(inv.arg(0)?)?;
                Ok(Value::Void)
            })
            .method("readValue", |s, _| Ok(s.parcel.lock().read_value()?))
            .method("dataSize", |s, _| Ok(size(s.parcel.lock().data_size())))
            .method("dataPosition", |s, _| Ok(size(s.parcel.lock().data_position())))
            .method("setDataPosition", |s, inv| {
                let position = inv.arg_int(0)?;
                if position < 0 {
                    return Err(Throwable::illegal_argument(format!("negative position {}", position)).into());
                }
                s.set_data_position(position as usize);
                Ok(Value::Void)
            })
            .method("dataAvail", |s, _| Ok(size(s.parcel.lock().data_avail())))
            .method("writeNoException", |s, _| {
                s.parcel.lock().write_no_exception();
                Ok(Value::Void)
            })
            .method("readException", |s, _| {
                s.parcel.lock().check_exception()?;
                Ok(Value::Void)
            })
            .method("recycle", |s, _| {
                s.parcel.lock().recycle();
                Ok(Value::Void)
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(PARCEL_CLASS, ShadowParcel::shadow_class())]
}
