// 进程间调用（android.os.Binder）
//
// 影子在同一进程内模拟一次事务：直接调用`onTransact`。`onTransact`抛出的
// 异常按照真实binder的方式写入reply，调用方通过`Parcel.readException`
// 重新得到同类型、同消息的异常。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shade_core::{ClassDefinition, InvokeError, ObjectRef, ShadowClass, ShadowMapping, Throwable, TypeDesc, Value};
use shade_error::ParcelError;

use crate::os::parcel::ShadowParcel;
use crate::shadow_of::{ShadowType, shadow_of};

pub const BINDER_CLASS: &str = "android.os.Binder";

/// The caller does not wait for a reply
pub const FLAG_ONEWAY: i32 = 0x0000_0001;

const TRANSACT_PARAMS: [TypeDesc; 4] = [TypeDesc::Int, TypeDesc::Object, TypeDesc::Object, TypeDesc::Int];

pub fn definitions() -> Vec<ClassDefinition> {
    let class = ClassDefinition::builder(BINDER_CLASS)
        .static_field("FLAG_ONEWAY", TypeDesc::Int, Value::Int(FLAG_ONEWAY))
        .constructor(&[], |_| Ok(Value::Void))
        .method("transact", &TRANSACT_PARAMS, TypeDesc::Boolean, |inv| {
            let this = inv.this()?.clone();
            inv.invoke(&this, "onTransact", inv.args().to_vec())
        })
        .method("onTransact", &TRANSACT_PARAMS, TypeDesc::Boolean, |_| Ok(Value::Bool(false)))
        .build();
    vec![class]
}

/// In-process binder transactions
#[derive(Debug, Default)]
pub struct ShadowBinder {
    transactions: AtomicU64,
}

impl ShadowType for ShadowBinder {
    const REAL_CLASS: &'static str = BINDER_CLASS;
}

impl ShadowBinder {
    /// Number of `transact` calls on this binder
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    fn rewind(parcel: Option<&ObjectRef>) -> Result<(), InvokeError> {
        if let Some(parcel) = parcel {
            shadow_of::<ShadowParcel>(parcel)?.set_data_position(0);
        }
        Ok(())
    }

    /// Parcel `thrown` into `reply`; exceptions without a wire code are
    /// rethrown to the caller instead
    fn write_reply(reply: &ObjectRef, thrown: Throwable) -> Result<(), InvokeError> {
        let parcel = shadow_of::<ShadowParcel>(reply)?;
        parcel.set_data_position(0);
        match parcel.write_exception(&thrown) {
            Ok(()) => Ok(()),
            Err(ParcelError::Unparcelable(class)) => {
                log::debug!("{} cannot be parceled, rethrowing", class);
                Err(thrown.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowBinder>("ShadowBinder")
            .method("transact", |s, inv| {
                s.transactions.fetch_add(1, Ordering::Relaxed);
                let this = inv.this()?.clone();
                let data = inv.arg_opt_object(1)?;
                let reply = inv.arg_opt_object(2)?;
                let flags = inv.arg_int(3)?;
                Self::rewind(data.as_ref())?;

                let result = match inv.invoke(&this, "onTransact", inv.args().to_vec()) {
                    Ok(result) => result,
                    Err(InvokeError::Thrown(thrown)) => match &reply {
                        Some(reply) if flags & FLAG_ONEWAY == 0 => {
                            Self::write_reply(reply, thrown)?;
                            Value::Bool(true)
                        }
                        _ => return Err(thrown.into()),
                    },
                    Err(e) => return Err(e),
                };
                Self::rewind(reply.as_ref())?;
                Ok(result)
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(BINDER_CLASS, ShadowBinder::shadow_class())]
}
