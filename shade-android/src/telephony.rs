// 信号强度（android.telephony）
//
// `CellSignalStrengthLte`和`CellSignalStrengthNr`是普通的值对象，
// 由构建器通过构造函数创建。`SignalStrength`的各制式信号强度来自modem，
// 影子改为返回测试添加的对象，保持添加顺序。

use parking_lot::Mutex;
use std::sync::Arc;

use shade_core::{
    ApiRange, ClassDefinition, ClassDefinitionBuilder, InvokeError, ObjectRef, Runtime, ShadowClass,
    ShadowMapping, TypeDesc, Value,
};

use crate::shadow_of::{ShadowType, shadow_of};

pub const CELL_SIGNAL_STRENGTH_CLASS: &str = "android.telephony.CellSignalStrength";
pub const CELL_SIGNAL_STRENGTH_LTE_CLASS: &str = "android.telephony.CellSignalStrengthLte";
pub const CELL_SIGNAL_STRENGTH_NR_CLASS: &str = "android.telephony.CellSignalStrengthNr";
pub const SIGNAL_STRENGTH_CLASS: &str = "android.telephony.SignalStrength";

/// First SDK with 5G signal strengths and `getCellSignalStrengths`
pub const NR_SINCE: i32 = 29;

/// Value of a measurement the modem did not report
pub const UNAVAILABLE: i32 = i32::MAX;

pub const SIGNAL_STRENGTH_NONE_OR_UNKNOWN: i32 = 0;

const LTE_FIELDS: [&str; 6] = ["mRssi", "mRsrp", "mRsrq", "mRssnr", "mCqi", "mTimingAdvance"];
const LTE_GETTERS: [&str; 6] = ["getRssi", "getRsrp", "getRsrq", "getRssnr", "getCqi", "getTimingAdvance"];
// thresholds for levels 1..=4
const LTE_RSRP_THRESHOLDS: [i32; 4] = [-115, -105, -95, -85];

const NR_FIELDS: [&str; 6] = ["mCsiRsrp", "mCsiRsrq", "mCsiSinr", "mSsRsrp", "mSsRsrq", "mSsSinr"];
const NR_GETTERS: [&str; 6] = ["getCsiRsrp", "getCsiRsrq", "getCsiSinr", "getSsRsrp", "getSsRsrq", "getSsSinr"];
const NR_SS_RSRP_THRESHOLDS: [i32; 4] = [-110, -90, -80, -65];

/// Signal level 0..=4 of `value` against ascending `thresholds`
fn level(value: i32, thresholds: &[i32; 4]) -> i32 {
    if value == UNAVAILABLE {
        return SIGNAL_STRENGTH_NONE_OR_UNKNOWN;
    }
    thresholds.iter().filter(|t| value >= **t).count() as i32
}

/// A value class: one int field per measurement, a getter for each and a
/// constructor taking all of them in order
fn measurement_class(
    name: &str,
    fields: &'static [&'static str; 6],
    getters: &[&str; 6],
) -> ClassDefinitionBuilder {
    let mut class = ClassDefinition::builder(name)
        .extends(CELL_SIGNAL_STRENGTH_CLASS)
        .constructor(&[], |_| Ok(Value::Void))
        .constructor(&[TypeDesc::Int; 6], move |inv| {
            for (index, field) in fields.iter().enumerate() {
                let value = inv.arg_int(index)?;
                inv.set_field(field, value.into())?;
            }
            Ok(Value::Void)
        });
    for (field, getter) in fields.iter().zip(getters) {
        class = class
            .field_with(*field, TypeDesc::Int, Value::Int(UNAVAILABLE))
            .method(getter, &[], TypeDesc::Int, move |inv| inv.get_field(field));
    }
    class
}

pub fn definitions() -> Vec<ClassDefinition> {
    let base = ClassDefinition::builder(CELL_SIGNAL_STRENGTH_CLASS)
        .abstract_class()
        .constructor(&[], |_| Ok(Value::Void))
        .abstract_method("getDbm", &[], TypeDesc::Int)
        .abstract_method("getLevel", &[], TypeDesc::Int)
        .abstract_method("getAsuLevel", &[], TypeDesc::Int)
        .build();

    let lte = measurement_class(CELL_SIGNAL_STRENGTH_LTE_CLASS, &LTE_FIELDS, &LTE_GETTERS)
        .method("getDbm", &[], TypeDesc::Int, |inv| inv.get_field("mRsrp"))
        .method("getLevel", &[], TypeDesc::Int, |inv| {
            let rsrp = inv.get_field("mRsrp")?.as_int().unwrap_or(UNAVAILABLE);
            Ok(level(rsrp, &LTE_RSRP_THRESHOLDS).into())
        })
        .method("getAsuLevel", &[], TypeDesc::Int, |inv| {
            let rsrp = inv.get_field("mRsrp")?.as_int().unwrap_or(UNAVAILABLE);
            let asu = if rsrp == UNAVAILABLE { 99 } else { rsrp + 140 };
            Ok(asu.into())
        })
        .build();

    let nr = measurement_class(CELL_SIGNAL_STRENGTH_NR_CLASS, &NR_FIELDS, &NR_GETTERS)
        .since(NR_SINCE)
        .method("getDbm", &[], TypeDesc::Int, |inv| inv.get_field("mSsRsrp"))
        .method("getLevel", &[], TypeDesc::Int, |inv| {
            let rsrp = inv.get_field("mSsRsrp")?.as_int().unwrap_or(UNAVAILABLE);
            Ok(level(rsrp, &NR_SS_RSRP_THRESHOLDS).into())
        })
        .method("getAsuLevel", &[], TypeDesc::Int, |inv| {
            let rsrp = inv.get_field("mSsRsrp")?.as_int().unwrap_or(UNAVAILABLE);
            let asu = if rsrp == UNAVAILABLE { 99 } else { rsrp + 156 };
            Ok(asu.into())
        })
        .build();

    let signal_strength = ClassDefinition::builder(SIGNAL_STRENGTH_CLASS)
        .constructor(&[], |_| Ok(Value::Void))
        .method("getCellSignalStrengths", &[], TypeDesc::Array, |_| Ok(Value::Array(Vec::new())))
        .method("getLevel", &[], TypeDesc::Int, |inv| {
            let this = inv.this()?.clone();
            let cells = inv.invoke(&this, "getCellSignalStrengths", vec![])?;
            let mut best = SIGNAL_STRENGTH_NONE_OR_UNKNOWN;
            for cell in cells.as_array().unwrap_or_default().iter().filter_map(Value::as_object) {
                let cell_level = inv.invoke(cell, "getLevel", vec![])?;
                best = best.max(cell_level.as_int().unwrap_or(SIGNAL_STRENGTH_NONE_OR_UNKNOWN));
            }
            Ok(best.into())
        })
        .build();

    vec![base, lte, nr, signal_strength]
}

/// Cell signal strengths reported by a `SignalStrength`
#[derive(Debug, Default)]
pub struct ShadowSignalStrength {
    cell_signal_strengths: Mutex<Vec<ObjectRef>>,
}

impl ShadowType for ShadowSignalStrength {
    const REAL_CLASS: &'static str = SIGNAL_STRENGTH_CLASS;
}

impl ShadowSignalStrength {
    pub fn add_cell_signal_strength(&self, cell: ObjectRef) {
        self.cell_signal_strengths.lock().push(cell);
    }

    pub fn clear_cell_signal_strengths(&self) {
        self.cell_signal_strengths.lock().clear();
    }

    fn shadow_class() -> Arc<ShadowClass> {
        ShadowClass::builder::<ShadowSignalStrength>("ShadowSignalStrength")
            .method_in("getCellSignalStrengths", ApiRange::since(NR_SINCE), |s, _| {
                let cells = s.cell_signal_strengths.lock();
                Ok(Value::Array(cells.iter().cloned().map(Value::from).collect()))
            })
            .build()
    }
}

pub fn mappings() -> Vec<ShadowMapping> {
    vec![ShadowMapping::shadow(SIGNAL_STRENGTH_CLASS, ShadowSignalStrength::shadow_class())]
}

fn build_measurements(rt: &Runtime, class_name: &str, values: [i32; 6]) -> Result<ObjectRef, InvokeError> {
    rt.new_instance(class_name, values.into_iter().map(Value::from).collect())
}

/// Builds `CellSignalStrengthLte`; unset measurements are [`UNAVAILABLE`]
#[derive(Debug, Clone, Copy)]
pub struct CellSignalStrengthLteBuilder {
    values: [i32; 6],
}

impl Default for CellSignalStrengthLteBuilder {
    fn default() -> Self {
        Self {
            values: [UNAVAILABLE; 6],
        }
    }
}

impl CellSignalStrengthLteBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rssi(mut self, rssi: i32) -> Self {
        self.values[0] = rssi;
        self
    }

    pub fn rsrp(mut self, rsrp: i32) -> Self {
        self.values[1] = rsrp;
        self
    }

    pub fn rsrq(mut self, rsrq: i32) -> Self {
        self.values[2] = rsrq;
        self
    }

    pub fn rssnr(mut self, rssnr: i32) -> Self {
        self.values[3] = rssnr;
        self
    }

    pub fn cqi(mut self, cqi: i32) -> Self {
        self.values[4] = cqi;
        self
    }

    pub fn timing_advance(mut self, timing_advance: i32) -> Self {
        self.values[5] = timing_advance;
        self
    }

    pub fn build(self, rt: &Runtime) -> Result<ObjectRef, InvokeError> {
        build_measurements(rt, CELL_SIGNAL_STRENGTH_LTE_CLASS, self.values)
    }
}

/// Builds `CellSignalStrengthNr`; unset measurements are [`UNAVAILABLE`]
#[derive(Debug, Clone, Copy)]
pub struct CellSignalStrengthNrBuilder {
    values: [i32; 6],
}

impl Default for CellSignalStrengthNrBuilder {
    fn default() -> Self {
        Self {
            values: [UNAVAILABLE; 6],
        }
    }
}

impl CellSignalStrengthNrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn csi_rsrp(mut self, value: i32) -> Self {
        self.values[0] = value;
        self
    }

    pub fn csi_rsrq(mut self, value: i32) -> Self {
        self.values[1] = value;
        self
    }

    pub fn csi_sinr(mut self, value: i32) -> Self {
        self.values[2] = value;
        self
    }

    pub fn ss_rsrp(mut self, value: i32) -> Self {
        self.values[3] = value;
        self
    }

    pub fn ss_rsrq(mut self, value: i32) -> Self {
        self.values[4] = value;
        self
    }

    pub fn ss_sinr(mut self, value: i32) -> Self {
        self.values[5] = value;
        self
    }

    pub fn build(self, rt: &Runtime) -> Result<ObjectRef, InvokeError> {
        build_measurements(rt, CELL_SIGNAL_STRENGTH_NR_CLASS, self.values)
    }
}

/// Builds a `SignalStrength` reporting the added cells in order
#[derive(Debug, Clone, Default)]
pub struct SignalStrengthBuilder {
    cells: Vec<ObjectRef>,
}

impl SignalStrengthBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell_signal_strength(mut self, cell: ObjectRef) -> Self {
        self.cells.push(cell);
        self
    }

    pub fn build(self, rt: &Runtime) -> Result<ObjectRef, InvokeError> {
        let signal_strength = rt.new_instance(SIGNAL_STRENGTH_CLASS, vec![])?;
        let shadow = shadow_of::<ShadowSignalStrength>(&signal_strength)?;
        for cell in self.cells {
            shadow.add_cell_signal_strength(cell);
        }
        Ok(signal_strength)
    }
}
