//! `android.os`: device build properties, time, parcels and binders

pub mod binder;
pub mod build;
pub mod clock;
pub mod parcel;

pub use binder::{BINDER_CLASS, FLAG_ONEWAY, ShadowBinder};
pub use build::{BUILD_CLASS, ShadowBuild, VERSION_CLASS};
pub use clock::{SYSTEM_CLOCK_CLASS, ShadowSystemClock};
pub use parcel::{PARCEL_CLASS, ShadowParcel};

use shade_core::{ClassDefinition, ShadowMapping};

pub fn definitions() -> Vec<ClassDefinition> {
    [build::definitions(), clock::definitions(), parcel::definitions(), binder::definitions()]
        .into_iter()
        .flatten()
        .collect()
}

pub fn mappings() -> Vec<ShadowMapping> {
    [build::mappings(), clock::mappings(), parcel::mappings(), binder::mappings()]
        .into_iter()
        .flatten()
        .collect()
}
