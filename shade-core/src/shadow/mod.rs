//! Shadow classes, the shadow registry and the object-shadow map

pub mod object_map;
pub mod registry;
pub mod shadow_class;

pub use object_map::{DefaultShadow, ObjectShadowMap, ShadowFacet, ShadowRecord};
pub use registry::{ShadowMap, ShadowMapBuilder, ShadowMapping, ShadowProvider};
pub use shadow_class::{
    Resetter, ShadowClass, ShadowClassBuilder, ShadowFactory, ShadowInstance, ShadowMethod,
};
