//! Class model
//!
//! Definitions of framework classes and the class path they are loaded from.

pub mod class_path;
pub mod definition;

pub use class_path::{ClassPath, SYSTEM_CLASS};
pub use definition::{
    CONSTRUCTOR, ClassDefinition, ClassDefinitionBuilder, FINALIZER, FieldDefinition, MethodBody,
    MethodDefinition, MethodKind, MethodSignature, OBJECT_CLASS, STATIC_INITIALIZER,
};
