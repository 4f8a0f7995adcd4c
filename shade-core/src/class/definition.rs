//! Class definitions
//!
//! A [`ClassDefinition`] is the uninstrumented form of a framework class: its
//! fields, constructors and method bodies exactly as the fixture SDK wrote
//! them. The instrumenting loader turns definitions into
//! [`InstrumentedClass`](crate::instrument::InstrumentedClass)es.

use std::fmt;
use std::sync::Arc;

use crate::api::ApiRange;
use crate::dispatch::Invocation;
use crate::throwable::CallResult;
use crate::value::{TypeDesc, Value};

/// Constructor method name
pub const CONSTRUCTOR: &str = "<init>";
/// Static initializer method name
pub const STATIC_INITIALIZER: &str = "<clinit>";
/// Finalizer method name
pub const FINALIZER: &str = "finalize";
/// Root of every class hierarchy
pub const OBJECT_CLASS: &str = "java.lang.Object";

/// A method body, original or shadow
pub type MethodBody = Arc<dyn Fn(&mut Invocation<'_>) -> CallResult + Send + Sync>;

/// What kind of member a method is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Constructor,
    Instance,
    Static,
    StaticInitializer,
    Finalizer,
}

impl MethodKind {
    /// Whether the method needs a receiver
    pub fn has_receiver(&self) -> bool {
        matches!(
            self,
            MethodKind::Constructor | MethodKind::Instance | MethodKind::Finalizer
        )
    }
}

/// Name, parameter types and return type of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<TypeDesc>,
    pub ret: TypeDesc,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, params: &[TypeDesc], ret: TypeDesc) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
            ret,
        }
    }

    /// Whether `args` can be passed to this method
    pub fn matches_args(&self, args: &[Value]) -> bool {
        self.params.len() == args.len()
            && self
                .params
                .iter()
                .zip(args)
                .all(|(param, arg)| param.accepts(arg))
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for param in &self.params {
            write!(f, "{}", param.descriptor())?;
        }
        write!(f, "){}", self.ret.descriptor())
    }
}

/// A declared method
#[derive(Clone)]
pub struct MethodDefinition {
    pub signature: MethodSignature,
    pub kind: MethodKind,
    pub is_native: bool,
    pub is_abstract: bool,
    pub body: Option<MethodBody>,
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("signature", &self.signature.to_string())
            .field("kind", &self.kind)
            .field("is_native", &self.is_native)
            .field("is_abstract", &self.is_abstract)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A declared field
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeDesc,
    pub initial: Value,
    pub is_static: bool,
}

/// An uninstrumented framework class
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub superclass: Option<String>,
    pub sdk_range: ApiRange,
    pub is_abstract: bool,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
}

impl ClassDefinition {
    /// Start a definition extending `java.lang.Object`
    pub fn builder(name: impl Into<String>) -> ClassDefinitionBuilder {
        ClassDefinitionBuilder::new(name)
    }

    pub fn static_initializer(&self) -> Option<&MethodDefinition> {
        self.methods
            .iter()
            .find(|m| m.kind == MethodKind::StaticInitializer)
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.is_static)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builder for [`ClassDefinition`]
pub struct ClassDefinitionBuilder {
    definition: ClassDefinition,
}

impl ClassDefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let superclass = (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string());
        Self {
            definition: ClassDefinition {
                name,
                superclass,
                sdk_range: ApiRange::ALL,
                is_abstract: false,
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.definition.superclass = Some(superclass.into());
        self
    }

    /// Class exists from `sdk` onwards
    pub fn since(mut self, sdk: i32) -> Self {
        self.definition.sdk_range = ApiRange::since(sdk);
        self
    }

    pub fn sdk(mut self, range: ApiRange) -> Self {
        self.definition.sdk_range = range;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.definition.is_abstract = true;
        self
    }

    /// Instance field holding the default value of its type
    pub fn field(self, name: impl Into<String>, ty: TypeDesc) -> Self {
        let initial = ty.default_value();
        self.field_with(name, ty, initial)
    }

    pub fn field_with(mut self, name: impl Into<String>, ty: TypeDesc, initial: Value) -> Self {
        self.definition.fields.push(FieldDefinition {
            name: name.into(),
            ty,
            initial,
            is_static: false,
        });
        self
    }

    /// Static field, set to `initial` every time the class is initialised
    pub fn static_field(mut self, name: impl Into<String>, ty: TypeDesc, initial: Value) -> Self {
        self.definition.fields.push(FieldDefinition {
            name: name.into(),
            ty,
            initial,
            is_static: true,
        });
        self
    }

    pub fn constructor<F>(self, params: &[TypeDesc], body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.push(
            MethodSignature::new(CONSTRUCTOR, params, TypeDesc::Void),
            MethodKind::Constructor,
            Some(Arc::new(body)),
        )
    }

    pub fn method<F>(self, name: &str, params: &[TypeDesc], ret: TypeDesc, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.push(
            MethodSignature::new(name, params, ret),
            MethodKind::Instance,
            Some(Arc::new(body)),
        )
    }

    pub fn native_method(mut self, name: &str, params: &[TypeDesc], ret: TypeDesc) -> Self {
        self.definition.methods.push(MethodDefinition {
            signature: MethodSignature::new(name, params, ret),
            kind: MethodKind::Instance,
            is_native: true,
            is_abstract: false,
            body: None,
        });
        self
    }

    pub fn abstract_method(mut self, name: &str, params: &[TypeDesc], ret: TypeDesc) -> Self {
        self.definition.methods.push(MethodDefinition {
            signature: MethodSignature::new(name, params, ret),
            kind: MethodKind::Instance,
            is_native: false,
            is_abstract: true,
            body: None,
        });
        self
    }

    pub fn static_method<F>(self, name: &str, params: &[TypeDesc], ret: TypeDesc, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.push(
            MethodSignature::new(name, params, ret),
            MethodKind::Static,
            Some(Arc::new(body)),
        )
    }

    pub fn native_static_method(mut self, name: &str, params: &[TypeDesc], ret: TypeDesc) -> Self {
        self.definition.methods.push(MethodDefinition {
            signature: MethodSignature::new(name, params, ret),
            kind: MethodKind::Static,
            is_native: true,
            is_abstract: false,
            body: None,
        });
        self
    }

    pub fn static_initializer<F>(self, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.push(
            MethodSignature::new(STATIC_INITIALIZER, &[], TypeDesc::Void),
            MethodKind::StaticInitializer,
            Some(Arc::new(body)),
        )
    }

    pub fn finalizer<F>(self, body: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> CallResult + Send + Sync + 'static,
    {
        self.push(
            MethodSignature::new(FINALIZER, &[], TypeDesc::Void),
            MethodKind::Finalizer,
            Some(Arc::new(body)),
        )
    }

    fn push(mut self, signature: MethodSignature, kind: MethodKind, body: Option<MethodBody>) -> Self {
        self.definition.methods.push(MethodDefinition {
            signature,
            kind,
            is_native: false,
            is_abstract: false,
            body,
        });
        self
    }

    /// Finish the definition. A class without constructors gets an empty
    /// no-arg one.
    pub fn build(mut self) -> ClassDefinition {
        let has_constructor = self
            .definition
            .methods
            .iter()
            .any(|m| m.kind == MethodKind::Constructor);
        if !has_constructor {
            self.definition.methods.push(MethodDefinition {
                signature: MethodSignature::new(CONSTRUCTOR, &[], TypeDesc::Void),
                kind: MethodKind::Constructor,
                is_native: false,
                is_abstract: false,
                body: None,
            });
        }
        self.definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let def = ClassDefinition::builder("android.os.Binder").build();
        assert_eq!(def.superclass.as_deref(), Some(OBJECT_CLASS));
        assert_eq!(def.sdk_range, ApiRange::ALL);
        assert!(def.methods.iter().any(|m| m.kind == MethodKind::Constructor));
    }

    #[test]
    fn test_object_has_no_superclass() {
        let def = ClassDefinition::builder(OBJECT_CLASS).build();
        assert!(def.superclass.is_none());
    }

    #[test]
    fn test_signature_matching() {
        let sig = MethodSignature::new("transact", &[TypeDesc::Int, TypeDesc::Object], TypeDesc::Boolean);
        assert!(sig.matches_args(&[Value::Int(1), Value::Null]));
        assert!(!sig.matches_args(&[Value::Int(1)]));
        assert!(!sig.matches_args(&[Value::Bool(true), Value::Null]));
        assert_eq!(sig.to_string(), "transact(ILjava/lang/Object;)Z");
    }

    #[test]
    fn test_fields() {
        let def = ClassDefinition::builder("android.os.Build")
            .static_field("FINGERPRINT", TypeDesc::String, Value::from("robolectric"))
            .field("id", TypeDesc::Int)
            .build();
        assert_eq!(def.static_fields().count(), 1);
        assert_eq!(def.instance_fields().count(), 1);
        assert_eq!(def.field("id").map(|f| f.initial.clone()), Some(Value::Int(0)));
    }
}
