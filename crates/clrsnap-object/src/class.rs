//! Class materialisation: fields, properties, and generic instantiations.

use smol_str::SmolStr;
use tracing::debug;

use clrsnap_runtime::coordinator::EvalContext;
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::handle::StrongHandle;
use clrsnap_runtime::surface::{
    ClassToken, ElementType, FieldToken, MethodToken, ModuleRef, RawValue, RuntimeEval,
    RuntimeFrame, RuntimeModule, RuntimeType, TypeRef, ValueRef,
};

use crate::factory::ObjectFactory;
use crate::object::{DbgObject, DescribeOptions, StatusMessage, VariableNode};
use crate::signature::{primitive_equivalent, TypeSignature};

/// Property name behind a compiler-emitted backing field, when the field
/// name has the `<Name>k__BackingField` shape.
#[must_use]
pub fn backing_property_name(field_name: &str) -> Option<&str> {
    let rest = field_name.strip_prefix('<')?;
    rest.strip_suffix(">k__BackingField")
}

/// A captured field: metadata plus the eagerly-read value.
#[derive(Debug, Clone)]
pub struct ClassField {
    /// Surfaced name; backing fields are collapsed onto the property name.
    pub name: SmolStr,
    pub token: FieldToken,
    pub is_static: bool,
    /// Whether this is the hidden backing field of an auto-property.
    pub is_backing: bool,
    pub signature: TypeSignature,
    pub value: DbgObject,
}

/// A property descriptor. Reading a non-auto property is deferred: only the
/// getter token is held, and evaluation goes through the coordinator.
#[derive(Clone)]
pub struct ClassProperty {
    pub name: SmolStr,
    pub getter: Option<MethodToken>,
    /// Auto-implemented: the value is read from the backing field instead
    /// of invoking the getter.
    pub is_auto: bool,
    pub signature: TypeSignature,
    pub module: ModuleRef,
}

impl std::fmt::Debug for ClassProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassProperty")
            .field("name", &self.name)
            .field("getter", &self.getter)
            .field("is_auto", &self.is_auto)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl ClassProperty {
    /// Invoke the getter in the debuggee and materialise its result.
    pub fn evaluate(
        &self,
        instance: Option<&StrongHandle>,
        context: &EvalContext,
        factory: &ObjectFactory,
        depth: i32,
    ) -> Result<DbgObject, DebugError> {
        let getter = self
            .getter
            .ok_or_else(|| DebugError::NotImplemented("property has no getter".into()))?;

        let eval = context.coordinator.create_eval()?;
        let mut args = Vec::new();
        if let Some(handle) = instance {
            // Refresh through the handle; the raw receiver read at
            // materialisation time may be stale by now.
            args.push(handle.dereference()?);
        }
        eval.call_method(&self.module, getter, &args)?;
        let outcome = context.coordinator.wait_for_eval(&eval)?;
        if outcome.threw {
            let thrown = outcome
                .value
                .exact_type()
                .map(|t| t.name())
                .unwrap_or_default();
            return Err(DebugError::EvalException(thrown));
        }
        Ok(factory.create(&outcome.value, depth))
    }
}

/// A materialised class or value-type instance.
#[derive(Clone)]
pub struct DbgClass {
    /// Strong handle for reference types; value types are inline copies.
    pub(crate) handle: Option<StrongHandle>,
    pub(crate) token: ClassToken,
    pub(crate) module: Option<ModuleRef>,
    /// Type-only objects rendering the generic instantiation.
    pub(crate) generic_args: Vec<DbgObject>,
    pub(crate) fields: Vec<ClassField>,
    pub(crate) properties: Vec<ClassProperty>,
}

impl std::fmt::Debug for DbgClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbgClass")
            .field("handle", &self.handle)
            .field("token", &self.token)
            .field("generic_args", &self.generic_args)
            .field("fields", &self.fields)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl DbgClass {
    #[must_use]
    pub fn token(&self) -> ClassToken {
        self.token
    }

    #[must_use]
    pub fn fields(&self) -> &[ClassField] {
        &self.fields
    }

    #[must_use]
    pub fn properties(&self) -> &[ClassProperty] {
        &self.properties
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ClassField> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&ClassProperty> {
        self.properties.iter().find(|prop| prop.name == name)
    }

    #[must_use]
    pub fn generic_args(&self) -> &[DbgObject] {
        &self.generic_args
    }

    /// Wire nodes for the instance's members.
    ///
    /// Fields come first; auto-properties surface their backing-field value
    /// under the property name (and the raw backing field is suppressed),
    /// non-auto properties dispatch their getter through the coordinator
    /// when property evaluation is enabled.
    pub(crate) fn member_nodes(
        &self,
        depth: i32,
        options: &DescribeOptions<'_>,
    ) -> Vec<VariableNode> {
        let mut nodes = Vec::new();

        for field in &self.fields {
            if field.is_backing && self.property(&field.name).is_some() {
                continue;
            }
            nodes.push(field.value.describe(&field.name, options));
        }

        for property in &self.properties {
            if property.is_auto {
                if let Some(field) = self
                    .fields
                    .iter()
                    .find(|field| field.is_backing && field.name == property.name)
                {
                    nodes.push(field.value.describe(&property.name, options));
                }
                continue;
            }

            let mut node = VariableNode::new(&property.name, property.signature.display());
            if !options.property_eval {
                node.status = Some(StatusMessage::info("property evaluation is disabled"));
                nodes.push(node);
                continue;
            }
            let Some(context) = options.context else {
                node.status = Some(StatusMessage::info(
                    "property evaluation is unavailable for this capture",
                ));
                nodes.push(node);
                continue;
            };
            match property.evaluate(self.handle.as_ref(), context, options.factory, depth - 1) {
                Ok(value) => nodes.push(value.describe(&property.name, options)),
                Err(err) => {
                    debug!(property = %property.name, error = %err, "getter dispatch failed");
                    node.status = Some(StatusMessage::error(err.to_string()));
                    nodes.push(node);
                }
            }
        }

        nodes
    }
}

/// Populate a class object from a dereferenced (and unboxed) instance view.
pub(crate) fn materialise(
    factory: &ObjectFactory,
    view: &ValueRef,
    declared: &TypeRef,
    depth: i32,
) -> Result<DbgObject, DebugError> {
    // Prefer the exact runtime type; fall back to the declared one.
    let runtime_type = view.exact_type().unwrap_or_else(|_| declared.clone());
    let signature = TypeSignature::from_type(&runtime_type);

    // Value classes that wrap a fundamental scalar short-circuit to a
    // primitive instead of walking fields.
    if runtime_type.element_type() == ElementType::ValueType
        && primitive_equivalent(&signature.name).is_some()
    {
        if let Ok(scalar) = view.read_scalar() {
            return Ok(DbgObject::primitive(scalar));
        }
    }

    let token = runtime_type
        .class_token()
        .ok_or_else(|| DebugError::NotImplemented("object has no class metadata".into()))?;
    let module = runtime_type.module();
    let is_value_type = runtime_type.element_type() == ElementType::ValueType;

    let handle = if is_value_type {
        None
    } else {
        Some(view.create_handle()?)
    };

    let generic_args = runtime_type
        .type_args()
        .iter()
        .map(|arg| DbgObject::empty(TypeSignature::from_type(arg)))
        .collect();

    let mut fields = Vec::new();
    let mut properties = Vec::new();

    // Members are still enumerated at the depth boundary so field reads on
    // the captured instance keep working; expansion into wire members stops
    // separately.
    if depth >= 0 {
        if let Some(module) = &module {
            for info in module.fields_of(token)? {
                let (name, is_backing) = match backing_property_name(&info.name) {
                    Some(property) => (SmolStr::new(property), true),
                    None => (info.name.clone(), false),
                };
                let field_signature = TypeSignature::new(info.element, info.type_name.clone());

                let value = if info.is_static {
                    let Some(frame) = factory.frame() else {
                        // Statics are frame-scoped; without an active frame
                        // they cannot be read.
                        continue;
                    };
                    match frame.static_field_value(token, info.token) {
                        Ok(value) => factory.create(&value, depth),
                        Err(err) => DbgObject::failed(field_signature.clone(), err, ""),
                    }
                } else {
                    match view.field_value(token, info.token) {
                        Ok(value) => factory.create(&value, depth),
                        Err(err) => DbgObject::failed(field_signature.clone(), err, ""),
                    }
                };

                fields.push(ClassField {
                    name,
                    token: info.token,
                    is_static: info.is_static,
                    is_backing,
                    signature: field_signature,
                    value,
                });
            }

            for info in module.properties_of(token)? {
                let is_auto = fields
                    .iter()
                    .any(|field| field.is_backing && field.name == info.name);
                properties.push(ClassProperty {
                    name: info.name.clone(),
                    getter: info.getter,
                    is_auto,
                    signature: TypeSignature::new(info.element, info.type_name.clone()),
                    module: module.clone(),
                });
            }
        }
    }

    let class = DbgClass {
        handle,
        token,
        module,
        generic_args,
        fields,
        properties,
    };
    Ok(DbgObject::class(signature, class, depth))
}
