//! Type signatures for materialised values.

use smol_str::SmolStr;

use clrsnap_runtime::surface::{canonical_type_name, ElementType, RuntimeType, TypeRef};

/// A `(runtime tag, fully qualified name)` pair describing a value's type.
///
/// The tag and name are kept mutually consistent: primitives carry their
/// canonical framework name, arrays carry a `[]`-suffixed element name, and
/// generic instantiations travel as a parallel argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    pub element: ElementType,
    pub name: SmolStr,
    pub generic_args: Vec<TypeSignature>,
}

impl TypeSignature {
    /// Signature of a primitive element type.
    #[must_use]
    pub fn primitive(element: ElementType) -> Self {
        let name = canonical_type_name(element).unwrap_or("?");
        Self {
            element,
            name: SmolStr::new_static(name),
            generic_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::primitive(ElementType::String)
    }

    #[must_use]
    pub fn object() -> Self {
        Self {
            element: ElementType::Object,
            name: SmolStr::new_static("System.Object"),
            generic_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::primitive(ElementType::Boolean)
    }

    #[must_use]
    pub fn class(name: impl Into<SmolStr>) -> Self {
        Self {
            element: ElementType::Class,
            name: name.into(),
            generic_args: Vec::new(),
        }
    }

    /// Signature with the given tag and name, no instantiation.
    #[must_use]
    pub fn new(element: ElementType, name: impl Into<SmolStr>) -> Self {
        Self {
            element,
            name: name.into(),
            generic_args: Vec::new(),
        }
    }

    /// Signature of an array over `element` with the given rank.
    #[must_use]
    pub fn array_of(element: TypeSignature, rank: u32) -> Self {
        let commas = ",".repeat(rank.saturating_sub(1) as usize);
        Self {
            element: if rank == 1 {
                ElementType::SzArray
            } else {
                ElementType::Array
            },
            name: SmolStr::new(format!("{}[{}]", element.name, commas)),
            generic_args: vec![element],
        }
    }

    /// Build a signature from an exact runtime type, recursively capturing
    /// the instantiation.
    #[must_use]
    pub fn from_type(runtime_type: &TypeRef) -> Self {
        let generic_args = runtime_type
            .type_args()
            .iter()
            .map(TypeSignature::from_type)
            .collect();
        Self {
            element: runtime_type.element_type(),
            name: runtime_type.name(),
            generic_args,
        }
    }

    /// Display form, expanding generic instantiations the way the debugger
    /// shows them (`System.Collections.Generic.Dictionary<System.String,
    /// System.Int32>`).
    #[must_use]
    pub fn display(&self) -> String {
        if self.element.is_array() || self.generic_args.is_empty() {
            return self.name.to_string();
        }
        let args: Vec<String> = self
            .generic_args
            .iter()
            .map(TypeSignature::display)
            .collect();
        format!("{}<{}>", self.name, args.join(", "))
    }

    /// Element signature of an array type.
    #[must_use]
    pub fn array_element(&self) -> Option<&TypeSignature> {
        if self.element.is_array() {
            self.generic_args.first()
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.element,
            ElementType::I1
                | ElementType::U1
                | ElementType::I2
                | ElementType::U2
                | ElementType::I4
                | ElementType::U4
                | ElementType::I8
                | ElementType::U8
                | ElementType::R4
                | ElementType::R8
                | ElementType::Char
                | ElementType::I
                | ElementType::U
        )
    }

    #[must_use]
    pub fn is_integral(&self) -> bool {
        self.is_numeric() && !matches!(self.element, ElementType::R4 | ElementType::R8)
    }

    #[must_use]
    pub fn is_boolean(&self) -> bool {
        self.element == ElementType::Boolean
    }

    #[must_use]
    pub fn is_string(&self) -> bool {
        self.element == ElementType::String
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.element.is_array()
    }

    /// Whether the type names a reference (heap) shape.
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        matches!(
            self.element,
            ElementType::Class | ElementType::Object | ElementType::String
        ) || self.is_array()
    }

    /// Assignment compatibility as invariant checks use it: primitives by
    /// identity, reference types by name or through `System.Object`.
    #[must_use]
    pub fn assignable_from(&self, other: &TypeSignature) -> bool {
        if self.element.is_primitive() || other.element.is_primitive() {
            return self.element == other.element;
        }
        if self.element == ElementType::Object || self.name == "System.Object" {
            return true;
        }
        self.name == other.name
    }
}

/// Primitive element type behind a framework value class, when the class is
/// one of the primitive-equivalent names (`System.Int32`, `System.Boolean`,
/// ...).
#[must_use]
pub fn primitive_equivalent(name: &str) -> Option<ElementType> {
    Some(match name {
        "System.Boolean" => ElementType::Boolean,
        "System.Char" => ElementType::Char,
        "System.SByte" => ElementType::I1,
        "System.Byte" => ElementType::U1,
        "System.Int16" => ElementType::I2,
        "System.UInt16" => ElementType::U2,
        "System.Int32" => ElementType::I4,
        "System.UInt32" => ElementType::U4,
        "System.Int64" => ElementType::I8,
        "System.UInt64" => ElementType::U8,
        "System.Single" => ElementType::R4,
        "System.Double" => ElementType::R8,
        "System.IntPtr" => ElementType::I,
        "System.UIntPtr" => ElementType::U,
        _ => return None,
    })
}

/// C# keyword aliases accepted in cast and type-name positions.
#[must_use]
pub fn keyword_type(name: &str) -> Option<TypeSignature> {
    let signature = match name {
        "bool" => TypeSignature::primitive(ElementType::Boolean),
        "char" => TypeSignature::primitive(ElementType::Char),
        "sbyte" => TypeSignature::primitive(ElementType::I1),
        "byte" => TypeSignature::primitive(ElementType::U1),
        "short" => TypeSignature::primitive(ElementType::I2),
        "ushort" => TypeSignature::primitive(ElementType::U2),
        "int" => TypeSignature::primitive(ElementType::I4),
        "uint" => TypeSignature::primitive(ElementType::U4),
        "long" => TypeSignature::primitive(ElementType::I8),
        "ulong" => TypeSignature::primitive(ElementType::U8),
        "float" => TypeSignature::primitive(ElementType::R4),
        "double" => TypeSignature::primitive(ElementType::R8),
        "string" => TypeSignature::string(),
        "object" => TypeSignature::object(),
        _ => return None,
    };
    Some(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_signatures_carry_canonical_names() {
        let signature = TypeSignature::primitive(ElementType::I4);
        assert_eq!(signature.name, "System.Int32");
        assert!(signature.is_numeric());
        assert!(signature.is_integral());
    }

    #[test]
    fn array_signature_name_reflects_rank() {
        let element = TypeSignature::primitive(ElementType::I4);
        let matrix = TypeSignature::array_of(element.clone(), 2);
        assert_eq!(matrix.name, "System.Int32[,]");
        assert_eq!(matrix.element, ElementType::Array);
        assert_eq!(matrix.array_element(), Some(&element));

        let vector = TypeSignature::array_of(element, 1);
        assert_eq!(vector.name, "System.Int32[]");
        assert_eq!(vector.element, ElementType::SzArray);
    }

    #[test]
    fn generic_display_expands_arguments() {
        let mut signature = TypeSignature::class("System.Collections.Generic.Dictionary");
        signature.generic_args = vec![
            TypeSignature::string(),
            TypeSignature::primitive(ElementType::I4),
        ];
        assert_eq!(
            signature.display(),
            "System.Collections.Generic.Dictionary<System.String, System.Int32>"
        );
    }

    #[test]
    fn assignability_is_identity_for_primitives() {
        let int = TypeSignature::primitive(ElementType::I4);
        let long = TypeSignature::primitive(ElementType::I8);
        assert!(int.assignable_from(&int));
        assert!(!int.assignable_from(&long));

        let object = TypeSignature::object();
        let class = TypeSignature::class("App.Widget");
        assert!(object.assignable_from(&class));
        assert!(class.assignable_from(&class));
    }

    #[test]
    fn keyword_aliases_resolve() {
        assert_eq!(keyword_type("int").unwrap().name, "System.Int32");
        assert_eq!(keyword_type("string").unwrap().element, ElementType::String);
        assert!(keyword_type("var").is_none());
    }
}
