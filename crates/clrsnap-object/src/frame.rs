//! Stack-frame view: one IL frame as a searchable namespace.

use smol_str::SmolStr;

use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{
    ClassToken, FieldInfo, FrameRef, MethodInfo, ModuleRef, PropertyInfo, RawValue, RuntimeFrame,
    RuntimeModule, ValueRef,
};
use clrsnap_runtime::symbols::PdbMethod;

use crate::signature::TypeSignature;

/// A named local or argument with its runtime value and static type.
pub struct FrameVariable {
    pub name: SmolStr,
    pub value: ValueRef,
    pub signature: TypeSignature,
}

/// Result of a `(type, member)` lookup against metadata.
pub enum MemberLookup {
    Field {
        declaring: ClassToken,
        info: FieldInfo,
    },
    Property {
        declaring: ClassToken,
        info: PropertyInfo,
        /// Backing field when the property is auto-implemented.
        backing: Option<FieldInfo>,
    },
}

/// A single IL frame with its variables paired to names.
///
/// Local names come from the PDB's slot table (`variable_<slot>` when a
/// slot has no record, hidden slots dropped); argument names come from
/// method metadata with the implicit `this` surfaced first on instance
/// methods. The view never caches materialised objects; evaluators re-read
/// values through it.
pub struct StackFrameView {
    frame: FrameRef,
    module: ModuleRef,
    method_name: SmolStr,
    declaring_class: ClassToken,
    is_static_method: bool,
    locals: Vec<FrameVariable>,
    arguments: Vec<FrameVariable>,
}

impl StackFrameView {
    pub fn new(frame: &FrameRef) -> Result<Self, DebugError> {
        let module = frame.module();
        let info = module.method_info(frame.method_token())?;
        let pdb_method = module
            .symbols()
            .and_then(|symbols| find_pdb_method(&symbols, frame.method_token()));

        let locals = build_locals(frame, pdb_method.as_ref())?;
        let arguments = build_arguments(frame, &info)?;

        Ok(Self {
            frame: frame.clone(),
            module,
            method_name: info.name.clone(),
            declaring_class: info.declaring_class,
            is_static_method: info.is_static,
            locals,
            arguments,
        })
    }

    #[must_use]
    pub fn method_name(&self) -> &SmolStr {
        &self.method_name
    }

    #[must_use]
    pub fn frame(&self) -> &FrameRef {
        &self.frame
    }

    #[must_use]
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    #[must_use]
    pub fn declaring_class(&self) -> ClassToken {
        self.declaring_class
    }

    #[must_use]
    pub fn is_static_method(&self) -> bool {
        self.is_static_method
    }

    #[must_use]
    pub fn locals(&self) -> &[FrameVariable] {
        &self.locals
    }

    #[must_use]
    pub fn arguments(&self) -> &[FrameVariable] {
        &self.arguments
    }

    /// Look a name up among locals first, then arguments.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&FrameVariable> {
        self.locals
            .iter()
            .find(|variable| variable.name == name)
            .or_else(|| {
                self.arguments
                    .iter()
                    .find(|variable| variable.name == name)
            })
    }

    /// The implicit receiver, when the frame is an instance method.
    #[must_use]
    pub fn this(&self) -> Option<&FrameVariable> {
        if self.is_static_method {
            return None;
        }
        self.arguments.iter().find(|variable| variable.name == "this")
    }

    /// Resolve a fully qualified type name within the frame's module.
    #[must_use]
    pub fn find_type(&self, name: &str) -> Option<ClassToken> {
        self.module.find_class(name)
    }

    /// Resolve a member on a class, traversing the base chain.
    pub fn lookup_member(
        &self,
        class: ClassToken,
        member: &str,
    ) -> Result<Option<MemberLookup>, DebugError> {
        let mut current = Some(class);
        while let Some(token) = current {
            let fields = self.module.fields_of(token)?;
            if let Some(info) = fields.iter().find(|field| field.name == member) {
                return Ok(Some(MemberLookup::Field {
                    declaring: token,
                    info: info.clone(),
                }));
            }
            let properties = self.module.properties_of(token)?;
            if let Some(info) = properties.iter().find(|prop| prop.name == member) {
                let backing_name = format!("<{member}>k__BackingField");
                let backing = fields
                    .iter()
                    .find(|field| field.name == backing_name)
                    .cloned();
                return Ok(Some(MemberLookup::Property {
                    declaring: token,
                    info: info.clone(),
                    backing,
                }));
            }
            current = self.module.base_class(token)?;
        }
        Ok(None)
    }

    /// Resolve a member on a named type.
    pub fn lookup_type_member(
        &self,
        type_name: &str,
        member: &str,
    ) -> Result<Option<MemberLookup>, DebugError> {
        match self.find_type(type_name) {
            Some(class) => self.lookup_member(class, member),
            None => Ok(None),
        }
    }

    /// Methods named `name` on `class` and its bases, for call resolution.
    pub fn methods_named(
        &self,
        class: ClassToken,
        name: &str,
    ) -> Result<Vec<MethodInfo>, DebugError> {
        let mut found = Vec::new();
        let mut current = Some(class);
        while let Some(token) = current {
            found.extend(self.module.methods_named(token, name)?);
            current = self.module.base_class(token)?;
        }
        Ok(found)
    }
}

fn find_pdb_method(
    symbols: &clrsnap_runtime::symbols::PdbInfo,
    token: u32,
) -> Option<PdbMethod> {
    symbols
        .documents
        .iter()
        .flat_map(|document| document.methods.iter())
        .find(|method| method.token == token)
        .cloned()
}

fn build_locals(
    frame: &FrameRef,
    pdb_method: Option<&PdbMethod>,
) -> Result<Vec<FrameVariable>, DebugError> {
    let mut locals = Vec::new();
    for (slot, value) in frame.locals()?.into_iter().enumerate() {
        let slot = slot as u32;
        let record = pdb_method.and_then(|method| method.local_name(slot));
        if record.is_some_and(|local| local.hidden) {
            continue;
        }
        let name = record
            .map(|local| local.name.clone())
            .unwrap_or_else(|| SmolStr::new(format!("variable_{slot}")));
        let signature = signature_of(&value);
        locals.push(FrameVariable {
            name,
            value,
            signature,
        });
    }
    Ok(locals)
}

fn build_arguments(frame: &FrameRef, info: &MethodInfo) -> Result<Vec<FrameVariable>, DebugError> {
    let mut arguments = Vec::new();
    for (index, value) in frame.arguments()?.into_iter().enumerate() {
        let name = if !info.is_static && index == 0 {
            SmolStr::new_static("this")
        } else {
            let param_index = if info.is_static { index } else { index - 1 };
            info.params
                .get(param_index)
                .map(|param| param.name.clone())
                .unwrap_or_else(|| SmolStr::new(format!("arg_{index}")))
        };
        let signature = signature_of(&value);
        arguments.push(FrameVariable {
            name,
            value,
            signature,
        });
    }
    Ok(arguments)
}

fn signature_of(value: &ValueRef) -> TypeSignature {
    value
        .exact_type()
        .map(|t| TypeSignature::from_type(&t))
        .unwrap_or_else(|_| TypeSignature::new(value.element_type(), "?"))
}

#[cfg(test)]
mod tests {
    use clrsnap_runtime::harness::{
        ClassBuilder, FrameBuilder, SimBehavior, SimModule, SimValue,
    };
    use clrsnap_runtime::surface::ElementType;
    use clrsnap_runtime::symbols::{PdbDocument, PdbInfo, PdbLocal, PdbMethod};
    use std::sync::Arc;

    use super::*;

    fn module_with_method() -> (Arc<SimModule>, Arc<clrsnap_runtime::harness::SimClass>, u32) {
        let module = SimModule::new("/work/app/bin/app.dll");
        let widget = ClassBuilder::new("App.Widget")
            .field("count", ElementType::I4, "System.Int32")
            .auto_property("Name", ElementType::String, "System.String")
            .method(
                "Tick",
                false,
                vec![("delta", ElementType::I4, "System.Int32")],
                (ElementType::I4, "System.Int32"),
                SimBehavior::Returns(Arc::new(|_, args| {
                    args.first()
                        .cloned()
                        .ok_or_else(|| SmolStr::new("System.ArgumentException"))
                })),
            )
            .build();
        module.add_class(&widget);
        let method = widget.method_token("Tick").unwrap();
        module.set_symbols(PdbInfo {
            documents: vec![PdbDocument {
                path: "/work/app/Widget.cs".into(),
                methods: vec![PdbMethod {
                    token: method,
                    first_line: 5,
                    last_line: 30,
                    sequence_points: Vec::new(),
                    locals: vec![
                        PdbLocal {
                            slot: 0,
                            name: "total".into(),
                            hidden: false,
                        },
                        PdbLocal {
                            slot: 1,
                            name: "<compiler>5__1".into(),
                            hidden: true,
                        },
                    ],
                }],
            }],
        });
        (module, widget, method)
    }

    #[test]
    fn locals_pair_with_pdb_names_and_skip_hidden() {
        let (module, widget, method) = module_with_method();
        let this = widget.instance(vec![("count", SimValue::i4(5) as ValueRef)]);
        let frame = FrameBuilder::new(&module, method)
            .local(SimValue::i4(10))
            .local(SimValue::i4(99))
            .local(SimValue::boolean(true))
            .arg(this)
            .arg(SimValue::i4(2))
            .build();

        let view = StackFrameView::new(&frame).unwrap();
        assert_eq!(view.method_name(), "Tick");
        let names: Vec<&str> = view.locals().iter().map(|v| v.name.as_str()).collect();
        // Slot 1 is hidden, slot 2 has no PDB record.
        assert_eq!(names, vec!["total", "variable_2"]);

        let args: Vec<&str> = view.arguments().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(args, vec!["this", "delta"]);
        assert!(view.this().is_some());
        assert!(!view.is_static_method());
    }

    #[test]
    fn lookup_prefers_locals_then_arguments() {
        let (module, widget, method) = module_with_method();
        let this = widget.instance(vec![]);
        let frame = FrameBuilder::new(&module, method)
            .local(SimValue::i4(1))
            .arg(this)
            .arg(SimValue::i4(2))
            .build();
        let view = StackFrameView::new(&frame).unwrap();

        assert_eq!(view.lookup("total").unwrap().signature.name, "System.Int32");
        assert!(view.lookup("delta").is_some());
        assert!(view.lookup("missing").is_none());
    }

    #[test]
    fn member_lookup_walks_the_base_chain() {
        let module = SimModule::new("app.dll");
        let base = ClassBuilder::new("App.Base")
            .field("id", ElementType::I4, "System.Int32")
            .build();
        let derived = ClassBuilder::new("App.Derived")
            .base(&base)
            .auto_property("Name", ElementType::String, "System.String")
            .method(
                "M",
                false,
                vec![],
                (ElementType::I4, "System.Int32"),
                SimBehavior::Throws("System.Exception".into()),
            )
            .build();
        module.add_class(&base);
        module.add_class(&derived);

        let frame = FrameBuilder::new(&module, derived.method_token("M").unwrap())
            .arg(derived.instance(vec![]))
            .build();
        let view = StackFrameView::new(&frame).unwrap();

        match view.lookup_member(derived.token(), "id").unwrap() {
            Some(MemberLookup::Field { declaring, info }) => {
                assert_eq!(declaring, base.token());
                assert_eq!(info.name, "id");
            }
            _ => panic!("expected inherited field"),
        }

        match view.lookup_member(derived.token(), "Name").unwrap() {
            Some(MemberLookup::Property { backing, .. }) => {
                assert!(backing.is_some(), "auto property should expose backing");
            }
            _ => panic!("expected property"),
        }

        assert!(view.lookup_member(derived.token(), "nope").unwrap().is_none());
        assert!(view
            .lookup_type_member("App.Derived", "id")
            .unwrap()
            .is_some());
    }
}
