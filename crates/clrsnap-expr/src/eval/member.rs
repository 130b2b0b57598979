//! Field and property access: `a.m` and `TypeName.m`.

use smol_str::SmolStr;

use clrsnap_object::{DbgObject, MemberLookup, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{
    ClassToken, FieldToken, MethodToken, RawValue, RuntimeFrame, ValueRef,
};

use super::{dispatch_call, receiver_value, EvalScope, ExpressionEvaluator};

/// A compiled member reference.
#[derive(Clone)]
pub enum MemberBinding {
    InstanceField {
        declaring: ClassToken,
        token: FieldToken,
        signature: TypeSignature,
    },
    StaticField {
        declaring: ClassToken,
        token: FieldToken,
        signature: TypeSignature,
    },
    /// Auto-implemented property, read through its backing field.
    AutoProperty {
        declaring: ClassToken,
        backing: FieldToken,
        signature: TypeSignature,
    },
    /// Non-auto property; reading dispatches the getter.
    Getter {
        token: MethodToken,
        is_static: bool,
        signature: TypeSignature,
    },
}

impl MemberBinding {
    /// Bind a metadata lookup result.
    pub(crate) fn from_lookup(lookup: MemberLookup) -> Result<Self, DebugError> {
        match lookup {
            MemberLookup::Field { declaring, info } => {
                let signature = TypeSignature::new(info.element, info.type_name.clone());
                if info.is_static {
                    Ok(MemberBinding::StaticField {
                        declaring,
                        token: info.token,
                        signature,
                    })
                } else {
                    Ok(MemberBinding::InstanceField {
                        declaring,
                        token: info.token,
                        signature,
                    })
                }
            }
            MemberLookup::Property {
                declaring,
                info,
                backing,
            } => {
                let signature = TypeSignature::new(info.element, info.type_name.clone());
                if let Some(backing) = backing {
                    if info.is_static {
                        Ok(MemberBinding::StaticField {
                            declaring,
                            token: backing.token,
                            signature,
                        })
                    } else {
                        Ok(MemberBinding::AutoProperty {
                            declaring,
                            backing: backing.token,
                            signature,
                        })
                    }
                } else {
                    let token = info.getter.ok_or_else(|| {
                        DebugError::NotImplemented("property has no getter".into())
                    })?;
                    Ok(MemberBinding::Getter {
                        token,
                        is_static: info.is_static,
                        signature,
                    })
                }
            }
        }
    }

    pub(crate) fn signature(&self) -> &TypeSignature {
        match self {
            MemberBinding::InstanceField { signature, .. }
            | MemberBinding::StaticField { signature, .. }
            | MemberBinding::AutoProperty { signature, .. }
            | MemberBinding::Getter { signature, .. } => signature,
        }
    }

    #[must_use]
    pub(crate) fn needs_receiver(&self) -> bool {
        matches!(
            self,
            MemberBinding::InstanceField { .. } | MemberBinding::AutoProperty { .. }
        ) || matches!(self, MemberBinding::Getter { is_static: false, .. })
    }

    /// Read the bound member. `receiver` is the raw instance value when the
    /// binding needs one.
    pub(crate) fn read(
        &self,
        scope: &EvalScope<'_>,
        receiver: Option<ValueRef>,
    ) -> Result<DbgObject, DebugError> {
        match self {
            MemberBinding::InstanceField {
                declaring, token, ..
            }
            | MemberBinding::AutoProperty {
                declaring,
                backing: token,
                ..
            } => {
                let receiver =
                    receiver.ok_or_else(|| DebugError::runtime("missing receiver"))?;
                let (view, is_null) = scope.factory.dereference_and_unbox(&receiver)?;
                if is_null {
                    return Err(DebugError::NullReference);
                }
                let value = view.field_value(*declaring, *token)?;
                Ok(scope.factory.create(&value, scope.depth))
            }
            MemberBinding::StaticField {
                declaring, token, ..
            } => {
                let value = scope.frame.frame().static_field_value(*declaring, *token)?;
                Ok(scope.factory.create(&value, scope.depth))
            }
            MemberBinding::Getter {
                token, is_static, ..
            } => {
                let receiver = if *is_static {
                    None
                } else {
                    Some(receiver.ok_or_else(|| DebugError::runtime("missing receiver"))?)
                };
                dispatch_call(scope, scope.frame.module(), *token, receiver, &[])
            }
        }
    }
}

/// Inline-copied field of a value-type instance, when the binding reads a
/// field the materialiser already captured.
fn inline_field(target: &DbgObject, binding: &MemberBinding) -> Option<DbgObject> {
    let token = match binding {
        MemberBinding::InstanceField { token, .. } => *token,
        MemberBinding::AutoProperty { backing, .. } => *backing,
        _ => return None,
    };
    let class = target.as_class()?;
    class
        .fields()
        .iter()
        .find(|field| field.token == token)
        .map(|field| field.value.clone())
}

enum CompiledAccess {
    /// Member of the target expression's value.
    Value(MemberBinding),
    /// Static member of a dotted type name.
    Static(MemberBinding),
}

pub struct MemberEvaluator {
    target: Box<dyn ExpressionEvaluator>,
    /// Dotted type-name reading of the target, when it has one.
    target_type_name: Option<String>,
    member: SmolStr,
    access: Option<CompiledAccess>,
    signature: TypeSignature,
}

impl MemberEvaluator {
    pub fn new(
        target: Box<dyn ExpressionEvaluator>,
        target_type_name: Option<String>,
        member: SmolStr,
    ) -> Self {
        Self {
            target,
            target_type_name,
            member,
            access: None,
            signature: TypeSignature::object(),
        }
    }

    fn compile_static(&self, frame: &StackFrameView) -> Result<Option<MemberBinding>, DebugError> {
        let Some(type_name) = &self.target_type_name else {
            return Ok(None);
        };
        let Some(lookup) = frame.lookup_type_member(type_name, &self.member)? else {
            return Ok(None);
        };
        let binding = MemberBinding::from_lookup(lookup)?;
        if binding.needs_receiver() {
            // `TypeName.instanceMember` is not a thing.
            return Ok(None);
        }
        Ok(Some(binding))
    }
}

impl ExpressionEvaluator for MemberEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        // Prefer "member of the expression value"; fall back to "static
        // member of a dotted type name" when that interpretation compiles.
        let value_access = self.target.compile(frame).and_then(|()| {
            let target_type = self.target.static_type();
            let class = frame.find_type(&target_type.name).ok_or_else(|| {
                DebugError::UndefinedMember {
                    type_name: target_type.name.clone(),
                    member: self.member.clone(),
                }
            })?;
            let lookup =
                frame
                    .lookup_member(class, &self.member)?
                    .ok_or_else(|| DebugError::UndefinedMember {
                        type_name: target_type.name.clone(),
                        member: self.member.clone(),
                    })?;
            MemberBinding::from_lookup(lookup)
        });

        match value_access {
            Ok(binding) => {
                self.signature = binding.signature().clone();
                self.access = Some(CompiledAccess::Value(binding));
                Ok(())
            }
            Err(value_err) => match self.compile_static(frame)? {
                Some(binding) => {
                    self.signature = binding.signature().clone();
                    self.access = Some(CompiledAccess::Static(binding));
                    Ok(())
                }
                None => Err(value_err),
            },
        }
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let access = self
            .access
            .as_ref()
            .ok_or_else(|| DebugError::internal("member access evaluated before compile"))?;
        match access {
            CompiledAccess::Value(binding) => {
                let target = self.target.evaluate(scope)?;
                if let Some(error) = target.error() {
                    return Err(error.clone());
                }
                if target.is_null() {
                    return Err(DebugError::NullReference);
                }
                let receiver = if binding.needs_receiver() {
                    match receiver_value(&target) {
                        Ok(raw) => Some(raw),
                        // Value types hold no handle; their fields were
                        // captured inline at materialisation.
                        Err(err) => {
                            if let Some(copied) = inline_field(&target, binding) {
                                return Ok(copied);
                            }
                            return Err(err);
                        }
                    }
                } else {
                    None
                };
                binding.read(scope, receiver)
            }
            CompiledAccess::Static(binding) => binding.read(scope, None),
        }
    }
}
