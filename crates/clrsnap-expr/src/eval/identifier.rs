//! Identifier evaluator: locals, arguments, then implicit members.

use smol_str::SmolStr;

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;

use super::member::MemberBinding;
use super::{EvalScope, ExpressionEvaluator};

enum IdentBinding {
    /// A local or argument; re-read from the frame at each evaluate.
    Variable,
    /// A member reached through the implicit `this`.
    ThisMember(MemberBinding),
    /// A static member of the containing class.
    StaticMember(MemberBinding),
}

pub struct IdentifierEvaluator {
    name: SmolStr,
    binding: Option<IdentBinding>,
    signature: TypeSignature,
}

impl IdentifierEvaluator {
    pub fn new(name: SmolStr) -> Self {
        Self {
            name,
            binding: None,
            signature: TypeSignature::object(),
        }
    }
}

impl ExpressionEvaluator for IdentifierEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        if let Some(variable) = frame.lookup(&self.name) {
            self.signature = variable.signature.clone();
            self.binding = Some(IdentBinding::Variable);
            return Ok(());
        }

        // Not a variable: try `this.name`, then statics of the containing
        // class.
        if let Some(lookup) = frame.lookup_member(frame.declaring_class(), &self.name)? {
            let binding = MemberBinding::from_lookup(lookup)?;
            self.signature = binding.signature().clone();
            if binding.needs_receiver() {
                if frame.this().is_none() {
                    return Err(DebugError::UndefinedName(self.name.clone()));
                }
                self.binding = Some(IdentBinding::ThisMember(binding));
            } else {
                self.binding = Some(IdentBinding::StaticMember(binding));
            }
            return Ok(());
        }

        Err(DebugError::UndefinedName(self.name.clone()))
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| DebugError::internal("identifier evaluated before compile"))?;
        match binding {
            IdentBinding::Variable => {
                let variable = scope
                    .frame
                    .lookup(&self.name)
                    .ok_or_else(|| DebugError::UndefinedName(self.name.clone()))?;
                Ok(scope.factory.create(&variable.value, scope.depth))
            }
            IdentBinding::ThisMember(member) => {
                let this = scope
                    .frame
                    .this()
                    .ok_or_else(|| DebugError::UndefinedName(self.name.clone()))?;
                member.read(scope, Some(this.value.clone()))
            }
            IdentBinding::StaticMember(member) => member.read(scope, None),
        }
    }
}
