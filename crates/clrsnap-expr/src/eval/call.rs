//! Method calls: `a.m(args)`, `TypeName.m(args)`, and bare `m(args)`.

use smol_str::SmolStr;

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{ClassToken, ElementType, MethodInfo};

use crate::promote::unary_kind;

use super::{dispatch_call, receiver_value, EvalScope, ExpressionEvaluator};

/// How well an argument fits a parameter, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ArgFit {
    Exact,
    NumericPromotion,
    ReferenceUpcast,
}

pub struct CallEvaluator {
    target: Option<Box<dyn ExpressionEvaluator>>,
    target_type_name: Option<String>,
    name: SmolStr,
    args: Vec<Box<dyn ExpressionEvaluator>>,
    resolved: Option<MethodInfo>,
    /// Whether the receiver expression is used at evaluate time.
    through_value: bool,
    signature: TypeSignature,
}

impl CallEvaluator {
    pub fn new(
        target: Option<Box<dyn ExpressionEvaluator>>,
        target_type_name: Option<String>,
        name: SmolStr,
        args: Vec<Box<dyn ExpressionEvaluator>>,
    ) -> Self {
        Self {
            target,
            target_type_name,
            name,
            args,
            resolved: None,
            through_value: false,
            signature: TypeSignature::object(),
        }
    }

    fn fit(&self, param_element: ElementType, param_type: &str, arg: &TypeSignature) -> Option<ArgFit> {
        if param_element == arg.element && (param_type == arg.name || param_element.is_primitive())
        {
            return Some(ArgFit::Exact);
        }
        let param_numeric = unary_kind(param_element).is_some();
        let arg_numeric = unary_kind(arg.element).is_some();
        if param_numeric && arg_numeric {
            return Some(ArgFit::NumericPromotion);
        }
        let param_reference = matches!(
            param_element,
            ElementType::Class | ElementType::Object | ElementType::String
        );
        if param_reference && arg.is_reference_type() {
            return Some(ArgFit::ReferenceUpcast);
        }
        None
    }

    /// Best-match overload selection: exact beats numeric promotion beats
    /// reference upcast, judged by each candidate's worst argument.
    /// Two survivors in the same tier make the call ambiguous.
    fn select_overload(&self, candidates: Vec<MethodInfo>) -> Result<MethodInfo, DebugError> {
        let mut scored: Vec<(ArgFit, MethodInfo)> = Vec::new();
        for candidate in candidates {
            if candidate.params.len() != self.args.len() {
                continue;
            }
            let mut worst = ArgFit::Exact;
            let mut feasible = true;
            for (param, arg) in candidate.params.iter().zip(&self.args) {
                match self.fit(param.element, &param.type_name, arg.static_type()) {
                    Some(fit) => worst = worst.max(fit),
                    None => {
                        feasible = false;
                        break;
                    }
                }
            }
            if feasible {
                scored.push((worst, candidate));
            }
        }

        let best = scored
            .iter()
            .map(|(fit, _)| *fit)
            .min()
            .ok_or_else(|| DebugError::MethodResolution(self.name.clone()))?;
        let mut winners = scored.into_iter().filter(|(fit, _)| *fit == best);
        let winner = winners
            .next()
            .ok_or_else(|| DebugError::MethodResolution(self.name.clone()))?;
        if winners.next().is_some() {
            return Err(DebugError::MethodResolution(
                format!("ambiguous call to '{}'", self.name).into(),
            ));
        }
        Ok(winner.1)
    }
}

impl ExpressionEvaluator for CallEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        for arg in &mut self.args {
            arg.compile(frame)?;
        }

        // Find the class to search: the receiver's static type, a dotted
        // type name, or the containing class for a bare call.
        let mut class: Option<ClassToken> = None;
        self.through_value = false;
        if let Some(target) = &mut self.target {
            if target.compile(frame).is_ok() {
                class = frame.find_type(&target.static_type().name);
                self.through_value = class.is_some();
            }
            if class.is_none() {
                if let Some(type_name) = &self.target_type_name {
                    class = frame.find_type(type_name);
                }
            }
        } else {
            class = Some(frame.declaring_class());
        }
        let class = class.ok_or_else(|| DebugError::MethodResolution(self.name.clone()))?;

        let candidates = frame.methods_named(class, &self.name)?;
        let resolved = self.select_overload(candidates)?;
        if !resolved.is_static && !self.through_value && self.target.is_some() {
            // `TypeName.m(...)` on an instance method cannot work.
            return Err(DebugError::MethodResolution(self.name.clone()));
        }
        self.signature =
            TypeSignature::new(resolved.return_element, resolved.return_type_name.clone());
        self.resolved = Some(resolved);
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let resolved = self
            .resolved
            .as_ref()
            .ok_or_else(|| DebugError::internal("call evaluated before compile"))?;

        let receiver = if resolved.is_static {
            None
        } else if let Some(target) = &self.target {
            let value = target.evaluate(scope)?;
            if value.is_null() {
                return Err(DebugError::NullReference);
            }
            Some(receiver_value(&value)?)
        } else {
            let this = scope.frame.this().ok_or_else(|| {
                DebugError::MethodResolution(self.name.clone())
            })?;
            Some(this.value.clone())
        };

        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            args.push(arg.evaluate(scope)?);
        }
        dispatch_call(
            scope,
            scope.frame.module(),
            resolved.token,
            receiver,
            &args,
        )
    }
}
