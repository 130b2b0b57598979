//! The conditional operator `a ? b : c`.

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;

use crate::promote::{binary_kind, convert, unary_kind, NumericKind};

use super::{object_to_bool, object_to_num, EvalScope, ExpressionEvaluator};

pub struct ConditionalEvaluator {
    condition: Box<dyn ExpressionEvaluator>,
    if_true: Box<dyn ExpressionEvaluator>,
    if_false: Box<dyn ExpressionEvaluator>,
    /// Set when the branches are numeric and promote to a common kind.
    kind: Option<NumericKind>,
    signature: TypeSignature,
}

impl ConditionalEvaluator {
    pub fn new(
        condition: Box<dyn ExpressionEvaluator>,
        if_true: Box<dyn ExpressionEvaluator>,
        if_false: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            condition,
            if_true,
            if_false,
            kind: None,
            signature: TypeSignature::object(),
        }
    }
}

impl ExpressionEvaluator for ConditionalEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        self.condition.compile(frame)?;
        if !self.condition.static_type().is_boolean() {
            return Err(DebugError::Type(
                "conditional operator needs a boolean condition".into(),
            ));
        }
        self.if_true.compile(frame)?;
        self.if_false.compile(frame)?;

        let left = self.if_true.static_type();
        let right = self.if_false.static_type();

        // Numeric branches take the promoted common type; reference
        // branches need a common reference type.
        if let (Some(a), Some(b)) = (unary_kind(left.element), unary_kind(right.element)) {
            let kind = binary_kind(a, b)?;
            self.kind = Some(kind);
            self.signature = TypeSignature::primitive(kind.element_type());
            return Ok(());
        }
        if left.is_boolean() && right.is_boolean() {
            self.signature = TypeSignature::boolean();
            return Ok(());
        }
        if left.is_reference_type() && right.is_reference_type() {
            self.signature = if left.name == right.name {
                left.clone()
            } else if left.name == "System.Object" {
                right.clone()
            } else if right.name == "System.Object" {
                left.clone()
            } else {
                return Err(DebugError::Type(
                    format!(
                        "no common type between '{}' and '{}'",
                        left.display(),
                        right.display()
                    )
                    .into(),
                ));
            };
            return Ok(());
        }
        Err(DebugError::Type(
            format!(
                "no common type between '{}' and '{}'",
                left.display(),
                right.display()
            )
            .into(),
        ))
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let condition = object_to_bool(&self.condition.evaluate(scope)?)?;
        // Exactly one branch runs.
        let branch = if condition {
            self.if_true.evaluate(scope)?
        } else {
            self.if_false.evaluate(scope)?
        };
        if let Some(kind) = self.kind {
            let num = convert(object_to_num(&branch)?, kind);
            return Ok(DbgObject::primitive(num.to_scalar()));
        }
        Ok(branch)
    }
}
