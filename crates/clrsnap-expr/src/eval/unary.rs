//! Unary operators: `+ - ! ~`.

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::Scalar;

use crate::ast::UnaryOp;
use crate::promote::{convert, unary_kind, Num, NumericKind};

use super::{object_to_bool, object_to_num, EvalScope, ExpressionEvaluator};

pub struct UnaryEvaluator {
    op: UnaryOp,
    operand: Box<dyn ExpressionEvaluator>,
    kind: Option<NumericKind>,
    signature: TypeSignature,
}

impl UnaryEvaluator {
    pub fn new(op: UnaryOp, operand: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            op,
            operand,
            kind: None,
            signature: TypeSignature::boolean(),
        }
    }
}

impl ExpressionEvaluator for UnaryEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        self.operand.compile(frame)?;
        let operand_type = self.operand.static_type();

        match self.op {
            UnaryOp::Not => {
                if !operand_type.is_boolean() {
                    return Err(DebugError::Type("operator '!' needs a boolean".into()));
                }
                self.signature = TypeSignature::boolean();
            }
            UnaryOp::Complement => {
                let kind = unary_kind(operand_type.element)
                    .filter(|kind| !kind.is_float())
                    .ok_or_else(|| DebugError::Type("operator '~' needs an integer".into()))?;
                self.kind = Some(kind);
                self.signature = TypeSignature::primitive(kind.element_type());
            }
            UnaryOp::Plus => {
                let kind = unary_kind(operand_type.element)
                    .ok_or_else(|| DebugError::Type("operator '+' needs a number".into()))?;
                self.kind = Some(kind);
                self.signature = TypeSignature::primitive(kind.element_type());
            }
            UnaryOp::Minus => {
                let kind = unary_kind(operand_type.element)
                    .ok_or_else(|| DebugError::Type("operator '-' needs a number".into()))?;
                // Negating uint widens to long so the value cannot wrap;
                // negating ulong has no representable type.
                let kind = match kind {
                    NumericKind::U4 => NumericKind::I8,
                    NumericKind::U8 => {
                        return Err(DebugError::Type("operator '-' cannot negate ulong".into()));
                    }
                    other => other,
                };
                self.kind = Some(kind);
                self.signature = TypeSignature::primitive(kind.element_type());
            }
        }
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let operand = self.operand.evaluate(scope)?;

        if self.op == UnaryOp::Not {
            let value = object_to_bool(&operand)?;
            return Ok(DbgObject::primitive(Scalar::Bool(!value)));
        }

        let kind = self
            .kind
            .ok_or_else(|| DebugError::internal("unary operator evaluated before compile"))?;
        let num = convert(object_to_num(&operand)?, kind);
        let result = match (self.op, num) {
            (UnaryOp::Plus, num) => num,
            (UnaryOp::Minus, Num::I4(value)) => Num::I4(value.wrapping_neg()),
            (UnaryOp::Minus, Num::I8(value)) => Num::I8(value.wrapping_neg()),
            (UnaryOp::Minus, Num::R4(value)) => Num::R4(-value),
            (UnaryOp::Minus, Num::R8(value)) => Num::R8(-value),
            (UnaryOp::Complement, Num::I4(value)) => Num::I4(!value),
            (UnaryOp::Complement, Num::U4(value)) => Num::U4(!value),
            (UnaryOp::Complement, Num::I8(value)) => Num::I8(!value),
            (UnaryOp::Complement, Num::U8(value)) => Num::U8(!value),
            _ => return Err(DebugError::internal("unary operator on unexpected kind")),
        };
        Ok(DbgObject::primitive(result.to_scalar()))
    }
}
