//! Literal evaluator: wraps a value constructed at parse time.

use smol_str::SmolStr;

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::Scalar;

use crate::ast::Expr;

use super::{EvalScope, ExpressionEvaluator};

enum LiteralValue {
    Scalar(Scalar),
    Str(SmolStr),
    Null,
}

pub struct LiteralEvaluator {
    value: LiteralValue,
    signature: TypeSignature,
}

impl LiteralEvaluator {
    pub fn new(expr: &Expr) -> Self {
        let value = match expr {
            Expr::Int { value, is_long } => {
                if *is_long {
                    LiteralValue::Scalar(Scalar::I8(*value))
                } else {
                    LiteralValue::Scalar(Scalar::I4(*value as i32))
                }
            }
            Expr::Float { value, is_double } => {
                if *is_double {
                    LiteralValue::Scalar(Scalar::R8(*value))
                } else {
                    LiteralValue::Scalar(Scalar::R4(*value as f32))
                }
            }
            Expr::Char(unit) => LiteralValue::Scalar(Scalar::Char(*unit)),
            Expr::Bool(value) => LiteralValue::Scalar(Scalar::Bool(*value)),
            Expr::Str(text) => LiteralValue::Str(text.clone()),
            _ => LiteralValue::Null,
        };
        let signature = match &value {
            LiteralValue::Scalar(scalar) => TypeSignature::primitive(scalar.element_type()),
            LiteralValue::Str(_) => TypeSignature::string(),
            LiteralValue::Null => TypeSignature::object(),
        };
        Self { value, signature }
    }
}

impl ExpressionEvaluator for LiteralEvaluator {
    fn compile(&mut self, _frame: &StackFrameView) -> Result<(), DebugError> {
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, _scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        Ok(match &self.value {
            LiteralValue::Scalar(scalar) => DbgObject::primitive(*scalar),
            LiteralValue::Str(text) => DbgObject::string_literal(text.to_string()),
            LiteralValue::Null => DbgObject::null(TypeSignature::object()),
        })
    }
}
