//! The cast operator `(T) x`.

use smol_str::SmolStr;

use clrsnap_object::{keyword_type, DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{ElementType, RawValue, RuntimeType, Scalar};

use super::{EvalScope, ExpressionEvaluator};

enum CastMode {
    /// Numeric conversion with C# unchecked semantics.
    Numeric(ElementType),
    /// Runtime base-chain check on a reference value.
    Reference,
    /// Same type on both sides.
    Identity,
}

pub struct CastEvaluator {
    target: SmolStr,
    operand: Box<dyn ExpressionEvaluator>,
    mode: Option<CastMode>,
    signature: TypeSignature,
}

impl CastEvaluator {
    pub fn new(target: SmolStr, operand: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            target,
            operand,
            mode: None,
            signature: TypeSignature::object(),
        }
    }
}

impl ExpressionEvaluator for CastEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        self.operand.compile(frame)?;
        let target =
            keyword_type(&self.target).unwrap_or_else(|| TypeSignature::class(self.target.clone()));
        let operand = self.operand.static_type();

        // Boolean does not convert to or from numbers.
        let bool_numeric_mix = (target.is_boolean() && operand.is_numeric())
            || (target.is_numeric() && operand.is_boolean());
        if bool_numeric_mix {
            return Err(DebugError::Type(
                "cannot cast between bool and a numeric type".into(),
            ));
        }

        let mode = if target.element == operand.element && target.name == operand.name {
            CastMode::Identity
        } else if target.is_numeric() && operand.is_numeric() {
            CastMode::Numeric(target.element)
        } else if target.is_reference_type() && operand.is_reference_type() {
            CastMode::Reference
        } else {
            return Err(DebugError::NotImplemented(
                format!(
                    "cast from '{}' to '{}'",
                    operand.display(),
                    target.display()
                )
                .into(),
            ));
        };

        self.mode = Some(mode);
        self.signature = target;
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let mode = self
            .mode
            .as_ref()
            .ok_or_else(|| DebugError::internal("cast evaluated before compile"))?;
        let operand = self.operand.evaluate(scope)?;
        match mode {
            CastMode::Identity => Ok(operand),
            CastMode::Numeric(element) => {
                let scalar = operand
                    .scalar()
                    .ok_or_else(|| DebugError::Type("cast needs a numeric value".into()))?;
                let converted = convert_scalar(scalar, *element)
                    .ok_or_else(|| DebugError::InvalidCast(self.target.clone()))?;
                Ok(DbgObject::primitive(converted))
            }
            CastMode::Reference => {
                // Casting null succeeds and stays null.
                if operand.is_null() {
                    return Ok(operand);
                }
                if type_chain_contains(&operand, &self.signature.name)? {
                    Ok(operand)
                } else {
                    Err(DebugError::InvalidCast(self.target.clone()))
                }
            }
        }
    }
}

/// Walk the runtime base chain of the operand's pinned object looking for
/// the target type name.
fn type_chain_contains(operand: &DbgObject, target: &str) -> Result<bool, DebugError> {
    if target == "System.Object" || operand.signature().name == target {
        return Ok(true);
    }
    let Some(handle) = operand.handle() else {
        return Ok(false);
    };
    let value = handle.dereference()?;
    let mut current: Option<std::sync::Arc<dyn RuntimeType>> = Some(value.exact_type()?);
    while let Some(runtime_type) = current {
        if runtime_type.name() == target {
            return Ok(true);
        }
        current = runtime_type.base();
    }
    Ok(false)
}

/// Numeric conversions with C# unchecked semantics. Float-to-integral
/// conversion truncates toward zero.
fn convert_scalar(scalar: Scalar, target: ElementType) -> Option<Scalar> {
    macro_rules! widen {
        ($value:expr) => {
            match target {
                ElementType::I1 => Scalar::I1($value as i8),
                ElementType::U1 => Scalar::U1($value as u8),
                ElementType::I2 => Scalar::I2($value as i16),
                ElementType::U2 => Scalar::U2($value as u16),
                ElementType::Char => Scalar::Char($value as u16),
                ElementType::I4 => Scalar::I4($value as i32),
                ElementType::U4 => Scalar::U4($value as u32),
                ElementType::I8 => Scalar::I8($value as i64),
                ElementType::U8 => Scalar::U8($value as u64),
                ElementType::I => Scalar::I($value as i64),
                ElementType::U => Scalar::U($value as u64),
                ElementType::R4 => Scalar::R4($value as f32),
                ElementType::R8 => Scalar::R8($value as f64),
                _ => return None,
            }
        };
    }
    Some(match scalar {
        Scalar::I1(value) => widen!(value),
        Scalar::U1(value) => widen!(value),
        Scalar::I2(value) => widen!(value),
        Scalar::U2(value) => widen!(value),
        Scalar::Char(value) => widen!(value),
        Scalar::I4(value) => widen!(value),
        Scalar::U4(value) => widen!(value),
        Scalar::I8(value) => widen!(value),
        Scalar::U8(value) => widen!(value),
        Scalar::I(value) => widen!(value),
        Scalar::U(value) => widen!(value),
        Scalar::R4(value) => widen!(value),
        Scalar::R8(value) => widen!(value),
        Scalar::Bool(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_conversions_narrow_like_unchecked_csharp() {
        assert_eq!(
            convert_scalar(Scalar::I4(300), ElementType::U1),
            Some(Scalar::U1(44))
        );
        assert_eq!(
            convert_scalar(Scalar::R8(3.9), ElementType::I4),
            Some(Scalar::I4(3))
        );
        assert_eq!(
            convert_scalar(Scalar::I4(-1), ElementType::U4),
            Some(Scalar::U4(u32::MAX))
        );
        assert_eq!(convert_scalar(Scalar::Bool(true), ElementType::I4), None);
    }
}
