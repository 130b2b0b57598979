//! C# numeric promotion rules.

use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{ElementType, Scalar};

/// The numeric kinds arithmetic is computed in after promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
}

impl NumericKind {
    #[must_use]
    pub fn element_type(self) -> ElementType {
        match self {
            NumericKind::I4 => ElementType::I4,
            NumericKind::U4 => ElementType::U4,
            NumericKind::I8 => ElementType::I8,
            NumericKind::U8 => ElementType::U8,
            NumericKind::R4 => ElementType::R4,
            NumericKind::R8 => ElementType::R8,
        }
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, NumericKind::R4 | NumericKind::R8)
    }
}

/// A numeric value in its promoted kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    I4(i32),
    U4(u32),
    I8(i64),
    U8(u64),
    R4(f32),
    R8(f64),
}

impl Num {
    #[must_use]
    pub fn kind(self) -> NumericKind {
        match self {
            Num::I4(_) => NumericKind::I4,
            Num::U4(_) => NumericKind::U4,
            Num::I8(_) => NumericKind::I8,
            Num::U8(_) => NumericKind::U8,
            Num::R4(_) => NumericKind::R4,
            Num::R8(_) => NumericKind::R8,
        }
    }

    #[must_use]
    pub fn to_scalar(self) -> Scalar {
        match self {
            Num::I4(value) => Scalar::I4(value),
            Num::U4(value) => Scalar::U4(value),
            Num::I8(value) => Scalar::I8(value),
            Num::U8(value) => Scalar::U8(value),
            Num::R4(value) => Scalar::R4(value),
            Num::R8(value) => Scalar::R8(value),
        }
    }
}

/// Unary promotion: small integrals and `char` widen to `int`.
#[must_use]
pub fn unary_kind(element: ElementType) -> Option<NumericKind> {
    Some(match element {
        ElementType::I1
        | ElementType::U1
        | ElementType::I2
        | ElementType::U2
        | ElementType::Char
        | ElementType::I4 => NumericKind::I4,
        ElementType::U4 => NumericKind::U4,
        ElementType::I8 | ElementType::I => NumericKind::I8,
        ElementType::U8 | ElementType::U => NumericKind::U8,
        ElementType::R4 => NumericKind::R4,
        ElementType::R8 => NumericKind::R8,
        _ => return None,
    })
}

/// Binary promotion of two already-unary-promoted kinds.
///
/// Follows the C# rules: float contagion, `long` when `int` meets `uint`
/// (so unsigned-vs-signed subtraction cannot wrap), and no implicit mix of
/// `ulong` with signed operands.
pub fn binary_kind(a: NumericKind, b: NumericKind) -> Result<NumericKind, DebugError> {
    use NumericKind::{I4, I8, R4, R8, U4, U8};
    if a == R8 || b == R8 {
        return Ok(R8);
    }
    if a == R4 || b == R4 {
        return Ok(R4);
    }
    if a == U8 || b == U8 {
        let other = if a == U8 { b } else { a };
        if other == U8 || other == U4 {
            return Ok(U8);
        }
        return Err(DebugError::Type(
            "operator cannot mix ulong with a signed operand".into(),
        ));
    }
    if a == I8 || b == I8 {
        return Ok(I8);
    }
    if a == U4 || b == U4 {
        let other = if a == U4 { b } else { a };
        if other == U4 {
            return Ok(U4);
        }
        // int against uint computes in long.
        return Ok(I8);
    }
    let _ = (a == I4, b == I4);
    Ok(I4)
}

/// Read a scalar as a numeric operand, applying unary promotion.
#[must_use]
pub fn scalar_to_num(scalar: Scalar) -> Option<Num> {
    Some(match scalar {
        Scalar::I1(value) => Num::I4(i32::from(value)),
        Scalar::U1(value) => Num::I4(i32::from(value)),
        Scalar::I2(value) => Num::I4(i32::from(value)),
        Scalar::U2(value) => Num::I4(i32::from(value)),
        Scalar::Char(value) => Num::I4(i32::from(value)),
        Scalar::I4(value) => Num::I4(value),
        Scalar::U4(value) => Num::U4(value),
        Scalar::I8(value) => Num::I8(value),
        Scalar::U8(value) => Num::U8(value),
        Scalar::I(value) => Num::I8(value),
        Scalar::U(value) => Num::U8(value),
        Scalar::R4(value) => Num::R4(value),
        Scalar::R8(value) => Num::R8(value),
        Scalar::Bool(_) => return None,
    })
}

/// Convert a numeric operand into a promoted kind. Widening only; callers
/// promote with [`binary_kind`] first.
#[must_use]
pub fn convert(num: Num, kind: NumericKind) -> Num {
    match kind {
        NumericKind::I4 => Num::I4(match num {
            Num::I4(value) => value,
            Num::U4(value) => value as i32,
            Num::I8(value) => value as i32,
            Num::U8(value) => value as i32,
            Num::R4(value) => value as i32,
            Num::R8(value) => value as i32,
        }),
        NumericKind::U4 => Num::U4(match num {
            Num::I4(value) => value as u32,
            Num::U4(value) => value,
            Num::I8(value) => value as u32,
            Num::U8(value) => value as u32,
            Num::R4(value) => value as u32,
            Num::R8(value) => value as u32,
        }),
        NumericKind::I8 => Num::I8(match num {
            Num::I4(value) => i64::from(value),
            Num::U4(value) => i64::from(value),
            Num::I8(value) => value,
            Num::U8(value) => value as i64,
            Num::R4(value) => value as i64,
            Num::R8(value) => value as i64,
        }),
        NumericKind::U8 => Num::U8(match num {
            Num::I4(value) => value as u64,
            Num::U4(value) => u64::from(value),
            Num::I8(value) => value as u64,
            Num::U8(value) => value,
            Num::R4(value) => value as u64,
            Num::R8(value) => value as u64,
        }),
        NumericKind::R4 => Num::R4(match num {
            Num::I4(value) => value as f32,
            Num::U4(value) => value as f32,
            Num::I8(value) => value as f32,
            Num::U8(value) => value as f32,
            Num::R4(value) => value,
            Num::R8(value) => value as f32,
        }),
        NumericKind::R8 => Num::R8(match num {
            Num::I4(value) => f64::from(value),
            Num::U4(value) => f64::from(value),
            Num::I8(value) => value as f64,
            Num::U8(value) => value as f64,
            Num::R4(value) => f64::from(value),
            Num::R8(value) => value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integrals_promote_to_int() {
        assert_eq!(unary_kind(ElementType::I1), Some(NumericKind::I4));
        assert_eq!(unary_kind(ElementType::U2), Some(NumericKind::I4));
        assert_eq!(unary_kind(ElementType::Char), Some(NumericKind::I4));
        assert_eq!(unary_kind(ElementType::Boolean), None);
    }

    #[test]
    fn float_contagion_wins() {
        assert_eq!(
            binary_kind(NumericKind::I4, NumericKind::R8).unwrap(),
            NumericKind::R8
        );
        assert_eq!(
            binary_kind(NumericKind::R4, NumericKind::I8).unwrap(),
            NumericKind::R4
        );
    }

    #[test]
    fn int_with_uint_computes_in_long() {
        assert_eq!(
            binary_kind(NumericKind::I4, NumericKind::U4).unwrap(),
            NumericKind::I8
        );
        assert_eq!(
            binary_kind(NumericKind::U4, NumericKind::U4).unwrap(),
            NumericKind::U4
        );
    }

    #[test]
    fn ulong_refuses_signed_company() {
        assert!(binary_kind(NumericKind::U8, NumericKind::I4).is_err());
        assert_eq!(
            binary_kind(NumericKind::U8, NumericKind::U4).unwrap(),
            NumericKind::U8
        );
    }

    #[test]
    fn conversion_widens_into_the_promoted_kind() {
        assert_eq!(convert(Num::I4(-3), NumericKind::I8), Num::I8(-3));
        assert_eq!(convert(Num::U4(7), NumericKind::I8), Num::I8(7));
        assert_eq!(convert(Num::I4(2), NumericKind::R8), Num::R8(2.0));
    }
}
