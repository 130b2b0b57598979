//! Binary operators: arithmetic, bitwise, shifts, comparisons, logic.

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::Scalar;

use crate::ast::BinaryOp;
use crate::promote::{binary_kind, convert, unary_kind, Num, NumericKind};

use super::{object_to_bool, object_to_num, object_to_string, EvalScope, ExpressionEvaluator};

/// How `==`/`!=` compares its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EqualityMode {
    Numeric(NumericKind),
    Bool,
    /// Character content; null compares unequal to any non-null.
    Text,
    /// Heap identity.
    Reference,
}

enum Routine {
    Logic,
    Arith(NumericKind),
    BitBool,
    BitInt(NumericKind),
    Shift(NumericKind),
    Relational(NumericKind),
    Equality(EqualityMode),
}

pub struct BinaryEvaluator {
    op: BinaryOp,
    left: Box<dyn ExpressionEvaluator>,
    right: Box<dyn ExpressionEvaluator>,
    routine: Option<Routine>,
    signature: TypeSignature,
}

impl BinaryEvaluator {
    pub fn new(
        op: BinaryOp,
        left: Box<dyn ExpressionEvaluator>,
        right: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            op,
            left,
            right,
            routine: None,
            signature: TypeSignature::boolean(),
        }
    }

    fn numeric_pair(&self) -> Result<NumericKind, DebugError> {
        let left = unary_kind(self.left.static_type().element);
        let right = unary_kind(self.right.static_type().element);
        match (left, right) {
            (Some(left), Some(right)) => binary_kind(left, right),
            _ => Err(DebugError::Type(
                format!(
                    "operator '{}' cannot be applied to '{}' and '{}'",
                    self.op.symbol(),
                    self.left.static_type().display(),
                    self.right.static_type().display()
                )
                .into(),
            )),
        }
    }

    fn compile_equality(&self) -> Result<EqualityMode, DebugError> {
        let left = self.left.static_type();
        let right = self.right.static_type();
        if left.is_boolean() && right.is_boolean() {
            return Ok(EqualityMode::Bool);
        }
        if let Ok(kind) = self.numeric_pair() {
            return Ok(EqualityMode::Numeric(kind));
        }
        let left_stringish = left.is_string() || left.element == clrsnap_runtime::surface::ElementType::Object;
        let right_stringish =
            right.is_string() || right.element == clrsnap_runtime::surface::ElementType::Object;
        if (left.is_string() || right.is_string()) && left_stringish && right_stringish {
            return Ok(EqualityMode::Text);
        }
        if left.is_reference_type() && right.is_reference_type() {
            return Ok(EqualityMode::Reference);
        }
        Err(DebugError::Type(
            format!(
                "operator '{}' cannot compare '{}' and '{}'",
                self.op.symbol(),
                left.display(),
                right.display()
            )
            .into(),
        ))
    }
}

impl ExpressionEvaluator for BinaryEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        self.left.compile(frame)?;
        self.right.compile(frame)?;

        let routine = match self.op {
            BinaryOp::And | BinaryOp::Or => {
                if !self.left.static_type().is_boolean() || !self.right.static_type().is_boolean()
                {
                    return Err(DebugError::Type(
                        format!("operator '{}' needs boolean operands", self.op.symbol()).into(),
                    ));
                }
                Routine::Logic
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                Routine::Arith(self.numeric_pair()?)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if self.left.static_type().is_boolean() && self.right.static_type().is_boolean() {
                    Routine::BitBool
                } else {
                    let kind = self.numeric_pair()?;
                    if kind.is_float() {
                        return Err(DebugError::Type(
                            format!("operator '{}' needs integer operands", self.op.symbol())
                                .into(),
                        ));
                    }
                    Routine::BitInt(kind)
                }
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let kind = unary_kind(self.left.static_type().element)
                    .filter(|kind| !kind.is_float())
                    .ok_or_else(|| {
                        DebugError::Type("shift needs an integer left operand".into())
                    })?;
                let right = unary_kind(self.right.static_type().element);
                if right != Some(NumericKind::I4) {
                    return Err(DebugError::Type("shift count must be an int".into()));
                }
                Routine::Shift(kind)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Routine::Relational(self.numeric_pair()?)
            }
            BinaryOp::Eq | BinaryOp::Ne => Routine::Equality(self.compile_equality()?),
        };

        self.signature = match &routine {
            Routine::Arith(kind) | Routine::BitInt(kind) | Routine::Shift(kind) => {
                TypeSignature::primitive(kind.element_type())
            }
            _ => TypeSignature::boolean(),
        };
        self.routine = Some(routine);
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let routine = self
            .routine
            .as_ref()
            .ok_or_else(|| DebugError::internal("binary operator evaluated before compile"))?;

        // Short-circuit before the right operand is touched.
        if let Routine::Logic = routine {
            let left = object_to_bool(&self.left.evaluate(scope)?)?;
            let result = match self.op {
                BinaryOp::And => {
                    if !left {
                        false
                    } else {
                        object_to_bool(&self.right.evaluate(scope)?)?
                    }
                }
                BinaryOp::Or => {
                    if left {
                        true
                    } else {
                        object_to_bool(&self.right.evaluate(scope)?)?
                    }
                }
                _ => return Err(DebugError::internal("logic routine on non-logic operator")),
            };
            return Ok(DbgObject::primitive(Scalar::Bool(result)));
        }

        let left = self.left.evaluate(scope)?;
        let right = self.right.evaluate(scope)?;

        match routine {
            Routine::Logic => unreachable!("handled above"),
            Routine::Arith(kind) => {
                let a = convert(object_to_num(&left)?, *kind);
                let b = convert(object_to_num(&right)?, *kind);
                Ok(DbgObject::primitive(arith(self.op, a, b)?))
            }
            Routine::BitBool => {
                let a = object_to_bool(&left)?;
                let b = object_to_bool(&right)?;
                let result = match self.op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    _ => return Err(DebugError::internal("bit routine on non-bit operator")),
                };
                Ok(DbgObject::primitive(Scalar::Bool(result)))
            }
            Routine::BitInt(kind) => {
                let a = convert(object_to_num(&left)?, *kind);
                let b = convert(object_to_num(&right)?, *kind);
                Ok(DbgObject::primitive(bits(self.op, a, b)?))
            }
            Routine::Shift(kind) => {
                let a = convert(object_to_num(&left)?, *kind);
                let count = match convert(object_to_num(&right)?, NumericKind::I4) {
                    Num::I4(count) => count as u32,
                    _ => return Err(DebugError::internal("shift count conversion")),
                };
                Ok(DbgObject::primitive(shift(self.op, a, count)?))
            }
            Routine::Relational(kind) => {
                let a = convert(object_to_num(&left)?, *kind);
                let b = convert(object_to_num(&right)?, *kind);
                Ok(DbgObject::primitive(Scalar::Bool(relate(self.op, a, b)?)))
            }
            Routine::Equality(mode) => {
                let equal = self.equal(*mode, &left, &right)?;
                let result = if self.op == BinaryOp::Eq { equal } else { !equal };
                Ok(DbgObject::primitive(Scalar::Bool(result)))
            }
        }
    }
}

impl BinaryEvaluator {
    fn equal(
        &self,
        mode: EqualityMode,
        left: &DbgObject,
        right: &DbgObject,
    ) -> Result<bool, DebugError> {
        match mode {
            EqualityMode::Numeric(kind) => {
                let a = convert(object_to_num(left)?, kind);
                let b = convert(object_to_num(right)?, kind);
                Ok(num_eq(a, b))
            }
            EqualityMode::Bool => Ok(object_to_bool(left)? == object_to_bool(right)?),
            EqualityMode::Text => {
                let a = object_to_string(left)?;
                let b = object_to_string(right)?;
                Ok(a == b)
            }
            EqualityMode::Reference => {
                let a = left
                    .identity()
                    .ok_or_else(|| DebugError::Type("left operand has no identity".into()))?;
                let b = right
                    .identity()
                    .ok_or_else(|| DebugError::Type("right operand has no identity".into()))?;
                Ok(a == b)
            }
        }
    }
}

fn num_eq(a: Num, b: Num) -> bool {
    match (a, b) {
        (Num::I4(a), Num::I4(b)) => a == b,
        (Num::U4(a), Num::U4(b)) => a == b,
        (Num::I8(a), Num::I8(b)) => a == b,
        (Num::U8(a), Num::U8(b)) => a == b,
        (Num::R4(a), Num::R4(b)) => a == b,
        (Num::R8(a), Num::R8(b)) => a == b,
        _ => false,
    }
}

/// Integral arithmetic wraps like C# unchecked code; only division by zero
/// and the `INT_MIN / -1` overflow are failures. Floats keep IEEE
/// semantics.
fn arith(op: BinaryOp, a: Num, b: Num) -> Result<Scalar, DebugError> {
    macro_rules! int_arith {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOp::Add => $a.wrapping_add($b),
                BinaryOp::Sub => $a.wrapping_sub($b),
                BinaryOp::Mul => $a.wrapping_mul($b),
                BinaryOp::Div => $a
                    .checked_div($b)
                    .ok_or_else(|| div_error($b == 0))?,
                BinaryOp::Mod => $a
                    .checked_rem($b)
                    .ok_or_else(|| div_error($b == 0))?,
                _ => return Err(DebugError::internal("arith routine on non-arith operator")),
            }
        };
    }
    macro_rules! float_arith {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOp::Add => $a + $b,
                BinaryOp::Sub => $a - $b,
                BinaryOp::Mul => $a * $b,
                BinaryOp::Div => $a / $b,
                BinaryOp::Mod => $a % $b,
                _ => return Err(DebugError::internal("arith routine on non-arith operator")),
            }
        };
    }
    Ok(match (a, b) {
        (Num::I4(a), Num::I4(b)) => Scalar::I4(int_arith!(a, b)),
        (Num::U4(a), Num::U4(b)) => Scalar::U4(int_arith!(a, b)),
        (Num::I8(a), Num::I8(b)) => Scalar::I8(int_arith!(a, b)),
        (Num::U8(a), Num::U8(b)) => Scalar::U8(int_arith!(a, b)),
        (Num::R4(a), Num::R4(b)) => Scalar::R4(float_arith!(a, b)),
        (Num::R8(a), Num::R8(b)) => Scalar::R8(float_arith!(a, b)),
        _ => return Err(DebugError::internal("mismatched promoted operands")),
    })
}

fn div_error(by_zero: bool) -> DebugError {
    if by_zero {
        DebugError::DivisionByZero
    } else {
        // checked_div also fails on INT_MIN / -1.
        DebugError::Overflow
    }
}

fn bits(op: BinaryOp, a: Num, b: Num) -> Result<Scalar, DebugError> {
    macro_rules! bit {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOp::BitAnd => $a & $b,
                BinaryOp::BitOr => $a | $b,
                BinaryOp::BitXor => $a ^ $b,
                _ => return Err(DebugError::internal("bit routine on non-bit operator")),
            }
        };
    }
    Ok(match (a, b) {
        (Num::I4(a), Num::I4(b)) => Scalar::I4(bit!(a, b)),
        (Num::U4(a), Num::U4(b)) => Scalar::U4(bit!(a, b)),
        (Num::I8(a), Num::I8(b)) => Scalar::I8(bit!(a, b)),
        (Num::U8(a), Num::U8(b)) => Scalar::U8(bit!(a, b)),
        _ => return Err(DebugError::internal("mismatched promoted operands")),
    })
}

/// The shift count is masked to 5 bits for 32-bit operands and 6 bits for
/// 64-bit operands, as C# defines.
fn shift(op: BinaryOp, a: Num, count: u32) -> Result<Scalar, DebugError> {
    Ok(match a {
        Num::I4(a) => {
            let count = count & 31;
            Scalar::I4(match op {
                BinaryOp::Shl => a.wrapping_shl(count),
                _ => a.wrapping_shr(count),
            })
        }
        Num::U4(a) => {
            let count = count & 31;
            Scalar::U4(match op {
                BinaryOp::Shl => a.wrapping_shl(count),
                _ => a.wrapping_shr(count),
            })
        }
        Num::I8(a) => {
            let count = count & 63;
            Scalar::I8(match op {
                BinaryOp::Shl => a.wrapping_shl(count),
                _ => a.wrapping_shr(count),
            })
        }
        Num::U8(a) => {
            let count = count & 63;
            Scalar::U8(match op {
                BinaryOp::Shl => a.wrapping_shl(count),
                _ => a.wrapping_shr(count),
            })
        }
        _ => return Err(DebugError::internal("shift on non-integer")),
    })
}

fn relate(op: BinaryOp, a: Num, b: Num) -> Result<bool, DebugError> {
    macro_rules! cmp {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOp::Lt => $a < $b,
                BinaryOp::Le => $a <= $b,
                BinaryOp::Gt => $a > $b,
                BinaryOp::Ge => $a >= $b,
                _ => return Err(DebugError::internal("relational routine misuse")),
            }
        };
    }
    Ok(match (a, b) {
        (Num::I4(a), Num::I4(b)) => cmp!(a, b),
        (Num::U4(a), Num::U4(b)) => cmp!(a, b),
        (Num::I8(a), Num::I8(b)) => cmp!(a, b),
        (Num::U8(a), Num::U8(b)) => cmp!(a, b),
        (Num::R4(a), Num::R4(b)) => cmp!(a, b),
        (Num::R8(a), Num::R8(b)) => cmp!(a, b),
        _ => return Err(DebugError::internal("mismatched promoted operands")),
    })
}
