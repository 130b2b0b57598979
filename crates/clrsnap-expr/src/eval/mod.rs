//! Two-phase expression evaluators.
//!
//! Each AST node compiles into an evaluator. `compile` resolves static
//! types, members, and operator routines against a stack frame and fails on
//! type-incorrect expressions; `evaluate` computes a fresh [`DbgObject`]
//! and keeps no state between calls.

mod binary;
mod call;
mod cast;
mod conditional;
mod identifier;
mod index;
mod literal;
mod member;
mod unary;

use smol_str::SmolStr;
use tracing::trace;

use clrsnap_object::{DbgObject, ObjectFactory, StackFrameView, TypeSignature};
use clrsnap_runtime::coordinator::EvalContext;
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{
    EvalRef, MethodToken, ModuleRef, RawValue, RuntimeEval, RuntimeType, ValueRef,
};

use crate::ast::Expr;

pub use member::MemberBinding;

/// Everything an evaluator may touch while computing a value.
pub struct EvalScope<'a> {
    pub frame: &'a StackFrameView,
    pub factory: &'a ObjectFactory,
    /// Coordinator context of the current hit; `None` forbids managed
    /// calls (getters, methods, indexers).
    pub context: Option<&'a EvalContext>,
    /// Materialisation budget for computed results.
    pub depth: i32,
}

/// Compiled form of an expression node.
pub trait ExpressionEvaluator: Send {
    /// Resolve static types and members; report type errors.
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError>;

    /// Static type established by [`ExpressionEvaluator::compile`].
    fn static_type(&self) -> &TypeSignature;

    /// Compute the current value. Idempotent on an unchanged frame.
    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError>;
}

/// Build the evaluator tree for a parsed expression.
#[must_use]
pub fn create_evaluator(expr: &Expr) -> Box<dyn ExpressionEvaluator> {
    match expr {
        Expr::Int { .. }
        | Expr::Float { .. }
        | Expr::Str(_)
        | Expr::Char(_)
        | Expr::Bool(_)
        | Expr::Null => Box::new(literal::LiteralEvaluator::new(expr)),
        Expr::Ident(name) => Box::new(identifier::IdentifierEvaluator::new(name.clone())),
        Expr::Unary { op, operand } => {
            Box::new(unary::UnaryEvaluator::new(*op, create_evaluator(operand)))
        }
        Expr::Binary { op, left, right } => Box::new(binary::BinaryEvaluator::new(
            *op,
            create_evaluator(left),
            create_evaluator(right),
        )),
        Expr::Conditional {
            condition,
            if_true,
            if_false,
        } => Box::new(conditional::ConditionalEvaluator::new(
            create_evaluator(condition),
            create_evaluator(if_true),
            create_evaluator(if_false),
        )),
        Expr::Cast { target, operand } => Box::new(cast::CastEvaluator::new(
            target.clone(),
            create_evaluator(operand),
        )),
        Expr::Member { target, name } => Box::new(member::MemberEvaluator::new(
            create_evaluator(target),
            target.type_name(),
            name.clone(),
        )),
        Expr::Index { target, indices } => Box::new(index::IndexEvaluator::new(
            create_evaluator(target),
            indices.iter().map(create_evaluator).collect(),
        )),
        Expr::Call { target, name, args } => Box::new(call::CallEvaluator::new(
            target.as_deref().map(create_evaluator),
            target.as_deref().and_then(Expr::type_name),
            name.clone(),
            args.iter().map(create_evaluator).collect(),
        )),
    }
}

/// Build and compile in one step.
pub fn compile_expression(
    expr: &Expr,
    frame: &StackFrameView,
) -> Result<Box<dyn ExpressionEvaluator>, DebugError> {
    let mut evaluator = create_evaluator(expr);
    evaluator.compile(frame)?;
    Ok(evaluator)
}

/// Evaluate a compiled condition down to its boolean.
pub fn evaluate_condition(
    evaluator: &dyn ExpressionEvaluator,
    scope: &EvalScope<'_>,
) -> Result<bool, DebugError> {
    if !evaluator.static_type().is_boolean() {
        return Err(DebugError::Type(
            "breakpoint condition must be boolean".into(),
        ));
    }
    let result = evaluator.evaluate(scope)?;
    object_to_bool(&result)
}

pub(crate) fn object_to_bool(object: &DbgObject) -> Result<bool, DebugError> {
    match object.scalar() {
        Some(clrsnap_runtime::surface::Scalar::Bool(value)) => Ok(value),
        _ => Err(DebugError::Type("expected a boolean value".into())),
    }
}

pub(crate) fn object_to_num(object: &DbgObject) -> Result<crate::promote::Num, DebugError> {
    if let Some(error) = object.error() {
        return Err(error.clone());
    }
    object
        .scalar()
        .and_then(crate::promote::scalar_to_num)
        .ok_or_else(|| DebugError::Type("expected a numeric value".into()))
}

/// String payload of a value; `None` for a null reference.
pub(crate) fn object_to_string(object: &DbgObject) -> Result<Option<String>, DebugError> {
    if object.is_null() {
        return Ok(None);
    }
    let string = object
        .as_string()
        .ok_or_else(|| DebugError::Type("expected a string value".into()))?;
    Ok(Some(string.payload()?.to_owned()))
}

/// Turn a materialised argument back into a runtime value for a call.
///
/// Reference arguments are refreshed through their handle; scalars are
/// recreated in the debuggee.
pub(crate) fn raw_argument(object: &DbgObject, eval: &EvalRef) -> Result<ValueRef, DebugError> {
    if object.is_null() {
        return Err(DebugError::NotImplemented(
            "null literals as call arguments".into(),
        ));
    }
    if let Some(scalar) = object.scalar() {
        return eval.create_value(scalar);
    }
    if let Some(handle) = object.handle() {
        return handle.dereference();
    }
    Err(DebugError::NotImplemented(
        "this value cannot be passed to a managed call".into(),
    ))
}

/// Runtime receiver for a managed call, refreshed from a materialised
/// object's handle.
pub(crate) fn receiver_value(object: &DbgObject) -> Result<ValueRef, DebugError> {
    let handle = object
        .handle()
        .ok_or_else(|| DebugError::NotImplemented("calls on value-type receivers".into()))?;
    handle.dereference()
}

/// Start a managed call and materialise its result.
pub(crate) fn dispatch_call(
    scope: &EvalScope<'_>,
    module: &ModuleRef,
    method: MethodToken,
    receiver: Option<ValueRef>,
    args: &[DbgObject],
) -> Result<DbgObject, DebugError> {
    let context = scope
        .context
        .ok_or_else(|| DebugError::Runtime("managed calls are unavailable here".into()))?;

    let eval = context.coordinator.create_eval()?;
    let mut raw_args = Vec::with_capacity(args.len() + 1);
    if let Some(receiver) = receiver {
        raw_args.push(receiver);
    }
    for arg in args {
        raw_args.push(raw_argument(arg, &eval)?);
    }

    trace!(method, "starting managed call");
    eval.call_method(module, method, &raw_args)?;
    let outcome = context.coordinator.wait_for_eval(&eval)?;
    if outcome.threw {
        let thrown: SmolStr = outcome
            .value
            .exact_type()
            .map(|t| t.name())
            .unwrap_or_default();
        return Err(DebugError::EvalException(thrown));
    }
    Ok(scope.factory.create(&outcome.value, scope.depth))
}
