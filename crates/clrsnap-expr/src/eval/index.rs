//! Indexer access: `a[i]` on arrays and `get_Item` indexers.

use clrsnap_object::{DbgObject, StackFrameView, TypeSignature};
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::MethodToken;

use crate::promote::{convert, unary_kind, Num, NumericKind};

use super::{dispatch_call, object_to_num, receiver_value, EvalScope, ExpressionEvaluator};

enum IndexMode {
    /// Direct array element fetch through the array handle.
    ArrayElement,
    /// Dispatch to the type's `get_Item` indexer.
    GetItem(MethodToken),
}

pub struct IndexEvaluator {
    target: Box<dyn ExpressionEvaluator>,
    indices: Vec<Box<dyn ExpressionEvaluator>>,
    mode: Option<IndexMode>,
    signature: TypeSignature,
}

impl IndexEvaluator {
    pub fn new(
        target: Box<dyn ExpressionEvaluator>,
        indices: Vec<Box<dyn ExpressionEvaluator>>,
    ) -> Self {
        Self {
            target,
            indices,
            mode: None,
            signature: TypeSignature::object(),
        }
    }
}

impl ExpressionEvaluator for IndexEvaluator {
    fn compile(&mut self, frame: &StackFrameView) -> Result<(), DebugError> {
        self.target.compile(frame)?;
        for index in &mut self.indices {
            index.compile(frame)?;
        }

        let target_type = self.target.static_type();
        if target_type.is_array() {
            for index in &self.indices {
                let integral = unary_kind(index.static_type().element)
                    .is_some_and(|kind| !kind.is_float());
                if !integral {
                    return Err(DebugError::Type("array index must be an integer".into()));
                }
            }
            self.signature = target_type
                .array_element()
                .cloned()
                .ok_or_else(|| DebugError::Type("array type carries no element type".into()))?;
            self.mode = Some(IndexMode::ArrayElement);
            return Ok(());
        }

        // Not an array: the static type may declare an indexer.
        let class = frame.find_type(&target_type.name).ok_or_else(|| {
            DebugError::NotImplemented(
                format!("type '{}' is not indexable", target_type.display()).into(),
            )
        })?;
        let candidates = frame.methods_named(class, "get_Item")?;
        let matched = candidates
            .into_iter()
            .find(|info| info.params.len() == self.indices.len())
            .ok_or_else(|| {
                DebugError::NotImplemented(
                    format!("type '{}' is not indexable", target_type.display()).into(),
                )
            })?;
        self.signature = TypeSignature::new(matched.return_element, matched.return_type_name.clone());
        self.mode = Some(IndexMode::GetItem(matched.token));
        Ok(())
    }

    fn static_type(&self) -> &TypeSignature {
        &self.signature
    }

    fn evaluate(&self, scope: &EvalScope<'_>) -> Result<DbgObject, DebugError> {
        let mode = self
            .mode
            .as_ref()
            .ok_or_else(|| DebugError::internal("indexer evaluated before compile"))?;
        let target = self.target.evaluate(scope)?;
        if let Some(error) = target.error() {
            return Err(error.clone());
        }
        if target.is_null() {
            return Err(DebugError::NullReference);
        }

        match mode {
            IndexMode::ArrayElement => {
                let array = target
                    .as_array()
                    .ok_or_else(|| DebugError::Type("value is not an array".into()))?;
                let shape = array.shape();
                if self.indices.len() != shape.dims.len() {
                    return Err(DebugError::Type(
                        format!(
                            "array of rank {} indexed with {} indices",
                            shape.dims.len(),
                            self.indices.len()
                        )
                        .into(),
                    ));
                }

                // Narrow each index to i64, bounds-check per dimension, and
                // flatten row-major.
                let mut flat: u64 = 0;
                for (index, dim) in self.indices.iter().zip(&shape.dims) {
                    let value = index.evaluate(scope)?;
                    let narrowed = match convert(object_to_num(&value)?, NumericKind::I8) {
                        Num::I8(value) => value,
                        _ => return Err(DebugError::internal("index narrowing")),
                    };
                    if narrowed < 0 || narrowed >= i64::from(*dim) {
                        return Err(DebugError::IndexOutOfRange {
                            index: narrowed,
                            len: u64::from(*dim),
                        });
                    }
                    flat = flat * u64::from(*dim) + narrowed as u64;
                }
                // Fetch re-dereferences the handle; a cached element pointer
                // would be stale after any resume.
                array.element_at(flat as u32, scope.factory, scope.depth)
            }
            IndexMode::GetItem(token) => {
                let receiver = receiver_value(&target)?;
                let mut args = Vec::with_capacity(self.indices.len());
                for index in &self.indices {
                    args.push(index.evaluate(scope)?);
                }
                dispatch_call(scope, scope.frame.module(), *token, Some(receiver), &args)
            }
        }
    }
}
