//! Materialised runtime values.
//!
//! A [`DbgObject`] is the captured value of a runtime expression: either a
//! copied scalar or a strong handle plus enough metadata to re-read the
//! object on demand. Raw runtime values die at the next resume; a
//! materialised object survives until it is dropped, at which point its
//! handles are released.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use clrsnap_runtime::coordinator::EvalContext;
use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::handle::StrongHandle;
use clrsnap_runtime::surface::{ArrayShape, RawValue, Scalar};

use crate::class::DbgClass;
use crate::factory::ObjectFactory;
use crate::signature::TypeSignature;

/// Wire status attached to the smallest unit that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub is_error: bool,
    pub message: String,
}

impl StatusMessage {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            is_error: false,
            message: message.into(),
        }
    }
}

/// Self-describing wire form of a captured variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableNode {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<VariableNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

impl VariableNode {
    #[must_use]
    pub fn new(name: &str, type_name: String) -> Self {
        Self {
            name: name.to_owned(),
            type_name,
            value: None,
            members: Vec::new(),
            status: None,
        }
    }

    /// A node carrying only a failure status.
    #[must_use]
    pub fn failed(name: &str, type_name: String, error: &DebugError) -> Self {
        let mut node = Self::new(name, type_name);
        node.status = Some(StatusMessage::error(error.to_string()));
        node
    }
}

/// Knobs and collaborators for serialising an object tree.
pub struct DescribeOptions<'a> {
    pub factory: &'a ObjectFactory,
    /// Coordinator context of the current hit; `None` disables getter
    /// dispatch entirely.
    pub context: Option<&'a EvalContext>,
    pub max_array_items: usize,
    pub property_eval: bool,
}

/// Lazily decoded string payload, behind a strong handle for debuggee
/// strings or inline for expression literals.
#[derive(Debug, Clone)]
pub struct DbgString {
    pub(crate) handle: Option<StrongHandle>,
    payload: OnceCell<Result<String, DebugError>>,
}

impl DbgString {
    #[must_use]
    pub fn new(handle: StrongHandle) -> Self {
        Self {
            handle: Some(handle),
            payload: OnceCell::new(),
        }
    }

    /// A string that never lived in the debuggee.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        let payload = OnceCell::new();
        let _ = payload.set(Ok(text.into()));
        Self {
            handle: None,
            payload,
        }
    }

    /// Decode the character payload, fetching it on first use.
    pub fn payload(&self) -> Result<&str, DebugError> {
        let result = self.payload.get_or_init(|| {
            let handle = self
                .handle
                .as_ref()
                .ok_or_else(|| DebugError::internal("literal string without payload"))?;
            let view = handle.dereference()?;
            let len = view.string_length()?;
            // The terminator is included in the request, so len + 1 units.
            let mut units = view.read_string(len + 1)?;
            if units.last() == Some(&0) {
                units.pop();
            }
            String::from_utf16(&units)
                .map_err(|_| DebugError::runtime("string payload is not valid UTF-16"))
        });
        match result {
            Ok(payload) => Ok(payload.as_str()),
            Err(err) => Err(err.clone()),
        }
    }
}

/// An array capture: handle, shape, and on-demand element fetch.
#[derive(Debug, Clone)]
pub struct DbgArray {
    pub(crate) handle: Option<StrongHandle>,
    pub(crate) shape: ArrayShape,
    pub(crate) element: TypeSignature,
}

impl DbgArray {
    #[must_use]
    pub fn shape(&self) -> &ArrayShape {
        &self.shape
    }

    #[must_use]
    pub fn element_signature(&self) -> &TypeSignature {
        &self.element
    }

    /// Fetch element `flat_index` by re-dereferencing the handle.
    ///
    /// The handle must have been opened at materialisation; fetching through
    /// a cached dereference would read freed memory after a resume.
    pub fn element_at(
        &self,
        flat_index: u32,
        factory: &ObjectFactory,
        depth: i32,
    ) -> Result<DbgObject, DebugError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| DebugError::internal("array handle was never opened"))?;
        let array = handle.dereference()?;
        let value = array.array_element(flat_index)?;
        Ok(factory.create(&value, depth))
    }

    /// Member name for a flat index: `[1,2]` for a `[2,3]` array.
    #[must_use]
    pub fn index_name(&self, flat_index: u32) -> String {
        let mut remaining = flat_index as u64;
        let mut indices = vec![0u64; self.shape.dims.len()];
        for (slot, dim) in self.shape.dims.iter().enumerate().rev() {
            let dim = u64::from(*dim).max(1);
            indices[slot] = remaining % dim;
            remaining /= dim;
        }
        let rendered: Vec<String> = indices.iter().map(u64::to_string).collect();
        format!("[{}]", rendered.join(","))
    }
}

/// The five shapes a captured value can take.
#[derive(Debug, Clone)]
pub enum DbgObjectKind {
    Primitive(Scalar),
    Str(DbgString),
    Array(DbgArray),
    Class(Box<DbgClass>),
    Null,
}

/// The captured value of a runtime expression.
#[derive(Debug, Clone)]
pub struct DbgObject {
    signature: TypeSignature,
    kind: DbgObjectKind,
    depth: i32,
    is_null: bool,
    /// Failure captured at creation; consumers surface it uniformly.
    error: Option<DebugError>,
    /// Diagnostic detail accompanying `error`.
    message: String,
}

impl DbgObject {
    #[must_use]
    pub fn primitive(scalar: Scalar) -> Self {
        Self {
            signature: TypeSignature::primitive(scalar.element_type()),
            kind: DbgObjectKind::Primitive(scalar),
            depth: 0,
            is_null: false,
            error: None,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn string(handle: StrongHandle) -> Self {
        Self {
            signature: TypeSignature::string(),
            kind: DbgObjectKind::Str(DbgString::new(handle)),
            depth: 0,
            is_null: false,
            error: None,
            message: String::new(),
        }
    }

    /// A string constructed from expression text rather than the debuggee.
    #[must_use]
    pub fn string_literal(text: impl Into<String>) -> Self {
        Self {
            signature: TypeSignature::string(),
            kind: DbgObjectKind::Str(DbgString::literal(text)),
            depth: 0,
            is_null: false,
            error: None,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn array(signature: TypeSignature, array: DbgArray, depth: i32) -> Self {
        Self {
            signature,
            kind: DbgObjectKind::Array(array),
            depth,
            is_null: false,
            error: None,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn class(signature: TypeSignature, class: DbgClass, depth: i32) -> Self {
        Self {
            signature,
            kind: DbgObjectKind::Class(Box::new(class)),
            depth,
            is_null: false,
            error: None,
            message: String::new(),
        }
    }

    /// A captured null reference. Carries only the declared type.
    #[must_use]
    pub fn null(signature: TypeSignature) -> Self {
        Self {
            signature,
            kind: DbgObjectKind::Null,
            depth: 0,
            is_null: true,
            error: None,
            message: String::new(),
        }
    }

    /// A type-only object used for rendering instantiations; never holds a
    /// value or members.
    #[must_use]
    pub fn empty(signature: TypeSignature) -> Self {
        Self::null(signature)
    }

    /// An object whose creation failed. The error and its diagnostic travel
    /// with the object so the snapshot can still stream.
    #[must_use]
    pub fn failed(signature: TypeSignature, error: DebugError, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let message = if detail.is_empty() {
            error.to_string()
        } else {
            detail
        };
        Self {
            signature,
            kind: DbgObjectKind::Null,
            depth: 0,
            is_null: false,
            error: Some(error),
            message,
        }
    }

    #[must_use]
    pub fn signature(&self) -> &TypeSignature {
        &self.signature
    }

    #[must_use]
    pub fn kind(&self) -> &DbgObjectKind {
        &self.kind
    }

    #[must_use]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.is_null
    }

    /// Creation failure, if any. An object is either healthy with an empty
    /// diagnostic buffer or failed with a non-empty one.
    #[must_use]
    pub fn error(&self) -> Option<&DebugError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn scalar(&self) -> Option<Scalar> {
        match &self.kind {
            DbgObjectKind::Primitive(scalar) => Some(*scalar),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_string(&self) -> Option<&DbgString> {
        match &self.kind {
            DbgObjectKind::Str(string) => Some(string),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&DbgArray> {
        match &self.kind {
            DbgObjectKind::Array(array) => Some(array),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_class(&self) -> Option<&DbgClass> {
        match &self.kind {
            DbgObjectKind::Class(class) => Some(class),
            _ => None,
        }
    }

    /// Strong handle held by this object, when it pins one.
    #[must_use]
    pub fn handle(&self) -> Option<&StrongHandle> {
        match &self.kind {
            DbgObjectKind::Str(string) => string.handle.as_ref(),
            DbgObjectKind::Array(array) => array.handle.as_ref(),
            DbgObjectKind::Class(class) => class.handle.as_ref(),
            _ => None,
        }
    }

    /// Heap identity of the pinned object, for reference equality.
    #[must_use]
    pub fn identity(&self) -> Option<u64> {
        if self.is_null {
            return Some(0);
        }
        let handle = self.handle()?;
        handle.dereference().ok()?.object_address()
    }

    /// Serialise this object (and members to its depth budget) to wire
    /// form.
    #[must_use]
    pub fn describe(&self, name: &str, options: &DescribeOptions<'_>) -> VariableNode {
        let mut node = VariableNode::new(name, self.signature.display());

        if let Some(error) = &self.error {
            node.status = Some(StatusMessage {
                is_error: true,
                message: if self.message.is_empty() {
                    error.to_string()
                } else {
                    self.message.clone()
                },
            });
            return node;
        }

        match &self.kind {
            DbgObjectKind::Primitive(scalar) => {
                node.value = Some(format_scalar(*scalar));
            }
            DbgObjectKind::Str(string) => match string.payload() {
                Ok(payload) => node.value = Some(payload.to_owned()),
                Err(err) => node.status = Some(StatusMessage::error(err.to_string())),
            },
            DbgObjectKind::Array(array) => {
                if self.depth > 0 {
                    let total = array.shape.len();
                    let capped = total.min(options.max_array_items as u64) as u32;
                    for flat in 0..capped {
                        let member_name = array.index_name(flat);
                        match array.element_at(flat, options.factory, self.depth - 1) {
                            Ok(element) => {
                                node.members.push(element.describe(&member_name, options));
                            }
                            Err(err) => {
                                node.members.push(VariableNode::failed(
                                    &member_name,
                                    array.element.display(),
                                    &err,
                                ));
                            }
                        }
                    }
                    if u64::from(capped) < total {
                        node.status = Some(StatusMessage::info(format!(
                            "captured first {capped} of {total} items"
                        )));
                    }
                }
            }
            DbgObjectKind::Class(class) => {
                if self.depth > 0 {
                    node.members = class.member_nodes(self.depth, options);
                }
            }
            DbgObjectKind::Null => {}
        }

        node
    }
}

/// Render a scalar the way the debugger prints values.
#[must_use]
pub fn format_scalar(scalar: Scalar) -> String {
    match scalar {
        Scalar::Bool(value) => {
            if value {
                "true".to_owned()
            } else {
                "false".to_owned()
            }
        }
        Scalar::Char(unit) => char::from_u32(u32::from(unit))
            .map(|c| c.to_string())
            .unwrap_or_else(|| format!("\\u{unit:04x}")),
        Scalar::I1(value) => value.to_string(),
        Scalar::U1(value) => value.to_string(),
        Scalar::I2(value) => value.to_string(),
        Scalar::U2(value) => value.to_string(),
        Scalar::I4(value) => value.to_string(),
        Scalar::U4(value) => value.to_string(),
        Scalar::I8(value) => value.to_string(),
        Scalar::U8(value) => value.to_string(),
        Scalar::R4(value) => value.to_string(),
        Scalar::R8(value) => value.to_string(),
        Scalar::I(value) => value.to_string(),
        Scalar::U(value) => value.to_string(),
    }
}
