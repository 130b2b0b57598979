//! Traits modelling the managed runtime's debug API.
//!
//! The agent never talks to a concrete debug ABI directly. Everything it
//! needs from the runtime (value inspection, metadata, breakpoint arming,
//! function evaluation, event delivery) is expressed as the traits in this
//! module. A live attach implements them over the real runtime; the
//! [`crate::harness`] module implements them over an in-memory debuggee for
//! tests.

#![allow(missing_docs)]

use std::sync::Arc;

use smol_str::SmolStr;

use crate::error::DebugError;
use crate::handle::StrongHandle;
use crate::symbols::PdbInfo;

pub type ValueRef = Arc<dyn RawValue>;
pub type TypeRef = Arc<dyn RuntimeType>;
pub type ModuleRef = Arc<dyn RuntimeModule>;
pub type ThreadRef = Arc<dyn RuntimeThread>;
pub type FrameRef = Arc<dyn RuntimeFrame>;
pub type EvalRef = Arc<dyn RuntimeEval>;
pub type BreakpointRef = Arc<dyn NativeBreakpoint>;

/// Metadata token of a class (`mdTypeDef` equivalent).
pub type ClassToken = u32;
/// Metadata token of a field (`mdFieldDef` equivalent).
pub type FieldToken = u32;
/// Metadata token of a method (`mdMethodDef` equivalent).
pub type MethodToken = u32;

/// Element-type tag of a runtime value or type.
///
/// Mirrors the runtime's element-type enumeration for the subset the agent
/// inspects. `I` and `U` are the native-sized integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    I,
    U,
    String,
    /// Single-dimensional, zero-based array.
    SzArray,
    /// General array (any rank, any bounds).
    Array,
    Class,
    ValueType,
    Object,
    /// Reference to another value (by-ref locals, boxed interiors).
    ByRef,
}

impl ElementType {
    /// Whether values of this element type are fundamental scalars.
    #[must_use]
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ElementType::Boolean
                | ElementType::Char
                | ElementType::I1
                | ElementType::U1
                | ElementType::I2
                | ElementType::U2
                | ElementType::I4
                | ElementType::U4
                | ElementType::I8
                | ElementType::U8
                | ElementType::R4
                | ElementType::R8
                | ElementType::I
                | ElementType::U
        )
    }

    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, ElementType::SzArray | ElementType::Array)
    }
}

/// Canonical framework name of a primitive element type.
#[must_use]
pub fn canonical_type_name(element: ElementType) -> Option<&'static str> {
    Some(match element {
        ElementType::Boolean => "System.Boolean",
        ElementType::Char => "System.Char",
        ElementType::I1 => "System.SByte",
        ElementType::U1 => "System.Byte",
        ElementType::I2 => "System.Int16",
        ElementType::U2 => "System.UInt16",
        ElementType::I4 => "System.Int32",
        ElementType::U4 => "System.UInt32",
        ElementType::I8 => "System.Int64",
        ElementType::U8 => "System.UInt64",
        ElementType::R4 => "System.Single",
        ElementType::R8 => "System.Double",
        ElementType::I => "System.IntPtr",
        ElementType::U => "System.UIntPtr",
        ElementType::String => "System.String",
        ElementType::Object => "System.Object",
        _ => return None,
    })
}

/// A copied fundamental scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    /// UTF-16 code unit, as the runtime stores `System.Char`.
    Char(u16),
    I1(i8),
    U1(u8),
    I2(i16),
    U2(u16),
    I4(i32),
    U4(u32),
    I8(i64),
    U8(u64),
    R4(f32),
    R8(f64),
    /// Native-sized signed integer, widened for transport.
    I(i64),
    /// Native-sized unsigned integer, widened for transport.
    U(u64),
}

impl Scalar {
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Scalar::Bool(_) => ElementType::Boolean,
            Scalar::Char(_) => ElementType::Char,
            Scalar::I1(_) => ElementType::I1,
            Scalar::U1(_) => ElementType::U1,
            Scalar::I2(_) => ElementType::I2,
            Scalar::U2(_) => ElementType::U2,
            Scalar::I4(_) => ElementType::I4,
            Scalar::U4(_) => ElementType::U4,
            Scalar::I8(_) => ElementType::I8,
            Scalar::U8(_) => ElementType::U8,
            Scalar::R4(_) => ElementType::R4,
            Scalar::R8(_) => ElementType::R8,
            Scalar::I(_) => ElementType::I,
            Scalar::U(_) => ElementType::U,
        }
    }
}

/// Rank and per-dimension lengths of an array value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayShape {
    pub rank: u32,
    pub dims: Vec<u32>,
}

impl ArrayShape {
    /// Total element count across all dimensions.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.dims.iter().map(|d| u64::from(*d)).product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Field metadata read from a class definition.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub token: FieldToken,
    pub name: SmolStr,
    pub is_static: bool,
    pub element: ElementType,
    pub type_name: SmolStr,
}

/// Property metadata read from a class definition.
///
/// Whether the property is auto-implemented is not metadata; it is recovered
/// by matching the compiler's backing-field name shape.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub name: SmolStr,
    pub getter: Option<MethodToken>,
    pub setter: Option<MethodToken>,
    pub is_static: bool,
    pub element: ElementType,
    pub type_name: SmolStr,
}

/// Parameter signature of a method.
#[derive(Debug, Clone)]
pub struct ParamSig {
    pub name: SmolStr,
    pub element: ElementType,
    pub type_name: SmolStr,
}

/// Method metadata read from a class definition.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub token: MethodToken,
    pub name: SmolStr,
    pub declaring_class: ClassToken,
    pub is_static: bool,
    pub params: Vec<ParamSig>,
    pub return_element: ElementType,
    pub return_type_name: SmolStr,
}

/// An abstract runtime value at the suspension point.
///
/// Raw values are only valid while the runtime is suspended; any reference
/// that must survive a resume goes through [`RawValue::create_handle`].
pub trait RawValue: Send + Sync {
    fn element_type(&self) -> ElementType;

    /// Whether this value is a reference that can be followed.
    fn is_reference(&self) -> bool;

    /// Whether this reference is null. Only meaningful for references.
    fn is_null(&self) -> bool;

    /// Follow the reference one step.
    fn dereference(&self) -> Result<ValueRef, DebugError>;

    /// Whether this value is a boxed value type.
    fn is_boxed(&self) -> bool;

    /// Extract the object payload of a boxed value type.
    fn unbox(&self) -> Result<ValueRef, DebugError>;

    /// Exact runtime type of the value.
    fn exact_type(&self) -> Result<TypeRef, DebugError>;

    /// Copy out a fundamental scalar.
    fn read_scalar(&self) -> Result<Scalar, DebugError>;

    /// Character count of a string value, excluding the terminator.
    fn string_length(&self) -> Result<u32, DebugError>;

    /// Read up to `requested` UTF-16 units of a string value, including the
    /// terminator. Callers allocate `len + 1` units and request `len + 1`.
    fn read_string(&self, requested: u32) -> Result<Vec<u16>, DebugError>;

    /// Rank and dimensions of an array value.
    fn array_shape(&self) -> Result<ArrayShape, DebugError>;

    /// Fetch an array element by flattened row-major index.
    fn array_element(&self, index: u32) -> Result<ValueRef, DebugError>;

    /// Read an instance field of an object value.
    fn field_value(&self, class: ClassToken, field: FieldToken) -> Result<ValueRef, DebugError>;

    /// Stable address of the underlying heap object, for identity
    /// comparison. `None` for non-heap values.
    fn object_address(&self) -> Option<u64>;

    /// Pin the underlying object against relocation and collection.
    fn create_handle(&self) -> Result<StrongHandle, DebugError>;
}

/// The exact type of a runtime value, with its instantiation.
pub trait RuntimeType: Send + Sync {
    fn element_type(&self) -> ElementType;

    /// Fully qualified name; arrays carry a `[]` / `[,]` suffix.
    fn name(&self) -> SmolStr;

    fn class_token(&self) -> Option<ClassToken>;

    fn module(&self) -> Option<ModuleRef>;

    /// Generic instantiation arguments. For arrays, the single entry is the
    /// element type.
    fn type_args(&self) -> Vec<TypeRef>;

    /// Base type, for walking the inheritance chain.
    fn base(&self) -> Option<TypeRef>;
}

/// A loaded module and its metadata import surface.
pub trait RuntimeModule: Send + Sync {
    /// Module path as the runtime reports it.
    fn name(&self) -> SmolStr;

    fn class_name(&self, class: ClassToken) -> Result<SmolStr, DebugError>;

    /// Resolve a fully qualified class name to its token.
    fn find_class(&self, name: &str) -> Option<ClassToken>;

    /// Token of the base class, or `None` at the root of the chain.
    fn base_class(&self, class: ClassToken) -> Result<Option<ClassToken>, DebugError>;

    fn fields_of(&self, class: ClassToken) -> Result<Vec<FieldInfo>, DebugError>;

    fn properties_of(&self, class: ClassToken) -> Result<Vec<PropertyInfo>, DebugError>;

    /// All methods of `class` with the given name.
    fn methods_named(&self, class: ClassToken, name: &str) -> Result<Vec<MethodInfo>, DebugError>;

    fn method_info(&self, method: MethodToken) -> Result<MethodInfo, DebugError>;

    /// Portable-PDB view for this module, when symbols are present.
    fn symbols(&self) -> Option<Arc<PdbInfo>>;

    /// Arm a native breakpoint at `(method, il_offset)`.
    fn arm_breakpoint(
        &self,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<BreakpointRef, DebugError>;
}

/// A native breakpoint armed in the debuggee.
pub trait NativeBreakpoint: Send + Sync {
    /// Process-unique id used to match hit events back to the arming.
    fn id(&self) -> u64;

    fn activate(&self, active: bool) -> Result<(), DebugError>;

    fn is_active(&self) -> bool;
}

/// A debuggee thread observed at a suspension point.
pub trait RuntimeThread: Send + Sync {
    fn id(&self) -> u32;

    /// Walk the stack, innermost frame first. Only IL frames are returned.
    fn frames(&self) -> Result<Vec<FrameRef>, DebugError>;

    /// Open a function-evaluation handle on this thread.
    fn create_eval(&self) -> Result<EvalRef, DebugError>;
}

/// A single IL frame of a suspended thread.
pub trait RuntimeFrame: Send + Sync {
    fn method_token(&self) -> MethodToken;

    fn module(&self) -> ModuleRef;

    fn il_offset(&self) -> u32;

    /// Local variable values by slot order.
    fn locals(&self) -> Result<Vec<ValueRef>, DebugError>;

    /// Argument values; index 0 is `this` for instance methods.
    fn arguments(&self) -> Result<Vec<ValueRef>, DebugError>;

    /// Read a static field. Statics are frame-scoped in the debug API.
    fn static_field_value(
        &self,
        class: ClassToken,
        field: FieldToken,
    ) -> Result<ValueRef, DebugError>;

    /// Generic type parameters in scope at this frame.
    fn generic_args(&self) -> Vec<TypeRef>;
}

/// A pending function evaluation opened on a thread.
pub trait RuntimeEval: Send + Sync {
    /// Create a fresh scalar value in the debuggee, for use as a call
    /// argument.
    fn create_value(&self, scalar: Scalar) -> Result<ValueRef, DebugError>;

    /// Start a parameterised call. The evaluation runs only once the
    /// debugger callback returns and the runtime resumes.
    fn call_method(
        &self,
        module: &ModuleRef,
        method: MethodToken,
        args: &[ValueRef],
    ) -> Result<(), DebugError>;

    /// Poll for the result. `Ok(None)` while the evaluation has not
    /// completed.
    fn try_result(&self) -> Result<Option<ValueRef>, DebugError>;

    /// Abort the outstanding evaluation.
    fn abort(&self) -> Result<(), DebugError>;
}

/// Continue surface handed to each callback.
pub trait RuntimeController: Send + Sync {
    /// Let the debuggee make progress. Every callback must end here.
    fn resume(&self) -> Result<(), DebugError>;
}

/// The debug-event surface the agent implements.
///
/// The runtime invokes these on its callback thread. Every implementation
/// must call [`RuntimeController::resume`] on every path before returning,
/// or the debuggee stalls.
pub trait DebugCallback: Send + Sync {
    /// A native breakpoint was hit.
    fn on_break(&self, controller: &dyn RuntimeController, thread: ThreadRef, breakpoint_id: u64);

    /// A function evaluation completed normally.
    fn on_eval_complete(&self, controller: &dyn RuntimeController, thread: ThreadRef);

    /// A function evaluation completed by throwing.
    fn on_eval_exception(&self, controller: &dyn RuntimeController, thread: ThreadRef);

    /// The debuggee raised an exception outside any evaluation.
    fn on_exception(&self, controller: &dyn RuntimeController, _thread: ThreadRef, _unhandled: bool) {
        let _ = controller.resume();
    }

    /// A module finished loading.
    fn on_module_load(&self, controller: &dyn RuntimeController, _module: ModuleRef) {
        let _ = controller.resume();
    }

    /// A class finished loading. Defaults to the module-load path.
    fn on_class_load(&self, controller: &dyn RuntimeController, module: ModuleRef) {
        self.on_module_load(controller, module);
    }
}

/// The attached debuggee process.
pub trait RuntimeProcess: Send + Sync {
    fn modules(&self) -> Vec<ModuleRef>;

    /// Install the event handler. Must be called before the debuggee runs.
    fn set_callback(&self, callback: Arc<dyn DebugCallback>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_classification() {
        assert!(ElementType::I4.is_primitive());
        assert!(ElementType::R8.is_primitive());
        assert!(!ElementType::String.is_primitive());
        assert!(!ElementType::Class.is_primitive());
        assert!(ElementType::SzArray.is_array());
        assert!(ElementType::Array.is_array());
    }

    #[test]
    fn array_shape_len_is_product_of_dims() {
        let shape = ArrayShape {
            rank: 2,
            dims: vec![2, 3],
        };
        assert_eq!(shape.len(), 6);
        let empty = ArrayShape {
            rank: 1,
            dims: vec![0],
        };
        assert!(empty.is_empty());
    }
}
