//! Simulated runtime values and types.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::DebugError;
use crate::handle::{RawHandle, StrongHandle};
use crate::surface::{
    canonical_type_name, ArrayShape, ClassToken, ElementType, FieldToken, ModuleRef, RawValue,
    RuntimeType, Scalar, TypeRef, ValueRef,
};

use super::module::SimClass;

/// Simulated exact type.
pub struct SimType {
    pub(super) element: ElementType,
    pub(super) name: SmolStr,
    pub(super) class: Option<Arc<SimClass>>,
    pub(super) args: Vec<Arc<SimType>>,
}

impl SimType {
    /// A primitive type with its canonical framework name.
    #[must_use]
    pub fn primitive(element: ElementType) -> Arc<Self> {
        let name = canonical_type_name(element).unwrap_or("?");
        Arc::new(Self {
            element,
            name: SmolStr::new_static(name),
            class: None,
            args: Vec::new(),
        })
    }

    /// A class type known only by name (no metadata attached).
    #[must_use]
    pub fn class_named(name: impl Into<SmolStr>) -> Arc<Self> {
        Arc::new(Self {
            element: ElementType::Class,
            name: name.into(),
            class: None,
            args: Vec::new(),
        })
    }

    /// The type of instances of `class`.
    #[must_use]
    pub fn of_class(class: &Arc<SimClass>) -> Arc<Self> {
        Self::of_class_with(class, Vec::new())
    }

    /// The type of instances of `class` with a generic instantiation.
    #[must_use]
    pub fn of_class_with(class: &Arc<SimClass>, args: Vec<Arc<SimType>>) -> Arc<Self> {
        Arc::new(Self {
            element: if class.is_value_type {
                ElementType::ValueType
            } else {
                ElementType::Class
            },
            name: class.name.clone(),
            class: Some(class.clone()),
            args,
        })
    }

    /// An array type over `element_type` of the given rank.
    #[must_use]
    pub fn array_of(element_type: &Arc<SimType>, rank: u32) -> Arc<Self> {
        let commas = ",".repeat(rank.saturating_sub(1) as usize);
        Arc::new(Self {
            element: if rank == 1 {
                ElementType::SzArray
            } else {
                ElementType::Array
            },
            name: SmolStr::new(format!("{}[{}]", element_type.name, commas)),
            class: None,
            args: vec![element_type.clone()],
        })
    }

    #[must_use]
    pub fn string() -> Arc<Self> {
        Arc::new(Self {
            element: ElementType::String,
            name: SmolStr::new_static("System.String"),
            class: None,
            args: Vec::new(),
        })
    }
}

impl RuntimeType for SimType {
    fn element_type(&self) -> ElementType {
        self.element
    }

    fn name(&self) -> SmolStr {
        self.name.clone()
    }

    fn class_token(&self) -> Option<ClassToken> {
        self.class.as_ref().map(|class| class.token)
    }

    fn module(&self) -> Option<ModuleRef> {
        let class = self.class.as_ref()?;
        let module = class.module.lock().expect("sim class poisoned").clone();
        module.upgrade().map(|module| module as ModuleRef)
    }

    fn type_args(&self) -> Vec<TypeRef> {
        self.args.iter().map(|arg| arg.clone() as TypeRef).collect()
    }

    fn base(&self) -> Option<TypeRef> {
        let class = self.class.as_ref()?;
        let base = class.base.as_ref()?;
        Some(SimType::of_class(base) as TypeRef)
    }
}

/// Simulated heap string.
pub struct SimString {
    data: String,
    pins: AtomicI32,
    last_requested: AtomicU32,
}

impl SimString {
    fn new(data: &str) -> Arc<Self> {
        Arc::new(Self {
            data: data.to_owned(),
            pins: AtomicI32::new(0),
            last_requested: AtomicU32::new(0),
        })
    }

    /// Unit count the last `read_string` call requested. Lets tests pin the
    /// `len + 1` allocation contract down.
    #[must_use]
    pub fn last_requested_units(&self) -> u32 {
        self.last_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pin_count(&self) -> i32 {
        self.pins.load(Ordering::SeqCst)
    }
}

/// Simulated heap array.
pub struct SimArrayData {
    pub(super) element: Arc<SimType>,
    pub(super) dims: Vec<u32>,
    pub(super) elements: Mutex<Vec<ValueRef>>,
    pins: AtomicI32,
}

impl SimArrayData {
    #[must_use]
    pub fn pin_count(&self) -> i32 {
        self.pins.load(Ordering::SeqCst)
    }
}

/// Simulated heap object (class instance or boxed value).
pub struct SimObjectData {
    pub(super) class: Arc<SimClass>,
    pub(super) fields: Mutex<IndexMap<FieldToken, ValueRef>>,
    pub(super) boxed: Option<ValueRef>,
    pub(super) type_args: Vec<Arc<SimType>>,
    pins: AtomicI32,
}

impl SimObjectData {
    #[must_use]
    pub fn pin_count(&self) -> i32 {
        self.pins.load(Ordering::SeqCst)
    }

    /// Overwrite a field, as running debuggee code would.
    pub fn set_field(&self, token: FieldToken, value: ValueRef) {
        self.fields
            .lock()
            .expect("sim object poisoned")
            .insert(token, value);
    }
}

/// One step of the simulated reference graph.
#[derive(Clone)]
pub enum SimHeapRef {
    Str(Arc<SimString>),
    Arr(Arc<SimArrayData>),
    Obj(Arc<SimObjectData>),
    /// A reference whose target is itself a value (possibly another
    /// reference). Used to model by-ref chains.
    Indirect(ValueRef),
}

#[derive(Clone)]
pub(super) enum SimValueKind {
    Scalar(Scalar),
    Reference {
        target: Option<SimHeapRef>,
        declared: Arc<SimType>,
    },
    StringView(Arc<SimString>),
    ArrayView(Arc<SimArrayData>),
    ObjectView(Arc<SimObjectData>),
}

/// A simulated runtime value, the harness implementation of [`RawValue`].
pub struct SimValue {
    pub(super) kind: SimValueKind,
}

impl SimValue {
    #[must_use]
    pub fn scalar(scalar: Scalar) -> Arc<Self> {
        Arc::new(Self {
            kind: SimValueKind::Scalar(scalar),
        })
    }

    #[must_use]
    pub fn boolean(value: bool) -> Arc<Self> {
        Self::scalar(Scalar::Bool(value))
    }

    #[must_use]
    pub fn i4(value: i32) -> Arc<Self> {
        Self::scalar(Scalar::I4(value))
    }

    #[must_use]
    pub fn i8v(value: i64) -> Arc<Self> {
        Self::scalar(Scalar::I8(value))
    }

    #[must_use]
    pub fn r8(value: f64) -> Arc<Self> {
        Self::scalar(Scalar::R8(value))
    }

    /// A string reference, as a local of type `string` appears.
    #[must_use]
    pub fn string(data: &str) -> Arc<Self> {
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: Some(SimHeapRef::Str(SimString::new(data))),
                declared: SimType::string(),
            },
        })
    }

    /// A null reference with the given declared type.
    #[must_use]
    pub fn null(declared: Arc<SimType>) -> Arc<Self> {
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: None,
                declared,
            },
        })
    }

    /// An array reference. `elements` is flattened row-major and must match
    /// the product of `dims`.
    #[must_use]
    pub fn array(element: &Arc<SimType>, dims: Vec<u32>, elements: Vec<ValueRef>) -> Arc<Self> {
        let rank = dims.len() as u32;
        let data = Arc::new(SimArrayData {
            element: element.clone(),
            dims,
            elements: Mutex::new(elements),
            pins: AtomicI32::new(0),
        });
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: Some(SimHeapRef::Arr(data)),
                declared: SimType::array_of(element, rank),
            },
        })
    }

    /// A reference to a fresh class instance.
    #[must_use]
    pub fn object(class: &Arc<SimClass>, fields: Vec<(FieldToken, ValueRef)>) -> Arc<Self> {
        Self::object_with(class, fields, Vec::new())
    }

    /// A reference to a fresh instance with a generic instantiation.
    #[must_use]
    pub fn object_with(
        class: &Arc<SimClass>,
        fields: Vec<(FieldToken, ValueRef)>,
        type_args: Vec<Arc<SimType>>,
    ) -> Arc<Self> {
        let data = Arc::new(SimObjectData {
            class: class.clone(),
            fields: Mutex::new(fields.into_iter().collect()),
            boxed: None,
            type_args,
            pins: AtomicI32::new(0),
        });
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: Some(SimHeapRef::Obj(data)),
                declared: SimType::of_class(class),
            },
        })
    }

    /// A reference to an existing heap object.
    #[must_use]
    pub fn reference(target: SimHeapRef, declared: Arc<SimType>) -> Arc<Self> {
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: Some(target),
                declared,
            },
        })
    }

    /// An inline value-type instance, as a struct local appears.
    #[must_use]
    pub fn struct_value(class: &Arc<SimClass>, fields: Vec<(FieldToken, ValueRef)>) -> Arc<Self> {
        Arc::new(Self {
            kind: SimValueKind::ObjectView(Arc::new(SimObjectData {
                class: class.clone(),
                fields: Mutex::new(fields.into_iter().collect()),
                boxed: None,
                type_args: Vec::new(),
                pins: AtomicI32::new(0),
            })),
        })
    }

    /// A reference to a boxed scalar.
    #[must_use]
    pub fn boxed(class: &Arc<SimClass>, inner: ValueRef) -> Arc<Self> {
        let data = Arc::new(SimObjectData {
            class: class.clone(),
            fields: Mutex::new(IndexMap::new()),
            boxed: Some(inner),
            type_args: Vec::new(),
            pins: AtomicI32::new(0),
        });
        Arc::new(Self {
            kind: SimValueKind::Reference {
                target: Some(SimHeapRef::Obj(data)),
                declared: SimType::class_named("System.Object"),
            },
        })
    }

    /// An ad-hoc exception object, as a throwing eval produces.
    #[must_use]
    pub fn exception(type_name: &str) -> Arc<Self> {
        let class = SimClass::adhoc(type_name);
        Self::object(&class, Vec::new())
    }

    /// The heap string behind a string reference, for test assertions.
    #[must_use]
    pub fn as_sim_string(&self) -> Option<Arc<SimString>> {
        match &self.kind {
            SimValueKind::StringView(data) => Some(data.clone()),
            SimValueKind::Reference {
                target: Some(SimHeapRef::Str(data)),
                ..
            } => Some(data.clone()),
            _ => None,
        }
    }

    /// The heap array behind an array reference, for test assertions.
    #[must_use]
    pub fn as_sim_array(&self) -> Option<Arc<SimArrayData>> {
        match &self.kind {
            SimValueKind::ArrayView(data) => Some(data.clone()),
            SimValueKind::Reference {
                target: Some(SimHeapRef::Arr(data)),
                ..
            } => Some(data.clone()),
            _ => None,
        }
    }

    /// The heap object behind an object reference, for test assertions.
    #[must_use]
    pub fn as_sim_object(&self) -> Option<Arc<SimObjectData>> {
        match &self.kind {
            SimValueKind::ObjectView(data) => Some(data.clone()),
            SimValueKind::Reference {
                target: Some(SimHeapRef::Obj(data)),
                ..
            } => Some(data.clone()),
            _ => None,
        }
    }

    fn view_of(target: &SimHeapRef) -> ValueRef {
        match target {
            SimHeapRef::Str(data) => Arc::new(SimValue {
                kind: SimValueKind::StringView(data.clone()),
            }),
            SimHeapRef::Arr(data) => Arc::new(SimValue {
                kind: SimValueKind::ArrayView(data.clone()),
            }),
            SimHeapRef::Obj(data) => Arc::new(SimValue {
                kind: SimValueKind::ObjectView(data.clone()),
            }),
            SimHeapRef::Indirect(value) => value.clone(),
        }
    }

    fn heap_address(target: &SimHeapRef) -> Option<u64> {
        match target {
            SimHeapRef::Str(data) => Some(Arc::as_ptr(data) as usize as u64),
            SimHeapRef::Arr(data) => Some(Arc::as_ptr(data) as usize as u64),
            SimHeapRef::Obj(data) => Some(Arc::as_ptr(data) as usize as u64),
            SimHeapRef::Indirect(value) => value.object_address(),
        }
    }
}

impl RawValue for SimValue {
    fn element_type(&self) -> ElementType {
        match &self.kind {
            SimValueKind::Scalar(scalar) => scalar.element_type(),
            SimValueKind::Reference {
                target: Some(target),
                ..
            } => match target {
                SimHeapRef::Str(_) => ElementType::String,
                SimHeapRef::Arr(data) => {
                    if data.dims.len() == 1 {
                        ElementType::SzArray
                    } else {
                        ElementType::Array
                    }
                }
                SimHeapRef::Obj(_) => ElementType::Class,
                SimHeapRef::Indirect(_) => ElementType::ByRef,
            },
            SimValueKind::Reference {
                target: None,
                declared,
            } => declared.element,
            SimValueKind::StringView(_) => ElementType::String,
            SimValueKind::ArrayView(data) => {
                if data.dims.len() == 1 {
                    ElementType::SzArray
                } else {
                    ElementType::Array
                }
            }
            SimValueKind::ObjectView(data) => {
                if data.class.is_value_type {
                    ElementType::ValueType
                } else {
                    ElementType::Class
                }
            }
        }
    }

    fn is_reference(&self) -> bool {
        matches!(self.kind, SimValueKind::Reference { .. })
    }

    fn is_null(&self) -> bool {
        matches!(
            self.kind,
            SimValueKind::Reference { target: None, .. }
        )
    }

    fn dereference(&self) -> Result<ValueRef, DebugError> {
        match &self.kind {
            SimValueKind::Reference {
                target: Some(target),
                ..
            } => Ok(Self::view_of(target)),
            SimValueKind::Reference { target: None, .. } => Err(DebugError::NullReference),
            _ => Err(DebugError::runtime("value is not a reference")),
        }
    }

    fn is_boxed(&self) -> bool {
        match &self.kind {
            SimValueKind::ObjectView(data) => data.boxed.is_some(),
            _ => false,
        }
    }

    fn unbox(&self) -> Result<ValueRef, DebugError> {
        match &self.kind {
            SimValueKind::ObjectView(data) => data
                .boxed
                .clone()
                .ok_or_else(|| DebugError::runtime("object is not a box")),
            _ => Err(DebugError::runtime("value is not a box")),
        }
    }

    fn exact_type(&self) -> Result<TypeRef, DebugError> {
        match &self.kind {
            SimValueKind::Scalar(scalar) => {
                Ok(SimType::primitive(scalar.element_type()) as TypeRef)
            }
            SimValueKind::Reference {
                target: Some(target),
                declared,
            } => match target {
                SimHeapRef::Str(_) => Ok(SimType::string() as TypeRef),
                SimHeapRef::Arr(data) => {
                    Ok(SimType::array_of(&data.element, data.dims.len() as u32) as TypeRef)
                }
                SimHeapRef::Obj(data) => {
                    Ok(SimType::of_class_with(&data.class, data.type_args.clone()) as TypeRef)
                }
                SimHeapRef::Indirect(_) => Ok(declared.clone() as TypeRef),
            },
            SimValueKind::Reference {
                target: None,
                declared,
            } => Ok(declared.clone() as TypeRef),
            SimValueKind::StringView(_) => Ok(SimType::string() as TypeRef),
            SimValueKind::ArrayView(data) => {
                Ok(SimType::array_of(&data.element, data.dims.len() as u32) as TypeRef)
            }
            SimValueKind::ObjectView(data) => {
                Ok(SimType::of_class_with(&data.class, data.type_args.clone()) as TypeRef)
            }
        }
    }

    fn read_scalar(&self) -> Result<Scalar, DebugError> {
        match &self.kind {
            SimValueKind::Scalar(scalar) => Ok(*scalar),
            _ => Err(DebugError::runtime("value is not a scalar")),
        }
    }

    fn string_length(&self) -> Result<u32, DebugError> {
        match &self.kind {
            SimValueKind::StringView(data) => {
                Ok(data.data.encode_utf16().count() as u32)
            }
            _ => Err(DebugError::runtime("value is not a string")),
        }
    }

    fn read_string(&self, requested: u32) -> Result<Vec<u16>, DebugError> {
        match &self.kind {
            SimValueKind::StringView(data) => {
                data.last_requested.store(requested, Ordering::SeqCst);
                let mut units: Vec<u16> = data.data.encode_utf16().collect();
                units.push(0);
                units.truncate(requested as usize);
                Ok(units)
            }
            _ => Err(DebugError::runtime("value is not a string")),
        }
    }

    fn array_shape(&self) -> Result<ArrayShape, DebugError> {
        match &self.kind {
            SimValueKind::ArrayView(data) => Ok(ArrayShape {
                rank: data.dims.len() as u32,
                dims: data.dims.clone(),
            }),
            _ => Err(DebugError::runtime("value is not an array")),
        }
    }

    fn array_element(&self, index: u32) -> Result<ValueRef, DebugError> {
        match &self.kind {
            SimValueKind::ArrayView(data) => {
                let elements = data.elements.lock().expect("sim array poisoned");
                elements.get(index as usize).cloned().ok_or_else(|| {
                    DebugError::IndexOutOfRange {
                        index: i64::from(index),
                        len: elements.len() as u64,
                    }
                })
            }
            _ => Err(DebugError::runtime("value is not an array")),
        }
    }

    fn field_value(&self, _class: ClassToken, field: FieldToken) -> Result<ValueRef, DebugError> {
        match &self.kind {
            SimValueKind::ObjectView(data) => {
                let fields = data.fields.lock().expect("sim object poisoned");
                fields
                    .get(&field)
                    .cloned()
                    .ok_or_else(|| DebugError::runtime("field has no value"))
            }
            _ => Err(DebugError::runtime("value is not an object")),
        }
    }

    fn object_address(&self) -> Option<u64> {
        match &self.kind {
            SimValueKind::Scalar(_) => None,
            SimValueKind::Reference {
                target: Some(target),
                ..
            } => Self::heap_address(target),
            SimValueKind::Reference { target: None, .. } => Some(0),
            SimValueKind::StringView(data) => Some(Arc::as_ptr(data) as usize as u64),
            SimValueKind::ArrayView(data) => Some(Arc::as_ptr(data) as usize as u64),
            SimValueKind::ObjectView(data) => Some(Arc::as_ptr(data) as usize as u64),
        }
    }

    fn create_handle(&self) -> Result<StrongHandle, DebugError> {
        let target = match &self.kind {
            SimValueKind::Reference {
                target: Some(target),
                ..
            } => target.clone(),
            SimValueKind::StringView(data) => SimHeapRef::Str(data.clone()),
            SimValueKind::ArrayView(data) => SimHeapRef::Arr(data.clone()),
            SimValueKind::ObjectView(data) => SimHeapRef::Obj(data.clone()),
            SimValueKind::Reference { target: None, .. } => {
                return Err(DebugError::NullReference);
            }
            SimValueKind::Scalar(_) => {
                return Err(DebugError::runtime("scalars cannot be pinned"));
            }
        };
        match &target {
            SimHeapRef::Str(data) => data.pins.fetch_add(1, Ordering::SeqCst),
            SimHeapRef::Arr(data) => data.pins.fetch_add(1, Ordering::SeqCst),
            SimHeapRef::Obj(data) => data.pins.fetch_add(1, Ordering::SeqCst),
            SimHeapRef::Indirect(_) => {
                return Err(DebugError::runtime("by-ref values cannot be pinned"));
            }
        };
        Ok(StrongHandle::new(Box::new(SimHandle { target })))
    }
}

struct SimHandle {
    target: SimHeapRef,
}

impl RawHandle for SimHandle {
    fn dereference(&self) -> Result<ValueRef, DebugError> {
        Ok(SimValue::view_of(&self.target))
    }

    fn release(&self) {
        match &self.target {
            SimHeapRef::Str(data) => data.pins.fetch_sub(1, Ordering::SeqCst),
            SimHeapRef::Arr(data) => data.pins.fetch_sub(1, Ordering::SeqCst),
            SimHeapRef::Obj(data) => data.pins.fetch_sub(1, Ordering::SeqCst),
            SimHeapRef::Indirect(_) => 0,
        };
    }
}

/// Wrap a value in one by-ref indirection hop, for building dereference
/// chains of arbitrary depth.
#[must_use]
pub fn indirect(value: ValueRef, declared: Arc<SimType>) -> Arc<SimValue> {
    Arc::new(SimValue {
        kind: SimValueKind::Reference {
            target: Some(SimHeapRef::Indirect(value)),
            declared,
        },
    })
}
