//! Object factory: runtime value in, `DbgObject` out.

use tracing::trace;

use clrsnap_runtime::error::DebugError;
use clrsnap_runtime::surface::{
    ElementType, FrameRef, RawValue, RuntimeType, TypeRef, ValueRef,
};

use crate::class;
use crate::object::{DbgArray, DbgObject};
use crate::signature::TypeSignature;

/// Bound on reference-following before materialisation gives up.
pub const DEFAULT_DEREF_LIMIT: u32 = 10;

/// Materialises runtime values into [`DbgObject`]s.
///
/// Creation never panics and never fails the snapshot: a value that cannot
/// be materialised becomes an object carrying its own failure status.
pub struct ObjectFactory {
    deref_limit: u32,
    frame: Option<FrameRef>,
}

impl Default for ObjectFactory {
    fn default() -> Self {
        Self {
            deref_limit: DEFAULT_DEREF_LIMIT,
            frame: None,
        }
    }
}

impl ObjectFactory {
    #[must_use]
    pub fn new(deref_limit: u32) -> Self {
        Self {
            deref_limit,
            frame: None,
        }
    }

    /// Attach the active frame, enabling static-field capture.
    #[must_use]
    pub fn with_frame(mut self, frame: FrameRef) -> Self {
        self.frame = Some(frame);
        self
    }

    #[must_use]
    pub fn frame(&self) -> Option<&FrameRef> {
        self.frame.as_ref()
    }

    /// Materialise `value` with the given member-depth budget.
    #[must_use]
    pub fn create(&self, value: &ValueRef, depth: i32) -> DbgObject {
        match self.try_create(value, depth) {
            Ok(object) => object,
            Err(err) => {
                trace!(error = %err, "materialisation failed");
                let signature = value
                    .exact_type()
                    .map(|t| TypeSignature::from_type(&t))
                    .unwrap_or_else(|_| TypeSignature::object());
                DbgObject::failed(signature, err, "")
            }
        }
    }

    /// A type-only object, used for rendering instantiations.
    #[must_use]
    pub fn create_empty(&self, runtime_type: &TypeRef) -> DbgObject {
        DbgObject::empty(TypeSignature::from_type(runtime_type))
    }

    fn try_create(&self, value: &ValueRef, depth: i32) -> Result<DbgObject, DebugError> {
        let (view, is_null) = self.dereference_and_unbox(value)?;
        if is_null {
            let signature = view
                .exact_type()
                .map(|t| TypeSignature::from_type(&t))
                .unwrap_or_else(|_| TypeSignature::object());
            return Ok(DbgObject::null(signature));
        }

        let element = view.element_type();
        match element {
            _ if element.is_primitive() => Ok(DbgObject::primitive(view.read_scalar()?)),
            ElementType::String => {
                let handle = view.create_handle()?;
                Ok(DbgObject::string(handle))
            }
            ElementType::SzArray | ElementType::Array => {
                let shape = view.array_shape()?;
                let runtime_type = view.exact_type()?;
                let element_signature = runtime_type
                    .type_args()
                    .first()
                    .map(TypeSignature::from_type)
                    .ok_or_else(|| {
                        DebugError::runtime("array type carries no element type")
                    })?;
                let signature = TypeSignature::array_of(element_signature.clone(), shape.rank);
                let handle = view.create_handle()?;
                Ok(DbgObject::array(
                    signature,
                    DbgArray {
                        handle: Some(handle),
                        shape,
                        element: element_signature,
                    },
                    depth - 1,
                ))
            }
            ElementType::Class | ElementType::ValueType | ElementType::Object => {
                let runtime_type = view.exact_type()?;
                class::materialise(self, &view, &runtime_type, depth - 1)
            }
            other => Err(DebugError::NotImplemented(
                format!("values of element type {other:?}").into(),
            )),
        }
    }

    /// Follow references up to the bound, then unbox.
    ///
    /// A null anywhere in the chain short-circuits with the null flag; a
    /// chain longer than the bound is a labelled failure, never a loop.
    pub fn dereference_and_unbox(
        &self,
        value: &ValueRef,
    ) -> Result<(ValueRef, bool), DebugError> {
        let mut current = value.clone();
        let mut steps = 0u32;
        while current.is_reference() {
            if current.is_null() {
                return Ok((current, true));
            }
            if steps >= self.deref_limit {
                return Err(DebugError::ReferenceDepth);
            }
            current = current.dereference()?;
            steps += 1;
        }
        if current.is_boxed() {
            current = current.unbox()?;
        }
        Ok((current, false))
    }
}

#[cfg(test)]
mod tests {
    use clrsnap_runtime::harness::{indirect, ClassBuilder, SimType, SimValue};
    use clrsnap_runtime::surface::{Scalar, ValueRef};

    use super::*;
    use crate::object::DbgObjectKind;

    #[test]
    fn scalars_materialise_as_primitives() {
        let factory = ObjectFactory::default();
        let object = factory.create(&(SimValue::i4(42) as ValueRef), 5);
        assert_eq!(object.scalar(), Some(Scalar::I4(42)));
        assert_eq!(object.signature().name, "System.Int32");
        assert!(object.error().is_none());
    }

    #[test]
    fn null_references_record_declared_type() {
        let factory = ObjectFactory::default();
        let value = SimValue::null(SimType::class_named("App.Widget")) as ValueRef;
        let object = factory.create(&value, 5);
        assert!(object.is_null());
        assert_eq!(object.signature().name, "App.Widget");
    }

    #[test]
    fn strings_pin_a_handle_and_defer_payload() {
        let factory = ObjectFactory::default();
        let value = SimValue::string("sample");
        let backing = value.as_sim_string().unwrap();
        let object = factory.create(&(value.clone() as ValueRef), 5);
        assert_eq!(backing.pin_count(), 1);
        // Payload is not fetched until asked.
        assert_eq!(backing.last_requested_units(), 0);
        let payload = object.as_string().unwrap().payload().unwrap();
        assert_eq!(payload, "sample");
        // len + 1 units requested, never len + 2.
        assert_eq!(backing.last_requested_units(), 7);
        drop(object);
        assert_eq!(backing.pin_count(), 0);
    }

    #[test]
    fn boxed_values_unbox_before_classification() {
        let factory = ObjectFactory::default();
        let int_class = ClassBuilder::new("System.Int32").value_type().build();
        let boxed = SimValue::boxed(&int_class, SimValue::i4(9)) as ValueRef;
        let object = factory.create(&boxed, 5);
        assert_eq!(object.scalar(), Some(Scalar::I4(9)));
    }

    #[test]
    fn deref_chains_beyond_the_bound_fail_cleanly() {
        let factory = ObjectFactory::new(10);
        let declared = SimType::class_named("System.Object");
        let mut value: ValueRef = SimValue::i4(1) as ValueRef;
        for _ in 0..12 {
            value = indirect(value, declared.clone()) as ValueRef;
        }
        let object = factory.create(&value, 5);
        assert_eq!(object.error(), Some(&DebugError::ReferenceDepth));
        assert!(!object.error_message().is_empty());

        // A chain inside the bound still resolves.
        let mut short: ValueRef = SimValue::i4(2) as ValueRef;
        for _ in 0..3 {
            short = indirect(short, declared.clone()) as ValueRef;
        }
        let object = factory.create(&short, 5);
        assert_eq!(object.scalar(), Some(Scalar::I4(2)));
    }

    #[test]
    fn arrays_capture_shape_and_element_type() {
        let factory = ObjectFactory::default();
        let element = SimType::primitive(clrsnap_runtime::surface::ElementType::I4);
        let value = SimValue::array(
            &element,
            vec![2, 3],
            (0..6).map(|i| SimValue::i4(i) as ValueRef).collect(),
        ) as ValueRef;
        let object = factory.create(&value, 5);
        let array = object.as_array().unwrap();
        assert_eq!(array.shape().rank, 2);
        assert_eq!(array.shape().dims, vec![2, 3]);
        assert_eq!(object.signature().name, "System.Int32[,]");

        let element = array.element_at(5, &factory, 1).unwrap();
        assert_eq!(element.scalar(), Some(Scalar::I4(5)));
    }

    #[test]
    fn class_instances_capture_fields_eagerly() {
        use clrsnap_runtime::surface::ElementType;

        let factory = ObjectFactory::default();
        let class = ClassBuilder::new("App.Point")
            .field("x", ElementType::I4, "System.Int32")
            .field("y", ElementType::I4, "System.Int32")
            .build();
        let module = clrsnap_runtime::harness::SimModule::new("app.dll");
        module.add_class(&class);
        let instance = class.instance(vec![
            ("x", SimValue::i4(3) as ValueRef),
            ("y", SimValue::i4(4) as ValueRef),
        ]);
        let object = factory.create(&instance, 5);
        let class_object = object.as_class().unwrap();
        assert_eq!(class_object.fields().len(), 2);
        assert_eq!(
            class_object.field("x").unwrap().value.scalar(),
            Some(Scalar::I4(3))
        );
    }

    #[test]
    fn depth_budget_stops_member_capture() {
        use clrsnap_runtime::surface::ElementType;

        let factory = ObjectFactory::default();
        let class = ClassBuilder::new("App.Node")
            .field("next", ElementType::Class, "App.Node")
            .field("id", ElementType::I4, "System.Int32")
            .build();
        let module = clrsnap_runtime::harness::SimModule::new("app.dll");
        module.add_class(&class);

        let leaf = class.instance(vec![("id", SimValue::i4(0) as ValueRef)]);
        let mid = class.instance(vec![
            ("next", leaf),
            ("id", SimValue::i4(1) as ValueRef),
        ]);
        let root = class.instance(vec![
            ("next", mid),
            ("id", SimValue::i4(2) as ValueRef),
        ]);

        // Budget 2: root expands, the child at the depth boundary still
        // captures its own fields, and the chain stops one level below.
        let object = factory.create(&root, 2);
        let root_class = object.as_class().unwrap();
        assert_eq!(root_class.fields().len(), 2);
        let mid = &root_class.field("next").unwrap().value;
        let mid_class = mid.as_class().unwrap();
        assert_eq!(mid_class.fields().len(), 2);
        let leaf = &mid_class.field("next").unwrap().value;
        assert!(leaf.as_class().unwrap().fields().is_empty());
    }
}
