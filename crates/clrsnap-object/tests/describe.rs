//! Wire-form serialisation of materialised objects.

use std::sync::Arc;

use clrsnap_object::{DescribeOptions, ObjectFactory};
use clrsnap_runtime::harness::{ClassBuilder, SimBehavior, SimModule, SimType, SimValue};
use clrsnap_runtime::surface::{ElementType, ValueRef};

fn options(factory: &ObjectFactory) -> DescribeOptions<'_> {
    DescribeOptions {
        factory,
        context: None,
        max_array_items: 1000,
        property_eval: true,
    }
}

#[test]
fn auto_property_surfaces_value_and_hides_backing_field() {
    let module = SimModule::new("app.dll");
    let class = ClassBuilder::new("App.C")
        .auto_property("Name", ElementType::String, "System.String")
        .build();
    module.add_class(&class);

    let instance = class.instance(vec![(
        "<Name>k__BackingField",
        SimValue::string("x") as ValueRef,
    )]);

    let factory = ObjectFactory::default();
    let object = factory.create(&instance, 5);
    let node = object.describe("c", &options(&factory));

    assert_eq!(node.type_name, "App.C");
    let member_names: Vec<&str> = node.members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(member_names, vec!["Name"]);
    assert_eq!(node.members[0].value.as_deref(), Some("x"));
}

#[test]
fn multi_dimensional_array_members_use_bracketed_indices() {
    let factory = ObjectFactory::default();
    let element = SimType::primitive(ElementType::I4);
    let mut elements: Vec<ValueRef> = (0..6).map(|_| SimValue::i4(0) as ValueRef).collect();
    elements[5] = SimValue::i4(42);
    let value = SimValue::array(&element, vec![2, 3], elements) as ValueRef;

    let object = factory.create(&value, 5);
    let node = object.describe("m", &options(&factory));

    assert_eq!(node.type_name, "System.Int32[,]");
    assert_eq!(node.members.len(), 6);
    let last = node.members.last().unwrap();
    assert_eq!(last.name, "[1,2]");
    assert_eq!(last.value.as_deref(), Some("42"));
}

#[test]
fn array_capture_is_capped_with_an_informational_status() {
    let factory = ObjectFactory::default();
    let element = SimType::primitive(ElementType::I4);
    let elements: Vec<ValueRef> = (0..10).map(|i| SimValue::i4(i) as ValueRef).collect();
    let value = SimValue::array(&element, vec![10], elements) as ValueRef;

    let object = factory.create(&value, 5);
    let capped = DescribeOptions {
        max_array_items: 4,
        ..options(&factory)
    };
    let node = object.describe("xs", &capped);

    assert_eq!(node.members.len(), 4);
    let status = node.status.unwrap();
    assert!(!status.is_error);
    assert!(status.message.contains("first 4 of 10"));
}

#[test]
fn non_auto_property_without_context_reports_unavailable() {
    let module = SimModule::new("app.dll");
    let class = ClassBuilder::new("App.C")
        .property(
            "P",
            ElementType::I4,
            "System.Int32",
            SimBehavior::Throws("System.Exception".into()),
        )
        .build();
    module.add_class(&class);

    let factory = ObjectFactory::default();
    let object = factory.create(&class.instance(vec![]), 5);
    let node = object.describe("c", &options(&factory));

    assert_eq!(node.members.len(), 1);
    let member = &node.members[0];
    assert_eq!(member.name, "P");
    assert!(member.value.is_none());
    let status = member.status.as_ref().unwrap();
    assert!(!status.is_error);
}

#[test]
fn disabled_property_evaluation_is_reported_per_member() {
    let module = SimModule::new("app.dll");
    let class = ClassBuilder::new("App.C")
        .property(
            "P",
            ElementType::I4,
            "System.Int32",
            SimBehavior::Returns(Arc::new(|_, _| Ok(SimValue::i4(1) as ValueRef))),
        )
        .build();
    module.add_class(&class);

    let factory = ObjectFactory::default();
    let object = factory.create(&class.instance(vec![]), 5);
    let disabled = DescribeOptions {
        property_eval: false,
        ..options(&factory)
    };
    let node = object.describe("c", &disabled);

    let member = &node.members[0];
    let status = member.status.as_ref().unwrap();
    assert!(status.message.contains("disabled"));
}

#[test]
fn generic_instantiation_renders_in_the_type_display() {
    let module = SimModule::new("app.dll");
    let class = ClassBuilder::new("System.Collections.Generic.Dictionary").build();
    module.add_class(&class);

    let value = SimValue::object_with(
        &class,
        Vec::new(),
        vec![
            SimType::string(),
            SimType::primitive(ElementType::I4),
        ],
    ) as ValueRef;

    let factory = ObjectFactory::default();
    let object = factory.create(&value, 5);
    let node = object.describe("map", &options(&factory));
    assert_eq!(
        node.type_name,
        "System.Collections.Generic.Dictionary<System.String, System.Int32>"
    );
}

#[test]
fn null_variables_carry_type_but_no_value_or_members() {
    let module = SimModule::new("app.dll");
    let class = ClassBuilder::new("App.C")
        .field("x", ElementType::I4, "System.Int32")
        .build();
    module.add_class(&class);

    let factory = ObjectFactory::default();
    let value = SimValue::null(SimType::of_class(&class)) as ValueRef;
    let object = factory.create(&value, 5);
    assert!(object.is_null());

    let node = object.describe("c", &options(&factory));
    assert_eq!(node.type_name, "App.C");
    assert!(node.value.is_none());
    assert!(node.members.is_empty());
    assert!(node.status.is_none());
}

#[test]
fn wire_form_round_trips_through_serde() {
    let factory = ObjectFactory::default();
    let object = factory.create(&(SimValue::i4(7) as ValueRef), 5);
    let node = object.describe("n", &options(&factory));

    let json = serde_json::to_string(&node).unwrap();
    assert!(json.contains("\"type\":\"System.Int32\""));
    let back: clrsnap_object::VariableNode = serde_json::from_str(&json).unwrap();
    assert_eq!(back, node);
}
