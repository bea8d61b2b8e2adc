use microflow::core::data::{AttrDecl, AttrType, Attribute, GlobalScope, Scope};
use microflow::core::expression::ScopeResolver;
use microflow::core::{
    ErrorCategory, ExpressionEngine, FunctionRegistry, Mapper, MapperDef, MappingDef, MappingType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn engine() -> ExpressionEngine {
    ExpressionEngine::new(FunctionRegistry::with_builtins())
}

fn order_scope() -> Scope {
    let mut scope = Scope::new();
    scope.add_attr(Attribute::untyped(
        "order",
        json!({"id": "A-7", "qty": "4", "price": 2.5, "lines": [{"sku": "x"}, {"sku": "y"}]}),
    ));
    scope.add_attr(Attribute::untyped("customer", json!("Grace")));
    scope
}

#[test]
fn test_mapping_order_decides_the_result() {
    let engine = engine();
    let defs = vec![
        MappingDef::literal("label", json!("draft")),
        MappingDef::expression("label", "string.concat($label, '/', $customer)"),
    ];
    let mapper = assert_ok!(Mapper::compile(&defs, &engine));

    let mut input = order_scope();
    input.add_attr(Attribute::untyped("label", json!("in")));
    let mut output = Scope::new();
    assert_ok!(mapper.apply(&input, &ScopeResolver, &engine, &mut output));
    // Expressions read the input scope, not earlier writes.
    assert_eq!(output.get_value("label"), Some(json!("in/Grace")));
}

#[test]
fn test_typed_targets_coerce_values() {
    let engine = engine();
    let mut output = assert_ok!(Scope::from_decls(&[
        AttrDecl::new("qty", AttrType::Int),
        AttrDecl::new("price", AttrType::String),
        AttrDecl::new("rush", AttrType::Bool).with_default(json!(false)),
    ]));
    let defs: MapperDef = assert_ok!(serde_json::from_value(json!([
        {"mapTo": "qty", "type": "assign", "value": "order.qty"},
        {"mapTo": "price", "type": "expression", "value": "${order.price} * 2"},
        {"mapTo": "rush", "type": "literal", "value": "true"}
    ])));
    let mapper = assert_ok!(Mapper::compile(&defs, &engine));
    assert_ok!(mapper.apply(&order_scope(), &ScopeResolver, &engine, &mut output));

    assert_eq!(output.get_value("qty"), Some(json!(4)));
    assert_eq!(output.get_value("price"), Some(json!("5.0")));
    assert_eq!(output.get_value("rush"), Some(json!(true)));
}

#[test]
fn test_coercion_failure_names_the_target() {
    let engine = engine();
    let mut output = Scope::new();
    output.add_attr(assert_ok!(Attribute::new("lines", AttrType::Object, Value::Null)));
    let mapper = assert_ok!(Mapper::compile(
        &[MappingDef::expression("lines", "${order.lines}")],
        &engine,
    ));
    let err = assert_err!(mapper.apply(&order_scope(), &ScopeResolver, &engine, &mut output));
    assert_eq!(err.category, ErrorCategory::CoercionError);
    assert_eq!(err.context.get("target").map(String::as_str), Some("lines"));
}

#[test]
fn test_nested_targets_and_object_templates() {
    let engine = engine();
    let defs = vec![
        MappingDef::new(
            "reply",
            MappingType::Object,
            json!({
                "id": "${order.id}",
                "skus": ["${order.lines[0].sku}", "${order.lines[1].sku}"],
                "greeting": "=string.upper($customer)",
                "static": 3
            }),
        ),
        MappingDef::literal("reply.meta.version", json!(2)),
    ];
    let mapper = assert_ok!(Mapper::compile(&defs, &engine));
    let mut output = Scope::new();
    assert_ok!(mapper.apply(&order_scope(), &ScopeResolver, &engine, &mut output));
    assert_eq!(
        output.get_value("reply"),
        Some(json!({
            "id": "A-7",
            "skus": ["x", "y"],
            "greeting": "GRACE",
            "static": 3,
            "meta": {"version": 2}
        }))
    );
}

#[test]
fn test_global_targets_write_through_to_parent() {
    let engine = engine();
    let global = Arc::new(GlobalScope::new());
    assert_ok!(global.add(assert_ok!(Attribute::new("hits", AttrType::Int, json!(0)))));

    let mut input = order_scope();
    input.set_parent(Arc::clone(&global));
    let mapper = assert_ok!(Mapper::compile(
        &[
            MappingDef::expression("global.hits", "$hits + 1"),
            MappingDef::expression("global.last.customer", "$customer"),
        ],
        &engine,
    ));
    let mut output = Scope::with_parent(Arc::clone(&global));
    assert_ok!(mapper.apply(&input, &ScopeResolver, &engine, &mut output));

    assert!(output.is_empty());
    assert_eq!(assert_ok!(global.get_value("hits")), Some(json!(1)));
    assert_eq!(
        assert_ok!(global.get_value("last")),
        Some(json!({"customer": "Grace"}))
    );
}

#[test]
fn test_invalid_definitions_fail_at_compile() {
    let engine = engine();
    let err = assert_err!(Mapper::compile(
        &[MappingDef::expression("x", "string.nope($customer)")],
        &engine,
    ));
    assert_eq!(err.category, ErrorCategory::UnknownFunction);

    let err = assert_err!(Mapper::compile(
        &[MappingDef::new("x", MappingType::Assign, json!(5))],
        &engine,
    ));
    assert_eq!(err.category, ErrorCategory::ValidationError);

    let err = assert_err!(Mapper::compile(
        &[MappingDef::new("y", MappingType::Object, json!({"a": "=1 +"}))],
        &engine,
    ));
    assert_eq!(err.category, ErrorCategory::ParseError);
    assert_eq!(err.context.get("target").map(String::as_str), Some("y"));
}
