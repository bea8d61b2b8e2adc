use microflow::core::data::{AttrType, Attribute, Scope};
use microflow::core::expression::{function, parse, ScopeResolver};
use microflow::core::{ErrorCategory, ExpressionEngine, FunctionRegistry, FunctionRegistryBuilder};
use serde_json::{json, Value};

fn scope(values: Value) -> Scope {
    let mut scope = Scope::new();
    for (name, value) in values.as_object().cloned().unwrap_or_default() {
        scope.add_attr(Attribute::untyped(name, value));
    }
    scope
}

fn eval(engine: &ExpressionEngine, text: &str, scope: &Scope) -> Value {
    engine.evaluate_str(text, &ScopeResolver, scope).unwrap()
}

#[test]
fn test_builtin_dispatch_by_qualified_name() {
    let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
    let scope = scope(json!({"name": "Ada Lovelace", "tags": ["a", "b"]}));

    assert_eq!(eval(&engine, "string.upper($name)", &scope), json!("ADA LOVELACE"));
    assert_eq!(eval(&engine, "string.split($name, ' ')", &scope), json!(["Ada", "Lovelace"]));
    assert_eq!(eval(&engine, "array.count($tags) + 1", &scope), json!(3));
    assert_eq!(eval(&engine, "number.max(3, 9.5, 2)", &scope), json!(9.5));
    assert_eq!(
        eval(&engine, "array.join(array.append($tags, 'c'), '-')", &scope),
        json!("a-b-c")
    );
}

#[test]
fn test_unknown_function_is_rejected_at_parse() {
    let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
    let err = engine.parse("string.reverse('abc')").unwrap_err();
    assert_eq!(err.category, ErrorCategory::UnknownFunction);
    assert_eq!(engine.cached_len(), 0);
}

#[test]
fn test_custom_function_registration() {
    let mut builder = FunctionRegistryBuilder::with_builtins();
    builder
        .register("shout", "text", |args: &[Value]| {
            let text = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("{}!", text.to_uppercase())))
        })
        .unwrap();
    let duplicate = builder.register("upper", "string", |_: &[Value]| Ok(Value::Null));
    assert_eq!(
        duplicate.unwrap_err().category,
        ErrorCategory::DuplicateRegistration
    );

    let engine = ExpressionEngine::new(builder.build());
    let scope = scope(json!({"word": "hey"}));
    assert_eq!(eval(&engine, "text.shout($word)", &scope), json!("HEY!"));
}

#[test]
fn test_parse_is_deterministic_and_cached() {
    let text = "${trigger.content.count} > 2 ? 'many' : string.concat('few:', $count)";
    assert_eq!(parse(text).unwrap(), parse(text).unwrap());

    let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
    let first = engine.parse(text).unwrap();
    let second = engine.parse(text).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(engine.cached_len(), 1);
}

#[test]
fn test_bare_words_compare_as_strings() {
    let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
    let scope = scope(json!({"status": "ok", "code": "200"}));
    let resolver = ScopeResolver;
    let guard = engine.parse("${trigger.content.status} == ok").unwrap();
    assert!(engine.evaluate_bool(&guard, &resolver, &scope).unwrap());
    let failed = self::scope(json!({"status": "error"}));
    assert!(!engine.evaluate_bool(&guard, &resolver, &failed).unwrap());
    let numeric = engine.parse("$code == 200.0").unwrap();
    assert!(engine.evaluate_bool(&numeric, &resolver, &scope).unwrap());
    let missing = engine.parse("$absent == null").unwrap();
    assert!(engine.evaluate_bool(&missing, &resolver, &scope).unwrap());
    let blank = engine.parse("${trigger.content.absent} == ''").unwrap();
    assert!(engine.evaluate_bool(&blank, &resolver, &scope).unwrap());
    let not_blank = engine.parse("$status != ''").unwrap();
    assert!(engine.evaluate_bool(&not_blank, &resolver, &scope).unwrap());
}

#[test]
fn test_evaluation_errors() {
    let engine = ExpressionEngine::new(FunctionRegistry::with_builtins());
    let scope = scope(json!({"zero": 0, "word": "abc"}));
    let resolver = ScopeResolver;

    let err = engine.evaluate_str("10 / $zero", &resolver, &scope).unwrap_err();
    assert_eq!(err.category, ErrorCategory::EvalError);
    let err = engine.evaluate_str("$word * 2", &resolver, &scope).unwrap_err();
    assert_eq!(err.category, ErrorCategory::EvalError);
    let err = engine
        .evaluate_str("string.substring($word)", &resolver, &scope)
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::InvalidArgument);
    let err = engine.evaluate_str("(1 + ", &resolver, &scope).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ParseError);
}

#[test]
fn test_global_registry_installs_once() {
    let mut builder = FunctionRegistryBuilder::with_builtins();
    builder
        .register("answer", "", |_: &[Value]| Ok(json!(42)))
        .unwrap();
    function::install_global(builder.build()).unwrap();
    assert!(function::global().contains("answer"));

    let err = function::install_global(FunctionRegistry::with_builtins()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::DuplicateRegistration);

    let engine = ExpressionEngine::default();
    let mut scope = Scope::new();
    scope.add_attr(Attribute::new("n", AttrType::Int, json!(1)).unwrap());
    assert_eq!(eval(&engine, "answer() + $n", &scope), json!(43));
}
