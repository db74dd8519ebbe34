//! Integration tests for id-keyed dispatch
//!
//! Tests cover:
//! - Unknown method ids are declined without side effects
//! - Polymorphic and monomorphic dispatch through the parent chain
//! - Embedder calls and argument checks

use cml_engine::intrinsics::{BooleanVal, Card4Val, StringVal};
use cml_engine::stack::CallerInfo;
use cml_engine::{
    ClassInfo, ClassRegistry, Dispatch, Engine, EngineError, EngineOptions, Intrinsic, MacroClass, MethodExt,
    MethodInfo, OpCode, OpMethodImpl, Visibility,
};

#[test]
fn test_unknown_method_id_is_declined() {
    let registry = ClassRegistry::builder().build().unwrap();
    let mut engine = Engine::new(registry.clone());
    let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
    engine.value_as_mut::<StringVal>(text).unwrap().text = "unchanged".to_string();

    let mut bogus = MethodInfo::new("Bogus", Intrinsic::Void.id(), Visibility::Public, MethodExt::Final);
    bogus.id = 999;

    for info in registry.iter() {
        let handler = registry.handler(info.id()).unwrap();
        let handled = handler.invoke(&mut engine, &bogus, text).unwrap();
        assert!(!handled, "{} accepted an unknown id", info.path());
    }

    assert_eq!(engine.stack_top(), 0);
    assert_eq!(engine.value_as::<StringVal>(text).unwrap().text, "unchanged");
}

#[test]
fn test_invoke_unknown_id_is_method_not_found() {
    let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
    let flag = engine.construct(Intrinsic::Boolean.id(), "flag").unwrap();

    let err = engine
        .invoke(flag, Intrinsic::Boolean.id(), 500, Dispatch::Poly)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::MethodNotFound { method_id: 500, ref class_path } if class_path == "MEng.Boolean"
    ));
    assert!(!err.is_catchable());
}

#[test]
fn test_inherited_method_reaches_base_handler() {
    // FormatTo is declared by Formattable and served by its handler
    let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
    let flag = engine.construct(Intrinsic::Boolean.id(), "flag").unwrap();
    let target = engine.construct(Intrinsic::String.id(), "target").unwrap();
    engine.value_as_mut::<BooleanVal>(flag).unwrap().value = true;

    engine.call_by_name(flag, "FormatTo", &[target]).unwrap();
    engine.call_by_name(flag, "FormatTo", &[target]).unwrap();
    assert_eq!(engine.value_as::<StringVal>(target).unwrap().text, "TrueTrue");
}

#[test]
fn test_poly_dispatch_picks_override() {
    let card4 = Intrinsic::Card4.id();
    let mut builder = ClassRegistry::builder();
    let base = builder
        .add_class(
            ClassInfo::from_path("MEng.User.Animal", "MEng.Object").with_ext(cml_engine::ClassExt::NonFinal),
            Box::new(MacroClass::new().method(
                MethodInfo::new("Legs", card4, Visibility::Public, MethodExt::NonFinal),
                OpMethodImpl::new(vec![OpCode::PushImCard4(4), OpCode::PopToReturn]),
            )),
        )
        .unwrap();
    let bird = builder
        .add_class(
            ClassInfo::from_path("MEng.User.Bird", "MEng.User.Animal"),
            Box::new(MacroClass::new().override_method(
                "Legs",
                OpMethodImpl::new(vec![OpCode::PushImCard4(2), OpCode::PopToReturn]),
            )),
        )
        .unwrap();
    let registry = builder.build().unwrap();
    let legs = registry.class(base).unwrap().method_id("Legs").unwrap();
    assert_eq!(registry.class(bird).unwrap().method_id("Legs"), Some(legs));

    let mut engine = Engine::new(registry);
    let tweety = engine.construct(bird, "tweety").unwrap();

    let ret = engine.call_method(tweety, legs, &[]).unwrap().unwrap();
    assert_eq!(engine.value_as::<Card4Val>(ret).unwrap().value, 2);
    engine.free_value(ret).unwrap();

    // Mono dispatch from the base runs the base body against the bird
    let ret = engine
        .new_value(card4, "ret", cml_engine::Constness::NonConst)
        .unwrap();
    engine.push_value(ret, cml_engine::StackItemType::Parm).unwrap();
    engine.push_method_call(base, legs, None::<CallerInfo>).unwrap();
    engine.invoke(tweety, base, legs, Dispatch::Mono).unwrap();
    engine.pop_back_to(0).unwrap();
    assert_eq!(engine.value_as::<Card4Val>(ret).unwrap().value, 4);
}

#[test]
fn test_call_method_validation_can_be_disabled() {
    let registry = ClassRegistry::builder().build().unwrap();
    let options = EngineOptions::default().with_validation(false);
    let mut engine = Engine::with_options(registry, options);

    let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
    let other = engine.construct(Intrinsic::String.id(), "other").unwrap();
    engine.value_as_mut::<StringVal>(other).unwrap().text = "abc".to_string();

    engine.call_by_name(text, "Append", &[other]).unwrap();
    assert_eq!(engine.value_as::<StringVal>(text).unwrap().text, "abc");

    // Argument count is always checked
    assert!(matches!(
        engine.call_by_name(text, "Append", &[]),
        Err(EngineError::ParmCount { .. })
    ));
}

#[test]
fn test_call_by_name_unknown_method() {
    let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
    let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
    assert!(matches!(
        engine.call_by_name(text, "Explode", &[]),
        Err(EngineError::MethodNotFound { class_path, .. }) if class_path == "MEng.String.Explode"
    ));
}
