//! Integration tests for the class model
//!
//! Tests cover:
//! - Storage creation for every intrinsic class
//! - User classes with members and nested types
//! - Sharing one registry between engines on different threads

use std::sync::Arc;
use std::thread;

use cml_engine::intrinsics::Card4Val;
use cml_engine::{
    ClassExt, ClassInfo, ClassRegistry, Constness, Engine, EngineError, Intrinsic, MacroClass, MethodExt,
    MethodInfo, OpCode, OpMethodImpl, Visibility,
};

#[test]
fn test_make_storage_for_every_intrinsic() {
    let registry = ClassRegistry::builder().build().unwrap();

    for intrinsic in Intrinsic::ALL {
        let result = registry.make_storage(intrinsic.id(), "val", Constness::NonConst);
        match intrinsic {
            Intrinsic::Object
            | Intrinsic::Void
            | Intrinsic::Formattable
            | Intrinsic::Enum
            | Intrinsic::Collection
            | Intrinsic::Vector => {
                assert!(
                    matches!(result, Err(EngineError::ClassHasNoValue(_))),
                    "{:?} should have no value",
                    intrinsic
                );
            }
            _ => {
                let value = result.unwrap();
                assert_eq!(value.class_id(), intrinsic.id());
                assert_eq!(value.name(), "val");
            }
        }
    }
}

#[test]
fn test_make_storage_for_nested_types() {
    let registry = ClassRegistry::builder().build().unwrap();

    // Every nested error enum is a concrete class
    for info in registry.iter() {
        if info.parent_path() == Intrinsic::Enum.path() {
            let value = registry.make_storage(info.id(), "err", Constness::Const).unwrap();
            assert_eq!(value.class_id(), info.id());
            assert!(value.is_const());
        }
    }
}

#[test]
fn test_abstract_user_class_has_no_value() {
    let mut builder = ClassRegistry::builder();
    let id = builder
        .add_class(
            ClassInfo::from_path("MEng.User.Shape", "MEng.Object").with_ext(ClassExt::Abstract),
            Box::new(MacroClass::new()),
        )
        .unwrap();
    let registry = builder.build().unwrap();

    assert!(matches!(
        registry.make_storage(id, "shape", Constness::NonConst),
        Err(EngineError::ClassHasNoValue(path)) if path == "MEng.User.Shape"
    ));
}

#[test]
fn test_user_class_members_are_built() {
    let mut builder = ClassRegistry::builder();
    let id = builder
        .add_class(
            ClassInfo::from_path("MEng.User.Point", "MEng.Object"),
            Box::new(
                MacroClass::new()
                    .member("X", "MEng.Card4", Constness::NonConst)
                    .member("Y", "MEng.Card4", Constness::Const),
            ),
        )
        .unwrap();
    let registry = builder.build().unwrap();
    assert_eq!(registry.class(id).unwrap().members().len(), 2);

    let mut engine = Engine::new(registry);
    let point = engine.construct(id, "point").unwrap();
    let members = engine.value(point).unwrap().members().to_vec();
    assert_eq!(members.len(), 2);
    assert!(!engine.value(members[0]).unwrap().is_const());
    assert!(engine.value(members[1]).unwrap().is_const());

    // Freeing the instance frees its members
    engine.free_value(point).unwrap();
    assert!(!engine.values().contains(members[0]));
    assert!(!engine.values().contains(members[1]));
}

#[test]
fn test_member_of_unknown_class() {
    let mut builder = ClassRegistry::builder();
    builder
        .add_class(
            ClassInfo::from_path("MEng.User.Broken", "MEng.Object"),
            Box::new(MacroClass::new().member("X", "MEng.User.Nowhere", Constness::NonConst)),
        )
        .unwrap();
    assert!(matches!(
        builder.build(),
        Err(EngineError::ClassNotFound(path)) if path == "MEng.User.Nowhere"
    ));
}

#[test]
fn test_registry_shared_between_threads() {
    let card4 = Intrinsic::Card4.id();
    let mut builder = ClassRegistry::builder();
    let id = builder
        .add_class(
            ClassInfo::from_path("MEng.User.Answer", "MEng.Object"),
            Box::new(MacroClass::new().method(
                MethodInfo::new("Get", card4, Visibility::Public, MethodExt::Final),
                OpMethodImpl::new(vec![OpCode::PushImCard4(42), OpCode::PopToReturn]),
            )),
        )
        .unwrap();
    let registry = builder.build().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut engine = Engine::new(registry);
                let obj = engine.construct(id, "obj").unwrap();
                let ret = engine.call_by_name(obj, "Get", &[]).unwrap().unwrap();
                engine.value_as::<Card4Val>(ret).unwrap().value
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 42);
    }
}
