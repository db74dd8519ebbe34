use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cml_engine::intrinsics::Card4Val;
use cml_engine::{
    ClassInfo, ClassRegistry, Constness, Engine, Intrinsic, MacroClass, MethodExt, MethodInfo, OpCode, OpMethodImpl,
    Visibility,
};

fn bench_native_call(c: &mut Criterion) {
    let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
    let a = engine.construct(Intrinsic::Card4.id(), "a").unwrap();
    let b = engine.construct(Intrinsic::Card4.id(), "b").unwrap();
    engine.value_as_mut::<Card4Val>(b).unwrap().value = 1;
    let add = engine.find_method(Intrinsic::Card4.id(), "Add").unwrap();
    let negate = engine.find_method(Intrinsic::Boolean.id(), "Negate").unwrap();
    let flag = engine.construct(Intrinsic::Boolean.id(), "flag").unwrap();

    c.bench_function("call_void_no_parms", |bench| {
        bench.iter(|| engine.call_method(black_box(flag), negate, &[]).unwrap());
    });

    c.bench_function("call_with_return", |bench| {
        bench.iter(|| {
            let ret = engine.call_method(black_box(a), add, &[b]).unwrap();
            if let Some(ret) = ret {
                engine.free_value(ret).unwrap();
            }
        });
    });
}

fn counting_class(inc: u16, equal: u16) -> MacroClass {
    let card4 = Intrinsic::Card4.id();
    MacroClass::new().method(
        MethodInfo::new("CountTo", card4, Visibility::Public, MethodExt::Final).in_parm("Limit", card4),
        OpMethodImpl::new(vec![
            OpCode::PushTempVar(Intrinsic::Boolean.id()),
            OpCode::PushParm(0),
            OpCode::CallLocal { local: 0, method: equal },
            OpCode::PopTop,
            OpCode::CondJump(9),
            OpCode::PushTempVar(card4),
            OpCode::CallLocal { local: 0, method: inc },
            OpCode::PopTop,
            OpCode::Jump(0),
            OpCode::PushLocal(0),
            OpCode::PopToReturn,
        ])
        .with_local("I", card4, Constness::NonConst),
    )
}

fn bench_interpreted_loop(c: &mut Criterion) {
    let probe = ClassRegistry::builder().build().unwrap();
    let card4_info = probe.class(Intrinsic::Card4.id()).unwrap();
    let inc = card4_info.method_id("Inc").unwrap();
    let equal = card4_info.method_id("Equal").unwrap();

    let mut builder = ClassRegistry::builder();
    let id = builder
        .add_class(
            ClassInfo::from_path("MEng.Bench.Counter", "MEng.Object"),
            Box::new(counting_class(inc, equal)),
        )
        .unwrap();
    let mut engine = Engine::new(builder.build().unwrap());
    let counter = engine.construct(id, "counter").unwrap();
    let count_to = engine.find_method(id, "CountTo").unwrap();
    let limit = engine.construct(Intrinsic::Card4.id(), "limit").unwrap();

    let mut group = c.benchmark_group("interpreted_loop");
    for iterations in [10u32, 100, 1000] {
        engine.value_as_mut::<Card4Val>(limit).unwrap().value = iterations;
        group.bench_with_input(BenchmarkId::new("count_to", iterations), &iterations, |bench, _| {
            bench.iter(|| {
                let ret = engine.call_method(counter, count_to, &[limit]).unwrap();
                if let Some(ret) = ret {
                    engine.free_value(ret).unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_native_call, bench_interpreted_loop);
criterion_main!(benches);
