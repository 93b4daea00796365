use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mush_core::ObjectType;
use mush_scripting::lock::{normalize, LockService, LockType};
use mush_scripting::MemoryWorld;
use std::sync::Arc;

fn lock_eval_bench(c: &mut Criterion) {
    let world = Arc::new(MemoryWorld::new());
    let (room, wizard) = world.bootstrap();
    let door = world.create(ObjectType::Exit, "Door", Some(room));
    let bob = world.create(ObjectType::Player, "Bob", Some(room));
    world.set_attr(bob.dbref, "SEX", "male");
    let service = LockService::new(world.clone());

    let text = format!(
        "(={} | type^PLAYER) & sex:m* & !#FALSE & (+{} | ${})",
        bob.dbref, wizard, bob.dbref
    );
    service
        .set(door.dbref, LockType::Enter, &text)
        .expect("bench lock compiles");

    let gate = world.create(ObjectType::Thing, "Gate", Some(room));
    service
        .set(gate.dbref, LockType::Basic, &text)
        .expect("bench lock compiles");
    service
        .set(door.dbref, LockType::Use, &format!("@{}", gate.dbref))
        .expect("bench lock compiles");

    let mut group = c.benchmark_group("locks");
    group.bench_function("cached evaluate", |b| {
        b.iter(|| service.evaluate(LockType::Enter, black_box(&door), black_box(&bob)))
    });
    group.bench_function("cached indirect evaluate", |b| {
        b.iter(|| service.evaluate(LockType::Use, black_box(&door), black_box(&bob)))
    });
    group.bench_function("compile", |b| b.iter(|| service.compile(black_box(&text))));
    group.bench_function("normalize", |b| {
        b.iter(|| normalize(black_box(&text), world.as_ref()))
    });
    group.finish();
}

criterion_group!(benches, lock_eval_bench);
criterion_main!(benches);
