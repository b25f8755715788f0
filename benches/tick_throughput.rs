//! Tick resolution throughput on the stock arena.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use maze_arena::config::MazeConfig;
use maze_arena::core::vec2::Vec2;
use maze_arena::game::state::EntityStore;
use maze_arena::game::{resolve_tick, Action};

fn bench_resolve_tick(c: &mut Criterion) {
    let config = MazeConfig::default_arena().expect("stock arena is valid");
    let actions = [Action::moving(Vec2::new(6.0, 2.0)), Action::moving(Vec2::new(-6.0, -2.0))];

    c.bench_function("resolve_tick/stock_arena", |b| {
        b.iter_batched(
            || EntityStore::new(&config),
            |mut store| {
                for _ in 0..60 {
                    black_box(resolve_tick(&config, &mut store, &actions).expect("no invariant violation"));
                }
                store
            },
            criterion::BatchSize::SmallInput,
        )
    });

    c.bench_function("state_hash/stock_arena", |b| {
        let store = EntityStore::new(&config);
        b.iter(|| black_box(store.state_hash()))
    });
}

criterion_group!(benches, bench_resolve_tick);
criterion_main!(benches);
