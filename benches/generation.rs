//! Board generation benchmarks
//!
//! Measures one full generation (diagonal seed, solve, hole punching) per
//! board size, plus the solver alone on a 9x9 puzzle.
//!
//! Run with: cargo bench --bench generation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sudoku_duel::core::rng::DeterministicRng;
use sudoku_duel::game::board::BoardSize;
use sudoku_duel::game::generator::{BoardGenerator, GeneratorConfig};

fn bench_generate(c: &mut Criterion) {
    let generator = BoardGenerator::new(GeneratorConfig::default());
    let mut group = c.benchmark_group("generate");

    for size in BoardSize::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut nonce = 0u64;
            b.iter(|| {
                nonce += 1;
                let mut rng = DeterministicRng::for_board(42, nonce);
                black_box(generator.generate_with_retries(size, &mut rng).ok())
            });
        });
    }

    group.finish();
}

fn bench_complete(c: &mut Criterion) {
    let generator = BoardGenerator::new(GeneratorConfig::default());
    let mut rng = DeterministicRng::new(7);
    let puzzle = generator
        .generate_with_retries(BoardSize::Nine, &mut rng)
        .expect("9x9 puzzle");

    c.bench_function("complete_9x9", |b| {
        b.iter(|| black_box(generator.complete(black_box(&puzzle)).ok()))
    });
}

criterion_group!(benches, bench_generate, bench_complete);
criterion_main!(benches);
