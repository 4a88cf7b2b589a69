use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kestrel_consensus_core::config::params::PowVariant;
use kestrel_hashes::Hash;
use kestrel_pow::{matrix::Matrix, xoshiro::XoShiRo256PlusPlus};

// Big enough to make the cache not very useful
const ITERS: usize = 1024;

fn bench_pow(c: &mut Criterion) {
    let mut generator = XoShiRo256PlusPlus::new(Hash::from_bytes([42; 32]));
    let mut next_hash = || Hash::from_le_u64([generator.u64(), generator.u64(), generator.u64(), generator.u64()]);
    let seeds: Vec<_> = (0..ITERS).map(|_| next_hash()).collect();
    let hashes: Vec<_> = (0..ITERS).map(|_| next_hash()).collect();

    for variant in [PowVariant::V1, PowVariant::V101, PowVariant::V110] {
        let matrices: Vec<_> = seeds.iter().map(|&seed| Matrix::generate(seed, variant)).collect();
        c.bench_function(&format!("HeavyHash {variant:?}"), |b| {
            b.iter(|| {
                for (matrix, &hash) in matrices.iter().zip(hashes.iter()) {
                    black_box(matrix.heavy_hash(hash));
                }
            });
        });
    }

    c.bench_function("Compute Rank", |b| {
        let matrices: Vec<_> = seeds.iter().map(|&seed| Matrix::generate(seed, PowVariant::V1)).collect();
        b.iter(|| {
            for matrix in &matrices {
                black_box(matrix.compute_rank());
            }
        });
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
