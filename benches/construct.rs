use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use distwt::construct::build;
use distwt::{BitVector, RankIndex};
use rand::Rng;

fn criterion_benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut g = c.benchmark_group("construct");

    let len = 1_000_000;
    for height in [4, 8, 12] {
        let codes: Vec<u64> = (0..len).map(|_| rng.gen_range(0..1u64 << height)).collect();
        g.bench_function(BenchmarkId::new("prefix_counting", height), |b| {
            b.iter(|| build(black_box(&codes), height).unwrap());
        });
    }
    g.finish();

    let mut g = c.benchmark_group("rank");
    let universe_size = 100_000;
    // density denominator; we will sweep x/denominator for a few x
    let denominator = 1000;
    for numerator in [1, 100, 700] {
        // 0.1%, 10%, 70% fill rate
        let bv: BitVector = (0..universe_size)
            .map(|_| rng.gen_ratio(numerator, denominator))
            .collect();
        let r = RankIndex::new(bv);

        // query a quarter of the positions
        let queries: Vec<usize> = (0..universe_size).filter(|_| rng.gen_ratio(25, 100)).collect();

        g.bench_function(BenchmarkId::new("rank1", numerator), |b| {
            b.iter(|| {
                let mut ret = 0;
                for q in queries.iter().copied() {
                    ret += r.rank1(q);
                }
                ret
            });
        });
    }
    g.finish();
}

criterion_group! {
    name    = benches;
    config  = Criterion::default().warm_up_time(Duration::from_secs(1));
    targets = criterion_benchmark
}
criterion_main!(benches);
