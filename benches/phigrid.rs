use criterion::{criterion_group, criterion_main, Criterion};
use halocov::{CovarianceConfig, PhiGrid, SignalType, ARCMIN};

fn bench_phigrid(c: &mut Criterion) {
    let mut group = c.benchmark_group("phigrid");
    for (name, n_phi, pixel_exact_max) in
        [("default", 1000usize, 20usize), ("fine", 4000, 40)]
    {
        let mut cfg = CovarianceConfig::new(SignalType::Tsz, ARCMIN);
        cfg.n_phi = n_phi;
        cfg.pixel_exact_max = pixel_exact_max;
        cfg.seed = Some(0);
        group.bench_function(name, |b| b.iter(|| PhiGrid::build(&cfg).unwrap()));
    }
    group.finish();
}

criterion_group!(benches, bench_phigrid);
criterion_main!(benches);
