use criterion::{black_box, criterion_group, criterion_main, Criterion};
use detector_models::{DetectorSetup, UniformField};
use finder_core::{FinderConfig, TrackFinder};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim::{EventSimulator, ParticleRanges, SimParams};

fn bench_pipeline(c: &mut Criterion) {
    let setup = DetectorSetup::default();
    let field = UniformField::default();
    let finder = TrackFinder::new(FinderConfig::default(), setup.clone(), field).unwrap();
    let mut group = c.benchmark_group("pipeline");

    for n in [1, 10, 30, 60] {
        let mut rng = ChaCha8Rng::seed_from_u64(n as u64);
        let particles: Vec<_> = (0..n)
            .map(|id| ParticleRanges::default().draw(id as u64, &mut rng))
            .collect();
        let params = SimParams {
            background_rate: 0.02,
            ..Default::default()
        };
        let event = EventSimulator::new(&setup, &field, params, 7).generate(0, &particles);

        group.bench_function(format!("{n}_tracks"), |b| {
            b.iter(|| black_box(finder.process_event(&event.raw)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
