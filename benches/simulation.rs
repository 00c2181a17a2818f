//! Performance benchmarks for LOTKA

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lotka::estimator::{estimate_parameters, LotkaVolterraModel, LotkaVolterraParams};
use lotka::{Config, Simulation};

fn benchmark_world_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");

    for population in [100usize, 400, 1000].iter() {
        let mut config = Config::default();
        config.world.width = 64;
        config.world.height = 64;
        config.world.initial_prey = population * 4 / 5;
        config.world.initial_predators = population / 5;
        config.logging.stats_interval = 0;
        config.estimator.refit_interval = 0;

        let mut sim = Simulation::new_with_seed(config, 42).unwrap();

        // Warm up
        sim.run(Some(5)).unwrap();

        group.bench_with_input(
            BenchmarkId::new("population", population),
            population,
            |b, _| {
                b.iter(|| {
                    if !sim.is_extinct() {
                        sim.step().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_estimator(c: &mut Criterion) {
    let truth = LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001);
    let series = LotkaVolterraModel::new(truth).simulate(60.0, 20.0, 500);

    c.bench_function("estimate_parameters_500", |b| {
        b.iter(|| estimate_parameters(black_box(&series)));
    });
}

fn benchmark_rk4(c: &mut Criterion) {
    let model = LotkaVolterraModel::new(LotkaVolterraParams::new(0.1, 0.002, 0.08, 0.001));

    c.bench_function("rk4_simulate_1000", |b| {
        b.iter(|| model.simulate(black_box(60.0), black_box(20.0), 1000));
    });
}

criterion_group!(benches, benchmark_world_step, benchmark_estimator, benchmark_rk4);

criterion_main!(benches);
