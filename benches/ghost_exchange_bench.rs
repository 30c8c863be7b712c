use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use amr_stepper::algs::exchange::merge_local_neighbours;
use amr_stepper::prelude::*;

struct Copying;

impl Discretization<2> for Copying {
    fn stable_time_step_size(&self, _luh: &[f64], _p: &PatchView<'_, 2>) -> f64 {
        0.1
    }
    fn solution_update(&self, luh: &mut [f64], prev: &[f64], _p: &PatchView<'_, 2>) -> f64 {
        luh.copy_from_slice(prev);
        0.1
    }
    fn boundary_conditions(&self, out: &mut [f64], inside: &[f64], _p: &PatchView<'_, 2>, _f: Face) {
        out.copy_from_slice(inside);
    }
}

fn bench_local_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_merge");
    for &n in &[4usize, 8, 16, 32] {
        let spec = SolverSpec {
            variables: 5,
            nodes_per_axis: n,
            ghost_layer_width: 2.min(n),
            ..SolverSpec::default()
        };
        let solver = Solver::<2>::new(SolverId::new(0), &spec, Box::new(Copying)).unwrap();
        let mut store = PatchStore::<2>::new(Arc::new(BackgroundTasks::inline()));
        let mut rng = SmallRng::seed_from_u64(42);
        let keys: Vec<_> = (0..2)
            .map(|i| {
                let cell = store.create_cell();
                let k = store
                    .add_descriptor(cell, solver.id(), CellKind::Cell, 0, ParentRef::Invalid, [1.0; 2], [i as f64, 0.0])
                    .unwrap();
                store.allocate_buffers(k, solver.layout().buffer_len()).unwrap();
                store
                    .with_solution_mut(k, |u| u.iter_mut().for_each(|v| *v = rng.gen_range(0.0..1.0)))
                    .unwrap();
                k
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                for &k in &keys {
                    store.descriptor_mut(k).unwrap().reset_neighbour_merge_flags();
                }
                merge_local_neighbours(&solver, &mut store, keys[0], keys[1], [0, 0], [1, 0]).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_fused_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("fused_time_step");
    group.sample_size(10);
    for &h in &[0.4f64, 0.15] {
        group.bench_with_input(BenchmarkId::from_parameter(h), &h, |b, &h| {
            b.iter(|| {
                let config = RunConfig {
                    end_time: 1.0,
                    ..RunConfig::default()
                };
                let mut ctx = SimulationContext::new(config, NoComm, [0.0; 2], [1.0; 2]).unwrap();
                let spec = SolverSpec {
                    maximum_mesh_size: h,
                    time_stepping: TimeStepping::GlobalFixed,
                    ..SolverSpec::default()
                };
                ctx.register_solver(spec, Box::new(Copying)).unwrap();
                Runner::new(UniformGrid::<2>::new()).run(&mut ctx).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_local_merge, bench_fused_step);
criterion_main!(benches);
