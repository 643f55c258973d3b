// Benchmark for path blending, time parameterization and trajectory queries
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use krusty_totg::{Path, Trajectory, DEFAULT_PATH_TOLERANCE};
use nalgebra::DVector;

fn zigzag(count: usize) -> Vec<DVector<f64>> {
    (0..count)
        .map(|i| {
            let x = i as f64 * 0.5;
            let y = if i % 2 == 0 { 0.0 } else { 0.4 };
            DVector::from_row_slice(&[x, y, 0.1 * (i % 3) as f64])
        })
        .collect()
}

fn bench_path_creation(c: &mut Criterion) {
    let waypoints = zigzag(200);
    c.bench_function("create path (200 waypoints)", |b| {
        b.iter(|| {
            let path = Path::create(&waypoints, DEFAULT_PATH_TOLERANCE).unwrap();
            assert!(path.length() > 0.0);
        });
    });
}

fn bench_trajectory_creation(c: &mut Criterion) {
    let path = Path::create(&zigzag(20), DEFAULT_PATH_TOLERANCE).unwrap();
    let max_velocity = DVector::from_element(3, 1.0);
    let max_acceleration = DVector::from_element(3, 2.0);
    c.bench_function("create trajectory (20 waypoints)", |b| {
        b.iter(|| {
            let trajectory = Trajectory::with_default_time_step(&path, &max_velocity, &max_acceleration).unwrap();
            assert!(trajectory.is_valid());
        });
    });
}

fn bench_sequential_queries(c: &mut Criterion) {
    let path = Path::create(&zigzag(20), DEFAULT_PATH_TOLERANCE).unwrap();
    let trajectory = Trajectory::with_default_time_step(
        &path,
        &DVector::from_element(3, 1.0),
        &DVector::from_element(3, 2.0),
    )
    .unwrap();
    let duration = trajectory.duration();
    c.bench_function("query 10k sequential states", |b| {
        b.iter(|| {
            trajectory.reset_cache();
            let mut sum = 0.0;
            for k in 0..10_000 {
                let t = duration * k as f64 / 10_000.0;
                sum += trajectory.position_at(t)[0];
            }
            assert!(sum.is_finite());
        });
    });
}

criterion_group!(benches, bench_path_creation, bench_trajectory_creation, bench_sequential_queries);
criterion_main!(benches);
