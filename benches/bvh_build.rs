use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rust_raybvh::accel::geometry::TriangleMesh;
use rust_raybvh::accel::{bvh4_triangle4, IAccel};
use rust_raybvh::accel::ray::Ray;
use rust_raybvh::config::{AccelConfig, BuilderKind};
use rust_raybvh::utilities::task_scheduling::TaskScheduler;

fn random_soup(count: usize) -> TriangleMesh {
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let corners: Vec<[Vec3; 3]> = (0..count)
        .map(|_| {
            let base = Vec3::new(rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0));
            let mut offset = || Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            [base, base + offset(), base + offset()]
        })
        .collect();
    TriangleMesh::from_soup(0, &corners)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mesh = random_soup(black_box(100_000));
    let scheduler = TaskScheduler::with_threads(0).unwrap();

    for kind in [BuilderKind::Sah, BuilderKind::SahSpatial, BuilderKind::SahPresplit, BuilderKind::Morton] {
        let config = AccelConfig {
            tri_builder: kind,
            ..AccelConfig::default()
        };
        let mut instance = bvh4_triangle4(mesh.clone(), &config).unwrap();
        c.bench_function(&format!("bvh4.triangle4 {} build", kind), |b| {
            b.iter(|| instance.accel_mut().build(&scheduler).unwrap())
        });
    }

    let mut instance = bvh4_triangle4(mesh, &AccelConfig::default()).unwrap();
    instance.build(&scheduler).unwrap();
    c.bench_function("bvh4.triangle4 closest hit", |b| {
        b.iter(|| {
            let mut hits = 0;
            for i in 0..1024 {
                let origin = Vec3::new((i % 32) as f32 * 3.0, (i / 32) as f32 * 3.0, -10.0);
                let mut ray = Ray::new(origin, Vec3::new(0.01, 0.02, 1.0));
                hits += usize::from(instance.intersect(&mut ray).unwrap());
            }
            black_box(hits)
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
