//! Benchmark for the terrain contact pipeline
//!
//! Measures one step over a flat patch with a grid of resting spheres, with
//! and without a forest cell under them.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use planet_physics::{
    Body, BodySet, BrakingDeflection, CollisionShape, FlatPatchProvider, PhysicsConfig,
    TerrainContactPipeline, Tree,
};

const SURFACE: f64 = 6.0e6;

/// Spheres on a square grid, 1 cm into the ground
fn spawn_spheres(bodies: &mut BodySet, count: usize, spacing: f64) {
    let cols = (count as f64).sqrt().ceil() as usize;
    for i in 0..count {
        let x = (i % cols) as f64 * spacing;
        let z = (i / cols) as f64 * spacing;
        bodies.insert(Body::dynamic(
            CollisionShape::sphere(0.5),
            1.0,
            DVec3::new(x, SURFACE + 0.49, z),
        ));
    }
}

/// One 16-tree cell per 4x4 block of grid points
fn plant_forest(provider: &mut FlatPatchProvider, count: usize, spacing: f64) {
    let cols = (count as f64).sqrt().ceil() as usize;
    let mut identifier = 0u16;
    for bx in (0..cols).step_by(4) {
        for bz in (0..cols).step_by(4) {
            let trees = (0..16)
                .map(|i| {
                    let x = (bx + i % 4) as f64 * spacing + spacing * 0.5;
                    let z = (bz + i / 4) as f64 * spacing + spacing * 0.5;
                    identifier = identifier.wrapping_add(1);
                    Tree::new(identifier, DVec3::new(x, SURFACE, z), 0.2, 8.0, 3.0e7)
                })
                .collect();
            provider.add_tree_cell(0, trees);
        }
    }
}

fn bench_terrain_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("terrain_step");

    for count in [16usize, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("flat", count), &count, |b, &count| {
            let mut pipeline = TerrainContactPipeline::new(PhysicsConfig::default());
            let mut provider = FlatPatchProvider::new(SURFACE, 2.0);
            let mut bodies = BodySet::new();
            spawn_spheres(&mut bodies, count, 3.0);

            b.iter(|| {
                pipeline.step(&mut bodies, &mut provider, &mut BrakingDeflection, 1.0 / 60.0);
                black_box(pipeline.stats().terrain_contacts)
            });
        });

        group.bench_with_input(BenchmarkId::new("forest", count), &count, |b, &count| {
            let mut pipeline = TerrainContactPipeline::new(PhysicsConfig::default());
            let mut provider = FlatPatchProvider::new(SURFACE, 2.0);
            plant_forest(&mut provider, count, 3.0);
            let mut bodies = BodySet::new();
            spawn_spheres(&mut bodies, count, 3.0);

            b.iter(|| {
                pipeline.step(&mut bodies, &mut provider, &mut BrakingDeflection, 1.0 / 60.0);
                black_box(pipeline.stats().trees_processed)
            });
        });
    }

    group.finish();
}

fn bench_pipeline_creation(c: &mut Criterion) {
    c.bench_function("terrain_pipeline_new", |b| {
        b.iter(|| black_box(TerrainContactPipeline::new(PhysicsConfig::default())));
    });
}

criterion_group!(benches, bench_terrain_step, bench_pipeline_creation);

criterion_main!(benches);
