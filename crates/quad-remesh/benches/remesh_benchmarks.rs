//! Benchmarks for quad-remesh operations.
//!
//! Run with: cargo bench -p quad-remesh
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p quad-remesh -- --save-baseline main
//! 2. After changes: cargo bench -p quad-remesh -- --baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::Point3;
use quad_remesh::{
    Cavity, Gardener, HalfEdgeMesh, MeshVertex, PlanarSurface, RepairParams, SurfacePatch,
    VertexId,
};

/// Build a regular n by n quad grid with classified boundary.
fn create_grid(n: usize) -> (SurfacePatch, Vec<VertexId>) {
    let mut patch = SurfacePatch::new(0);
    let mut verts = Vec::new();
    for j in 0..=n {
        for i in 0..=n {
            let p = Point3::new(i as f64, j as f64, 0.0);
            let on_bdr = i == 0 || j == 0 || i == n || j == n;
            let corner = (i == 0 || i == n) && (j == 0 || j == n);
            let v = if corner {
                MeshVertex::at_corner(p, std::f64::consts::FRAC_PI_2)
            } else if on_bdr {
                MeshVertex::on_curve(p)
            } else {
                MeshVertex::new(p)
            };
            verts.push(patch.add_vertex(v));
        }
    }
    for j in 0..n {
        for i in 0..n {
            patch
                .add_quad([
                    verts[j * (n + 1) + i],
                    verts[j * (n + 1) + i + 1],
                    verts[(j + 1) * (n + 1) + i + 1],
                    verts[(j + 1) * (n + 1) + i],
                ])
                .unwrap();
        }
    }
    (patch, verts)
}

/// Grid with deterministic interior jitter, for the smoothing benchmarks.
fn create_jittered_grid(n: usize) -> SurfacePatch {
    let (mut patch, verts) = create_grid(n);
    for (idx, v) in verts.iter().enumerate() {
        let i = idx % (n + 1);
        let j = idx / (n + 1);
        if i == 0 || j == 0 || i == n || j == n {
            continue;
        }
        let dx = 0.25 * ((idx * 7 % 11) as f64 / 11.0 - 0.5);
        let dy = 0.25 * ((idx * 13 % 17) as f64 / 17.0 - 0.5);
        let p = patch.position(*v).unwrap();
        patch
            .set_position(*v, Point3::new(p.x + dx, p.y + dy, 0.0))
            .unwrap();
    }
    patch
}

fn bench_half_edge_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("half_edge_construction");
    for n in [8usize, 16, 32] {
        let (patch, _) = create_grid(n);
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &patch, |b, patch| {
            b.iter(|| HalfEdgeMesh::from_patch(black_box(patch)).unwrap());
        });
    }
    group.finish();
}

fn bench_cavity_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("cavity_growth");
    for n in [8usize, 16, 32] {
        let (patch, _) = create_grid(n);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let seed = ((n / 2) * n + n / 2) as u32;
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &mesh, |b, mesh| {
            b.iter(|| {
                let mut gardener = Gardener::new(mesh);
                let mut cavity = Cavity::from_faces(mesh, &[seed]).unwrap();
                gardener.set_cavity(mesh, &cavity);
                gardener.grow_isotropic(mesh, &mut cavity, 20);
                black_box(cavity.quads.len())
            });
        });
    }
    group.finish();
}

fn bench_winslow_smoothing(c: &mut Criterion) {
    let mut group = c.benchmark_group("winslow_smoothing");
    let plane = PlanarSurface::xy();
    for n in [8usize, 16, 32] {
        let patch = create_jittered_grid(n);
        group.throughput(Throughput::Elements(((n - 1) * (n - 1)) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &patch, |b, patch| {
            b.iter_batched(
                || patch.clone(),
                |mut patch| {
                    patch.smooth(&plane, 10).unwrap();
                    patch
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_improve_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("improve_patch");
    group.sample_size(20);
    let plane = PlanarSurface::xy();
    let params = RepairParams::fast();
    for n in [8usize, 16] {
        let patch = create_jittered_grid(n);
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &patch, |b, patch| {
            b.iter_batched(
                || patch.clone(),
                |mut patch| {
                    quad_remesh::improve_patch(&mut patch, &plane, &params).unwrap();
                    patch
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_half_edge_construction,
    bench_cavity_growth,
    bench_winslow_smoothing,
    bench_improve_patch
);
criterion_main!(benches);
