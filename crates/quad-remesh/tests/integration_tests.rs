//! End-to-end integration tests for quad-remesh.
//!
//! These tests exercise the full pipeline from connectivity construction
//! through cavity growth, defect repair and smoothing to ensure all
//! components work together correctly.

use nalgebra::Point3;
use quad_remesh::{
    boundary_loop, improve_patch, Cavity, Gardener, HalfEdgeMesh, MeshVertex, PlanarSurface,
    QuadAdjacency, RepairParams, SurfacePatch, VertexId,
};

/// Build a regular nx by ny quad grid with classified boundary.
fn create_grid(nx: usize, ny: usize) -> (SurfacePatch, Vec<VertexId>) {
    let mut patch = SurfacePatch::new(0);
    let mut verts = Vec::new();
    for j in 0..=ny {
        for i in 0..=nx {
            let p = Point3::new(i as f64, j as f64, 0.0);
            let on_bdr = i == 0 || j == 0 || i == nx || j == ny;
            let corner = (i == 0 || i == nx) && (j == 0 || j == ny);
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
    for j in 0..ny {
        for i in 0..nx {
            patch
                .add_quad([
                    verts[j * (nx + 1) + i],
                    verts[j * (nx + 1) + i + 1],
                    verts[(j + 1) * (nx + 1) + i + 1],
                    verts[(j + 1) * (nx + 1) + i],
                ])
                .unwrap();
        }
    }
    (patch, verts)
}

/// A 3x3 grid whose center quad is split into a doublet: two quads wrapped
/// around an extra valence-2 vertex on the diagonal.
fn create_doublet_grid() -> SurfacePatch {
    let (mut patch, verts) = create_grid(3, 3);
    let center_quad = patch
        .quads()
        .find(|(_, q)| q.contains(verts[5]) && q.contains(verts[10]))
        .map(|(id, _)| id)
        .unwrap();
    let [c0, c1, c2, c3] = patch.quad(center_quad).unwrap().vertices;
    patch.remove_quad(center_quad).unwrap();
    let d = patch.add_surface_vertex(Point3::new(1.5, 1.5, 0.0));
    patch.add_quad([c0, c1, c2, d]).unwrap();
    patch.add_quad([c0, d, c2, c3]).unwrap();
    patch
}

#[test]
fn test_half_edge_involution_on_grid() {
    let (patch, _) = create_grid(4, 3);
    let mesh = patch.half_edges().unwrap();
    assert_eq!(mesh.faces.len(), 12);
    for he in 0..mesh.hedges.len() as u32 {
        // next and prev are inverse, four nexts close the face cycle.
        assert_eq!(mesh.prev(mesh.next(he)), he);
        assert_eq!(mesh.next(mesh.next(mesh.next(mesh.next(he)))), he);
        let op = mesh.opposite(he);
        if op != quad_remesh::half_edge::NO_ID {
            assert_eq!(mesh.opposite(op), he);
            assert_ne!(mesh.face(op), mesh.face(he));
            // Opposites traverse the same edge backwards.
            assert_eq!(mesh.vertex(he, 0), mesh.vertex(op, 1));
            assert_eq!(mesh.vertex(he, 1), mesh.vertex(op, 0));
        }
    }
}

#[test]
fn test_grid_valences() {
    let (patch, verts) = create_grid(3, 3);
    let adjacency = QuadAdjacency::from_patch(&patch);
    for (idx, v) in verts.iter().enumerate() {
        let i = idx % 4;
        let j = idx / 4;
        let corner = (i == 0 || i == 3) && (j == 0 || j == 3);
        let on_bdr = i == 0 || j == 0 || i == 3 || j == 3;
        let expected = if corner {
            1
        } else if on_bdr {
            2
        } else {
            4
        };
        assert_eq!(adjacency.valence(*v), expected);
    }
}

#[test]
fn test_boundary_loop_of_grid() {
    let (patch, _) = create_grid(5, 3);
    let corners: Vec<[VertexId; 4]> = patch.quads().map(|(_, q)| q.vertices).collect();
    let rim = boundary_loop(&corners).unwrap();
    assert_eq!(rim.len(), 2 * (5 + 3));
}

#[test]
fn test_cavity_boundary_closed_under_isotropic_growth() {
    let (patch, _) = create_grid(6, 6);
    let mesh = patch.half_edges().unwrap();
    let mut gardener = Gardener::new(&mesh);
    let mut cavity = Cavity::from_faces(&mesh, &[14]).unwrap();
    assert!(gardener.set_cavity(&mesh, &cavity));
    gardener.grow_isotropic(&mesh, &mut cavity, 10);
    assert!(cavity.boundary_is_closed_loop(&mesh));
    assert!(cavity.quads.len() > 1);
}

#[test]
fn test_isotropic_growth_is_bounded() {
    let (patch, _) = create_grid(6, 6);
    let mesh = patch.half_edges().unwrap();
    let mut gardener = Gardener::new(&mesh);
    let mut cavity = Cavity::from_faces(&mesh, &[14]).unwrap();
    assert!(gardener.set_cavity(&mesh, &cavity));
    gardener.grow_isotropic(&mesh, &mut cavity, 5);
    // Seed quad plus at most five absorbed quads.
    assert!((1..=6).contains(&cavity.quads.len()));
}

#[test]
fn test_growth_never_swallows_singularity() {
    let (mut patch, verts) = create_grid(6, 6);
    // Interior vertex away from the seed.
    let sing = verts[3 * 7 + 3];
    patch.set_singular(sing, true).unwrap();
    let mesh = patch.half_edges().unwrap();
    let sv = mesh.index_of(sing).unwrap();

    let mut gardener = Gardener::new(&mesh);
    let mut cavity = Cavity::from_faces(&mesh, &[0]).unwrap();
    assert!(gardener.set_cavity(&mesh, &cavity));
    gardener.grow_isotropic(&mesh, &mut cavity, 30);
    assert!(cavity.boundary_is_closed_loop(&mesh));

    // The singular vertex must never end up strictly inside the cavity.
    let mut faces = Vec::new();
    mesh.vertex_faces(sv, &mut faces);
    assert!(!faces.iter().all(|f| cavity.quads.contains(f)));
}

#[test]
fn test_smoothing_leaves_regular_grid_fixed() {
    let (mut patch, verts) = create_grid(4, 4);
    let before: Vec<Point3<f64>> = verts.iter().map(|v| patch.position(*v).unwrap()).collect();
    patch.smooth(&PlanarSurface::xy(), 10).unwrap();
    for (v, p0) in verts.iter().zip(&before) {
        let p1 = patch.position(*v).unwrap();
        assert!((p1 - p0).norm() < 1e-9);
    }
}

#[test]
fn test_doublet_repair_end_to_end() {
    let mut patch = create_doublet_grid();
    assert_eq!(patch.quad_count(), 10);

    let result = improve_patch(&mut patch, &PlanarSurface::xy(), &RepairParams::default())
        .unwrap();
    assert!(result.defects_fixed >= 1);
    assert_eq!(result.residual_defects, 0);
    assert_eq!(patch.quad_count(), 9);

    let adjacency = QuadAdjacency::from_patch(&patch);
    for (id, v) in patch.vertices() {
        if v.kind.is_surface() {
            assert_eq!(adjacency.valence(id), 4);
        }
    }
    assert!(result.quality_min > 0.5);
}

#[test]
fn test_improve_restores_distorted_grid_quality() {
    let (mut patch, verts) = create_grid(5, 5);
    // Deterministic interior jitter, small enough to keep quads valid.
    for (idx, v) in verts.iter().enumerate() {
        let i = idx % 6;
        let j = idx / 6;
        if i == 0 || j == 0 || i == 5 || j == 5 {
            continue;
        }
        let dx = 0.3 * ((idx * 7 % 11) as f64 / 11.0 - 0.5);
        let dy = 0.3 * ((idx * 13 % 17) as f64 / 17.0 - 0.5);
        let p = patch.position(*v).unwrap();
        patch
            .set_position(*v, Point3::new(p.x + dx, p.y + dy, 0.0))
            .unwrap();
    }
    let result = improve_patch(&mut patch, &PlanarSurface::xy(), &RepairParams::default())
        .unwrap();
    assert_eq!(patch.quad_count(), 25);
    assert!(result.quality_min > 0.9);
}

#[test]
fn test_singular_flag_survives_failed_remeshing() {
    // A lone singularity in a regular grid offers nothing remeshable; the
    // pipeline must leave it flagged rather than silently dropping it.
    let (mut patch, verts) = create_grid(4, 4);
    let sing = verts[2 * 5 + 2];
    patch.set_singular(sing, true).unwrap();
    improve_patch(&mut patch, &PlanarSurface::xy(), &RepairParams::default()).unwrap();
    if patch.contains_vertex(sing) {
        assert!(patch.vertex(sing).unwrap().singular);
    }
}

#[test]
fn test_half_edge_mesh_rejects_empty_patch() {
    let patch = SurfacePatch::new(3);
    let err = HalfEdgeMesh::from_patch(&patch).unwrap_err();
    assert_eq!(err.code(), quad_remesh::ErrorCode::EmptyPatch);
}
