//! Cavity remeshing drivers.
//!
//! Two passes share the same machinery: grow a cavity around a problematic
//! spot with the [`Gardener`], then replace its quads with a pattern
//! instantiation when the boundary subdivision admits one. The first pass
//! targets flagged singularities, the second collapses 3-5 valence pairs and
//! leftover irregular vertices. Both restart from a fresh half-edge mesh
//! after every successful remesh because quad and vertex indices shift.

use hashbrown::HashSet;
use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::cavity::Cavity;
use crate::error::{QuadMeshError, QuadMeshResult};
use crate::gardener::Gardener;
use crate::geometry::SurfaceGeometry;
use crate::half_edge::HalfEdgeMesh;
use crate::patterns::{patch_is_remeshable, remesh_patch, PatternVertex};
use crate::smoothing::{smooth_with_local_kernel, smooth_winslow, SmoothingOptions};
use crate::tracing_ext::PassTimer;
use crate::types::{
    EntityClass, MeshSplice, MeshVertex, SpliceVertex, SurfacePatch, VertexId,
};

/// What a successful cavity remesh produced.
#[derive(Debug, Clone)]
pub struct CavityRemeshOutcome {
    /// Quads that replaced the cavity.
    pub quads: Vec<crate::types::QuadId>,
    /// Irregular vertices introduced by the pattern, already flagged
    /// singular in the patch.
    pub new_singularities: Vec<VertexId>,
}

/// Strategy replacing a grown cavity with new quads.
///
/// `Ok(None)` means the cavity is valid but not remeshable by this strategy;
/// the drivers move on to the next seed. Errors are reserved for corrupted
/// inputs.
pub trait CavityRemesher {
    fn remesh(
        &self,
        patch: &mut SurfacePatch,
        geometry: &dyn SurfaceGeometry,
        mesh: &HalfEdgeMesh,
        cavity: &Cavity,
        center: Option<Point3<f64>>,
    ) -> QuadMeshResult<Option<CavityRemeshOutcome>>;
}

/// Boundary vertex chains of the cavity, one per side, in loop order.
///
/// Each chain ends on the corner that starts the next one. Falls back to a
/// single closed chain when the boundary has no corner at all. `None` when
/// the side tags are inconsistent with the boundary loop.
pub(crate) fn extract_sides(m: &HalfEdgeMesh, cavity: &Cavity) -> Option<Vec<Vec<VertexId>>> {
    let n = cavity.hes.len();
    if n < 3 || cavity.side.len() != n {
        return None;
    }
    let source = |he: u32, lv: usize| m.vertices[m.vertex(he, lv) as usize].source;

    let start = (0..n).find(|i| cavity.side[*i] != cavity.side[(*i + n - 1) % n]);
    let Some(i0) = start else {
        // No corner on the boundary. A single side is still usable for the
        // disk patterns; anything tagged higher is a malformed loop.
        if cavity.side.iter().any(|s| *s > 0) {
            return None;
        }
        let mut chain = Vec::with_capacity(n + 1);
        chain.push(source(cavity.hes[0], 0));
        for he in &cavity.hes {
            chain.push(source(*he, 1));
        }
        return Some(vec![chain]);
    };

    let mut sides: Vec<Vec<VertexId>> = Vec::new();
    for k in 0..n {
        let pos = (i0 + k) % n;
        let s = cavity.side[pos] as usize;
        if s >= sides.len() {
            sides.resize(s + 1, Vec::new());
        }
        if sides[s].is_empty() {
            sides[s].push(source(cavity.hes[pos], 0));
        }
        sides[s].push(source(cavity.hes[pos], 1));
    }
    if sides.iter().any(|s| s.len() < 2) {
        return None;
    }
    Some(sides)
}

/// The canonical quad-pattern remesher.
///
/// Matches the cavity boundary against the regular grid and central fan
/// patterns, splices the instantiation into the patch, flags the fan vertex
/// singular when the cavity has three or five corners, and relaxes the new
/// interior with a short Winslow pass.
#[derive(Debug, Default)]
pub struct PatternCavityRemesher;

impl CavityRemesher for PatternCavityRemesher {
    fn remesh(
        &self,
        patch: &mut SurfacePatch,
        geometry: &dyn SurfaceGeometry,
        mesh: &HalfEdgeMesh,
        cavity: &Cavity,
        center: Option<Point3<f64>>,
    ) -> QuadMeshResult<Option<CavityRemeshOutcome>> {
        let Some(sides) = extract_sides(mesh, cavity) else {
            return Ok(None);
        };
        let n_corners = sides.len();
        let npts: Vec<usize> = sides.iter().map(|s| s.len()).collect();
        let Some(pattern) = patch_is_remeshable(n_corners, &npts) else {
            return Ok(None);
        };

        let mut side_positions: Vec<Vec<Point3<f64>>> = Vec::with_capacity(n_corners);
        for side in &sides {
            let mut positions = Vec::with_capacity(side.len());
            for v in side {
                positions.push(patch.position(*v).ok_or_else(|| {
                    QuadMeshError::stale_reference("cavity boundary vertex not in patch")
                })?);
            }
            side_positions.push(positions);
        }
        let output = remesh_patch(geometry, &side_positions, &pattern, center)?;

        // Everything of the old cavity that is not on its boundary goes.
        let removed_quads: Vec<_> = cavity
            .quads
            .iter()
            .map(|f| mesh.faces[*f as usize].source)
            .collect();
        let on_boundary: HashSet<VertexId> = sides.iter().flatten().copied().collect();
        let mut removed_vertices: Vec<VertexId> = Vec::new();
        let mut seen: HashSet<VertexId> = HashSet::new();
        for id in &removed_quads {
            let quad = patch
                .quad(*id)
                .ok_or_else(|| QuadMeshError::stale_reference("cavity quad not in patch"))?;
            for v in quad.vertices {
                if !on_boundary.contains(&v) && seen.insert(v) {
                    removed_vertices.push(v);
                }
            }
        }

        let mut new_quads: Vec<[SpliceVertex; 4]> = Vec::with_capacity(output.quads.len());
        for quad in &output.quads {
            let mut resolved = [SpliceVertex::New(0); 4];
            for (k, pv) in quad.iter().enumerate() {
                resolved[k] = match pv {
                    PatternVertex::Boundary { side, index } => {
                        SpliceVertex::Existing(sides[*side][*index])
                    }
                    PatternVertex::Interior(i) => SpliceVertex::New(*i),
                };
            }
            new_quads.push(resolved);
        }

        // The pattern may come out with either winding. Compare one shared
        // boundary edge against the loop orientation of the old cavity and
        // flip all new quads when it is traversed backwards.
        let mut loop_edges: HashSet<(VertexId, VertexId)> = HashSet::new();
        let loop_verts: Vec<VertexId> = sides
            .iter()
            .flat_map(|s| s[..s.len() - 1].iter().copied())
            .collect();
        let nl = loop_verts.len();
        for i in 0..nl {
            loop_edges.insert((loop_verts[i], loop_verts[(i + 1) % nl]));
        }
        'orient: for quad in &new_quads {
            for k in 0..4 {
                let (SpliceVertex::Existing(a), SpliceVertex::Existing(b)) =
                    (quad[k], quad[(k + 1) % 4])
                else {
                    continue;
                };
                if loop_edges.contains(&(a, b)) {
                    break 'orient;
                }
                if loop_edges.contains(&(b, a)) {
                    for q in &mut new_quads {
                        q.swap(1, 3);
                    }
                    break 'orient;
                }
            }
        }

        let new_vertices: Vec<MeshVertex> = output
            .interior_positions
            .iter()
            .map(|p| MeshVertex::new(*p))
            .collect();
        let outcome = patch.apply_splice(MeshSplice {
            new_vertices,
            new_quads,
            removed_quads,
            removed_vertices,
        })?;

        let mut new_singularities = Vec::new();
        let irregular: Vec<usize> = output
            .interior_irregular
            .iter()
            .enumerate()
            .filter(|(_, irr)| **irr)
            .map(|(i, _)| i)
            .collect();
        if irregular.len() == 1 && (n_corners == 3 || n_corners == 5) {
            let v = outcome.vertices[irregular[0]];
            patch.set_singular(v, true)?;
            new_singularities.push(v);
        }

        let options = SmoothingOptions {
            iter_max: 10,
            ..SmoothingOptions::default()
        };
        smooth_with_local_kernel(
            patch,
            geometry,
            &outcome.quads,
            &outcome.vertices,
            &options,
            None,
        )?;

        debug!(
            corners = n_corners,
            old_quads = cavity.quads.len(),
            new_quads = outcome.quads.len(),
            new_vertices = outcome.vertices.len(),
            "cavity remeshed with pattern"
        );
        Ok(Some(CavityRemeshOutcome {
            quads: outcome.quads,
            new_singularities,
        }))
    }
}

const ROUND_LIMIT: usize = 100;

/// Grow and remesh cavities seeded at the flagged singularities.
///
/// Singularities close to irregular vertices go first; absorbing the nearby
/// irregularity into the cavity is what makes the pattern applicable. After
/// every successful remesh the half-edge mesh is rebuilt and the priorities
/// recomputed. Returns the number of cavities remeshed.
pub fn remesh_cavities_around_singularities(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    remesher: &dyn CavityRemesher,
) -> QuadMeshResult<usize> {
    let _timer = PassTimer::for_patch("remesh_singularities", patch);
    let mut singularities: Vec<VertexId> = patch.singular_vertices();
    let mut count = 0usize;
    let mut in_progress = true;
    let mut rounds = 0usize;
    while in_progress && !singularities.is_empty() {
        in_progress = false;
        rounds += 1;
        if rounds > ROUND_LIMIT {
            warn!(rounds, "singularity remeshing did not settle, stopping");
            break;
        }
        let mesh = HalfEdgeMesh::from_patch(patch)?;
        let mut gardener = Gardener::new(&mesh);

        let mut irregular_positions: Vec<Point3<f64>> = Vec::new();
        for v in 0..mesh.vertices.len() {
            let (val, on_bdr) = mesh.vertex_face_valence(v as u32);
            if !on_bdr && val != 4 {
                irregular_positions.push(mesh.vertices[v].position);
            }
        }

        singularities.retain(|v| patch.contains_vertex(*v));
        let mut queue: Vec<(f64, VertexId)> = Vec::with_capacity(singularities.len());
        for s in &singularities {
            let ps = patch
                .position(*s)
                .ok_or_else(|| QuadMeshError::stale_reference("singular vertex not in patch"))?;
            let mut priority = 0.0;
            for p in &irregular_positions {
                let dist = (ps - p).norm();
                if dist > 0.0 {
                    priority += 1.0 / dist;
                }
            }
            queue.push((priority, *s));
        }
        queue.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, s) in queue {
            let Some(sv) = mesh.index_of(s) else { continue };
            let mut seed = Vec::new();
            mesh.vertex_faces(sv, &mut seed);
            let mut cavity = match Cavity::from_faces(&mesh, &seed) {
                Ok(c) => c,
                Err(e) => {
                    debug!(vertex = %s, error = %e, "skipping singularity seed");
                    continue;
                }
            };
            if !gardener.set_cavity(&mesh, &cavity) {
                continue;
            }
            if !gardener.grow_maximal(&mesh, &mut cavity) {
                continue;
            }
            let center = patch.position(s);
            match remesher.remesh(patch, geometry, &mesh, &cavity, center) {
                Ok(Some(outcome)) => {
                    singularities.retain(|v| *v != s);
                    singularities.extend(outcome.new_singularities);
                    count += 1;
                    in_progress = true;
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(vertex = %s, error = %e, "cavity remesh failed");
                    continue;
                }
            }
        }
    }
    if count > 0 {
        info!(count, "remeshed cavities around singularities");
        smooth_winslow(patch, geometry, 10)?;
    }
    Ok(count)
}

/// Lexicographically smallest rotation of the quad index signature.
fn rotate_canonical(a: [i32; 4]) -> [i32; 4] {
    let mut best = a;
    for r in 1..4 {
        let rotated = [a[r % 4], a[(r + 1) % 4], a[(r + 2) % 4], a[(r + 3) % 4]];
        if rotated < best {
            best = rotated;
        }
    }
    best
}

/// A 3-5 pair: a quad with a valence 3 and a valence 5 vertex on one
/// diagonal and regular vertices on the other.
const PAIR_35_SIGNATURE: [i32; 4] = [-1, 0, 1, 0];

/// Collapse 3-5 valence pairs and isolated irregular vertices.
///
/// Pair quads seed cavities first, ordered by how close the pairs sit to
/// each other; remaining irregular vertices follow with their one-ring as
/// seed. CAD corners are never treated as defects. Returns the number of
/// cavities remeshed.
pub fn remesh_quadrilateral_patches(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    remesher: &dyn CavityRemesher,
) -> QuadMeshResult<usize> {
    let _timer = PassTimer::for_patch("remesh_quad_patches", patch);
    let mut count = 0usize;
    let mut in_progress = true;
    let mut rounds = 0usize;
    while in_progress {
        in_progress = false;
        rounds += 1;
        if rounds > ROUND_LIMIT {
            warn!(rounds, "patch remeshing did not settle, stopping");
            break;
        }
        let mesh = HalfEdgeMesh::from_patch(patch)?;
        let mut gardener = Gardener::new(&mesh);

        let mut irregular: Vec<u32> = Vec::new();
        for v in 0..mesh.vertices.len() {
            let val = gardener.valence[v];
            if gardener.v_on_boundary[v] {
                if val != 2 && mesh.vertices[v].class != EntityClass::Corner {
                    irregular.push(v as u32);
                }
            } else if val != 4 {
                irregular.push(v as u32);
            }
        }

        let mut pair_quads: Vec<u32> = Vec::new();
        let mut vert_in_pair: HashSet<u32> = HashSet::new();
        for f in 0..mesh.faces.len() {
            let verts = mesh.face_vertices(f as u32);
            let mut signature = [0i32; 4];
            for (lv, v) in verts.iter().enumerate() {
                let ideal = if gardener.v_on_boundary[*v as usize] { 2 } else { 4 };
                signature[lv] = ideal - gardener.valence[*v as usize];
            }
            if rotate_canonical(signature) == PAIR_35_SIGNATURE {
                pair_quads.push(f as u32);
                vert_in_pair.extend(verts);
            }
        }

        let anchor = |f: u32| mesh.vertices[mesh.face_vertices(f)[0] as usize].position;
        let mut seeds: Vec<(f64, Vec<u32>)> = Vec::with_capacity(pair_quads.len());
        for f in &pair_quads {
            let pf = anchor(*f);
            let mut priority = 0.0;
            for g in &pair_quads {
                if g == f {
                    continue;
                }
                let dist = (pf - anchor(*g)).norm();
                if dist > 0.0 {
                    priority += 1.0 / dist;
                }
            }
            seeds.push((priority, vec![*f]));
        }
        seeds.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut faces = Vec::new();
        for v in irregular {
            if vert_in_pair.contains(&v) {
                continue;
            }
            mesh.vertex_faces(v, &mut faces);
            seeds.push((0.0, faces.clone()));
        }

        for (_, seed) in seeds {
            let mut cavity = match Cavity::from_faces(&mesh, &seed) {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "skipping irregular seed");
                    continue;
                }
            };
            if !gardener.set_cavity(&mesh, &cavity) {
                continue;
            }
            if !gardener.grow_maximal(&mesh, &mut cavity) {
                continue;
            }
            let quads_before = patch.quad_count();
            match remesher.remesh(patch, geometry, &mesh, &cavity, None) {
                Ok(Some(_)) => {
                    count += 1;
                    // A remesh that kept the quad count only moved vertices
                    // around; reseeding would find the same cavity again.
                    in_progress = patch.quad_count() != quads_before;
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "cavity remesh failed");
                    continue;
                }
            }
        }
    }
    if count > 0 {
        info!(count, "remeshed quadrilateral patches");
        smooth_winslow(patch, geometry, 100)?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adjacency::QuadAdjacency;
    use crate::geometry::PlanarSurface;
    use crate::types::MeshVertex;

    fn grid(nx: usize, ny: usize) -> SurfacePatch {
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
                let a = verts[j * (nx + 1) + i];
                let b = verts[j * (nx + 1) + i + 1];
                let c = verts[(j + 1) * (nx + 1) + i + 1];
                let d = verts[(j + 1) * (nx + 1) + i];
                patch.add_quad([a, b, c, d]).unwrap();
            }
        }
        patch
    }

    #[test]
    fn test_rotate_canonical_matches_diagonal_pairs_only() {
        // 3 and 5 on a diagonal.
        assert_eq!(rotate_canonical([1, 0, -1, 0]), PAIR_35_SIGNATURE);
        assert_eq!(rotate_canonical([-1, 0, 1, 0]), PAIR_35_SIGNATURE);
        assert_eq!(rotate_canonical([0, 1, 0, -1]), PAIR_35_SIGNATURE);
        // Adjacent 3 and 5 is a different configuration.
        assert_ne!(rotate_canonical([1, -1, 0, 0]), PAIR_35_SIGNATURE);
        // Regular quad.
        assert_ne!(rotate_canonical([0, 0, 0, 0]), PAIR_35_SIGNATURE);
    }

    #[test]
    fn test_extract_sides_of_rectangular_cavity() {
        let patch = grid(5, 5);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let cavity = Cavity::from_faces(&mesh, &[6, 7]).unwrap();
        let sides = extract_sides(&mesh, &cavity).unwrap();
        assert_eq!(sides.len(), 4);
        let lens: Vec<usize> = sides.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![3, 2, 3, 2]);
        // Chains share their corners in loop order.
        for k in 0..4 {
            assert_eq!(sides[k].last(), sides[(k + 1) % 4].first());
        }
    }

    #[test]
    fn test_pattern_remesher_rebuilds_full_grid_cavity() {
        let mut patch = grid(3, 3);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let all: Vec<u32> = (0..mesh.faces.len() as u32).collect();
        let cavity = Cavity::from_faces(&mesh, &all).unwrap();
        let outcome = PatternCavityRemesher
            .remesh(&mut patch, &PlanarSurface::xy(), &mesh, &cavity, None)
            .unwrap()
            .expect("full grid cavity matches the grid pattern");
        assert_eq!(outcome.quads.len(), 9);
        assert!(outcome.new_singularities.is_empty());
        assert_eq!(patch.quad_count(), 9);
        assert_eq!(patch.vertex_count(), 16);
        let adjacency = QuadAdjacency::from_patch(&patch);
        for (id, v) in patch.vertices() {
            if v.kind.is_surface() {
                assert_eq!(adjacency.valence(id), 4);
            }
        }
    }

    #[test]
    fn test_regular_grid_needs_no_patch_remeshing() {
        let mut patch = grid(4, 4);
        let n = remesh_quadrilateral_patches(&mut patch, &PlanarSurface::xy(), &PatternCavityRemesher)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(patch.quad_count(), 16);
    }

    #[test]
    fn test_no_singularities_is_a_noop() {
        let mut patch = grid(4, 4);
        let n = remesh_cavities_around_singularities(
            &mut patch,
            &PlanarSurface::xy(),
            &PatternCavityRemesher,
        )
        .unwrap();
        assert_eq!(n, 0);
    }
}
