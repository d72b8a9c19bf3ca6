//! Local smoothing kernels over a condensed mesh view.
//!
//! Smoothing never touches connectivity. Positions of a chosen set of free
//! vertices are relaxed against their one-ring stencils with one of three
//! kernels:
//!
//! - Laplacian: average of the edge-adjacent neighbors.
//! - Angle-based: neighbors vote for a direction bisecting their incident
//!   boundary angles, weighted by the correction angle.
//! - Winslow: finite-difference Winslow operator on the full 8-point ring,
//!   only defined at regular interior vertices; others fall back to the
//!   angle-based kernel.
//!
//! The mesh is first condensed into flat index-based arrays (free vertices
//! first) so the inner loop runs without hash lookups. The outer loop locks
//! vertices whose displacement drops below a relative threshold and stops
//! early when the total displacement collapses.

use nalgebra::{Point3, Vector3};

use crate::adjacency::boundary_loop;
use crate::error::{QuadMeshError, QuadMeshResult};
use crate::geometry::SurfaceGeometry;
use crate::pipeline::Deadline;
use crate::quality::quality_stats;
use crate::types::{QuadId, SurfacePatch, VertexId};

/// Kernel used for one smoothing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingKernel {
    Laplacian,
    AngleBased,
    /// Winslow at regular interior vertices, angle-based elsewhere.
    WinslowAtRegular,
}

/// Tuning of the outer smoothing loop.
#[derive(Debug, Clone, Copy)]
pub struct SmoothingOptions {
    pub kernel: SmoothingKernel,
    /// Reject moves that flip a one-ring triangle normal, and lock the
    /// vertex. Slower but safe near tangled regions.
    pub smart: bool,
    pub iter_max: usize,
    /// Stop when the displacement sum falls below this fraction of the
    /// first iteration's sum.
    pub global_dx_reduction: f64,
    /// Lock a vertex when it moves less than this fraction of its local
    /// average edge length.
    pub local_dx_reduction: f64,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            kernel: SmoothingKernel::WinslowAtRegular,
            smart: false,
            iter_max: 100,
            global_dx_reduction: 1e-3,
            local_dx_reduction: 1e-3,
        }
    }
}

/// Flat index-based view of the quads around the free vertices.
///
/// Free vertices occupy indices `0..free_count`; the one-rings are built for
/// them only, ordered along the ring boundary and rotated so the first entry
/// is edge-adjacent to the center. Regular interior rings have even size.
pub(crate) struct CondensedStructure {
    pub points: Vec<Point3<f64>>,
    pub new2old: Vec<VertexId>,
    pub free_count: usize,
    pub one_rings: Vec<Vec<u32>>,
}

pub(crate) fn build_condensed_structure(
    patch: &SurfacePatch,
    quad_ids: &[QuadId],
    free: &[VertexId],
) -> QuadMeshResult<CondensedStructure> {
    let mut old2new: hashbrown::HashMap<VertexId, u32> = hashbrown::HashMap::new();
    let mut new2old: Vec<VertexId> = Vec::with_capacity(2 * free.len());
    let mut points: Vec<Point3<f64>> = Vec::with_capacity(2 * free.len());
    for v in free {
        let vertex = patch
            .vertex(*v)
            .ok_or_else(|| QuadMeshError::stale_reference("free vertex not in patch"))?;
        old2new.insert(*v, new2old.len() as u32);
        new2old.push(*v);
        points.push(vertex.position);
    }

    let mut quads: Vec<[u32; 4]> = Vec::with_capacity(quad_ids.len());
    let mut v2q: Vec<Vec<u32>> = vec![Vec::new(); free.len()];
    for (f, id) in quad_ids.iter().enumerate() {
        let quad = patch
            .quad(*id)
            .ok_or_else(|| QuadMeshError::stale_reference("smoothing quad not in patch"))?;
        let mut condensed = [0u32; 4];
        for (lv, v) in quad.vertices.iter().enumerate() {
            let nv = match old2new.get(v) {
                Some(nv) => *nv,
                None => {
                    let nv = new2old.len() as u32;
                    let vertex = patch.vertex(*v).ok_or_else(|| {
                        QuadMeshError::stale_reference("quad vertex not in patch")
                    })?;
                    old2new.insert(*v, nv);
                    new2old.push(*v);
                    points.push(vertex.position);
                    v2q.push(Vec::new());
                    nv
                }
            };
            condensed[lv] = nv;
            v2q[nv as usize].push(f as u32);
        }
        quads.push(condensed);
    }

    let mut one_rings: Vec<Vec<u32>> = Vec::with_capacity(free.len());
    for v in 0..free.len() {
        let adj: Vec<[u32; 4]> = v2q[v].iter().map(|f| quads[*f as usize]).collect();
        let mut ring = boundary_loop(&adj).ok_or_else(|| {
            QuadMeshError::smoothing_failed("one-ring of a free vertex is not a disk")
        })?;

        // Rotate the ring to start on an edge-adjacent neighbor.
        let v = v as u32;
        let mut v0 = None;
        'quads: for quad in &adj {
            for j in 0..4 {
                let (a, b) = (quad[j], quad[(j + 1) % 4]);
                if a == v {
                    v0 = Some(b);
                    break 'quads;
                } else if b == v {
                    v0 = Some(a);
                    break 'quads;
                }
            }
        }
        let v0 = v0
            .ok_or_else(|| QuadMeshError::smoothing_failed("free vertex has no incident edge"))?;
        if let Some(j) = ring.iter().position(|r| *r == v0) {
            ring.rotate_left(j);
        } else {
            return Err(QuadMeshError::smoothing_failed(
                "edge-adjacent neighbor missing from one-ring",
            ));
        }
        if ring.len() < 6 || ring.len() % 2 != 0 {
            return Err(QuadMeshError::smoothing_failed(format!(
                "one-ring of size {} is not smoothable",
                ring.len()
            )));
        }
        one_rings.push(ring);
    }

    Ok(CondensedStructure {
        points,
        new2old,
        free_count: free.len(),
        one_rings,
    })
}

fn kernel_laplacian(stencil: &[Point3<f64>]) -> Option<Point3<f64>> {
    if stencil.is_empty() {
        return None;
    }
    let sum = stencil
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / stencil.len() as f64))
}

fn kernel_angle_based(center: Point3<f64>, stencil: &[Point3<f64>]) -> Option<Point3<f64>> {
    let n = stencil.len();
    let mut rotated = Vec::with_capacity(n);
    let mut angles = Vec::with_capacity(n);
    let mut sum_angle = 0.0;
    for i in 0..n {
        let prev = stencil[(n + i - 1) % n];
        let cur = stencil[i];
        let next = stencil[(i + 1) % n];
        let old_dir = center - cur;
        let len = old_dir.norm();
        if len == 0.0 {
            return None;
        }
        let d1 = prev - cur;
        let d2 = next - cur;
        if d1.norm_squared() == 0.0 || d2.norm_squared() == 0.0 {
            return None;
        }
        let mut new_dir = d1.normalize() + d2.normalize();
        if new_dir.norm_squared() == 0.0 {
            return None;
        }
        new_dir.normalize_mut();
        if new_dir.dot(&old_dir) < 0.0 {
            new_dir = -new_dir;
        }
        rotated.push(cur + len * new_dir);
        let old_dir = old_dir / len;
        let angle = new_dir.dot(&old_dir).clamp(-1.0, 1.0).acos();
        angles.push(angle);
        sum_angle += angle;
    }
    if sum_angle == 0.0 {
        return None;
    }
    let mut new_pos = Vector3::zeros();
    for i in 0..n {
        new_pos += angles[i] / sum_angle * rotated[i].coords;
    }
    Some(Point3::from(new_pos))
}

/// Winslow operator on the full 8-point one-ring of a regular vertex.
///
/// The ring alternates edge- and diagonal-adjacent neighbors starting from
/// an edge-adjacent one; it is reordered onto the finite-difference layout
///
/// ```text
///   6---1---4
///   |   |   |
///   2--- ---0
///   |   |   |
///   7---3---5
/// ```
fn kernel_winslow(ring: &[Point3<f64>; 8]) -> Option<Point3<f64>> {
    const O2N: [usize; 8] = [0, 2, 4, 6, 1, 7, 3, 5];
    let s: [Vector3<f64>; 8] = std::array::from_fn(|i| ring[O2N[i]].coords);

    let r0 = s[0] - s[2];
    let r1 = s[1] - s[3];
    let alpha_0 = r1.dot(&r1);
    let alpha_1 = r0.dot(&r0);
    let beta = r0.dot(&r1);
    let u_xy = 0.25 * (s[4] + s[7] - s[6] - s[5]);

    let denom = 2.0 * alpha_0 + 2.0 * alpha_1;
    if denom.abs() < 1e-18 {
        return None;
    }
    let new_pos = (alpha_0 * (s[0] + s[2]) + alpha_1 * (s[1] + s[3]) - 2.0 * beta * u_xy) / denom;
    Some(Point3::from(new_pos))
}

fn project_on_plane(
    query: Point3<f64>,
    p1: Point3<f64>,
    p2: Point3<f64>,
    p3: Point3<f64>,
) -> Option<(Point3<f64>, f64)> {
    let n = (p2 - p1).cross(&(p3 - p1));
    if n.norm_squared() == 0.0 {
        return None;
    }
    let n = n.normalize();
    let t = (query - p1).dot(&n);
    let proj = query - t * n;
    Some((proj, (proj - query).norm_squared()))
}

/// Project on the planes of the one-ring triangles, keeping the closest.
fn project_on_stencil_triangle_planes(
    center: Point3<f64>,
    stencil: &[Point3<f64>],
    query: Point3<f64>,
) -> Option<Point3<f64>> {
    let n = stencil.len();
    let mut best: Option<(Point3<f64>, f64)> = None;
    for i in 0..n {
        if let Some((cand, d2)) = project_on_plane(query, center, stencil[i], stencil[(i + 1) % n])
        {
            if best.map_or(true, |(_, bd2)| d2 < bd2) {
                best = Some((cand, d2));
            }
        }
    }
    best.map(|(p, _)| p)
}

fn check_geometry_is_not_inverted(
    center: Point3<f64>,
    stencil: &[Point3<f64>],
    new_pos: Point3<f64>,
) -> bool {
    let n = stencil.len();
    for i in 0..n {
        let p2 = stencil[i];
        let p3 = stencil[(i + 1) % n];
        let before = (p2 - center).cross(&(p3 - center));
        let after = (p2 - new_pos).cross(&(p3 - new_pos));
        if before.dot(&after) < 0.0 {
            return false;
        }
    }
    true
}

enum KernelStatus {
    Ok,
    Failed,
    RejectedProjection,
    RejectedQuality,
}

fn kernel_smoothing(
    kernel: SmoothingKernel,
    v: usize,
    one_rings: &[Vec<u32>],
    points: &mut [Point3<f64>],
    project_on_stencil: bool,
    geometry: Option<&dyn SurfaceGeometry>,
    smart: bool,
) -> KernelStatus {
    let ring = &one_rings[v];
    let n = ring.len();
    let center = points[v];

    // Edge-adjacent neighbors are every other ring vertex.
    let stencil: Vec<Point3<f64>> = (0..n / 2).map(|i| points[ring[2 * i] as usize]).collect();

    let new_pos = if n == 8 && kernel == SmoothingKernel::WinslowAtRegular {
        let full: [Point3<f64>; 8] = std::array::from_fn(|i| points[ring[i] as usize]);
        kernel_winslow(&full)
    } else {
        match kernel {
            SmoothingKernel::Laplacian => kernel_laplacian(&stencil),
            // Winslow is only defined at regular vertices.
            _ => kernel_angle_based(center, &stencil),
        }
    };
    let mut new_pos = match new_pos {
        Some(p) => p,
        None => return KernelStatus::Failed,
    };

    if project_on_stencil {
        match project_on_stencil_triangle_planes(center, &stencil, new_pos) {
            Some(p) => new_pos = p,
            None => return KernelStatus::RejectedProjection,
        }
    } else if let Some(geometry) = geometry {
        match geometry.closest_point(new_pos) {
            Some(proj) => new_pos = proj.point,
            None => return KernelStatus::RejectedProjection,
        }
    }
    if smart && !check_geometry_is_not_inverted(center, &stencil, new_pos) {
        return KernelStatus::RejectedQuality;
    }
    points[v] = new_pos;
    KernelStatus::Ok
}

/// Relax the free vertices of a set of quads.
///
/// Intermediate iterations project on the one-ring triangle planes (fast but
/// approximate), the last one on the true surface; both are skipped when the
/// geometry is planar. A vertex whose kernel fails, whose move inverts its
/// ring (smart variant) or whose displacement stalls is locked for the rest
/// of the loop.
pub fn smooth_with_local_kernel(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    quad_ids: &[QuadId],
    free: &[VertexId],
    options: &SmoothingOptions,
    deadline: Option<&Deadline>,
) -> QuadMeshResult<()> {
    if free.is_empty() || quad_ids.is_empty() {
        return Ok(());
    }
    let project = !geometry.is_planar();
    let mut c = build_condensed_structure(patch, quad_ids, free)?;

    let mut local_avg_size = vec![0.0f64; c.free_count];
    for (i, size) in local_avg_size.iter_mut().enumerate() {
        let ring = &c.one_rings[i];
        if ring.is_empty() {
            continue;
        }
        for j in ring {
            *size += (c.points[i] - c.points[*j as usize]).norm();
        }
        *size /= ring.len() as f64;
    }

    let mut running = vec![true; c.free_count];
    let mut sum_dx0 = 0.0;
    for iter in 0..options.iter_max {
        if deadline.is_some_and(|d| d.expired()) {
            break;
        }
        let use_stencil_projection = project && iter + 1 < options.iter_max;
        let surface = (project && !use_stencil_projection).then_some(geometry);

        let mut sum_dx = 0.0;
        let mut active = 0usize;
        for i in 0..c.free_count {
            if !running[i] {
                continue;
            }
            let center = c.points[i];
            let status = kernel_smoothing(
                options.kernel,
                i,
                &c.one_rings,
                &mut c.points,
                use_stencil_projection,
                surface,
                options.smart,
            );
            match status {
                KernelStatus::Ok => {
                    let dx = (center - c.points[i]).norm();
                    sum_dx += dx;
                    if dx < options.local_dx_reduction * local_avg_size[i] {
                        running[i] = false;
                    } else {
                        active += 1;
                    }
                }
                _ => running[i] = false,
            }
        }
        if iter == 0 {
            sum_dx0 = sum_dx;
        } else if sum_dx < options.global_dx_reduction * sum_dx0 || active == 0 {
            break;
        }
    }

    for i in 0..c.free_count {
        patch.set_position(c.new2old[i], c.points[i])?;
    }
    Ok(())
}

/// Winslow relaxation of all interior vertices of the patch.
pub fn smooth_winslow(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    iter_max: usize,
) -> QuadMeshResult<()> {
    let free: Vec<VertexId> = patch
        .vertices()
        .filter(|(_, v)| v.kind.is_surface())
        .map(|(id, _)| id)
        .collect();
    let quad_ids = patch.quad_ids();
    let options = SmoothingOptions {
        iter_max,
        ..SmoothingOptions::default()
    };
    smooth_with_local_kernel(patch, geometry, &quad_ids, &free, &options, None)
}

/// Winslow relaxation of the strict interior of a cavity, with rollback.
///
/// The cavity boundary stays fixed. The result is kept only when the minimum
/// scaled Jacobian did not degrade; otherwise positions are restored and
/// `Ok(false)` is returned.
pub fn smooth_cavity(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    quad_ids: &[QuadId],
    iter_max: usize,
) -> QuadMeshResult<bool> {
    let mut corners: Vec<[VertexId; 4]> = Vec::with_capacity(quad_ids.len());
    for id in quad_ids {
        let quad = patch
            .quad(*id)
            .ok_or_else(|| QuadMeshError::stale_reference("cavity quad not in patch"))?;
        corners.push(quad.vertices);
    }
    let boundary = boundary_loop(&corners).ok_or_else(|| {
        QuadMeshError::malformed_cavity_boundary("cavity boundary is not a single loop")
    })?;
    let on_boundary: hashbrown::HashSet<VertexId> = boundary.into_iter().collect();
    let mut free: Vec<VertexId> = Vec::new();
    let mut seen: hashbrown::HashSet<VertexId> = hashbrown::HashSet::new();
    for quad in &corners {
        for v in quad {
            if !on_boundary.contains(v) && seen.insert(*v) {
                free.push(*v);
            }
        }
    }
    if free.is_empty() {
        return Ok(true);
    }

    let mut before: Vec<(VertexId, Point3<f64>)> = Vec::with_capacity(free.len());
    for v in &free {
        let p = patch
            .position(*v)
            .ok_or_else(|| QuadMeshError::stale_reference("cavity vertex not in patch"))?;
        before.push((*v, p));
    }
    let stats = |patch: &SurfacePatch| -> QuadMeshResult<Option<(f64, f64)>> {
        let mut geoms = Vec::with_capacity(corners.len());
        for quad in &corners {
            let mut pts = [Point3::origin(); 4];
            for (k, v) in quad.iter().enumerate() {
                pts[k] = patch
                    .position(*v)
                    .ok_or_else(|| QuadMeshError::stale_reference("cavity vertex not in patch"))?;
            }
            geoms.push(pts);
        }
        // Reference normal from the quad diagonals.
        Ok(quality_stats(geoms.iter(), quad_set_normal(&geoms)))
    };
    let quality_before = stats(patch)?;

    let options = SmoothingOptions {
        iter_max,
        ..SmoothingOptions::default()
    };
    smooth_with_local_kernel(patch, geometry, quad_ids, &free, &options, None)?;

    let quality_after = stats(patch)?;
    if let (Some((min_b, _)), Some((min_a, _))) = (quality_before, quality_after) {
        if min_a < min_b {
            for (v, p) in before {
                patch.set_position(v, p)?;
            }
            return Ok(false);
        }
    }
    Ok(true)
}

/// Average diagonal-cross normal of a set of quads.
fn quad_set_normal(quads: &[[Point3<f64>; 4]]) -> Vector3<f64> {
    let mut n = Vector3::zeros();
    for [p0, p1, p2, p3] in quads {
        n += (p2 - p0).cross(&(p3 - p1));
    }
    if n.norm_squared() > 0.0 {
        n.normalize()
    } else {
        Vector3::z()
    }
}
