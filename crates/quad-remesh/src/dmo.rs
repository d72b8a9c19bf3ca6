//! Distortion Minimizing Optimization of vertex positions.
//!
//! DMO is a derivative-free smoother: each free vertex samples an adaptive
//! (u, v) grid around its current parametric position, scores each candidate
//! by the worst shape quality of the quads in its one-ring, and keeps the
//! best. The grid shrinks geometrically between depth levels. Unlike the
//! kernel smoothers it can only improve the ring quality, never degrade it,
//! which makes it the tool of choice near tangled configurations.

use nalgebra::{Point2, Point3};

use crate::error::QuadMeshResult;
use crate::geometry::SurfaceGeometry;
use crate::quality::quad_shape;
use crate::smoothing::build_condensed_structure;
use crate::types::{QuadId, SurfacePatch, VertexId};

/// A vertex position with its parametric coordinates on the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvPoint {
    pub position: Point3<f64>,
    pub uv: Point2<f64>,
}

/// Tuning of the DMO pass.
#[derive(Debug, Clone, Copy)]
pub struct DmoOptions {
    /// Outer sweeps over the free vertices.
    pub iter_max: usize,
    /// Samples per grid axis.
    pub grid_width: usize,
    /// Shrinking grid levels per vertex visit.
    pub grid_depth: usize,
}

impl Default for DmoOptions {
    fn default() -> Self {
        Self {
            iter_max: 10,
            grid_width: 8,
            grid_depth: 3,
        }
    }
}

/// Worst shape quality of the ring quads with the center at `p`.
///
/// The ring alternates edge- and diagonal-adjacent neighbors; quad `i` is
/// `(ring[2i], ring[2i+1], ring[2i+2], center)`. Stops early once the
/// minimum falls below `break_below`.
fn ring_quality(
    p: Point3<f64>,
    ring: &[UvPoint],
    normal: nalgebra::Vector3<f64>,
    break_below: f64,
) -> f64 {
    let n = ring.len();
    if n % 2 != 0 {
        return f64::MIN;
    }
    let mut qmin = f64::MAX;
    for i in 0..n / 2 {
        let p0 = ring[2 * i].position;
        let p1 = ring[2 * i + 1].position;
        let p2 = ring[(2 * i + 2) % n].position;
        qmin = qmin.min(quad_shape(p0, p1, p2, p, normal));
        if qmin < break_below {
            return qmin;
        }
    }
    qmin
}

/// One DMO visit of a single vertex: adaptive grid search in (u, v).
fn optimize_vertex_position(
    geometry: &dyn SurfaceGeometry,
    v: UvPoint,
    ring: &[UvPoint],
    options: &DmoOptions,
) -> UvPoint {
    let normal = geometry.normal(v.uv.x, v.uv.y);
    if normal.norm_squared() == 0.0 {
        return v;
    }
    let normal = normal.normalize();
    let n = options.grid_width.max(2);

    let mut w = 0.5;
    let mut qmax = ring_quality(v.position, ring, normal, f64::MIN);
    let mut vmax = v;
    for _ in 0..options.grid_depth {
        let mut u_range = (f64::MAX, f64::MIN);
        let mut v_range = (f64::MAX, f64::MIN);
        for r in ring {
            u_range = (u_range.0.min(r.uv.x), u_range.1.max(r.uv.x));
            v_range = (v_range.0.min(r.uv.y), v_range.1.max(r.uv.y));
        }
        let du = u_range.1 - u_range.0;
        let dv = v_range.1 - v_range.0;
        let grid = [
            v.uv.x - w * du,
            v.uv.y - w * dv,
            v.uv.x + w * du,
            v.uv.y + w * dv,
        ];
        for i in 0..n {
            let fi = i as f64 / (n - 1) as f64;
            let u = fi * grid[0] + (1.0 - fi) * grid[2];
            for j in 0..n {
                let fj = j as f64 / (n - 1) as f64;
                let vv = fj * grid[1] + (1.0 - fj) * grid[3];
                let candidate = UvPoint {
                    position: geometry.point(u, vv),
                    uv: Point2::new(u, vv),
                };
                let q = ring_quality(candidate.position, ring, normal, qmax);
                if q > qmax {
                    vmax = candidate;
                    qmax = q;
                }
            }
        }
        w *= 2.0 / (n - 1) as f64;
    }
    vmax
}

/// DMO sweeps over the free vertices of a set of quads.
///
/// Parametric coordinates come from `SurfaceGeometry::closest_point`;
/// vertices the query fails on keep their position.
pub fn smooth_with_dmo(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    quad_ids: &[QuadId],
    free: &[VertexId],
    options: &DmoOptions,
) -> QuadMeshResult<()> {
    if free.is_empty() || quad_ids.is_empty() {
        return Ok(());
    }
    let c = build_condensed_structure(patch, quad_ids, free)?;

    let mut point_uv: Vec<Option<UvPoint>> = Vec::with_capacity(c.points.len());
    for p in &c.points {
        point_uv.push(geometry.closest_point(*p).map(|proj| UvPoint {
            position: proj.point,
            uv: proj.uv,
        }));
    }

    let mut ring_geometry: Vec<UvPoint> = Vec::new();
    for _ in 0..options.iter_max {
        for v in 0..c.free_count {
            let Some(pos) = point_uv[v] else { continue };
            ring_geometry.clear();
            let mut complete = true;
            for r in &c.one_rings[v] {
                match point_uv[*r as usize] {
                    Some(p) => ring_geometry.push(p),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            point_uv[v] = Some(optimize_vertex_position(
                geometry,
                pos,
                &ring_geometry,
                options,
            ));
        }
    }

    for i in 0..c.free_count {
        if let Some(p) = point_uv[i] {
            patch.set_position(c.new2old[i], p.position)?;
        }
    }
    Ok(())
}
