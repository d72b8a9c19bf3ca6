//! Patch improvement pipeline.
//!
//! [`improve_patch`] chains the repair passes on one patch: small defect
//! removal, cavity remeshing around singularities, 3-5 pair collapse, then a
//! final smoothing sweep. [`improve_patches`] runs the same sequence over a
//! set of patches in parallel; patches are independent, their shared curves
//! are never moved.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, info_span, warn};

use crate::defects::remesh_small_defects;
use crate::dmo::{smooth_with_dmo, DmoOptions};
use crate::error::QuadMeshResult;
use crate::geometry::SurfaceGeometry;
use crate::quality::quad_scaled_jacobian;
use crate::repair::{
    remesh_cavities_around_singularities, remesh_quadrilateral_patches, PatternCavityRemesher,
};
use crate::smoothing::{smooth_with_local_kernel, SmoothingOptions};
use crate::types::{SurfacePatch, VertexId};

/// Wall-clock budget for a long-running pass.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            end: Instant::now() + budget,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.end
    }
}

/// Tuning of the improvement pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RepairParams {
    /// Repair corner, curve and surface valence defects first.
    pub fix_small_defects: bool,
    /// Grow and remesh cavities around flagged singularities.
    pub remesh_singularities: bool,
    /// Collapse 3-5 pairs and leftover irregular vertices.
    pub remesh_patches: bool,
    /// Iterations of the final smoothing sweep, 0 to skip it.
    pub smoothing_iter_max: usize,
    /// Run the grid-search optimizer when the minimum scaled Jacobian after
    /// smoothing stays below this, `None` to never run it.
    pub dmo_below: Option<f64>,
    /// Wall-clock budget for the final smoothing sweep.
    pub smoothing_budget: Option<Duration>,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            fix_small_defects: true,
            remesh_singularities: true,
            remesh_patches: true,
            smoothing_iter_max: 100,
            dmo_below: Some(0.1),
            smoothing_budget: None,
        }
    }
}

impl RepairParams {
    /// Smoothing only, topology untouched.
    pub fn smoothing_only() -> Self {
        Self {
            fix_small_defects: false,
            remesh_singularities: false,
            remesh_patches: false,
            ..Self::default()
        }
    }

    /// Shorter smoothing, for interactive use on large patches.
    pub fn fast() -> Self {
        Self {
            smoothing_iter_max: 10,
            dmo_below: None,
            smoothing_budget: Some(Duration::from_secs(1)),
            ..Self::default()
        }
    }
}

/// Outcome of [`improve_patch`] on one patch.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub patch_tag: u32,
    /// Valence defects repaired by the disk quadrangulations.
    pub defects_fixed: usize,
    /// Defects left after the repair passes.
    pub residual_defects: usize,
    /// Cavities replaced by pattern instantiations.
    pub cavities_remeshed: usize,
    /// Minimum scaled Jacobian over the final quads.
    pub quality_min: f64,
    /// Average scaled Jacobian over the final quads.
    pub quality_avg: f64,
    /// The pipeline returned an error for this patch; counters above cover
    /// the passes that completed.
    pub failed: bool,
}

/// Minimum and average scaled Jacobian of the patch, per-quad normals.
pub fn patch_quality(patch: &SurfacePatch) -> Option<(f64, f64)> {
    let mut min = f64::MAX;
    let mut sum = 0.0;
    let mut count = 0usize;
    for (_, quad) in patch.quads() {
        let mut pts = [nalgebra::Point3::origin(); 4];
        for (k, v) in quad.vertices.iter().enumerate() {
            pts[k] = patch.position(*v)?;
        }
        let normal = (pts[2] - pts[0]).cross(&(pts[3] - pts[1]));
        let norm = normal.norm();
        if norm == 0.0 {
            min = min.min(0.0);
            count += 1;
            continue;
        }
        let q = quad_scaled_jacobian(pts[0], pts[1], pts[2], pts[3], normal / norm);
        min = min.min(q);
        sum += q;
        count += 1;
    }
    (count > 0).then(|| (min, sum / count as f64))
}

fn free_surface_vertices(patch: &SurfacePatch) -> Vec<VertexId> {
    patch
        .vertices()
        .filter(|(_, v)| v.kind.is_surface())
        .map(|(id, _)| id)
        .collect()
}

/// Run the repair and smoothing sequence on one patch.
pub fn improve_patch(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
    params: &RepairParams,
) -> QuadMeshResult<PipelineResult> {
    let span = info_span!(
        "improve_patch",
        tag = patch.tag(),
        quads = patch.quad_count()
    );
    let _enter = span.enter();
    let start = Instant::now();

    let mut result = PipelineResult {
        patch_tag: patch.tag(),
        ..PipelineResult::default()
    };

    if params.fix_small_defects {
        let outcome = remesh_small_defects(patch, geometry)?;
        result.defects_fixed = outcome.fixed();
        result.residual_defects = outcome.residual_defects;
    }

    let remesher = PatternCavityRemesher;
    if params.remesh_singularities {
        result.cavities_remeshed +=
            remesh_cavities_around_singularities(patch, geometry, &remesher)?;
    }
    if params.remesh_patches {
        result.cavities_remeshed += remesh_quadrilateral_patches(patch, geometry, &remesher)?;
    }

    if params.smoothing_iter_max > 0 {
        let free = free_surface_vertices(patch);
        let quad_ids = patch.quad_ids();
        let options = SmoothingOptions {
            iter_max: params.smoothing_iter_max,
            ..SmoothingOptions::default()
        };
        let deadline = params.smoothing_budget.map(Deadline::after);
        smooth_with_local_kernel(patch, geometry, &quad_ids, &free, &options, deadline.as_ref())?;

        if let Some(threshold) = params.dmo_below {
            let degraded = patch_quality(patch).is_some_and(|(min, _)| min < threshold);
            if degraded {
                smooth_with_dmo(patch, geometry, &quad_ids, &free, &DmoOptions::default())?;
            }
        }
    }

    if let Some((min, avg)) = patch_quality(patch) {
        result.quality_min = min;
        result.quality_avg = avg;
    }
    info!(
        tag = result.patch_tag,
        defects_fixed = result.defects_fixed,
        residual_defects = result.residual_defects,
        cavities_remeshed = result.cavities_remeshed,
        quality_min = format!("{:.3}", result.quality_min),
        quality_avg = format!("{:.3}", result.quality_avg),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "patch improved"
    );
    Ok(result)
}

/// One patch together with the surface it discretizes.
pub struct PatchJob<'a> {
    pub patch: &'a mut SurfacePatch,
    pub geometry: &'a dyn SurfaceGeometry,
}

/// Improve a set of patches in parallel.
///
/// A failing patch does not abort the others; its result carries the
/// `failed` flag and whatever counters were reached before the error.
pub fn improve_patches(jobs: &mut [PatchJob<'_>], params: &RepairParams) -> Vec<PipelineResult> {
    jobs.par_iter_mut()
        .map(|job| match improve_patch(job.patch, job.geometry, params) {
            Ok(result) => result,
            Err(e) => {
                warn!(tag = job.patch.tag(), error = %e, "patch improvement failed");
                PipelineResult {
                    patch_tag: job.patch.tag(),
                    failed: true,
                    ..PipelineResult::default()
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarSurface;
    use crate::types::MeshVertex;
    use nalgebra::Point3;

    fn grid(nx: usize, ny: usize) -> SurfacePatch {
        let mut patch = SurfacePatch::new(7);
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
        patch
    }

    #[test]
    fn test_deadline_expires() {
        let d = Deadline::after(Duration::from_millis(0));
        assert!(d.expired());
        let d = Deadline::after(Duration::from_secs(3600));
        assert!(!d.expired());
    }

    #[test]
    fn test_patch_quality_of_unit_grid() {
        let patch = grid(3, 3);
        let (min, avg) = patch_quality(&patch).unwrap();
        assert!((min - 1.0).abs() < 1e-12);
        assert!((avg - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_improve_regular_patch_is_stable() {
        let mut patch = grid(4, 4);
        let result = improve_patch(&mut patch, &PlanarSurface::xy(), &RepairParams::default())
            .unwrap();
        assert_eq!(result.patch_tag, 7);
        assert_eq!(result.defects_fixed, 0);
        assert_eq!(result.residual_defects, 0);
        assert_eq!(result.cavities_remeshed, 0);
        assert!(result.quality_min > 0.99);
        assert_eq!(patch.quad_count(), 16);
    }

    #[test]
    fn test_improve_patches_runs_all_jobs() {
        let mut a = grid(3, 3);
        let mut b = grid(2, 4);
        let plane = PlanarSurface::xy();
        let mut jobs = vec![
            PatchJob {
                patch: &mut a,
                geometry: &plane,
            },
            PatchJob {
                patch: &mut b,
                geometry: &plane,
            },
        ];
        let results = improve_patches(&mut jobs, &RepairParams::fast());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.failed));
    }

    #[test]
    fn test_smoothing_only_recenters_distorted_vertex() {
        let mut patch = grid(3, 3);
        let ids = patch.vertex_ids();
        // Vertex (1, 1) of the 4x4 vertex grid.
        let v = ids[5];
        patch.set_position(v, Point3::new(1.4, 0.7, 0.0)).unwrap();
        improve_patch(
            &mut patch,
            &PlanarSurface::xy(),
            &RepairParams::smoothing_only(),
        )
        .unwrap();
        let p = patch.position(v).unwrap();
        assert!((p - Point3::new(1.0, 1.0, 0.0)).norm() < 0.1);
    }
}
