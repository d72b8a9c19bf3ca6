//! Quadrilateral surface remeshing utilities.
//!
//! This crate improves all-quad surface meshes sitting on CAD patches: it
//! repairs valence defects, absorbs irregular vertices into remeshable
//! cavities, and relaxes vertex positions on the underlying surface. It is
//! designed for the last stage of a quad meshing pipeline, where the
//! topology is already all-quad but the valence structure and element
//! quality still need work.
//!
//! # Features
//!
//! - **Half-edge connectivity**: Build quad connectivity with opposite
//!   matching and boundary detection
//! - **Defect repair**: Replace small neighborhoods around wrong-valence
//!   vertices with disk quadrangulations
//! - **Cavity remeshing**: Grow flip-based cavities around singularities and
//!   3-5 pairs, replace them with grid or fan patterns
//! - **Smoothing**: Winslow, angle-based and Laplacian kernels, plus a
//!   derivative-free grid-search optimizer for tangled configurations
//! - **Parallel pipeline**: Process independent patches concurrently
//!
//! # Mesh Representation
//!
//! A [`SurfacePatch`] is a generational arena of vertices and quads covering
//! one CAD face. Every vertex carries the entity it is classified on
//! ([`EntityKind`]): corners and curve vertices bound the patch and are
//! never moved or removed; surface vertices are fair game for the repair
//! passes. Quads list their corners counter-clockwise seen from the surface
//! normal.
//!
//! Structural edits go through [`MeshSplice`], which validates the whole
//! edit before mutating anything.
//!
//! # Quick Start
//!
//! ```no_run
//! use quad_remesh::{improve_patch, PlanarSurface, RepairParams, SurfacePatch};
//!
//! let mut patch = SurfacePatch::new(0);
//! // ... fill the patch from your CAD tessellation
//! let geometry = PlanarSurface::xy();
//!
//! let result = improve_patch(&mut patch, &geometry, &RepairParams::default()).unwrap();
//! println!(
//!     "fixed {} defects, remeshed {} cavities, min quality {:.2}",
//!     result.defects_fixed, result.cavities_remeshed, result.quality_min
//! );
//! ```
//!
//! Patches on different CAD faces are independent; [`improve_patches`] runs
//! them in parallel:
//!
//! ```no_run
//! use quad_remesh::{improve_patches, PatchJob, PlanarSurface, RepairParams, SurfacePatch};
//!
//! let mut left = SurfacePatch::new(1);
//! let mut right = SurfacePatch::new(2);
//! let plane = PlanarSurface::xy();
//! let mut jobs = vec![
//!     PatchJob { patch: &mut left, geometry: &plane },
//!     PatchJob { patch: &mut right, geometry: &plane },
//! ];
//! for result in improve_patches(&mut jobs, &RepairParams::fast()) {
//!     println!("patch {}: {} defects fixed", result.patch_tag, result.defects_fixed);
//! }
//! ```
//!
//! # Error Handling
//!
//! Operations return `QuadMeshResult<T>`, which is `Result<T, QuadMeshError>`.
//! Every error carries a stable `QMESH-XXXX` code and a recovery suggestion;
//! errors render nicely through `miette`.
//!
//! ```
//! use quad_remesh::{ErrorCode, SurfacePatch};
//!
//! let patch = SurfacePatch::new(0);
//! match patch.half_edges() {
//!     Ok(_) => unreachable!("empty patch has no connectivity"),
//!     Err(e) => {
//!         assert_eq!(e.code(), ErrorCode::EmptyPatch);
//!         eprintln!("{}", e);
//!     }
//! }
//! ```
//!
//! # Logging
//!
//! All passes emit structured `tracing` events. Set
//! `RUST_LOG=quad_remesh=debug` with a `tracing-subscriber` installed to see
//! per-cavity decisions; `quad_remesh::timing` carries pass durations.

pub mod adjacency;
pub mod cavity;
pub mod defects;
pub mod dmo;
mod error;
pub mod gardener;
pub mod geometry;
pub mod half_edge;
pub mod patterns;
pub mod pipeline;
pub mod quality;
pub mod repair;
pub mod smoothing;
pub mod tracing_ext;
mod types;

// Re-export core types at crate root
pub use error::{ErrorCode, MeshLocation, QuadMeshError, QuadMeshResult, RecoverySuggestion};
pub use types::{
    EntityClass, EntityKind, MeshSplice, MeshVertex, Quad, QuadId, SpliceOutcome, SpliceVertex,
    SurfacePatch, VertexId,
};

// Re-export connectivity at crate root for convenience
pub use adjacency::{boundary_loop, QuadAdjacency};
pub use half_edge::HalfEdgeMesh;

// Cavity machinery
pub use cavity::{Cavity, FlipInfo};
pub use gardener::Gardener;

// Geometry and quality
pub use geometry::{PlanarSurface, SurfaceGeometry, SurfaceProjection};
pub use quality::{quad_scaled_jacobian, quad_shape};

// Repair passes
pub use defects::{remesh_small_defects, DefectRepairOutcome};
pub use patterns::{patch_is_remeshable, remesh_patch, PatternKind, PatternMatch};
pub use repair::{
    remesh_cavities_around_singularities, remesh_quadrilateral_patches, CavityRemesher,
    CavityRemeshOutcome, PatternCavityRemesher,
};

// Smoothing
pub use dmo::{smooth_with_dmo, DmoOptions};
pub use smoothing::{
    smooth_cavity, smooth_winslow, smooth_with_local_kernel, SmoothingKernel, SmoothingOptions,
};

// Pipeline API
pub use pipeline::{
    improve_patch, improve_patches, patch_quality, Deadline, PatchJob, PipelineResult,
    RepairParams,
};

impl SurfacePatch {
    /// Build the half-edge connectivity of the patch.
    pub fn half_edges(&self) -> QuadMeshResult<HalfEdgeMesh> {
        HalfEdgeMesh::from_patch(self)
    }

    /// Run the full repair and smoothing pipeline on this patch.
    pub fn improve(
        &mut self,
        geometry: &dyn SurfaceGeometry,
        params: &RepairParams,
    ) -> QuadMeshResult<PipelineResult> {
        improve_patch(self, geometry, params)
    }

    /// Winslow relaxation of the interior vertices, topology untouched.
    pub fn smooth(
        &mut self,
        geometry: &dyn SurfaceGeometry,
        iter_max: usize,
    ) -> QuadMeshResult<()> {
        smooth_winslow(self, geometry, iter_max)
    }
}
