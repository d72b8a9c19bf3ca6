//! Surface geometry abstraction.
//!
//! Remeshing and smoothing only need a handful of queries on the underlying
//! CAD surface: evaluation, normals and closest-point projection. Callers
//! implement [`SurfaceGeometry`] for their kernel; [`PlanarSurface`] covers
//! tests and planar patches where projection is the identity.

use nalgebra::{Point2, Point3, Vector3};

/// Result of a closest-point query on a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceProjection {
    pub point: Point3<f64>,
    pub uv: Point2<f64>,
}

/// Parametric surface queried by the smoothing and remeshing passes.
///
/// Implementations must be `Sync`; patches are processed in parallel and
/// share the geometry immutably.
pub trait SurfaceGeometry: Sync {
    /// Evaluate the surface at parametric coordinates.
    fn point(&self, u: f64, v: f64) -> Point3<f64>;

    /// Unit surface normal at parametric coordinates.
    fn normal(&self, u: f64, v: f64) -> Vector3<f64>;

    /// Closest point on the surface, `None` when the query fails.
    fn closest_point(&self, p: Point3<f64>) -> Option<SurfaceProjection>;

    /// Planar surfaces let the smoothers skip projection entirely.
    fn is_planar(&self) -> bool {
        false
    }
}

/// The plane through `origin` spanned by two orthonormal directions.
#[derive(Debug, Clone, Copy)]
pub struct PlanarSurface {
    origin: Point3<f64>,
    u_dir: Vector3<f64>,
    v_dir: Vector3<f64>,
    normal: Vector3<f64>,
}

impl PlanarSurface {
    pub fn new(origin: Point3<f64>, u_dir: Vector3<f64>, v_dir: Vector3<f64>) -> Self {
        let u_dir = u_dir.normalize();
        let normal = u_dir.cross(&v_dir).normalize();
        let v_dir = normal.cross(&u_dir);
        Self {
            origin,
            u_dir,
            v_dir,
            normal,
        }
    }

    /// The z = 0 plane with the standard axes.
    pub fn xy() -> Self {
        Self::new(Point3::origin(), Vector3::x(), Vector3::y())
    }
}

impl SurfaceGeometry for PlanarSurface {
    fn point(&self, u: f64, v: f64) -> Point3<f64> {
        self.origin + u * self.u_dir + v * self.v_dir
    }

    fn normal(&self, _u: f64, _v: f64) -> Vector3<f64> {
        self.normal
    }

    fn closest_point(&self, p: Point3<f64>) -> Option<SurfaceProjection> {
        let d = p - self.origin;
        let u = d.dot(&self.u_dir);
        let v = d.dot(&self.v_dir);
        Some(SurfaceProjection {
            point: self.point(u, v),
            uv: Point2::new(u, v),
        })
    }

    fn is_planar(&self) -> bool {
        true
    }
}
