//! Quad element quality measures.
//!
//! Both measures follow the Sandia Verdict definitions, evaluated against a
//! reference surface normal so that inverted elements score negative.

use nalgebra::{Point3, Vector3};

const EPS: f64 = 1.0e-16;

/// Scaled Jacobian of a quad against the reference normal `n` (normalized).
///
/// Minimum over the four corners of the corner Jacobian divided by the
/// adjacent edge lengths. 1 for a planar square facing `n`, negative when a
/// corner is inverted, 0 for degenerate edges.
pub fn quad_scaled_jacobian(
    p0: Point3<f64>,
    p1: Point3<f64>,
    p2: Point3<f64>,
    p3: Point3<f64>,
    n: Vector3<f64>,
) -> f64 {
    let l0 = p1 - p0;
    let l1 = p2 - p1;
    let l2 = p3 - p2;
    let l3 = p0 - p3;
    let len0 = l0.norm();
    let len1 = l1.norm();
    let len2 = l2.norm();
    let len3 = l3.norm();
    if len0 < EPS || len1 < EPS || len2 < EPS || len3 < EPS {
        return 0.0;
    }
    let a0 = n.dot(&l3.cross(&l0));
    let a1 = n.dot(&l0.cross(&l1));
    let a2 = n.dot(&l1.cross(&l2));
    let a3 = n.dot(&l2.cross(&l3));
    let mut sjac = (a0 / (len0 * len3)).min(a1 / (len0 * len1));
    sjac = sjac.min(a2 / (len1 * len2));
    sjac.min(a3 / (len2 * len3))
}

/// Shape quality of a quad against the reference normal `n` (normalized).
///
/// Minimum over the four corners of the corner Jacobian divided by the sum
/// of the squared adjacent edge lengths, scaled to 1 for a square. Cheaper
/// than the scaled Jacobian (no square roots) and the measure the smoothing
/// kernels optimize.
pub fn quad_shape(
    p0: Point3<f64>,
    p1: Point3<f64>,
    p2: Point3<f64>,
    p3: Point3<f64>,
    n: Vector3<f64>,
) -> f64 {
    let l0 = p1 - p0;
    let l1 = p2 - p1;
    let l2 = p3 - p2;
    let l3 = p0 - p3;
    let len0_sq = l0.norm_squared();
    let len1_sq = l1.norm_squared();
    let len2_sq = l2.norm_squared();
    let len3_sq = l3.norm_squared();
    if len0_sq < EPS * EPS
        || len1_sq < EPS * EPS
        || len2_sq < EPS * EPS
        || len3_sq < EPS * EPS
    {
        return 0.0;
    }
    let a0 = n.dot(&l3.cross(&l0));
    let a1 = n.dot(&l0.cross(&l1));
    let a2 = n.dot(&l1.cross(&l2));
    let a3 = n.dot(&l2.cross(&l3));
    let q0 = a0 / (len3_sq + len0_sq);
    let q1 = a1 / (len0_sq + len1_sq);
    let q2 = a2 / (len1_sq + len2_sq);
    let q3 = a3 / (len2_sq + len3_sq);
    2.0 * q0.min(q1).min(q2).min(q3)
}

/// Minimum and average scaled Jacobian over a set of quads.
///
/// `None` when the set is empty.
pub fn quality_stats<'a, I>(quads: I, n: Vector3<f64>) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = &'a [Point3<f64>; 4]>,
{
    let mut min = f64::MAX;
    let mut sum = 0.0;
    let mut count = 0usize;
    for [p0, p1, p2, p3] in quads {
        let q = quad_scaled_jacobian(*p0, *p1, *p2, *p3, n);
        min = min.min(q);
        sum += q;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some((min, sum / count as f64))
    }
}
