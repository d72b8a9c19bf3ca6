//! Cavity growth control.
//!
//! The [`Gardener`] owns the valence bookkeeping of one half-edge mesh and
//! steers cavity growth: which boundary half-edges may flip, when the cavity
//! must be convexified, and which intermediate cavity is kept as the best
//! remeshable candidate. It can be reused across cavities as long as the
//! underlying mesh does not change.

use hashbrown::HashSet;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error};

use crate::cavity::{valence_inside_quads, Cavity, FlipInfo};
use crate::half_edge::{HalfEdgeMesh, NO_ID};
use crate::patterns;
use crate::types::EntityClass;

/// Irregularity measure of a cavity, `None` when no pattern applies.
///
/// Counts boundary points per side and asks the pattern library whether a
/// quad pattern with matching side subdivisions exists.
pub fn cavity_is_remeshable(cav: &Cavity) -> Option<f64> {
    if cav.hes.len() != cav.side.len() {
        return None;
    }
    let npts = cav.side_subdivisions()?;
    patterns::patch_is_remeshable(npts.len(), &npts).map(|m| m.irregularity)
}

/// Growth controller for cavities on one half-edge mesh.
pub struct Gardener {
    /// Quad valence of every vertex.
    pub valence: Vec<i32>,
    /// Whether each vertex lies on the patch boundary.
    pub v_on_boundary: Vec<bool>,
    valence_in_cavity: Vec<i32>,
    target_nb_of_sides: usize,
    /// Singularities strictly inside the cavity.
    sings: HashSet<u32>,
    /// Singularities on the cavity boundary.
    sings_bdr: HashSet<u32>,
    /// Irregular non-singular vertices touched by the cavity.
    irregular: HashSet<u32>,
    /// Best remeshable cavity seen while growing.
    last_cavity: Option<Cavity>,
    last_nb_irregular: usize,
    last_irregularity: f64,
}

impl Gardener {
    /// Initialize valences and boundary flags from the mesh.
    pub fn new(m: &HalfEdgeMesh) -> Self {
        let mut valence = vec![0i32; m.vertices.len()];
        let mut v_on_boundary = vec![false; m.vertices.len()];
        for f in 0..m.faces.len() as u32 {
            for he in m.face_half_edges(f) {
                let v2 = m.hedges[he as usize].vertex;
                valence[v2 as usize] += 1;
                if m.opposite(he) == NO_ID {
                    let v1 = m.vertex(he, 0);
                    v_on_boundary[v1 as usize] = true;
                    v_on_boundary[v2 as usize] = true;
                }
            }
        }
        Self {
            valence,
            v_on_boundary,
            valence_in_cavity: vec![0; m.vertices.len()],
            target_nb_of_sides: 0,
            sings: HashSet::new(),
            sings_bdr: HashSet::new(),
            irregular: HashSet::new(),
            last_cavity: None,
            last_nb_irregular: 0,
            last_irregularity: f64::MAX,
        }
    }

    /// Bind the gardener to a freshly seeded cavity.
    ///
    /// The target side count depends on the seed size: 3 quads aim for a
    /// triangular patch, 1 or 4 for a quadrilateral one, 5 for a pentagonal
    /// one. Other seeds carry no target and cannot be kept by
    /// [`Gardener::grow_maximal`].
    pub fn set_cavity(&mut self, m: &HalfEdgeMesh, cav: &Cavity) -> bool {
        if cav.quads.is_empty() || cav.hes.is_empty() {
            return false;
        }
        self.valence_in_cavity.iter_mut().for_each(|v| *v = 0);
        self.sings.clear();
        self.sings_bdr.clear();
        self.irregular.clear();
        self.target_nb_of_sides = 0;
        self.last_nb_irregular = 0;
        self.last_irregularity = f64::MAX;
        self.last_cavity = None;

        let mut adjacent_sings = Vec::new();
        for f in &cav.quads {
            for v2 in m.face_vertices(*f) {
                self.valence_in_cavity[v2 as usize] += 1;
                if m.vertices[v2 as usize].singular {
                    adjacent_sings.push(v2);
                } else if self.v_on_boundary[v2 as usize] && self.valence[v2 as usize] != 2 {
                    self.irregular.insert(v2);
                } else if !self.v_on_boundary[v2 as usize] && self.valence[v2 as usize] != 4 {
                    self.irregular.insert(v2);
                }
            }
        }
        self.target_nb_of_sides = match cav.quads.len() {
            3 => 3,
            1 | 4 => 4,
            5 => 5,
            _ => 0,
        };
        adjacent_sings.sort_unstable();
        adjacent_sings.dedup();
        for v in adjacent_sings {
            if self.valence_in_cavity[v as usize] == self.valence[v as usize] {
                self.sings.insert(v);
            } else {
                self.sings_bdr.insert(v);
            }
        }
        true
    }

    /// A cavity is convex when no interior boundary vertex has exactly one
    /// quad left outside.
    pub fn is_convex(&self, m: &HalfEdgeMesh, cav: &Cavity) -> bool {
        for he in &cav.hes {
            let v = m.hedges[*he as usize].vertex;
            let val_outside = self.valence[v as usize] - self.valence_in_cavity[v as usize];
            if !self.v_on_boundary[v as usize] && val_outside == 1 {
                return false;
            }
        }
        true
    }

    /// Update bookkeeping after a quad was absorbed into the cavity.
    pub fn mark_new_quad(&mut self, m: &HalfEdgeMesh, nq: u32) {
        for v2 in m.face_vertices(nq) {
            self.valence_in_cavity[v2 as usize] += 1;
            if m.vertices[v2 as usize].singular {
                if self.valence_in_cavity[v2 as usize] == self.valence[v2 as usize] {
                    // The flip filters must keep singularities out of the
                    // cavity interior; reaching this means they failed.
                    error!(
                        target: "quad_remesh::cavity",
                        vertex = v2,
                        quad = nq,
                        "singularity swallowed into cavity interior"
                    );
                    self.sings.insert(v2);
                } else {
                    self.sings_bdr.insert(v2);
                }
            } else if self.v_on_boundary[v2 as usize] && self.valence[v2 as usize] != 2 {
                self.irregular.insert(v2);
            } else if !self.v_on_boundary[v2 as usize] && self.valence[v2 as usize] != 4 {
                self.irregular.insert(v2);
            }
        }
    }

    /// Boundary half-edges allowed to flip.
    ///
    /// Around each limit vertex (boundary singularity or irregular CAD
    /// corner) the boundary is walked in both directions and marked
    /// forbidden until the cavity stops hugging the vertex. `None` when a
    /// limit vertex cannot be located on the cavity boundary.
    pub fn flip_candidates(&self, m: &HalfEdgeMesh, cav: &Cavity) -> Option<Vec<u32>> {
        let mut limits = self.sings_bdr.clone();
        for v in &self.irregular {
            if self.v_on_boundary[*v as usize]
                && self.valence[*v as usize] > 2
                && m.vertices[*v as usize].class == EntityClass::Corner
            {
                limits.insert(*v);
            }
        }

        if limits.is_empty() {
            return Some(
                cav.hes
                    .iter()
                    .copied()
                    .filter(|he| m.opposite(*he) != NO_ID)
                    .collect(),
            );
        }

        let mut forbidden: HashSet<u32> = HashSet::new();
        let mut hes_on_limit = Vec::new();
        let n = cav.hes.len();
        for bs in &limits {
            m.vertex_half_edges(*bs, &mut hes_on_limit);
            let mut i_init = None;
            for he in &hes_on_limit {
                let he_op = m.opposite(*he);
                if he_op == NO_ID {
                    continue;
                }
                if let Some(pos) = cav.hes.iter().position(|h| h == he) {
                    i_init = Some(pos);
                    break;
                }
                if let Some(pos) = cav.hes.iter().position(|h| *h == he_op) {
                    i_init = Some(pos);
                    break;
                }
            }
            let i_init = match i_init {
                Some(i) => i,
                None => {
                    debug!(
                        target: "quad_remesh::cavity",
                        vertex = bs,
                        "limit vertex not found on cavity boundary"
                    );
                    return None;
                }
            };
            let mut i = i_init;
            loop {
                let he = cav.hes[i];
                forbidden.insert(he);
                let v2 = m.vertex(he, 1);
                let val_outside = self.valence[v2 as usize] - self.valence_in_cavity[v2 as usize];
                if val_outside == 1 || self.valence_in_cavity[v2 as usize] == 1 {
                    break;
                }
                i = (i + 1) % n;
                if i == i_init {
                    break;
                }
            }
            let mut i = i_init;
            loop {
                let he = cav.hes[i];
                forbidden.insert(he);
                let v1 = m.vertex(he, 0);
                let val_outside = self.valence[v1 as usize] - self.valence_in_cavity[v1 as usize];
                if val_outside == 1 || self.valence_in_cavity[v1 as usize] == 1 {
                    break;
                }
                i = (i + n - 1) % n;
                if i == i_init {
                    break;
                }
            }
        }
        Some(
            cav.hes
                .iter()
                .copied()
                .filter(|he| m.opposite(*he) != NO_ID && !forbidden.contains(he))
                .collect(),
        )
    }

    /// Absorb quads that leave a single outside quad at an interior vertex,
    /// until a fixed point.
    pub fn convexify(&mut self, m: &HalfEdgeMesh, cav: &mut Cavity) -> bool {
        let mut info = FlipInfo::default();
        let mut running = true;
        while running {
            running = false;
            let mut i = 0;
            while i < cav.hes.len() {
                let he = cav.hes[i];
                let v1 = m.vertex(he, 0);
                let v2 = m.vertex(he, 1);
                let out1 = self.valence[v1 as usize] - self.valence_in_cavity[v1 as usize];
                let out2 = self.valence[v2 as usize] - self.valence_in_cavity[v2 as usize];
                if (!self.v_on_boundary[v1 as usize] && out1 == 1)
                    || (!self.v_on_boundary[v2 as usize] && out2 == 1)
                {
                    if cav.grow_by_flip(m, i, &mut info, true) {
                        running = true;
                        self.mark_new_quad(m, info.new_quad);
                    }
                }
                i += 1;
            }
        }
        true
    }

    /// Grow the cavity by up to `n` random flips with a fixed seed.
    pub fn grow_isotropic(&mut self, m: &HalfEdgeMesh, cav: &mut Cavity, n: usize) {
        let mut rng = SmallRng::seed_from_u64(0);
        let mut info = FlipInfo::default();
        let mut grown = 0;
        let mut running = true;
        while running && grown < n {
            running = false;
            for _ in 0..cav.hes.len() {
                let i = rng.gen_range(0..cav.hes.len());
                if cav.grow_by_flip(m, i, &mut info, true) {
                    grown += 1;
                    running = true;
                    self.mark_new_quad(m, info.new_quad);
                    break;
                }
            }
        }
    }

    /// Grow the cavity as far as the flip rules allow, keeping the best
    /// remeshable intermediate cavity.
    ///
    /// The kept cavity must match the target side count, strictly reduce
    /// irregularity compared to what it replaces, and not be worse than the
    /// best cavity kept earlier on this mesh. Returns true when `cav` was
    /// replaced by such a cavity.
    pub fn grow_maximal(&mut self, m: &HalfEdgeMesh, cav: &mut Cavity) -> bool {
        let mut info = FlipInfo::default();
        let mut buffer = Vec::new();
        let mut running = true;
        while running {
            running = false;
            let candidates = match self.flip_candidates(m, cav) {
                Some(c) => c,
                None => break,
            };
            for he in candidates {
                let pos = match cav.hes.iter().position(|h| *h == he) {
                    Some(p) => p,
                    None => continue,
                };
                if cav.grow_by_flip(m, pos, &mut info, true) {
                    running = true;
                    self.mark_new_quad(m, info.new_quad);
                    self.convexify(m, cav);
                }
            }
            if !running {
                continue;
            }
            if !self.is_convex(m, cav) {
                debug!(target: "quad_remesh::cavity", "cavity not convex, stop growth");
                break;
            }
            let nbi = self.irregular.len();
            if nbi <= self.last_nb_irregular {
                continue;
            }
            let nsides = cav.update_sides(m);
            if nsides != self.target_nb_of_sides {
                continue;
            }
            let mut cavity_irregularity = 0.0;
            let mut irregular_off_corner = 0usize;
            for v in &self.irregular {
                let val_in = valence_inside_quads(m, &cav.quads, *v, &mut buffer) as i32;
                if val_in <= 2 {
                    continue;
                }
                irregular_off_corner += 1;
                cavity_irregularity += f64::from(val_in - 4).powi(2);
            }
            if irregular_off_corner == 0 {
                // All irregular vertices are cavity corners, nothing to gain.
                continue;
            }
            for v in &self.sings {
                let val_in = valence_inside_quads(m, &cav.quads, *v, &mut buffer) as i32;
                cavity_irregularity += f64::from(val_in - 4).powi(2);
            }
            if let Some(irreg) = cavity_is_remeshable(cav) {
                if irreg <= self.last_irregularity && irreg < cavity_irregularity {
                    debug!(
                        target: "quad_remesh::cavity",
                        quads = cav.quads.len(),
                        irregularity = irreg,
                        "keeping remeshable cavity"
                    );
                    self.last_cavity = Some(cav.clone());
                    self.last_nb_irregular = nbi;
                    self.last_irregularity = irreg;
                }
            }
        }
        if self.last_nb_irregular == 0 {
            return false;
        }
        if m.faces.len() == cav.quads.len() && self.last_nb_irregular == self.target_nb_of_sides {
            // The cavity covers the whole patch and the irregular vertices
            // are exactly the pattern corners; remeshing would be a no-op.
            return false;
        }
        if let Some(best) = self.last_cavity.take() {
            *cav = best;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MeshVertex, SurfacePatch};
    use nalgebra::Point3;

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
    fn test_valence_and_boundary_flags() {
        let patch = grid(3, 3);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let g = Gardener::new(&m);
        let interior: Vec<usize> = (0..m.vertices.len())
            .filter(|v| !g.v_on_boundary[*v])
            .collect();
        assert_eq!(interior.len(), 4);
        for v in interior {
            assert_eq!(g.valence[v], 4);
        }
        assert_eq!(g.v_on_boundary.iter().filter(|b| **b).count(), 12);
    }

    #[test]
    fn test_grow_isotropic_bounded() {
        let patch = grid(6, 6);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut g = Gardener::new(&m);
        let mut cav = Cavity::from_faces(&m, &[14]).unwrap();
        assert!(g.set_cavity(&m, &cav));
        g.grow_isotropic(&m, &mut cav, 5);
        assert!(cav.quads.len() >= 1 && cav.quads.len() <= 6);
        assert!(cav.boundary_is_closed_loop(&m));
    }

    #[test]
    fn test_grow_isotropic_is_deterministic() {
        let patch = grid(6, 6);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let run = || {
            let mut g = Gardener::new(&m);
            let mut cav = Cavity::from_faces(&m, &[14]).unwrap();
            g.set_cavity(&m, &cav);
            g.grow_isotropic(&m, &mut cav, 5);
            let mut quads: Vec<u32> = cav.quads.iter().copied().collect();
            quads.sort_unstable();
            quads
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_l_shaped_cavity_is_not_convex() {
        let patch = grid(4, 4);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut g = Gardener::new(&m);
        // Quads (0,0), (1,0), (0,1) form an L whose concave corner is the
        // interior vertex (1,1).
        let cav = Cavity::from_faces(&m, &[0, 1, 4]).unwrap();
        assert!(g.set_cavity(&m, &cav));
        assert!(!g.is_convex(&m, &cav));

        // A 2x2 block is convex.
        let cav = Cavity::from_faces(&m, &[0, 1, 4, 5]).unwrap();
        assert!(g.set_cavity(&m, &cav));
        assert!(g.is_convex(&m, &cav));
    }

    #[test]
    fn test_convexify_fills_notch() {
        let patch = grid(4, 4);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut g = Gardener::new(&m);
        let mut cav = Cavity::from_faces(&m, &[0, 1, 4]).unwrap();
        g.set_cavity(&m, &cav);
        g.convexify(&m, &mut cav);
        // The missing quad (1,1) of the 2x2 block gets absorbed.
        assert!(cav.quads.contains(&5));
        assert!(g.is_convex(&m, &cav));
    }

    #[test]
    fn test_grow_maximal_needs_irregularity() {
        // A perfectly regular grid has nothing to improve: growth never
        // finds a cavity worth keeping.
        let patch = grid(5, 5);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut g = Gardener::new(&m);
        let mut cav = Cavity::from_faces(&m, &[12]).unwrap();
        g.set_cavity(&m, &cav);
        assert!(!g.grow_maximal(&m, &mut cav));
    }

    #[test]
    fn test_set_cavity_targets() {
        let patch = grid(5, 5);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut g = Gardener::new(&m);
        for (seed, target) in [
            (vec![12u32], 4usize),
            (vec![6, 7, 8], 3),
            (vec![6, 7, 11, 12], 4),
            (vec![6, 7, 8, 11, 12], 5),
        ] {
            let cav = Cavity::from_faces(&m, &seed).unwrap();
            g.set_cavity(&m, &cav);
            assert_eq!(g.target_nb_of_sides, target, "seed {:?}", seed);
        }
    }
}
