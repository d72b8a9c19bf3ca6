//! Flip-based cavity over a half-edge mesh.
//!
//! A [`Cavity`] is a simply connected set of quads tracked together with its
//! ordered boundary half-edge loop. Growth happens one quad at a time through
//! [`Cavity::grow_by_flip`]: the boundary is patched in place according to
//! how many edges the absorbed quad already shared with the cavity, so the
//! loop stays ordered without a full recomputation.
//!
//! Boundary half-edges stored in `hes` belong to the quads *inside* the
//! cavity; the quad across their opposite is outside and is what a flip
//! absorbs. A `hes` entry with `opposite == NO_ID` sits on the patch
//! boundary and can never flip.

use hashbrown::{HashMap, HashSet};
use tracing::trace;

use crate::error::{QuadMeshError, QuadMeshResult};
use crate::half_edge::{HalfEdgeMesh, NO_ID};

/// Result of one flip attempt.
#[derive(Debug, Clone, Copy)]
pub struct FlipInfo {
    /// Boundary half-edge the flip was applied to.
    pub he: u32,
    /// Quad absorbed by the flip, `NO_ID` when the flip was not applicable.
    pub new_quad: u32,
    /// Vertices that became strictly interior, `NO_ID` entries unused.
    pub interior_vertices: [u32; 4],
}

impl Default for FlipInfo {
    fn default() -> Self {
        Self {
            he: NO_ID,
            new_quad: NO_ID,
            interior_vertices: [NO_ID; 4],
        }
    }
}

/// A growing cavity of quads with an ordered boundary loop.
#[derive(Debug, Clone, Default)]
pub struct Cavity {
    /// Ordered boundary half-edges, outward orientation.
    pub hes: Vec<u32>,
    /// Side tag of each boundary half-edge, parallel to `hes`.
    pub side: Vec<u8>,
    /// Quads inside the cavity.
    pub quads: HashSet<u32>,
}

fn remove_value(hes: &mut Vec<u32>, value: u32) {
    if let Some(pos) = hes.iter().position(|h| *h == value) {
        hes.remove(pos);
    }
}

/// Drop half-edge pairs that are opposites of each other, keeping only the
/// boundary of the quad set the list was collected from.
fn remove_interior_half_edges(m: &HalfEdgeMesh, hes: &mut Vec<u32>) {
    let mut i = 0;
    while i < hes.len() {
        let he_op = m.opposite(hes[i]);
        if let Some(j) = hes.iter().position(|h| *h == he_op) {
            // Remove the larger index first so the smaller stays valid.
            let (a, b) = (i.min(j), i.max(j));
            hes.remove(b);
            hes.remove(a);
            if i > a {
                i = a;
            }
        } else {
            i += 1;
        }
    }
}

/// Chain loose boundary half-edges into a closed loop starting from the
/// first entry. Returns `None` when fewer than three half-edges are given or
/// the chain breaks before closing.
fn ordered_half_edges_from_stack(m: &HalfEdgeMesh, stack: &[u32]) -> Option<Vec<u32>> {
    if stack.len() < 3 {
        return None;
    }
    let mut ordered = Vec::with_capacity(stack.len());
    let he0 = stack[0];
    let mut he = he0;
    loop {
        let v2 = m.vertex(he, 1);
        ordered.push(he);
        let next = stack
            .iter()
            .copied()
            .find(|he2| *he2 != he && m.vertex(*he2, 0) == v2)?;
        he = next;
        if he == he0 {
            break;
        }
    }
    Some(ordered)
}

/// Number of quads of the set adjacent to the vertex.
pub(crate) fn valence_inside_quads(
    m: &HalfEdgeMesh,
    quads: &HashSet<u32>,
    v: u32,
    buffer: &mut Vec<u32>,
) -> usize {
    m.vertex_faces(v, buffer);
    buffer.iter().filter(|f| quads.contains(*f)).count()
}

/// Number of quads adjacent to the vertex that are not in the set.
pub(crate) fn valence_outside_quads(
    m: &HalfEdgeMesh,
    quads: &HashSet<u32>,
    v: u32,
    buffer: &mut Vec<u32>,
) -> usize {
    m.vertex_faces(v, buffer);
    buffer.iter().filter(|f| !quads.contains(*f)).count()
}

impl Cavity {
    /// Initialize the cavity from seed quads.
    pub fn from_faces(m: &HalfEdgeMesh, seed: &[u32]) -> QuadMeshResult<Self> {
        if seed.is_empty() {
            return Err(QuadMeshError::empty_seed("cavity seed has no quads"));
        }
        let mut cavity = Cavity::default();
        let mut hes_stack = Vec::with_capacity(4 * seed.len());
        for f in seed {
            cavity.quads.insert(*f);
            hes_stack.extend_from_slice(&m.face_half_edges(*f));
        }
        remove_interior_half_edges(m, &mut hes_stack);
        cavity.hes = ordered_half_edges_from_stack(m, &hes_stack).ok_or_else(|| {
            QuadMeshError::malformed_cavity_boundary(format!(
                "failed to chain {} boundary half-edges of {} seed quads",
                hes_stack.len(),
                cavity.quads.len()
            ))
        })?;
        let nsides = cavity.update_sides(m);
        if nsides < 1 {
            return Err(QuadMeshError::malformed_cavity_boundary(
                "cavity boundary has no sides",
            ));
        }
        Ok(cavity)
    }

    /// Absorb the quad across boundary half-edge `hes[i]`.
    ///
    /// The boundary loop is patched according to how many of the quad's
    /// other edges already border the cavity. Returns false and leaves the
    /// cavity unchanged when the flip is not applicable: boundary of the
    /// patch, would pinch the boundary at an already-touched vertex, or
    /// (with `reject_new_sings`) would swallow or crowd a singularity.
    pub fn grow_by_flip(
        &mut self,
        m: &HalfEdgeMesh,
        i: usize,
        info: &mut FlipInfo,
        reject_new_sings: bool,
    ) -> bool {
        if i >= self.hes.len() {
            info.new_quad = NO_ID;
            return false;
        }
        let he0_op = self.hes[i];
        let he0 = m.opposite(he0_op);
        if he0 == NO_ID {
            info.new_quad = NO_ID;
            return false;
        }
        info.he = he0_op;
        info.new_quad = m.face(he0);
        let he1 = m.next(he0);
        let he2 = m.next(he1);
        let he3 = m.next(he2);
        let he1_op = m.opposite(he1);
        let he2_op = m.opposite(he2);
        let he3_op = m.opposite(he3);
        let q1 = if he1_op != NO_ID { m.face(he1_op) } else { NO_ID };
        let q2 = if he2_op != NO_ID { m.face(he2_op) } else { NO_ID };
        let q3 = if he3_op != NO_ID { m.face(he3_op) } else { NO_ID };
        let q1in = q1 != NO_ID && self.quads.contains(&q1);
        let q2in = q2 != NO_ID && self.quads.contains(&q2);
        let q3in = q3 != NO_ID && self.quads.contains(&q3);
        let n = self.hes.len();
        let mut buffer = Vec::new();

        if q1in && q2in && !q3in {
            // Two boundary vertices become interior.
            let nv1 = m.vertex(he1, 0);
            let nv2 = m.vertex(he1, 1);
            if reject_new_sings
                && (m.vertices[nv1 as usize].singular || m.vertices[nv2 as usize].singular)
            {
                trace!(i, quad = info.new_quad, "flip rejected: would swallow singularity");
                return false;
            }
            info.interior_vertices = [NO_ID; 4];
            let i_prev_prev = (i + n - 2) % n;
            self.hes[i_prev_prev] = he3;
            remove_value(&mut self.hes, he0_op);
            remove_value(&mut self.hes, he1_op);
        } else if q1in && !q2in && q3in {
            let nv1 = m.vertex(he0_op, 0);
            let nv2 = m.vertex(he0_op, 1);
            if reject_new_sings
                && (m.vertices[nv1 as usize].singular || m.vertices[nv2 as usize].singular)
            {
                trace!(i, quad = info.new_quad, "flip rejected: would swallow singularity");
                return false;
            }
            info.interior_vertices = [NO_ID; 4];
            let i_prev = (i + n - 1) % n;
            self.hes[i_prev] = he2;
            remove_value(&mut self.hes, he0_op);
            remove_value(&mut self.hes, he3_op);
        } else if !q1in && q2in && q3in {
            let nv1 = m.vertex(he3, 0);
            let nv2 = m.vertex(he3, 1);
            if reject_new_sings
                && (m.vertices[nv1 as usize].singular || m.vertices[nv2 as usize].singular)
            {
                trace!(i, quad = info.new_quad, "flip rejected: would swallow singularity");
                return false;
            }
            info.interior_vertices = [NO_ID; 4];
            self.hes[i] = he1;
            remove_value(&mut self.hes, he2_op);
            remove_value(&mut self.hes, he3_op);
        } else if q1in && q2in && q3in {
            // Closing a one-quad hole: all four boundary edges vanish.
            let nv = m.hedges[he0 as usize].vertex;
            if reject_new_sings && m.vertices[nv as usize].singular {
                trace!(i, quad = info.new_quad, "hole close rejected: singularity inside");
                return false;
            }
            info.interior_vertices = [nv; 4];
            remove_value(&mut self.hes, he0_op);
            remove_value(&mut self.hes, he1_op);
            remove_value(&mut self.hes, he2_op);
            remove_value(&mut self.hes, he3_op);
            let stack = self.hes.clone();
            match ordered_half_edges_from_stack(m, &stack) {
                Some(ordered) => self.hes = ordered,
                None => {
                    info.new_quad = NO_ID;
                    return false;
                }
            }
        } else if q1in && !q2in && !q3in {
            // Boundary shifts sideways, same vertex count.
            let nv = m.hedges[he2 as usize].vertex;
            if valence_inside_quads(m, &self.quads, nv, &mut buffer) > 0 {
                // Would pinch the boundary at nv.
                info.new_quad = NO_ID;
                return false;
            }
            let nv_in = m.hedges[he0 as usize].vertex;
            if reject_new_sings && m.vertices[nv_in as usize].singular {
                info.new_quad = NO_ID;
                return false;
            }
            info.interior_vertices = [NO_ID; 4];
            let i_prev = (i + n - 1) % n;
            self.hes[i_prev] = he2;
            self.hes[i] = he3;
        } else if !q1in && !q2in && q3in {
            let nv = m.hedges[he1 as usize].vertex;
            if valence_inside_quads(m, &self.quads, nv, &mut buffer) > 0 {
                info.new_quad = NO_ID;
                return false;
            }
            let nv_in = m.hedges[he0_op as usize].vertex;
            if reject_new_sings && m.vertices[nv_in as usize].singular {
                info.new_quad = NO_ID;
                return false;
            }
            info.interior_vertices = [NO_ID; 4];
            let i_next = (i + 1) % n;
            self.hes[i] = he1;
            self.hes[i_next] = he2;
        } else if !q1in && !q2in && !q3in {
            // Two new vertices appear on the boundary.
            let nv1 = m.hedges[he1 as usize].vertex;
            if valence_inside_quads(m, &self.quads, nv1, &mut buffer) > 0 {
                info.new_quad = NO_ID;
                return false;
            }
            let nv2 = m.hedges[he2 as usize].vertex;
            if valence_inside_quads(m, &self.quads, nv2, &mut buffer) > 0 {
                info.new_quad = NO_ID;
                return false;
            }
            if reject_new_sings {
                // A flip here would leave a concave corner wrapped around the
                // singularity, which the remeshing could not undo.
                let v0 = m.vertex(he0, 0);
                if m.vertices[v0 as usize].singular
                    && valence_outside_quads(m, &self.quads, v0, &mut buffer) == 2
                {
                    return false;
                }
                let v1 = m.vertex(he0, 1);
                if m.vertices[v1 as usize].singular
                    && valence_outside_quads(m, &self.quads, v1, &mut buffer) == 2
                {
                    return false;
                }
            }
            info.interior_vertices = [NO_ID; 4];
            self.hes[i] = he1;
            self.hes.insert(i + 1, he3);
            self.hes.insert(i + 1, he2);
        } else {
            info.new_quad = NO_ID;
            return false;
        }
        self.quads.insert(info.new_quad);
        true
    }

    /// Recompute side tags from cavity corners.
    ///
    /// A corner is a boundary vertex with exactly one cavity quad adjacent.
    /// Returns the number of sides, 0 when the boundary has no corner (one
    /// closed loop without corners keeps its previous tags).
    pub fn update_sides(&mut self, m: &HalfEdgeMesh) -> usize {
        self.side.resize(self.hes.len(), 0);
        let mut val: HashMap<u32, u32> = HashMap::new();
        for f in &self.quads {
            for v in m.face_vertices(*f) {
                *val.entry(v).or_insert(0) += 1;
            }
        }
        let corners: HashSet<u32> = val
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(v, _)| *v)
            .collect();

        let n = self.hes.len();
        let mut side_no: i32 = -1;
        for i in 0..n {
            let v0 = m.vertex(self.hes[i], 0);
            if !corners.contains(&v0) {
                continue;
            }
            for j in 0..n {
                let he_pos = (i + j) % n;
                let v1 = m.vertex(self.hes[he_pos], 0);
                if corners.contains(&v1) {
                    side_no += 1;
                }
                self.side[he_pos] = side_no as u8;
            }
            break;
        }
        (side_no + 1) as usize
    }

    /// Number of boundary vertices per side, `None` when a side tag exceeds
    /// the pattern limit of five sides.
    pub fn side_subdivisions(&self) -> Option<Vec<usize>> {
        let mut npts: Vec<usize> = Vec::new();
        for s in &self.side {
            let s = *s as usize;
            if s >= 5 {
                return None;
            }
            if s >= npts.len() {
                npts.resize(s + 1, 0);
            }
            npts[s] += 1;
        }
        // Each side has one more point than half-edges.
        for count in &mut npts {
            *count += 1;
        }
        Some(npts)
    }

    /// Check the boundary chain invariant, for debugging and tests.
    pub fn boundary_is_closed_loop(&self, m: &HalfEdgeMesh) -> bool {
        let n = self.hes.len();
        if n < 3 {
            return false;
        }
        (0..n).all(|i| m.vertex(self.hes[i], 1) == m.vertex(self.hes[(i + 1) % n], 0))
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
    fn test_init_single_quad() {
        let patch = grid(5, 5);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        // Center quad of the 5x5 grid.
        let cavity = Cavity::from_faces(&m, &[12]).unwrap();
        assert_eq!(cavity.hes.len(), 4);
        assert_eq!(cavity.quads.len(), 1);
        assert!(cavity.boundary_is_closed_loop(&m));
        assert_eq!(cavity.side_subdivisions().unwrap(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_empty_seed_rejected() {
        let patch = grid(2, 2);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let err = Cavity::from_faces(&m, &[]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::EmptySeed);
    }

    #[test]
    fn test_grow_by_flip_adds_quad() {
        let patch = grid(5, 5);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut cavity = Cavity::from_faces(&m, &[12]).unwrap();
        let mut info = FlipInfo::default();
        let grown = (0..cavity.hes.len())
            .any(|i| cavity.grow_by_flip(&m, i, &mut info, true));
        assert!(grown);
        assert_eq!(cavity.quads.len(), 2);
        // Interior quad absorbed with one shared edge: boundary gains two.
        assert_eq!(cavity.hes.len(), 6);
        assert!(cavity.boundary_is_closed_loop(&m));
    }

    #[test]
    fn test_boundary_stays_closed_under_growth() {
        let patch = grid(6, 6);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut cavity = Cavity::from_faces(&m, &[14]).unwrap();
        let mut info = FlipInfo::default();
        let mut grown = 0;
        let mut guard = 0;
        while grown < 12 && guard < 2000 {
            guard += 1;
            let i = guard % cavity.hes.len().max(1);
            if cavity.grow_by_flip(&m, i, &mut info, true) {
                grown += 1;
                assert!(cavity.boundary_is_closed_loop(&m));
            }
        }
        assert_eq!(grown, 12);
        assert_eq!(cavity.quads.len(), 13);
    }

    #[test]
    fn test_flip_refused_on_patch_boundary() {
        let patch = grid(2, 2);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        // Corner quad: two of its boundary half-edges are on the patch rim.
        let mut cavity = Cavity::from_faces(&m, &[0]).unwrap();
        let mut info = FlipInfo::default();
        let refusals = (0..cavity.hes.len())
            .filter(|i| {
                let he = cavity.hes[*i];
                m.opposite(he) == NO_ID && !cavity.grow_by_flip(&m, *i, &mut info, true)
            })
            .count();
        assert_eq!(refusals, 2);
        assert_eq!(cavity.quads.len(), 1);
    }

    #[test]
    fn test_update_sides_after_growth() {
        let patch = grid(5, 5);
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut cavity = Cavity::from_faces(&m, &[6, 7]).unwrap();
        // A 2x1 block of quads still has four sides.
        let nsides = cavity.update_sides(&m);
        assert_eq!(nsides, 4);
        assert_eq!(cavity.side_subdivisions().unwrap(), vec![3, 2, 3, 2]);
    }

    #[test]
    fn test_singularity_blocks_swallowing_flip() {
        let mut patch = grid(5, 5);
        // Flag an interior vertex next to the seed quad as singular.
        let ids = patch.vertex_ids();
        // Vertex (3, 3) in the 6x6 vertex grid.
        let sing = ids[3 * 6 + 3];
        patch.set_singular(sing, true).unwrap();
        let m = HalfEdgeMesh::from_patch(&patch).unwrap();
        let sv = m.index_of(sing).unwrap();

        let mut faces = Vec::new();
        m.vertex_faces(sv, &mut faces);
        // Seed with all but one quad around the singularity, then try to
        // close the ring: the last flip must be rejected.
        let seed: Vec<u32> = faces.iter().copied().take(3).collect();
        let missing = faces[3];
        let mut cavity = Cavity::from_faces(&m, &seed).unwrap();
        let mut info = FlipInfo::default();
        for i in 0..cavity.hes.len() {
            let he = cavity.hes[i];
            if m.opposite(he) != NO_ID && m.face(m.opposite(he)) == missing {
                assert!(!cavity.grow_by_flip(&m, i, &mut info, true));
            }
        }
        assert!(!cavity.quads.contains(&missing));
    }
}
