//! Half-edge connectivity over an all-quad patch.
//!
//! The half-edge mesh is a derived, index-based view of a [`SurfacePatch`]:
//! it is rebuilt whenever the patch is spliced and never outlives the edit.
//! All ids here are plain `u32` indices into the mesh's own arrays, with
//! [`NO_ID`] marking absent opposites on the patch boundary.

use hashbrown::HashMap;
use nalgebra::Point3;

use crate::error::{QuadMeshError, QuadMeshResult};
use crate::types::{EntityClass, QuadId, SurfacePatch, VertexId};

/// Sentinel for absent half-edge references.
pub const NO_ID: u32 = u32::MAX;

/// One directed edge of a quad. `vertex` is the tip of the arrow.
#[derive(Debug, Clone, Copy)]
pub struct HalfEdge {
    pub prev: u32,
    pub next: u32,
    pub opposite: u32,
    pub vertex: u32,
    pub face: u32,
}

/// Vertex record of the half-edge mesh.
#[derive(Debug, Clone)]
pub struct HeVertex {
    /// One half-edge whose tip is this vertex.
    pub he: u32,
    pub position: Point3<f64>,
    /// Cross-field singularity to be preserved by remeshing.
    pub singular: bool,
    pub class: EntityClass,
    /// Vertex in the owning patch.
    pub source: VertexId,
}

/// Face record of the half-edge mesh.
#[derive(Debug, Clone, Copy)]
pub struct HeFace {
    /// One half-edge of the face.
    pub he: u32,
    /// Quad in the owning patch.
    pub source: QuadId,
}

/// Half-edge connectivity of one quad patch.
#[derive(Debug, Clone)]
pub struct HalfEdgeMesh {
    pub vertices: Vec<HeVertex>,
    pub hedges: Vec<HalfEdge>,
    pub faces: Vec<HeFace>,
    vertex_index: HashMap<VertexId, u32>,
}

impl HalfEdgeMesh {
    /// Build the connectivity of all live quads in the patch.
    ///
    /// Fails when the patch has no quads or an edge is shared by more than
    /// two quads. Only vertices referenced by at least one quad appear in
    /// the result.
    pub fn from_patch(patch: &SurfacePatch) -> QuadMeshResult<Self> {
        if patch.quad_count() == 0 {
            return Err(QuadMeshError::empty_patch(patch.tag(), "no quads"));
        }
        let mut mesh = HalfEdgeMesh {
            vertices: Vec::with_capacity(patch.vertex_count()),
            hedges: Vec::with_capacity(4 * patch.quad_count()),
            faces: Vec::with_capacity(patch.quad_count()),
            vertex_index: HashMap::with_capacity(patch.vertex_count()),
        };

        for (qid, quad) in patch.quads() {
            let mut corners = [0u32; 4];
            for (le, vid) in quad.vertices.iter().enumerate() {
                let nv = match mesh.vertex_index.get(vid) {
                    Some(nv) => *nv,
                    None => {
                        let nv = mesh.vertices.len() as u32;
                        let vertex = patch.vertex(*vid).ok_or_else(|| {
                            QuadMeshError::stale_reference(format!(
                                "quad {} references dead vertex {}",
                                qid, vid
                            ))
                        })?;
                        mesh.vertices.push(HeVertex {
                            he: NO_ID,
                            position: vertex.position,
                            singular: vertex.singular,
                            class: vertex.kind.class(),
                            source: *vid,
                        });
                        mesh.vertex_index.insert(*vid, nv);
                        nv
                    }
                };
                corners[le] = nv;
            }
            let face_no = mesh.faces.len() as u32;
            let he0 = mesh.hedges.len() as u32;
            for k in 0..4u32 {
                let tip = corners[((1 + k) % 4) as usize];
                mesh.hedges.push(HalfEdge {
                    prev: he0 + (k + 3) % 4,
                    next: he0 + (k + 1) % 4,
                    opposite: NO_ID,
                    vertex: tip,
                    face: face_no,
                });
                if mesh.vertices[tip as usize].he == NO_ID {
                    mesh.vertices[tip as usize].he = he0 + k;
                }
            }
            mesh.faces.push(HeFace { he: he0, source: qid });
        }

        // Opposite matching on undirected vertex pairs.
        let mut edge_to_hedges: HashMap<(u32, u32), (u32, u32)> =
            HashMap::with_capacity(mesh.hedges.len());
        for i in 0..mesh.hedges.len() as u32 {
            let v1 = mesh.vertex(i, 0);
            let v2 = mesh.vertex(i, 1);
            let key = (v1.min(v2), v1.max(v2));
            let entry = edge_to_hedges.entry(key).or_insert((NO_ID, NO_ID));
            if entry.0 == NO_ID {
                entry.0 = i;
            } else if entry.1 == NO_ID {
                entry.1 = i;
            } else {
                let a = mesh.vertices[key.0 as usize].source;
                let b = mesh.vertices[key.1 as usize].source;
                return Err(QuadMeshError::non_manifold_edge(
                    patch.tag(),
                    a.index(),
                    b.index(),
                    3,
                ));
            }
        }
        for (a, b) in edge_to_hedges.into_values() {
            if a != NO_ID && b != NO_ID {
                mesh.hedges[a as usize].opposite = b;
                mesh.hedges[b as usize].opposite = a;
            }
        }
        Ok(mesh)
    }

    #[inline]
    pub fn next(&self, he: u32) -> u32 {
        self.hedges[he as usize].next
    }

    #[inline]
    pub fn prev(&self, he: u32) -> u32 {
        self.hedges[he as usize].prev
    }

    #[inline]
    pub fn opposite(&self, he: u32) -> u32 {
        self.hedges[he as usize].opposite
    }

    #[inline]
    pub fn face(&self, he: u32) -> u32 {
        self.hedges[he as usize].face
    }

    /// Endpoint of a half-edge, `lv == 0` for the base and `lv == 1` for the
    /// tip.
    #[inline]
    pub fn vertex(&self, he: u32, lv: usize) -> u32 {
        if lv == 0 {
            self.hedges[self.prev(he) as usize].vertex
        } else {
            self.hedges[he as usize].vertex
        }
    }

    /// Half-edge mesh index of a patch vertex, if referenced by any quad.
    pub fn index_of(&self, v: VertexId) -> Option<u32> {
        self.vertex_index.get(&v).copied()
    }

    /// The four vertices of a face, in winding order.
    pub fn face_vertices(&self, f: u32) -> [u32; 4] {
        let he = self.faces[f as usize].he;
        let mut vert = [0u32; 4];
        let mut cur = he;
        for slot in &mut vert {
            *slot = self.hedges[cur as usize].vertex;
            cur = self.next(cur);
        }
        vert
    }

    /// The four half-edges of a face, in winding order.
    pub fn face_half_edges(&self, f: u32) -> [u32; 4] {
        let he = self.faces[f as usize].he;
        let mut hes = [0u32; 4];
        let mut cur = he;
        for slot in &mut hes {
            *slot = cur;
            cur = self.next(cur);
        }
        hes
    }

    /// Number of adjacent faces and whether the vertex lies on the patch
    /// boundary.
    pub fn vertex_face_valence(&self, v: u32) -> (usize, bool) {
        let start = self.vertices[v as usize].he;
        if start == NO_ID {
            return (0, false);
        }
        let mut valence = 0usize;
        let mut he_bdr = NO_ID;
        let mut he = start;
        loop {
            let cand = self.opposite(self.next(he));
            if cand == NO_ID {
                he_bdr = self.next(he);
                break;
            }
            he = cand;
            valence += 1;
            if he == start {
                break;
            }
        }
        if he_bdr == NO_ID {
            return (valence, false);
        }
        // Boundary case, unroll the other way from the boundary half-edge.
        valence = 0;
        let mut he = he_bdr;
        while he != NO_ID {
            valence += 1;
            he = self.opposite(self.prev(he));
            if he == he_bdr {
                break;
            }
        }
        (valence, true)
    }

    /// Faces adjacent to the vertex, ordered around it.
    pub fn vertex_faces(&self, v: u32, faces: &mut Vec<u32>) {
        faces.clear();
        let start = self.vertices[v as usize].he;
        if start == NO_ID {
            return;
        }
        let mut he_bdr = NO_ID;
        let mut he = start;
        loop {
            let cand = self.opposite(self.next(he));
            if cand == NO_ID {
                he_bdr = self.next(he);
                break;
            }
            he = cand;
            faces.push(self.hedges[he as usize].face);
            if he == start {
                break;
            }
        }
        if he_bdr == NO_ID {
            return;
        }
        faces.clear();
        let mut he = he_bdr;
        while he != NO_ID {
            faces.push(self.hedges[he as usize].face);
            he = self.opposite(self.prev(he));
            if he == he_bdr {
                break;
            }
        }
    }

    /// Half-edges around the vertex, one per adjacent face.
    pub fn vertex_half_edges(&self, v: u32, hes: &mut Vec<u32>) {
        hes.clear();
        let start = self.vertices[v as usize].he;
        if start == NO_ID {
            return;
        }
        let mut he_bdr = NO_ID;
        let mut he = start;
        loop {
            hes.push(he);
            let cand = self.opposite(self.next(he));
            if cand == NO_ID {
                he_bdr = self.next(he);
                break;
            }
            he = cand;
            if he == start {
                break;
            }
        }
        if he_bdr == NO_ID {
            return;
        }
        hes.clear();
        let mut he = he_bdr;
        while he != NO_ID {
            hes.push(he);
            he = self.opposite(self.prev(he));
            if he == he_bdr {
                break;
            }
        }
    }

    /// Faces sharing an edge with the face.
    pub fn face_adjacent_faces(&self, f: u32, afaces: &mut Vec<u32>) {
        afaces.clear();
        for he in self.face_half_edges(f) {
            let op = self.opposite(he);
            if op != NO_ID {
                afaces.push(self.hedges[op as usize].face);
            }
        }
    }

    /// Regular means valence 4 in the interior, 2 on the boundary.
    pub fn vertex_is_regular(&self, v: u32) -> bool {
        let (val, on_bdr) = self.vertex_face_valence(v);
        (on_bdr && val == 2) || (!on_bdr && val == 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeshVertex;

    fn grid_patch(nx: usize, ny: usize) -> (SurfacePatch, Vec<VertexId>) {
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
                let a = verts[j * (nx + 1) + i];
                let b = verts[j * (nx + 1) + i + 1];
                let c = verts[(j + 1) * (nx + 1) + i + 1];
                let d = verts[(j + 1) * (nx + 1) + i];
                patch.add_quad([a, b, c, d]).unwrap();
            }
        }
        (patch, verts)
    }

    #[test]
    fn test_counts() {
        let (patch, _) = grid_patch(3, 3);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        assert_eq!(mesh.faces.len(), 9);
        assert_eq!(mesh.hedges.len(), 36);
        assert_eq!(mesh.vertices.len(), 16);
    }

    #[test]
    fn test_opposites_are_symmetric() {
        let (patch, _) = grid_patch(3, 2);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut interior = 0;
        for he in 0..mesh.hedges.len() as u32 {
            let op = mesh.opposite(he);
            if op != NO_ID {
                assert_eq!(mesh.opposite(op), he);
                assert_eq!(mesh.vertex(he, 0), mesh.vertex(op, 1));
                assert_eq!(mesh.vertex(he, 1), mesh.vertex(op, 0));
                interior += 1;
            }
        }
        // 7 interior edges on a 3x2 grid, two half-edges each.
        assert_eq!(interior, 14);
    }

    #[test]
    fn test_grid_valences() {
        let (patch, verts) = grid_patch(3, 3);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let center = mesh.index_of(verts[5]).unwrap();
        assert_eq!(mesh.vertex_face_valence(center), (4, false));
        assert!(mesh.vertex_is_regular(center));

        let corner = mesh.index_of(verts[0]).unwrap();
        assert_eq!(mesh.vertex_face_valence(corner), (1, true));
        assert!(!mesh.vertex_is_regular(corner));

        let edge_mid = mesh.index_of(verts[1]).unwrap();
        assert_eq!(mesh.vertex_face_valence(edge_mid), (2, true));
        assert!(mesh.vertex_is_regular(edge_mid));
    }

    #[test]
    fn test_vertex_faces_boundary_order() {
        let (patch, verts) = grid_patch(3, 1);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        // Vertex 1 on the bottom boundary touches quads 0 and 1.
        let v = mesh.index_of(verts[1]).unwrap();
        let mut faces = Vec::new();
        mesh.vertex_faces(v, &mut faces);
        assert_eq!(faces.len(), 2);
        let mut sorted = faces.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1]);
    }

    #[test]
    fn test_face_vertices_cycle() {
        let (patch, verts) = grid_patch(2, 1);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let fv = mesh.face_vertices(0);
        let expected: Vec<u32> = [verts[0], verts[1], verts[4], verts[3]]
            .iter()
            .map(|v| mesh.index_of(*v).unwrap())
            .collect();
        // Same cyclic order, possibly rotated.
        let pos = fv.iter().position(|x| *x == expected[0]).unwrap();
        for k in 0..4 {
            assert_eq!(fv[(pos + k) % 4], expected[k]);
        }
    }

    #[test]
    fn test_non_manifold_edge_rejected() {
        let mut patch = SurfacePatch::new(0);
        let mut v = |x: f64, y: f64, z: f64| patch.add_surface_vertex(Point3::new(x, y, z));
        let a = v(0.0, 0.0, 0.0);
        let b = v(1.0, 0.0, 0.0);
        let c = v(1.0, 1.0, 0.0);
        let d = v(0.0, 1.0, 0.0);
        let e = v(1.0, 0.0, 1.0);
        let f = v(0.0, 0.0, 1.0);
        let g = v(1.0, 0.0, -1.0);
        let h = v(0.0, 0.0, -1.0);
        patch.add_quad([a, b, c, d]).unwrap();
        patch.add_quad([b, a, f, e]).unwrap();
        patch.add_quad([a, b, g, h]).unwrap();
        let err = HalfEdgeMesh::from_patch(&patch).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NonManifoldEdge);
    }

    #[test]
    fn test_empty_patch_rejected() {
        let patch = SurfacePatch::new(3);
        let err = HalfEdgeMesh::from_patch(&patch).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::EmptyPatch);
    }

    #[test]
    fn test_face_adjacent_faces() {
        let (patch, _) = grid_patch(3, 1);
        let mesh = HalfEdgeMesh::from_patch(&patch).unwrap();
        let mut afaces = Vec::new();
        mesh.face_adjacent_faces(1, &mut afaces);
        let mut sorted = afaces.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 2]);
    }
}
