//! Vertex-to-quad adjacency and boundary extraction.
//!
//! [`QuadAdjacency`] is the mutable companion of the repair passes: it is
//! built once per patch and updated incrementally as splices add and remove
//! quads, so valences stay queryable without rebuilding connectivity.

use hashbrown::{HashMap, HashSet};

use crate::types::{Quad, QuadId, SurfacePatch, VertexId};

/// Vertex-to-quad adjacency lists for one patch.
#[derive(Debug, Clone, Default)]
pub struct QuadAdjacency {
    map: HashMap<VertexId, Vec<QuadId>>,
}

impl QuadAdjacency {
    /// Build the adjacency of all live quads in the patch.
    pub fn from_patch(patch: &SurfacePatch) -> Self {
        let mut adjacency = Self::default();
        for (id, quad) in patch.quads() {
            adjacency.add_quad(id, quad);
        }
        adjacency
    }

    /// Quads adjacent to the vertex, empty when the vertex is unknown.
    pub fn quads_of(&self, v: VertexId) -> &[QuadId] {
        self.map.get(&v).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of quads adjacent to the vertex.
    pub fn valence(&self, v: VertexId) -> usize {
        self.quads_of(v).len()
    }

    /// Whether the vertex is still referenced by at least one quad.
    pub fn contains(&self, v: VertexId) -> bool {
        self.map.get(&v).is_some_and(|quads| !quads.is_empty())
    }

    /// Register a quad.
    pub fn add_quad(&mut self, id: QuadId, quad: &Quad) {
        for v in &quad.vertices {
            self.map.entry(*v).or_default().push(id);
        }
    }

    /// Unregister a quad.
    pub fn remove_quad(&mut self, id: QuadId, quad: &Quad) {
        for v in &quad.vertices {
            if let Some(quads) = self.map.get_mut(v) {
                quads.retain(|q| *q != id);
                if quads.is_empty() {
                    self.map.remove(v);
                }
            }
        }
    }

    /// Drop the entry of a vertex deleted from the patch.
    pub fn remove_vertex(&mut self, v: VertexId) {
        self.map.remove(&v);
    }

    /// Iterate known vertices in arbitrary order.
    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.map.keys().copied()
    }
}

/// Ordered boundary loop of a set of quads.
///
/// Boundary edges are the directed quad edges whose reverse does not occur in
/// the set. Returns the loop vertices in quad winding order, without the
/// repeated closing vertex, or `None` when the boundary is not a single
/// closed loop (multiple loops, pinched vertices, or an empty set).
pub fn boundary_loop<T>(quads: &[[T; 4]]) -> Option<Vec<T>>
where
    T: Copy + Eq + std::hash::Hash,
{
    if quads.is_empty() {
        return None;
    }
    let mut directed: HashSet<(T, T)> = HashSet::new();
    for quad in quads {
        for k in 0..4 {
            directed.insert((quad[k], quad[(k + 1) % 4]));
        }
    }
    let mut successor: HashMap<T, T> = HashMap::new();
    let mut first: Option<T> = None;
    let mut boundary_edges = 0usize;
    for quad in quads {
        for k in 0..4 {
            let (a, b) = (quad[k], quad[(k + 1) % 4]);
            if directed.contains(&(b, a)) {
                continue;
            }
            if successor.insert(a, b).is_some() {
                // Two boundary edges leave the same vertex: pinched boundary.
                return None;
            }
            boundary_edges += 1;
            first.get_or_insert(a);
        }
    }
    let start = first?;
    let mut result = Vec::with_capacity(boundary_edges);
    let mut current = start;
    loop {
        result.push(current);
        current = *successor.get(&current)?;
        if current == start {
            break;
        }
        if result.len() > boundary_edges {
            return None;
        }
    }
    if result.len() != boundary_edges {
        // A second loop exists somewhere in the set.
        return None;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeshVertex;
    use nalgebra::Point3;

    fn grid_patch(nx: usize, ny: usize) -> (SurfacePatch, Vec<VertexId>, Vec<QuadId>) {
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
        let mut quads = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                let a = verts[j * (nx + 1) + i];
                let b = verts[j * (nx + 1) + i + 1];
                let c = verts[(j + 1) * (nx + 1) + i + 1];
                let d = verts[(j + 1) * (nx + 1) + i];
                quads.push(patch.add_quad([a, b, c, d]).unwrap());
            }
        }
        (patch, verts, quads)
    }

    #[test]
    fn test_grid_valences() {
        let (patch, verts, _) = grid_patch(3, 3);
        let adjacency = QuadAdjacency::from_patch(&patch);
        // Corners 1, edge midspans 2, interior 4.
        assert_eq!(adjacency.valence(verts[0]), 1);
        assert_eq!(adjacency.valence(verts[1]), 2);
        assert_eq!(adjacency.valence(verts[5]), 4);
    }

    #[test]
    fn test_incremental_update() {
        let (mut patch, verts, quads) = grid_patch(2, 2);
        let mut adjacency = QuadAdjacency::from_patch(&patch);
        let center = verts[4];
        assert_eq!(adjacency.valence(center), 4);

        let quad = *patch.quad(quads[0]).unwrap();
        patch.remove_quad(quads[0]).unwrap();
        adjacency.remove_quad(quads[0], &quad);
        assert_eq!(adjacency.valence(center), 3);
        assert!(!adjacency.contains(verts[0]));
    }

    #[test]
    fn test_boundary_loop_of_grid() {
        let (patch, _, _) = grid_patch(3, 2);
        let quads: Vec<[VertexId; 4]> = patch.quads().map(|(_, q)| q.vertices).collect();
        let boundary = boundary_loop(&quads).unwrap();
        // 2 * (3 + 2) boundary edges on a 3x2 grid.
        assert_eq!(boundary.len(), 10);
        let unique: HashSet<VertexId> = boundary.iter().copied().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_boundary_loop_rejects_disjoint_quads() {
        let mut patch = SurfacePatch::new(0);
        let mut quad = |x0: f64| {
            let ids = [
                patch.add_surface_vertex(Point3::new(x0, 0.0, 0.0)),
                patch.add_surface_vertex(Point3::new(x0 + 1.0, 0.0, 0.0)),
                patch.add_surface_vertex(Point3::new(x0 + 1.0, 1.0, 0.0)),
                patch.add_surface_vertex(Point3::new(x0, 1.0, 0.0)),
            ];
            ids
        };
        let a = quad(0.0);
        let b = quad(5.0);
        assert!(boundary_loop(&[a, b]).is_none());
    }

    #[test]
    fn test_boundary_loop_single_quad() {
        let (patch, verts, _) = grid_patch(1, 1);
        let quads: Vec<[VertexId; 4]> = patch.quads().map(|(_, q)| q.vertices).collect();
        let boundary = boundary_loop(&quads).unwrap();
        assert_eq!(boundary.len(), 4);
        assert!(boundary.contains(&verts[0]));
    }
}
