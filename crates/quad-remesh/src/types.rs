//! Core data structures for quad surface patches.
//!
//! A [`SurfacePatch`] owns the vertices and quads of one surface region in
//! generational arenas. Identifiers ([`VertexId`], [`QuadId`]) carry a slot
//! index and a generation counter, so a reference to a deleted element is
//! detected instead of silently aliasing whatever got recycled into the slot.
//!
//! Structural edits performed by the remeshing passes go through
//! [`MeshSplice`], which validates the whole edit before mutating anything.

use nalgebra::Point3;

use crate::error::{QuadMeshError, QuadMeshResult};

/// Identifier of a vertex in a [`SurfacePatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId {
    index: u32,
    generation: u32,
}

impl VertexId {
    /// Slot index in the vertex arena.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.index, self.generation)
    }
}

/// Identifier of a quad in a [`SurfacePatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuadId {
    index: u32,
    generation: u32,
}

impl QuadId {
    /// Slot index in the quad arena.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl std::fmt::Display for QuadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}.{}", self.index, self.generation)
    }
}

/// Geometric support classification of a vertex.
///
/// Corners carry the total surface angle at the corner, which drives the
/// ideal valence there. The classification is closed: every vertex is on a
/// corner, on a curve, or in the surface interior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityKind {
    /// CAD corner with the given surface angle (radians).
    Corner { angle: f64 },
    /// Point on a boundary curve.
    Curve,
    /// Point in the interior of the surface.
    Surface,
}

/// [`EntityKind`] without the corner angle, usable as a hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityClass {
    Corner,
    Curve,
    Surface,
}

impl EntityKind {
    /// The angle-free classification.
    pub fn class(&self) -> EntityClass {
        match self {
            EntityKind::Corner { .. } => EntityClass::Corner,
            EntityKind::Curve => EntityClass::Curve,
            EntityKind::Surface => EntityClass::Surface,
        }
    }

    pub fn is_corner(&self) -> bool {
        matches!(self, EntityKind::Corner { .. })
    }

    pub fn is_curve(&self) -> bool {
        matches!(self, EntityKind::Curve)
    }

    pub fn is_surface(&self) -> bool {
        matches!(self, EntityKind::Surface)
    }

    /// Whether the vertex sits on the patch boundary.
    pub fn on_boundary(&self) -> bool {
        !self.is_surface()
    }

    /// Ideal number of adjacent quads.
    ///
    /// Corners get `round(4 * angle / 2pi)` clamped to `[1, 4]`, curve
    /// vertices 2, interior vertices 4.
    pub fn ideal_valence(&self) -> usize {
        match self {
            EntityKind::Corner { angle } => {
                let ideal = (4.0 * angle / (2.0 * std::f64::consts::PI)).round();
                ideal.clamp(1.0, 4.0) as usize
            }
            EntityKind::Curve => 2,
            EntityKind::Surface => 4,
        }
    }
}

/// A vertex of a quad patch.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshVertex {
    /// Position in model space (millimeters).
    pub position: Point3<f64>,
    /// Geometric support of the vertex.
    pub kind: EntityKind,
    /// Whether the vertex is a tracked cross-field singularity.
    pub singular: bool,
}

impl MeshVertex {
    /// Interior surface vertex.
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            kind: EntityKind::Surface,
            singular: false,
        }
    }

    /// Vertex on a boundary curve.
    pub fn on_curve(position: Point3<f64>) -> Self {
        Self {
            position,
            kind: EntityKind::Curve,
            singular: false,
        }
    }

    /// Vertex at a CAD corner with the given surface angle.
    pub fn at_corner(position: Point3<f64>, angle: f64) -> Self {
        Self {
            position,
            kind: EntityKind::Corner { angle },
            singular: false,
        }
    }

    /// Mark the vertex as a cross-field singularity.
    pub fn singular(mut self) -> Self {
        self.singular = true;
        self
    }
}

/// A quadrilateral element, four vertices in counter-clockwise order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quad {
    pub vertices: [VertexId; 4],
}

impl Quad {
    pub fn new(vertices: [VertexId; 4]) -> Self {
        Self { vertices }
    }

    /// Whether the quad references the vertex.
    pub fn contains(&self, v: VertexId) -> bool {
        self.vertices.contains(&v)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    data: Option<T>,
}

/// One surface region of an all-quad mesh.
///
/// Vertices and quads live in generational arenas: deletions leave a hole
/// that later insertions reuse with a bumped generation, so stale ids never
/// resolve. Iteration order is slot order and is stable across a run with
/// identical edits, which keeps the remeshing passes deterministic.
#[derive(Debug, Clone)]
pub struct SurfacePatch {
    tag: u32,
    vertex_slots: Vec<Slot<MeshVertex>>,
    free_vertex_slots: Vec<u32>,
    live_vertices: usize,
    quad_slots: Vec<Slot<Quad>>,
    free_quad_slots: Vec<u32>,
    live_quads: usize,
}

impl SurfacePatch {
    /// Create an empty patch with the given tag.
    pub fn new(tag: u32) -> Self {
        Self {
            tag,
            vertex_slots: Vec::new(),
            free_vertex_slots: Vec::new(),
            live_vertices: 0,
            quad_slots: Vec::new(),
            free_quad_slots: Vec::new(),
            live_quads: 0,
        }
    }

    /// Tag identifying this patch in diagnostics.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Number of live vertices.
    pub fn vertex_count(&self) -> usize {
        self.live_vertices
    }

    /// Number of live quads.
    pub fn quad_count(&self) -> usize {
        self.live_quads
    }

    /// Add a vertex, reusing a free slot when one exists.
    pub fn add_vertex(&mut self, vertex: MeshVertex) -> VertexId {
        self.live_vertices += 1;
        if let Some(index) = self.free_vertex_slots.pop() {
            let slot = &mut self.vertex_slots[index as usize];
            slot.data = Some(vertex);
            VertexId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.vertex_slots.len() as u32;
            self.vertex_slots.push(Slot {
                generation: 0,
                data: Some(vertex),
            });
            VertexId {
                index,
                generation: 0,
            }
        }
    }

    /// Add an interior surface vertex at `position`.
    pub fn add_surface_vertex(&mut self, position: Point3<f64>) -> VertexId {
        self.add_vertex(MeshVertex::new(position))
    }

    /// Add a quad over four distinct live vertices.
    pub fn add_quad(&mut self, vertices: [VertexId; 4]) -> QuadMeshResult<QuadId> {
        for (k, v) in vertices.iter().enumerate() {
            if !self.contains_vertex(*v) {
                return Err(QuadMeshError::stale_reference(format!(
                    "quad corner {} references dead vertex {}",
                    k, v
                )));
            }
            if vertices[..k].contains(v) {
                return Err(QuadMeshError::invalid_quad(format!(
                    "vertex {} repeated in quad [{}, {}, {}, {}]",
                    v, vertices[0], vertices[1], vertices[2], vertices[3]
                )));
            }
        }
        self.live_quads += 1;
        let quad = Quad::new(vertices);
        let id = if let Some(index) = self.free_quad_slots.pop() {
            let slot = &mut self.quad_slots[index as usize];
            slot.data = Some(quad);
            QuadId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.quad_slots.len() as u32;
            self.quad_slots.push(Slot {
                generation: 0,
                data: Some(quad),
            });
            QuadId {
                index,
                generation: 0,
            }
        };
        Ok(id)
    }

    /// Remove a quad, returning its data.
    pub fn remove_quad(&mut self, id: QuadId) -> QuadMeshResult<Quad> {
        let slot = self
            .quad_slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| {
                QuadMeshError::stale_reference(format!("remove_quad on dead id {}", id))
            })?;
        let quad = slot.data.take().ok_or_else(|| {
            QuadMeshError::stale_reference(format!("remove_quad on already removed id {}", id))
        })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_quad_slots.push(id.index);
        self.live_quads -= 1;
        Ok(quad)
    }

    /// Remove a vertex, returning its data.
    ///
    /// The caller is responsible for ensuring no live quad still references
    /// the vertex; [`MeshSplice`] enforces this for remeshing edits.
    pub fn remove_vertex(&mut self, id: VertexId) -> QuadMeshResult<MeshVertex> {
        let slot = self
            .vertex_slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| {
                QuadMeshError::stale_reference(format!("remove_vertex on dead id {}", id))
            })?;
        let vertex = slot.data.take().ok_or_else(|| {
            QuadMeshError::stale_reference(format!("remove_vertex on already removed id {}", id))
        })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_vertex_slots.push(id.index);
        self.live_vertices -= 1;
        Ok(vertex)
    }

    /// Look up a vertex, `None` when the id is stale.
    pub fn vertex(&self, id: VertexId) -> Option<&MeshVertex> {
        self.vertex_slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_ref())
    }

    /// Mutable vertex lookup.
    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut MeshVertex> {
        self.vertex_slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_mut())
    }

    /// Look up a quad, `None` when the id is stale.
    pub fn quad(&self, id: QuadId) -> Option<&Quad> {
        self.quad_slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.data.as_ref())
    }

    /// Position of a live vertex.
    pub fn position(&self, id: VertexId) -> Option<Point3<f64>> {
        self.vertex(id).map(|v| v.position)
    }

    /// Move a live vertex.
    pub fn set_position(&mut self, id: VertexId, position: Point3<f64>) -> QuadMeshResult<()> {
        let v = self.vertex_mut(id).ok_or_else(|| {
            QuadMeshError::stale_reference(format!("set_position on dead id {}", id))
        })?;
        v.position = position;
        Ok(())
    }

    /// Set or clear the singularity flag of a live vertex.
    pub fn set_singular(&mut self, id: VertexId, singular: bool) -> QuadMeshResult<()> {
        let v = self.vertex_mut(id).ok_or_else(|| {
            QuadMeshError::stale_reference(format!("set_singular on dead id {}", id))
        })?;
        v.singular = singular;
        Ok(())
    }

    pub fn contains_vertex(&self, id: VertexId) -> bool {
        self.vertex(id).is_some()
    }

    pub fn contains_quad(&self, id: QuadId) -> bool {
        self.quad(id).is_some()
    }

    /// Iterate live vertices in slot order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &MeshVertex)> {
        self.vertex_slots.iter().enumerate().filter_map(|(i, s)| {
            s.data.as_ref().map(|v| {
                (
                    VertexId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }

    /// Iterate live quads in slot order.
    pub fn quads(&self) -> impl Iterator<Item = (QuadId, &Quad)> {
        self.quad_slots.iter().enumerate().filter_map(|(i, s)| {
            s.data.as_ref().map(|q| {
                (
                    QuadId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    q,
                )
            })
        })
    }

    /// Ids of live vertices in slot order.
    pub fn vertex_ids(&self) -> Vec<VertexId> {
        self.vertices().map(|(id, _)| id).collect()
    }

    /// Ids of live quads in slot order.
    pub fn quad_ids(&self) -> Vec<QuadId> {
        self.quads().map(|(id, _)| id).collect()
    }

    /// Vertices currently flagged as singularities.
    pub fn singular_vertices(&self) -> Vec<VertexId> {
        self.vertices()
            .filter(|(_, v)| v.singular)
            .map(|(id, _)| id)
            .collect()
    }

    /// Apply a splice transaction.
    ///
    /// The whole edit is validated before any mutation: on error the patch is
    /// unchanged. Removed quads and vertices must be live and listed once,
    /// removed vertices must not be referenced by any surviving or new quad,
    /// and every vertex reference in the new quads must resolve without
    /// repeating a corner.
    pub fn apply_splice(&mut self, splice: MeshSplice) -> QuadMeshResult<SpliceOutcome> {
        let mut removed_quads = hashbrown::HashSet::with_capacity(splice.removed_quads.len());
        for id in &splice.removed_quads {
            if !self.contains_quad(*id) {
                return Err(QuadMeshError::stale_reference(format!(
                    "splice removes dead quad {}",
                    id
                )));
            }
            if !removed_quads.insert(*id) {
                return Err(QuadMeshError::invalid_quad(format!(
                    "splice removes quad {} twice",
                    id
                )));
            }
        }
        let mut removed_vertices = hashbrown::HashSet::with_capacity(splice.removed_vertices.len());
        for id in &splice.removed_vertices {
            if !self.contains_vertex(*id) {
                return Err(QuadMeshError::stale_reference(format!(
                    "splice removes dead vertex {}",
                    id
                )));
            }
            if !removed_vertices.insert(*id) {
                return Err(QuadMeshError::invalid_quad(format!(
                    "splice removes vertex {} twice",
                    id
                )));
            }
        }
        for quad in &splice.new_quads {
            for (k, corner) in quad.iter().enumerate() {
                if quad[..k].contains(corner) {
                    return Err(QuadMeshError::invalid_quad(
                        "splice quad repeats a corner",
                    ));
                }
                match corner {
                    SpliceVertex::Existing(v) => {
                        if !self.contains_vertex(*v) {
                            return Err(QuadMeshError::stale_reference(format!(
                                "splice quad references dead vertex {}",
                                v
                            )));
                        }
                        if splice.removed_vertices.contains(v) {
                            return Err(QuadMeshError::invalid_quad(format!(
                                "splice quad references removed vertex {}",
                                v
                            )));
                        }
                    }
                    SpliceVertex::New(i) => {
                        if *i >= splice.new_vertices.len() {
                            return Err(QuadMeshError::invalid_quad(format!(
                                "splice quad references new vertex {} but only {} are added",
                                i,
                                splice.new_vertices.len()
                            )));
                        }
                    }
                }
            }
        }
        // Removed vertices must not survive in quads the splice keeps.
        if !splice.removed_vertices.is_empty() {
            for (qid, quad) in self.quads() {
                if removed_quads.contains(&qid) {
                    continue;
                }
                for v in &quad.vertices {
                    if splice.removed_vertices.contains(v) {
                        return Err(QuadMeshError::invalid_quad(format!(
                            "splice removes vertex {} still used by quad {}",
                            v, qid
                        )));
                    }
                }
            }
        }

        let mut quads_removed = Vec::with_capacity(splice.removed_quads.len());
        for id in &splice.removed_quads {
            self.remove_quad(*id)?;
            quads_removed.push(*id);
        }
        let vertices: Vec<VertexId> = splice
            .new_vertices
            .into_iter()
            .map(|v| self.add_vertex(v))
            .collect();
        let mut quads = Vec::with_capacity(splice.new_quads.len());
        for quad in &splice.new_quads {
            let resolved = quad.map(|corner| match corner {
                SpliceVertex::Existing(v) => v,
                SpliceVertex::New(i) => vertices[i],
            });
            quads.push(self.add_quad(resolved)?);
        }
        for id in &splice.removed_vertices {
            self.remove_vertex(*id)?;
        }
        Ok(SpliceOutcome { vertices, quads })
    }
}

/// Vertex reference inside a [`MeshSplice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceVertex {
    /// A vertex that already exists in the patch.
    Existing(VertexId),
    /// Index into [`MeshSplice::new_vertices`].
    New(usize),
}

/// A validated structural edit of a [`SurfacePatch`].
///
/// Remeshing passes describe their whole edit (quads deleted, vertices
/// deleted, vertices created, quads created) as one splice and apply it
/// atomically.
#[derive(Debug, Clone, Default)]
pub struct MeshSplice {
    pub new_vertices: Vec<MeshVertex>,
    pub new_quads: Vec<[SpliceVertex; 4]>,
    pub removed_quads: Vec<QuadId>,
    pub removed_vertices: Vec<VertexId>,
}

/// Ids assigned by a successful [`SurfacePatch::apply_splice`].
#[derive(Debug, Clone)]
pub struct SpliceOutcome {
    /// One id per [`MeshSplice::new_vertices`] entry, in order.
    pub vertices: Vec<VertexId>,
    /// One id per [`MeshSplice::new_quads`] entry, in order.
    pub quads: Vec<QuadId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn square_patch() -> (SurfacePatch, [VertexId; 4]) {
        let mut patch = SurfacePatch::new(0);
        let v = [
            patch.add_vertex(MeshVertex::at_corner(Point3::new(0.0, 0.0, 0.0), 1.57)),
            patch.add_vertex(MeshVertex::at_corner(Point3::new(1.0, 0.0, 0.0), 1.57)),
            patch.add_vertex(MeshVertex::at_corner(Point3::new(1.0, 1.0, 0.0), 1.57)),
            patch.add_vertex(MeshVertex::at_corner(Point3::new(0.0, 1.0, 0.0), 1.57)),
        ];
        (patch, v)
    }

    #[test]
    fn test_add_and_query_quad() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();
        assert_eq!(patch.quad_count(), 1);
        assert_eq!(patch.quad(q).unwrap().vertices, v);
    }

    #[test]
    fn test_stale_id_after_removal() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();
        patch.remove_quad(q).unwrap();
        assert!(patch.quad(q).is_none());
        assert!(patch.remove_quad(q).is_err());

        // The slot is recycled with a new generation.
        let q2 = patch.add_quad(v).unwrap();
        assert_eq!(q2.index(), q.index());
        assert_ne!(q2, q);
        assert!(patch.quad(q).is_none());
        assert!(patch.quad(q2).is_some());
    }

    #[test]
    fn test_repeated_vertex_rejected() {
        let (mut patch, v) = square_patch();
        let err = patch.add_quad([v[0], v[1], v[1], v[3]]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuad);
    }

    #[test]
    fn test_dead_vertex_rejected() {
        let (mut patch, v) = square_patch();
        let lone = patch.add_surface_vertex(Point3::new(0.5, 0.5, 0.0));
        patch.remove_vertex(lone).unwrap();
        let err = patch.add_quad([v[0], v[1], v[2], lone]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StaleReference);
    }

    #[test]
    fn test_ideal_valence() {
        assert_eq!(EntityKind::Surface.ideal_valence(), 4);
        assert_eq!(EntityKind::Curve.ideal_valence(), 2);
        assert_eq!(
            EntityKind::Corner {
                angle: std::f64::consts::FRAC_PI_2
            }
            .ideal_valence(),
            1
        );
        assert_eq!(
            EntityKind::Corner {
                angle: std::f64::consts::PI
            }
            .ideal_valence(),
            2
        );
        // A tiny slit corner still gets at least one quad.
        assert_eq!(EntityKind::Corner { angle: 0.01 }.ideal_valence(), 1);
    }

    #[test]
    fn test_splice_replaces_quad() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();

        // Split the square into a 4-quad fan around a new center vertex is not
        // possible without edge midpoints, so just swap the quad for two new
        // vertices and a strip of one quad to exercise the mapping.
        let splice = MeshSplice {
            new_vertices: vec![
                MeshVertex::new(Point3::new(0.5, 0.0, 0.0)),
                MeshVertex::new(Point3::new(0.5, 1.0, 0.0)),
            ],
            new_quads: vec![
                [
                    SpliceVertex::Existing(v[0]),
                    SpliceVertex::New(0),
                    SpliceVertex::New(1),
                    SpliceVertex::Existing(v[3]),
                ],
                [
                    SpliceVertex::New(0),
                    SpliceVertex::Existing(v[1]),
                    SpliceVertex::Existing(v[2]),
                    SpliceVertex::New(1),
                ],
            ],
            removed_quads: vec![q],
            removed_vertices: vec![],
        };
        let outcome = patch.apply_splice(splice).unwrap();
        assert_eq!(outcome.vertices.len(), 2);
        assert_eq!(outcome.quads.len(), 2);
        assert_eq!(patch.quad_count(), 2);
        assert_eq!(patch.vertex_count(), 6);
        assert!(patch.quad(q).is_none());
    }

    #[test]
    fn test_splice_rejects_vertex_still_in_use() {
        let (mut patch, v) = square_patch();
        patch.add_quad(v).unwrap();
        let splice = MeshSplice {
            removed_vertices: vec![v[0]],
            ..Default::default()
        };
        let err = patch.apply_splice(splice).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuad);
        // Patch untouched.
        assert_eq!(patch.vertex_count(), 4);
        assert_eq!(patch.quad_count(), 1);
    }

    #[test]
    fn test_splice_rejects_stale_quad() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();
        patch.remove_quad(q).unwrap();
        let splice = MeshSplice {
            removed_quads: vec![q],
            ..Default::default()
        };
        let err = patch.apply_splice(splice).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::StaleReference);
    }

    #[test]
    fn test_splice_rejects_repeated_corner_without_mutating() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();
        let splice = MeshSplice {
            new_vertices: vec![MeshVertex::new(Point3::new(0.5, 0.5, 0.0))],
            new_quads: vec![[
                SpliceVertex::Existing(v[0]),
                SpliceVertex::New(0),
                SpliceVertex::New(0),
                SpliceVertex::Existing(v[3]),
            ]],
            removed_quads: vec![q],
            removed_vertices: vec![],
        };
        let err = patch.apply_splice(splice).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuad);
        // The rejected splice must not have touched the patch.
        assert_eq!(patch.quad_count(), 1);
        assert_eq!(patch.vertex_count(), 4);
        assert_eq!(patch.quad(q).unwrap().vertices, v);
    }

    #[test]
    fn test_splice_rejects_duplicate_removals() {
        let (mut patch, v) = square_patch();
        let q = patch.add_quad(v).unwrap();
        let splice = MeshSplice {
            removed_quads: vec![q, q],
            ..Default::default()
        };
        let err = patch.apply_splice(splice).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuad);
        assert!(patch.quad(q).is_some());

        let lone = patch.add_surface_vertex(Point3::new(2.0, 2.0, 0.0));
        let splice = MeshSplice {
            removed_vertices: vec![lone, lone],
            ..Default::default()
        };
        let err = patch.apply_splice(splice).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidQuad);
        assert!(patch.contains_vertex(lone));
    }

    #[test]
    fn test_iteration_order_is_slot_order() {
        let (mut patch, _) = square_patch();
        let extra = patch.add_surface_vertex(Point3::new(2.0, 0.0, 0.0));
        let ids = patch.vertex_ids();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[4], extra);
        assert!(ids.windows(2).all(|w| w[0].index() < w[1].index()));
    }
}
