//! Small defect removal with disk quadrangulations.
//!
//! A defect is a vertex whose quad valence does not match its geometric
//! support: a CAD corner away from its angle-derived ideal, a curve vertex
//! without exactly two quads, or an interior vertex outside 3..=5. Around
//! each defect a small cavity is collected, its boundary signature (ideal
//! valence and admissible range per boundary vertex) is derived from the
//! quads outside the cavity, and [`crate::patterns::remesh_few_quads`] is
//! asked for a better disk quadrangulation. The swap is applied as one
//! transactional splice and only kept when the irregularity energy strictly
//! decreases, except for duet removal which is always worth it.
//!
//! Three passes run in order (corners, curves, interior), each driven by a
//! priority queue on local irregularity energy that is re-seeded as long as
//! progress is made.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;
use tracing::{debug, info, warn};

use crate::adjacency::{boundary_loop, QuadAdjacency};
use crate::error::QuadMeshResult;
use crate::geometry::SurfaceGeometry;
use crate::patterns::{remesh_few_quads, DiskVertex};
use crate::smoothing::smooth_winslow;
use crate::types::{
    EntityClass, MeshSplice, MeshVertex, QuadId, SpliceVertex, SurfacePatch, VertexId,
};

/// Per-pass repair counts and what is left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefectRepairOutcome {
    pub corner_defects_fixed: usize,
    pub curve_defects_fixed: usize,
    pub surface_defects_fixed: usize,
    /// Vertices still off their ideal valence after the passes.
    pub residual_defects: usize,
}

impl DefectRepairOutcome {
    pub fn fixed(&self) -> usize {
        self.corner_defects_fixed + self.curve_defects_fixed + self.surface_defects_fixed
    }
}

#[derive(Debug, Clone, Copy)]
struct DefectEntry {
    priority: f64,
    vertex: VertexId,
}

impl PartialEq for DefectEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for DefectEntry {}
impl PartialOrd for DefectEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DefectEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| self.vertex.index().cmp(&other.vertex.index()))
    }
}

/// Summed incident quad corner angles at boundary vertices.
///
/// Used to derive the ideal valence of CAD corners, including flat corners
/// that should carry two quads rather than one.
fn vertex_angles(patch: &SurfacePatch) -> HashMap<VertexId, f64> {
    let mut angles: HashMap<VertexId, f64> = HashMap::new();
    for (_, quad) in patch.quads() {
        for lv in 0..4 {
            let v = quad.vertices[lv];
            let Some(vertex) = patch.vertex(v) else { continue };
            if !vertex.kind.on_boundary() {
                continue;
            }
            let Some(prev) = patch.position(quad.vertices[(lv + 3) % 4]) else { continue };
            let Some(next) = patch.position(quad.vertices[(lv + 1) % 4]) else { continue };
            let cur = vertex.position;
            let d1 = next - cur;
            let d2 = prev - cur;
            let denom = d1.norm() * d2.norm();
            if denom > 0.0 {
                let angle = (d1.dot(&d2) / denom).clamp(-1.0, 1.0).acos();
                *angles.entry(v).or_insert(0.0) += angle;
            }
        }
    }
    angles
}

fn angle_ideal_valence(v: VertexId, angles: &HashMap<VertexId, f64>) -> i32 {
    match angles.get(&v) {
        Some(angle) => (4.0 * angle / (2.0 * std::f64::consts::PI))
            .round()
            .clamp(1.0, 4.0) as i32,
        None => 4,
    }
}

fn class_of(patch: &SurfacePatch, v: VertexId) -> Option<EntityClass> {
    patch.vertex(v).map(|vertex| vertex.kind.class())
}

/// Squared valence deviation of the vertices around `v`.
fn irregularity_energy_on_ring(
    patch: &SurfacePatch,
    adjacency: &QuadAdjacency,
    angles: &HashMap<VertexId, f64>,
    v: VertexId,
) -> f64 {
    let Some(vs) = class_of(patch, v) else { return 0.0 };
    let mut ring: HashSet<VertexId> = HashSet::new();
    for q in adjacency.quads_of(v) {
        if let Some(quad) = patch.quad(*q) {
            for v2 in &quad.vertices {
                if *v2 != v {
                    ring.insert(*v2);
                }
            }
        }
    }
    let mut energy = 0.0;
    for v2 in ring {
        let Some(vs2) = class_of(patch, v2) else { continue };
        let val = adjacency.valence(v2) as i32;
        if vs2 != EntityClass::Surface {
            let ideal = angle_ideal_valence(v2, angles);
            energy += f64::from(val - ideal).powi(2);
        } else if vs == EntityClass::Surface {
            energy += f64::from(val - 4).powi(2);
        }
    }
    energy
}

fn queue_priority(
    patch: &SurfacePatch,
    adjacency: &QuadAdjacency,
    angles: &HashMap<VertexId, f64>,
    v: VertexId,
    vs: EntityClass,
) -> f64 {
    let mut prio = irregularity_energy_on_ring(patch, adjacency, angles, v);
    let val = adjacency.valence(v) as i32;
    if vs == EntityClass::Curve && val > 2 {
        prio += 1000.0 * f64::from(val - 2).abs();
    }
    if vs == EntityClass::Surface && val > 5 {
        prio += 1000.0 * f64::from(val - 4).abs();
    }
    prio
}

/// Whether the vertex is a repairable defect, and the cavity to remesh.
///
/// Non-defects return `None`; so do valence-3 interior vertices unless they
/// sit on a diamond (a quad whose opposite corner is also valence 3 with
/// both shared neighbors above 3, all interior). Single-quad boundary
/// defects and diamonds grow the cavity by the quads around the seed quad.
fn remeshable_vertex_properties(
    patch: &SurfacePatch,
    adjacency: &QuadAdjacency,
    angles: &HashMap<VertexId, f64>,
    v: VertexId,
) -> Option<(i32, Vec<QuadId>)> {
    let vs = class_of(patch, v)?;
    let mut quads: Vec<QuadId> = adjacency.quads_of(v).to_vec();
    let ideal = match vs {
        EntityClass::Corner => angle_ideal_valence(v, angles),
        EntityClass::Curve => 2,
        EntityClass::Surface => 4,
    };

    match vs {
        EntityClass::Corner if quads.len() as i32 == ideal => return None,
        EntityClass::Curve if quads.len() == 2 => return None,
        EntityClass::Surface if quads.len() == 4 || quads.len() == 5 => return None,
        _ => {}
    }

    let mut grow_around_quad = false;
    if vs == EntityClass::Surface && quads.len() == 3 {
        'search: for q in &quads {
            let quad = patch.quad(*q)?;
            for lv in 0..4 {
                if quad.vertices[lv] != v {
                    continue;
                }
                let v_prev = quad.vertices[(lv + 3) % 4];
                let v_op = quad.vertices[(lv + 2) % 4];
                let v_next = quad.vertices[(lv + 1) % 4];
                if adjacency.valence(v_prev) > 3
                    && adjacency.valence(v_op) == 3
                    && adjacency.valence(v_next) > 3
                {
                    let any_on_boundary = [v_prev, v_op, v_next].iter().any(|v2| {
                        class_of(patch, *v2).is_some_and(|c| c != EntityClass::Surface)
                    });
                    if any_on_boundary {
                        continue;
                    }
                    quads = vec![*q];
                    grow_around_quad = true;
                    break 'search;
                }
            }
        }
        if !grow_around_quad {
            return None;
        }
    }

    if quads.len() == 1 && vs != EntityClass::Surface && ideal >= 2 {
        grow_around_quad = true;
    }

    if grow_around_quad {
        let seed = *quads.first()?;
        let quad = patch.quad(seed)?;
        let mut set: HashSet<QuadId> = quads.iter().copied().collect();
        for v2 in quad.vertices {
            for q2 in adjacency.quads_of(v2) {
                if set.insert(*q2) {
                    quads.push(*q2);
                }
            }
        }
    }

    Some((ideal, quads))
}

/// Ideal valence and admissible range for each cavity boundary vertex.
///
/// `vs` is the class of the defect being repaired; repairing a corner or
/// curve defect is allowed to degrade interior vertices more. Boundary
/// vertices entirely inside the cavity keep their ideal valence as a hard
/// constraint; CAD corners are always pinned to a single quad.
fn boundary_signature(
    patch: &SurfacePatch,
    adjacency: &QuadAdjacency,
    angles: &HashMap<VertexId, f64>,
    bnd: &[VertexId],
    cavity: &HashSet<QuadId>,
    vs: EntityClass,
) -> Option<(Vec<i32>, Vec<(i32, i32)>)> {
    let mut ideal = Vec::with_capacity(bnd.len());
    let mut allowed = Vec::with_capacity(bnd.len());
    for bv in bnd {
        let bvs = class_of(patch, *bv)?;
        let bival = match bvs {
            EntityClass::Corner => angle_ideal_valence(*bv, angles),
            EntityClass::Curve => 2,
            EntityClass::Surface => 4,
        };
        let exterior = adjacency
            .quads_of(*bv)
            .iter()
            .filter(|q| !cavity.contains(*q))
            .count() as i32;
        ideal.push(bival - exterior);
        let range = if exterior == 0 {
            (bival, bival)
        } else {
            match bvs {
                EntityClass::Corner => (1, 1),
                EntityClass::Curve => {
                    if vs == EntityClass::Corner {
                        (1, 2)
                    } else {
                        (1, 1)
                    }
                }
                EntityClass::Surface => {
                    if vs != EntityClass::Surface {
                        // A temporary duet (exterior 1, new valence 1) is
                        // allowed and re-queued at maximum priority.
                        match exterior {
                            1 => (1, 6),
                            2 => (1, 5),
                            3 => (1, 4),
                            4 => (1, 3),
                            5 => (1, 2),
                            _ => (1, 1),
                        }
                    } else {
                        match exterior {
                            1 => (1, 4),
                            2 => (1, 3),
                            3 => (1, 2),
                            _ => (1, 1),
                        }
                    }
                }
            }
        };
        allowed.push(range);
    }
    Some((ideal, allowed))
}

/// Irregularity energy of a cavity quadrangulation.
///
/// `bnd_valence[i]` counts cavity quads at boundary vertex `i`,
/// `interior_valence` the quads at each strictly interior vertex. Hard
/// range violations and interior valences above 5 get a large penalty.
fn cavity_energy(
    bnd_valence: &[i32],
    bnd_ideal: &[i32],
    bnd_allowed: &[(i32, i32)],
    interior_valence: &[i32],
) -> f64 {
    let mut energy = 0.0;
    for i in 0..bnd_valence.len() {
        let val = bnd_valence[i];
        energy += f64::from(val - bnd_ideal[i]).powi(2);
        let (lo, hi) = bnd_allowed[i];
        if lo == hi && val != lo {
            energy += 1000.0 * f64::from(val - lo).abs();
        }
    }
    for val in interior_valence {
        energy += f64::from(val - 4).powi(2);
        if *val > 5 {
            energy += 1000.0 * f64::from(val - 5);
        }
    }
    energy
}

fn seed_queue(
    pass: EntityClass,
    patch: &SurfacePatch,
    adjacency: &QuadAdjacency,
    angles: &HashMap<VertexId, f64>,
    queue: &mut BinaryHeap<DefectEntry>,
) {
    for v in adjacency.vertices() {
        if class_of(patch, v) != Some(pass) {
            continue;
        }
        let priority = queue_priority(patch, adjacency, angles, v, pass);
        queue.push(DefectEntry {
            priority,
            vertex: v,
        });
    }
}

/// Remove small valence defects from the patch.
///
/// Runs the corner, curve and interior passes, applies a final Winslow
/// relaxation when anything changed, and reports what was fixed and what
/// remains.
pub fn remesh_small_defects(
    patch: &mut SurfacePatch,
    geometry: &dyn SurfaceGeometry,
) -> QuadMeshResult<DefectRepairOutcome> {
    let quads_in = patch.quad_count();
    debug!(
        patch = patch.tag(),
        quads = quads_in,
        "removing small quad mesh defects"
    );

    let mut adjacency = QuadAdjacency::from_patch(patch);
    let angles = vertex_angles(patch);
    let mut fixed = [0usize; 3];

    for pass in [EntityClass::Corner, EntityClass::Curve, EntityClass::Surface] {
        let mut queue: BinaryHeap<DefectEntry> = BinaryHeap::new();
        seed_queue(pass, patch, &adjacency, &angles, &mut queue);

        while let Some(entry) = queue.pop() {
            let v = entry.vertex;
            if !adjacency.contains(v) || !patch.contains_vertex(v) {
                continue;
            }
            let Some((_, cavity_quads)) =
                remeshable_vertex_properties(patch, &adjacency, &angles, v)
            else {
                continue;
            };
            let vs = match class_of(patch, v) {
                Some(vs) => vs,
                None => continue,
            };

            let mut corners: Vec<(QuadId, [VertexId; 4])> =
                Vec::with_capacity(cavity_quads.len());
            for q in &cavity_quads {
                match patch.quad(*q) {
                    Some(quad) => corners.push((*q, quad.vertices)),
                    None => continue,
                }
            }
            let corner_arrays: Vec<[VertexId; 4]> =
                corners.iter().map(|(_, c)| *c).collect();
            let Some(bnd) = boundary_loop(&corner_arrays) else {
                warn!(vertex = %v, "failed to build a boundary loop around defect");
                continue;
            };
            if bnd.len() < 4 {
                continue;
            }

            let cavity_set: HashSet<QuadId> = cavity_quads.iter().copied().collect();
            let Some((bnd_ideal, bnd_allowed)) =
                boundary_signature(patch, &adjacency, &angles, &bnd, &cavity_set, vs)
            else {
                continue;
            };

            let bnd_set: HashSet<VertexId> = bnd.iter().copied().collect();
            let mut inside: Vec<VertexId> = Vec::new();
            let mut seen: HashSet<VertexId> = HashSet::new();
            for (_, quad) in &corners {
                for v2 in quad {
                    if !bnd_set.contains(v2) && seen.insert(*v2) {
                        inside.push(*v2);
                    }
                }
            }

            let Some(disk) = remesh_few_quads(&bnd_ideal, &bnd_allowed) else {
                debug!(
                    vertex = %v,
                    boundary = bnd.len(),
                    quads = cavity_quads.len(),
                    "no disk quadrangulation fits the cavity"
                );
                continue;
            };

            // A duet swap always goes through; the valence-2 vertex it
            // removes is worse than anything the pattern introduces.
            let duet = vs == EntityClass::Surface
                && bnd.len() == 4
                && cavity_quads.len() == 2
                && disk.quads.len() != 2;
            if !duet {
                let bnd_valence_before: Vec<i32> = bnd
                    .iter()
                    .map(|bv| {
                        corners
                            .iter()
                            .filter(|(_, c)| c.contains(bv))
                            .count() as i32
                    })
                    .collect();
                let inside_valence: Vec<i32> = inside
                    .iter()
                    .map(|iv| {
                        corners
                            .iter()
                            .filter(|(_, c)| c.contains(iv))
                            .count() as i32
                    })
                    .collect();
                let energy_before = cavity_energy(
                    &bnd_valence_before,
                    &bnd_ideal,
                    &bnd_allowed,
                    &inside_valence,
                );

                let mut bnd_valence_after = vec![0i32; bnd.len()];
                let mut interior_valence_after = vec![0i32; disk.interior_count];
                for quad in &disk.quads {
                    for dv in quad {
                        match dv {
                            DiskVertex::Boundary(i) => bnd_valence_after[*i] += 1,
                            DiskVertex::Interior(k) => interior_valence_after[*k] += 1,
                        }
                    }
                }
                let energy_after = cavity_energy(
                    &bnd_valence_after,
                    &bnd_ideal,
                    &bnd_allowed,
                    &interior_valence_after,
                );
                if energy_after >= energy_before {
                    debug!(
                        energy_before,
                        energy_after, "disk quadrangulation rejected, energy would not decrease"
                    );
                    continue;
                }
            }

            // New interior vertices start at the boundary centroid and get
            // moved by the final smoothing.
            let mut centroid = Point3::origin();
            for bv in &bnd {
                if let Some(p) = patch.position(*bv) {
                    centroid += p.coords / bnd.len() as f64;
                }
            }
            let mut new_vertices = Vec::with_capacity(disk.interior_count);
            for _ in 0..disk.interior_count {
                let p = if geometry.is_planar() {
                    centroid
                } else {
                    geometry
                        .closest_point(centroid)
                        .map(|proj| proj.point)
                        .unwrap_or(centroid)
                };
                new_vertices.push(MeshVertex::new(p));
            }
            let new_quads: Vec<[SpliceVertex; 4]> = disk
                .quads
                .iter()
                .map(|quad| {
                    quad.map(|dv| match dv {
                        DiskVertex::Boundary(i) => SpliceVertex::Existing(bnd[i]),
                        DiskVertex::Interior(k) => SpliceVertex::New(k),
                    })
                })
                .collect();
            let splice = MeshSplice {
                new_vertices,
                new_quads,
                removed_quads: cavity_quads.clone(),
                removed_vertices: inside.clone(),
            };
            let outcome = match patch.apply_splice(splice) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(vertex = %v, error = %err, "defect splice rejected");
                    continue;
                }
            };

            for (q, c) in &corners {
                adjacency.remove_quad(*q, &crate::types::Quad::new(*c));
            }
            for iv in &inside {
                adjacency.remove_vertex(*iv);
            }
            for q in &outcome.quads {
                if let Some(quad) = patch.quad(*q) {
                    adjacency.add_quad(*q, quad);
                }
            }

            // Duets left on the boundary are dealt with before anything else.
            for bv in &bnd {
                if class_of(patch, *bv) == Some(EntityClass::Surface)
                    && adjacency.valence(*bv) == 2
                {
                    queue.push(DefectEntry {
                        priority: f64::MAX,
                        vertex: *bv,
                    });
                }
            }

            for q in &outcome.quads {
                let Some(quad) = patch.quad(*q) else { continue };
                for v2 in quad.vertices {
                    if class_of(patch, v2) != Some(pass) {
                        continue;
                    }
                    let priority = queue_priority(patch, &adjacency, &angles, v2, pass);
                    if priority > 0.0 {
                        queue.push(DefectEntry {
                            priority,
                            vertex: v2,
                        });
                    }
                }
            }

            let pass_index = match pass {
                EntityClass::Corner => 0,
                EntityClass::Curve => 1,
                EntityClass::Surface => 2,
            };
            fixed[pass_index] += 1;

            if queue.is_empty() {
                seed_queue(pass, patch, &adjacency, &angles, &mut queue);
            }
        }
    }

    let total = fixed.iter().sum::<usize>();
    if total > 0 {
        info!(
            patch = patch.tag(),
            corner = fixed[0],
            curve = fixed[1],
            interior = fixed[2],
            quads_in,
            quads_out = patch.quad_count(),
            "remeshed small defects"
        );
        smooth_winslow(patch, geometry, 10)?;
    }

    let mut residual = 0usize;
    for v in adjacency.vertices() {
        let Some(vs) = class_of(patch, v) else { continue };
        let val = adjacency.valence(v);
        let defect = match vs {
            EntityClass::Corner => val as i32 != angle_ideal_valence(v, &angles),
            EntityClass::Curve => val != 2,
            EntityClass::Surface => val <= 2 || val > 5,
        };
        if defect {
            debug!(vertex = %v, valence = val, "residual defect");
            residual += 1;
        }
    }

    Ok(DefectRepairOutcome {
        corner_defects_fixed: fixed[0],
        curve_defects_fixed: fixed[1],
        surface_defects_fixed: fixed[2],
        residual_defects: residual,
    })
}
