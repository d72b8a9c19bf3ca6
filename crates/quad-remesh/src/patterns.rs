//! Quad pattern library.
//!
//! Two families of templates are provided:
//!
//! - Patch patterns for remeshing a grown cavity with 3, 4 or 5 sides:
//!   a transfinite grid for four sides, and a fan of transfinite blocks
//!   around one central irregular vertex for three or five sides. Side
//!   subdivision feasibility reduces to a small linear system on the chord
//!   lengths.
//! - Disk quadrangulations for small defect cavities: a fixed table of
//!   quadrangulations of the disk with 4 to 12 boundary edges and up to
//!   two interior vertices, matched by rotation against per-vertex valence
//!   constraints.

use nalgebra::Point3;

use crate::error::{QuadMeshError, QuadMeshResult};
use crate::geometry::SurfaceGeometry;

/// Template selected for a cavity.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    /// Four-sided cavity, transfinite grid, no irregular vertex.
    RegularGrid,
    /// Three- or five-sided cavity, fan of blocks around a central vertex.
    /// `chords[k]` is the number of edges on the chord from the center to
    /// the midpoint node of side `k`.
    CentralFan { chords: Vec<usize> },
}

/// A feasible pattern with its irregularity score.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// Squared valence deviation of the irregular vertices the pattern
    /// introduces; 0 for the regular grid.
    pub irregularity: f64,
}

/// Whether a cavity with the given side point counts admits a pattern.
///
/// `side_npts[i]` counts boundary points on side `i`, corners included, so a
/// side with `n` edges has `n + 1` points. Only 3, 4 and 5 sided cavities
/// are supported.
pub fn patch_is_remeshable(n_corners: usize, side_npts: &[usize]) -> Option<PatternMatch> {
    if side_npts.len() != n_corners {
        return None;
    }
    let mut l = Vec::with_capacity(n_corners);
    for npts in side_npts {
        if *npts < 2 {
            return None;
        }
        l.push(npts - 1);
    }
    match n_corners {
        4 => {
            if l[0] == l[2] && l[1] == l[3] {
                Some(PatternMatch {
                    kind: PatternKind::RegularGrid,
                    irregularity: 0.0,
                })
            } else {
                None
            }
        }
        3 => {
            // Each side splits as x[i-1] + x[i+1] around the central vertex.
            let total: usize = l.iter().sum();
            if total % 2 != 0 {
                return None;
            }
            let half = total / 2;
            let mut chords = Vec::with_capacity(3);
            for li in &l {
                if half <= *li {
                    return None;
                }
                chords.push(half - li);
            }
            Some(PatternMatch {
                kind: PatternKind::CentralFan { chords },
                irregularity: 1.0,
            })
        }
        5 => {
            let total: usize = l.iter().sum();
            if total % 2 != 0 {
                return None;
            }
            let mut chords = Vec::with_capacity(5);
            for i in 0..5 {
                // x_i = (l_i + l_{i+1} - l_{i+2} - l_{i+3} + l_{i+4}) / 2
                let pos = l[i] + l[(i + 1) % 5] + l[(i + 4) % 5];
                let neg = l[(i + 2) % 5] + l[(i + 3) % 5];
                if pos <= neg || (pos - neg) % 2 != 0 {
                    return None;
                }
                chords.push((pos - neg) / 2);
            }
            // Consistency: l_i = x_{i-1} + x_{i+1}.
            for i in 0..5 {
                if chords[(i + 4) % 5] + chords[(i + 1) % 5] != l[i] {
                    return None;
                }
            }
            Some(PatternMatch {
                kind: PatternKind::CentralFan { chords },
                irregularity: 1.0,
            })
        }
        _ => None,
    }
}

/// Vertex reference in an instantiated pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternVertex {
    /// Point `index` on boundary side `side`. Shared corners may be
    /// referenced through either adjacent side.
    Boundary { side: usize, index: usize },
    /// Index into [`PatternOutput::interior_positions`].
    Interior(usize),
}

/// Geometry and topology of an instantiated pattern.
#[derive(Debug, Clone)]
pub struct PatternOutput {
    pub interior_positions: Vec<Point3<f64>>,
    /// Parallel to `interior_positions`; true for the central fan vertex.
    pub interior_irregular: Vec<bool>,
    pub quads: Vec<[PatternVertex; 4]>,
}

struct PatternBuilder {
    interior_positions: Vec<Point3<f64>>,
    interior_irregular: Vec<bool>,
    quads: Vec<[PatternVertex; 4]>,
}

type ChainNode = (PatternVertex, Point3<f64>);

impl PatternBuilder {
    fn new() -> Self {
        Self {
            interior_positions: Vec::new(),
            interior_irregular: Vec::new(),
            quads: Vec::new(),
        }
    }

    fn interior(&mut self, p: Point3<f64>, irregular: bool) -> ChainNode {
        let idx = self.interior_positions.len();
        self.interior_positions.push(p);
        self.interior_irregular.push(irregular);
        (PatternVertex::Interior(idx), p)
    }

    /// Fill a transfinite block bounded by four chains.
    ///
    /// `bottom` and `top` run left to right, `left` and `right` bottom to
    /// top; the chains share their corner nodes. Interior points use Coons
    /// interpolation of the chains.
    fn transfinite_block(
        &mut self,
        bottom: &[ChainNode],
        right: &[ChainNode],
        top: &[ChainNode],
        left: &[ChainNode],
    ) {
        let nx = bottom.len() - 1;
        let ny = right.len() - 1;
        debug_assert_eq!(top.len(), nx + 1);
        debug_assert_eq!(left.len(), ny + 1);
        let mut grid: Vec<ChainNode> = vec![bottom[0]; (nx + 1) * (ny + 1)];
        for i in 0..=nx {
            grid[i] = bottom[i];
            grid[ny * (nx + 1) + i] = top[i];
        }
        for j in 0..=ny {
            grid[j * (nx + 1)] = left[j];
            grid[j * (nx + 1) + nx] = right[j];
        }
        let p00 = bottom[0].1.coords;
        let p10 = bottom[nx].1.coords;
        let p01 = top[0].1.coords;
        let p11 = top[nx].1.coords;
        for j in 1..ny {
            let v = j as f64 / ny as f64;
            for i in 1..nx {
                let u = i as f64 / nx as f64;
                let edge = (1.0 - u) * left[j].1.coords
                    + u * right[j].1.coords
                    + (1.0 - v) * bottom[i].1.coords
                    + v * top[i].1.coords;
                let corner = (1.0 - u) * (1.0 - v) * p00
                    + u * (1.0 - v) * p10
                    + u * v * p11
                    + (1.0 - u) * v * p01;
                let node = self.interior(Point3::from(edge - corner), false);
                grid[j * (nx + 1) + i] = node;
            }
        }
        for j in 0..ny {
            for i in 0..nx {
                self.quads.push([
                    grid[j * (nx + 1) + i].0,
                    grid[j * (nx + 1) + i + 1].0,
                    grid[(j + 1) * (nx + 1) + i + 1].0,
                    grid[(j + 1) * (nx + 1) + i].0,
                ]);
            }
        }
    }
}

/// Instantiate a pattern on the cavity boundary.
///
/// `sides[i]` holds the boundary point positions of side `i` in loop order,
/// with `sides[i]` ending on the corner that starts `sides[i + 1]`. The
/// optional `center` seats the central fan vertex. Interior positions come
/// from transfinite interpolation, projected back onto `geometry` when it is
/// curved; they are rough and expected to be smoothed afterwards.
pub fn remesh_patch(
    geometry: &dyn SurfaceGeometry,
    sides: &[Vec<Point3<f64>>],
    pattern: &PatternMatch,
    center: Option<Point3<f64>>,
) -> QuadMeshResult<PatternOutput> {
    let mut output = instantiate(sides, pattern, center)?;
    if !geometry.is_planar() {
        for p in &mut output.interior_positions {
            if let Some(proj) = geometry.closest_point(*p) {
                *p = proj.point;
            }
        }
    }
    Ok(output)
}

fn instantiate(
    sides: &[Vec<Point3<f64>>],
    pattern: &PatternMatch,
    center: Option<Point3<f64>>,
) -> QuadMeshResult<PatternOutput> {
    let bnd =
        |side: usize, index: usize| (PatternVertex::Boundary { side, index }, sides[side][index]);
    match &pattern.kind {
        PatternKind::RegularGrid => {
            if sides.len() != 4 {
                return Err(QuadMeshError::pattern_instantiation_failed(format!(
                    "grid pattern on {} sides",
                    sides.len()
                )));
            }
            let l0 = sides[0].len() - 1;
            let l1 = sides[1].len() - 1;
            if sides[2].len() - 1 != l0 || sides[3].len() - 1 != l1 {
                return Err(QuadMeshError::pattern_instantiation_failed(
                    "opposite sides of grid pattern differ",
                ));
            }
            let mut builder = PatternBuilder::new();
            let bottom: Vec<ChainNode> = (0..=l0).map(|i| bnd(0, i)).collect();
            let right: Vec<ChainNode> = (0..=l1).map(|j| bnd(1, j)).collect();
            let top: Vec<ChainNode> = (0..=l0).map(|i| bnd(2, l0 - i)).collect();
            let left: Vec<ChainNode> = (0..=l1).map(|j| bnd(3, l1 - j)).collect();
            builder.transfinite_block(&bottom, &right, &top, &left);
            Ok(PatternOutput {
                interior_positions: builder.interior_positions,
                interior_irregular: builder.interior_irregular,
                quads: builder.quads,
            })
        }
        PatternKind::CentralFan { chords } => {
            let n = sides.len();
            if chords.len() != n {
                return Err(QuadMeshError::pattern_instantiation_failed(format!(
                    "fan pattern with {} chords on {} sides",
                    chords.len(),
                    n
                )));
            }
            for k in 0..n {
                let lk = sides[k].len() - 1;
                if chords[(k + n - 1) % n] + chords[(k + 1) % n] != lk {
                    return Err(QuadMeshError::pattern_instantiation_failed(format!(
                        "side {} has {} edges, chords require {}",
                        k,
                        lk,
                        chords[(k + n - 1) % n] + chords[(k + 1) % n]
                    )));
                }
            }
            let center_pos = center.unwrap_or_else(|| {
                let sum = sides
                    .iter()
                    .fold(nalgebra::Vector3::zeros(), |acc, s| acc + s[0].coords);
                Point3::from(sum / n as f64)
            });
            let mut builder = PatternBuilder::new();
            let center_node = builder.interior(center_pos, true);
            // Chord k runs from the center to the mid node of side k, which
            // sits chords[k-1] points after the side's first corner.
            let mut chord_chains: Vec<Vec<ChainNode>> = Vec::with_capacity(n);
            for k in 0..n {
                let xk = chords[k];
                let a_k = chords[(k + n - 1) % n];
                let mid = sides[k][a_k];
                let mut chain = Vec::with_capacity(xk + 1);
                chain.push(center_node);
                for t in 1..xk {
                    let f = t as f64 / xk as f64;
                    let p = Point3::from(
                        (1.0 - f) * center_pos.coords + f * mid.coords,
                    );
                    let node = builder.interior(p, false);
                    chain.push(node);
                }
                chain.push(bnd(k, a_k));
                chord_chains.push(chain);
            }
            for k in 0..n {
                let k1 = (k + 1) % n;
                let a_k = chords[(k + n - 1) % n];
                let lk = sides[k].len() - 1;
                let bottom: Vec<ChainNode> = (a_k..=lk).map(|i| bnd(k, i)).collect();
                let right: Vec<ChainNode> = (0..=chords[k]).map(|j| bnd(k1, j)).collect();
                let top = chord_chains[k1].clone();
                let left: Vec<ChainNode> = chord_chains[k].iter().rev().copied().collect();
                builder.transfinite_block(&bottom, &right, &top, &left);
            }
            Ok(PatternOutput {
                interior_positions: builder.interior_positions,
                interior_irregular: builder.interior_irregular,
                quads: builder.quads,
            })
        }
    }
}

/// Vertex reference in a disk quadrangulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskVertex {
    /// Position on the cavity boundary loop.
    Boundary(usize),
    /// New interior vertex.
    Interior(usize),
}

/// A disk quadrangulation matched against a defect cavity.
#[derive(Debug, Clone)]
pub struct DiskRemesh {
    pub quads: Vec<[DiskVertex; 4]>,
    pub interior_count: usize,
    /// Squared deviation from the ideal per-vertex valences.
    pub energy: f64,
}

struct DiskPattern {
    boundary: usize,
    interior: usize,
    /// Values below `boundary` are boundary loop positions, the rest are
    /// interior vertices offset by `boundary`.
    quads: &'static [[u8; 4]],
}

/// Quadrangulations of the disk with up to twelve boundary edges and two
/// interior vertices, boundary in counter-clockwise order.
///
/// The ten and twelve sided entries serve the larger defect cavities: the
/// four-quad fan at a curve vertex and the six-quad fan at an interior
/// vertex. The last twelve sided entry splits a valence six vertex into two
/// regular interior vertices.
static DISK_PATTERNS: &[DiskPattern] = &[
    DiskPattern {
        boundary: 4,
        interior: 0,
        quads: &[[0, 1, 2, 3]],
    },
    DiskPattern {
        boundary: 6,
        interior: 0,
        quads: &[[0, 1, 2, 3], [0, 3, 4, 5]],
    },
    DiskPattern {
        boundary: 6,
        interior: 1,
        quads: &[[0, 1, 2, 6], [2, 3, 4, 6], [4, 5, 0, 6]],
    },
    DiskPattern {
        boundary: 8,
        interior: 0,
        quads: &[[0, 1, 6, 7], [1, 2, 5, 6], [2, 3, 4, 5]],
    },
    DiskPattern {
        boundary: 8,
        interior: 1,
        quads: &[[0, 1, 2, 8], [2, 3, 4, 8], [4, 5, 6, 8], [6, 7, 0, 8]],
    },
    DiskPattern {
        boundary: 8,
        interior: 2,
        quads: &[
            [0, 1, 2, 8],
            [2, 3, 9, 8],
            [3, 4, 5, 9],
            [5, 6, 7, 9],
            [7, 0, 8, 9],
        ],
    },
    DiskPattern {
        boundary: 10,
        interior: 0,
        quads: &[[0, 1, 8, 9], [1, 2, 7, 8], [2, 3, 6, 7], [3, 4, 5, 6]],
    },
    DiskPattern {
        boundary: 10,
        interior: 1,
        quads: &[
            [0, 1, 2, 10],
            [2, 3, 4, 10],
            [4, 5, 6, 10],
            [6, 7, 8, 10],
            [8, 9, 0, 10],
        ],
    },
    DiskPattern {
        boundary: 10,
        interior: 2,
        quads: &[
            [0, 1, 2, 10],
            [8, 9, 0, 10],
            [10, 2, 3, 11],
            [3, 4, 5, 11],
            [5, 6, 7, 11],
            [7, 8, 10, 11],
        ],
    },
    DiskPattern {
        boundary: 12,
        interior: 0,
        quads: &[
            [0, 1, 10, 11],
            [1, 2, 9, 10],
            [2, 3, 8, 9],
            [3, 4, 7, 8],
            [4, 5, 6, 7],
        ],
    },
    DiskPattern {
        boundary: 12,
        interior: 2,
        quads: &[
            [0, 1, 2, 12],
            [2, 3, 4, 12],
            [4, 5, 6, 12],
            [6, 7, 8, 13],
            [8, 9, 10, 13],
            [10, 11, 0, 13],
            [12, 6, 13, 0],
        ],
    },
];

/// Match a disk quadrangulation against a defect cavity boundary.
///
/// `bnd_ideal[i]` is the ideal number of new quads at boundary vertex `i`
/// and `bnd_allowed[i]` the admissible range. All rotations of all table
/// entries with the right boundary size are scored; the lowest-energy
/// admissible one wins. `None` when nothing fits.
pub fn remesh_few_quads(bnd_ideal: &[i32], bnd_allowed: &[(i32, i32)]) -> Option<DiskRemesh> {
    let b = bnd_ideal.len();
    if b != bnd_allowed.len() || b < 4 {
        return None;
    }
    let mut best: Option<DiskRemesh> = None;
    for pattern in DISK_PATTERNS {
        if pattern.boundary != b {
            continue;
        }
        let mut bnd_valence = vec![0i32; b];
        let mut int_valence = vec![0i32; pattern.interior];
        for quad in pattern.quads {
            for v in quad {
                let v = *v as usize;
                if v < b {
                    bnd_valence[v] += 1;
                } else {
                    int_valence[v - b] += 1;
                }
            }
        }
        'rotations: for r in 0..b {
            let mut energy = 0.0;
            for p in 0..b {
                let target = (p + r) % b;
                let val = bnd_valence[p];
                let (lo, hi) = bnd_allowed[target];
                if val < lo || val > hi {
                    continue 'rotations;
                }
                energy += f64::from(val - bnd_ideal[target]).powi(2);
            }
            for val in &int_valence {
                energy += f64::from(val - 4).powi(2);
            }
            if best.as_ref().map_or(true, |b| energy < b.energy) {
                let quads = pattern
                    .quads
                    .iter()
                    .map(|quad| {
                        quad.map(|v| {
                            let v = v as usize;
                            if v < b {
                                DiskVertex::Boundary((v + r) % b)
                            } else {
                                DiskVertex::Interior(v - b)
                            }
                        })
                    })
                    .collect();
                best = Some(DiskRemesh {
                    quads,
                    interior_count: pattern.interior,
                    energy,
                });
            }
        }
    }
    best
}
