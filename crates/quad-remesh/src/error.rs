//! Error types for quad remeshing operations with rich diagnostics.
//!
//! This module provides comprehensive error handling with:
//! - Machine-readable error codes for programmatic handling
//! - Rich context (which patch, which edge, what went wrong)
//! - Recovery suggestions for common issues
//! - Terminal-friendly display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `QMESH-XXXX`:
//! - `QMESH-1xxx`: Construction errors (patch data, half-edge connectivity)
//! - `QMESH-2xxx`: Cavity errors (seeding, boundary extraction)
//! - `QMESH-3xxx`: Remeshing errors (patterns, defect repair, smoothing)
//!
//! # Example
//!
//! ```rust,ignore
//! use quad_remesh::{QuadMeshError, ErrorCode};
//!
//! let err = QuadMeshError::non_manifold_edge(0, 12, 17, 3);
//! println!("Error code: {}", err.code()); // QMESH-1001
//! println!("Recovery: {:?}", err.recovery_suggestion());
//! ```

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for quad remeshing operations.
pub type QuadMeshResult<T> = Result<T, QuadMeshError>;

/// Machine-readable error codes for remeshing operations.
///
/// Codes follow the pattern `QMESH-XXXX` where:
/// - 1xxx = construction errors
/// - 2xxx = cavity errors
/// - 3xxx = remeshing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Construction errors (1xxx)
    /// QMESH-1001: Edge shared by more than two quads
    NonManifoldEdge = 1001,
    /// QMESH-1002: Quad references a missing or repeated vertex
    InvalidQuad = 1002,
    /// QMESH-1003: Patch has no vertices or quads
    EmptyPatch = 1003,
    /// QMESH-1004: Identifier points at a deleted or recycled slot
    StaleReference = 1004,

    // Cavity errors (2xxx)
    /// QMESH-2001: Cavity boundary is not a single closed loop
    MalformedCavityBoundary = 2001,
    /// QMESH-2002: Cavity seed selects no quads
    EmptySeed = 2002,

    // Remeshing errors (3xxx)
    /// QMESH-3001: Pattern could not be instantiated on the cavity
    PatternInstantiationFailed = 3001,
    /// QMESH-3002: Defect repair pass failed
    RepairFailed = 3002,
    /// QMESH-3003: Smoothing stencil construction failed
    SmoothingFailed = 3003,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `QMESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NonManifoldEdge => "QMESH-1001",
            ErrorCode::InvalidQuad => "QMESH-1002",
            ErrorCode::EmptyPatch => "QMESH-1003",
            ErrorCode::StaleReference => "QMESH-1004",
            ErrorCode::MalformedCavityBoundary => "QMESH-2001",
            ErrorCode::EmptySeed => "QMESH-2002",
            ErrorCode::PatternInstantiationFailed => "QMESH-3001",
            ErrorCode::RepairFailed => "QMESH-3002",
            ErrorCode::SmoothingFailed => "QMESH-3003",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for remeshing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input mesh for the listed problems before retrying.
    CheckInputMesh { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Skip the affected patch and continue with the rest.
    SkipPatch { description: String },
    /// Rebuild derived structures from the patch before retrying.
    RebuildConnectivity,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInputMesh { checks } => {
                write!(f, "Check the input mesh for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::SkipPatch { description } => {
                write!(f, "{}", description)
            }
            RecoverySuggestion::RebuildConnectivity => {
                write!(f, "Rebuild the half-edge connectivity from the patch and retry")
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Location information for remeshing errors.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex { index: usize },
    /// Error at a specific quad.
    Quad {
        index: usize,
        vertices: Option<[u32; 4]>,
    },
    /// Error at an edge between two vertices.
    Edge { vertex_a: usize, vertex_b: usize },
    /// Error in a whole patch.
    Patch { tag: u32 },
    /// No specific location.
    Unknown,
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {}", index),
            MeshLocation::Quad { index, vertices } => {
                if let Some([a, b, c, d]) = vertices {
                    write!(f, "quad {} with vertices [{}, {}, {}, {}]", index, a, b, c, d)
                } else {
                    write!(f, "quad {}", index)
                }
            }
            MeshLocation::Edge { vertex_a, vertex_b } => {
                write!(f, "edge between vertices {} and {}", vertex_a, vertex_b)
            }
            MeshLocation::Patch { tag } => write!(f, "patch {}", tag),
            MeshLocation::Unknown => write!(f, "unknown location"),
        }
    }
}

/// Errors that can occur during quad remeshing.
///
/// Each error variant includes:
/// - A human-readable message
/// - A machine-readable error code
/// - Optional location information
/// - Recovery suggestions when available
#[derive(Debug, Error, Diagnostic)]
pub enum QuadMeshError {
    /// Edge shared by more than two quads.
    #[error(
        "non-manifold edge ({vertex_a}, {vertex_b}) in patch {patch_tag}: shared by {quad_count} quads"
    )]
    #[diagnostic(
        code(qmesh::build::non_manifold),
        help(
            "Quad remeshing requires manifold connectivity. Split the patch along the offending edge or fix the source mesh."
        )
    )]
    NonManifoldEdge {
        patch_tag: u32,
        vertex_a: usize,
        vertex_b: usize,
        quad_count: usize,
    },

    /// Quad references a missing or repeated vertex.
    #[error("invalid quad: {details}")]
    #[diagnostic(
        code(qmesh::build::invalid_quad),
        help("Every quad must reference four distinct live vertices of its patch.")
    )]
    InvalidQuad { details: String },

    /// Patch has no usable geometry.
    #[error("patch {patch_tag} is empty: {details}")]
    #[diagnostic(
        code(qmesh::build::empty_patch),
        help("The patch must contain at least one quad before remeshing.")
    )]
    EmptyPatch { patch_tag: u32, details: String },

    /// Identifier points at a deleted or recycled slot.
    #[error("stale reference: {details}")]
    #[diagnostic(
        code(qmesh::build::stale_reference),
        help(
            "The identifier was issued for an element that has since been deleted. Re-query the patch instead of caching identifiers across splices."
        )
    )]
    StaleReference { details: String },

    /// Cavity boundary is not a single closed loop.
    #[error("malformed cavity boundary: {details}")]
    #[diagnostic(
        code(qmesh::cavity::malformed_boundary),
        help(
            "The selected quads must form a disk whose boundary is one closed loop of at least three half-edges."
        )
    )]
    MalformedCavityBoundary { details: String },

    /// Cavity seed selects no quads.
    #[error("empty cavity seed: {details}")]
    #[diagnostic(
        code(qmesh::cavity::empty_seed),
        help("Seed the cavity with at least one quad adjacent to the targeted vertex.")
    )]
    EmptySeed { details: String },

    /// Pattern could not be instantiated on the cavity.
    #[error("pattern instantiation failed: {details}")]
    #[diagnostic(
        code(qmesh::remesh::pattern),
        help(
            "Side subdivision counts did not admit a quad pattern. Grow the cavity further or leave it for a later pass."
        )
    )]
    PatternInstantiationFailed { details: String },

    /// Defect repair pass failed.
    #[error("defect repair failed: {details}")]
    #[diagnostic(
        code(qmesh::remesh::repair),
        help("Run the repair passes individually to identify the failing defect.")
    )]
    RepairFailed { details: String },

    /// Smoothing stencil construction failed.
    #[error("smoothing failed: {details}")]
    #[diagnostic(
        code(qmesh::remesh::smoothing),
        help(
            "Smoothing requires each free vertex to have a closed one-ring of quads. Exclude boundary or non-manifold vertices from the free set."
        )
    )]
    SmoothingFailed { details: String },
}

impl QuadMeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            QuadMeshError::NonManifoldEdge { .. } => ErrorCode::NonManifoldEdge,
            QuadMeshError::InvalidQuad { .. } => ErrorCode::InvalidQuad,
            QuadMeshError::EmptyPatch { .. } => ErrorCode::EmptyPatch,
            QuadMeshError::StaleReference { .. } => ErrorCode::StaleReference,
            QuadMeshError::MalformedCavityBoundary { .. } => ErrorCode::MalformedCavityBoundary,
            QuadMeshError::EmptySeed { .. } => ErrorCode::EmptySeed,
            QuadMeshError::PatternInstantiationFailed { .. } => {
                ErrorCode::PatternInstantiationFailed
            }
            QuadMeshError::RepairFailed { .. } => ErrorCode::RepairFailed,
            QuadMeshError::SmoothingFailed { .. } => ErrorCode::SmoothingFailed,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            QuadMeshError::NonManifoldEdge { .. } => RecoverySuggestion::CheckInputMesh {
                checks: vec![
                    "edges shared by more than two quads".into(),
                    "duplicated quads".into(),
                ],
            },
            QuadMeshError::InvalidQuad { .. } => RecoverySuggestion::CheckInputMesh {
                checks: vec![
                    "vertex references".into(),
                    "degenerate quads".into(),
                ],
            },
            QuadMeshError::EmptyPatch { .. } => RecoverySuggestion::SkipPatch {
                description: "Skip the empty patch; there is nothing to remesh".into(),
            },
            QuadMeshError::StaleReference { .. } => RecoverySuggestion::RebuildConnectivity,
            QuadMeshError::MalformedCavityBoundary { .. } => RecoverySuggestion::RebuildConnectivity,
            QuadMeshError::EmptySeed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![("seed".into(), "use the quads adjacent to the vertex".into())],
            },
            QuadMeshError::PatternInstantiationFailed { .. } => {
                RecoverySuggestion::AdjustParameters {
                    parameters: vec![(
                        "growth".into(),
                        "grow the cavity until the side counts match a pattern".into(),
                    )],
                }
            }
            QuadMeshError::RepairFailed { .. } => RecoverySuggestion::SkipPatch {
                description: "Leave the defect in place; later passes may still reduce it".into(),
            },
            QuadMeshError::SmoothingFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![(
                    "free_vertices".into(),
                    "restrict to interior vertices with closed one-rings".into(),
                )],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            QuadMeshError::NonManifoldEdge {
                vertex_a, vertex_b, ..
            } => Some(MeshLocation::Edge {
                vertex_a: *vertex_a,
                vertex_b: *vertex_b,
            }),
            QuadMeshError::EmptyPatch { patch_tag, .. } => {
                Some(MeshLocation::Patch { tag: *patch_tag })
            }
            _ => None,
        }
    }

    // Constructor helpers for common error patterns

    /// Create a NonManifoldEdge error.
    pub fn non_manifold_edge(
        patch_tag: u32,
        vertex_a: usize,
        vertex_b: usize,
        quad_count: usize,
    ) -> Self {
        QuadMeshError::NonManifoldEdge {
            patch_tag,
            vertex_a,
            vertex_b,
            quad_count,
        }
    }

    /// Create an InvalidQuad error.
    pub fn invalid_quad(details: impl Into<String>) -> Self {
        QuadMeshError::InvalidQuad {
            details: details.into(),
        }
    }

    /// Create an EmptyPatch error.
    pub fn empty_patch(patch_tag: u32, details: impl Into<String>) -> Self {
        QuadMeshError::EmptyPatch {
            patch_tag,
            details: details.into(),
        }
    }

    /// Create a StaleReference error.
    pub fn stale_reference(details: impl Into<String>) -> Self {
        QuadMeshError::StaleReference {
            details: details.into(),
        }
    }

    /// Create a MalformedCavityBoundary error.
    pub fn malformed_cavity_boundary(details: impl Into<String>) -> Self {
        QuadMeshError::MalformedCavityBoundary {
            details: details.into(),
        }
    }

    /// Create an EmptySeed error.
    pub fn empty_seed(details: impl Into<String>) -> Self {
        QuadMeshError::EmptySeed {
            details: details.into(),
        }
    }

    /// Create a PatternInstantiationFailed error.
    pub fn pattern_instantiation_failed(details: impl Into<String>) -> Self {
        QuadMeshError::PatternInstantiationFailed {
            details: details.into(),
        }
    }

    /// Create a RepairFailed error.
    pub fn repair_failed(details: impl Into<String>) -> Self {
        QuadMeshError::RepairFailed {
            details: details.into(),
        }
    }

    /// Create a SmoothingFailed error.
    pub fn smoothing_failed(details: impl Into<String>) -> Self {
        QuadMeshError::SmoothingFailed {
            details: details.into(),
        }
    }
}
