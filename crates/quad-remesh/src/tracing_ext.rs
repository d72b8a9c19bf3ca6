//! Tracing extensions for remeshing operations.
//!
//! This module provides structured logging and performance tracing for the
//! repair and smoothing passes. It integrates with the `tracing` ecosystem
//! to provide:
//!
//! - **Performance spans**: Track operation timing
//! - **Structured fields**: Log patch dimensions, quad counts, timing
//! - **Progress events**: Emit progress updates for long-running passes
//!
//! # Usage
//!
//! Enable tracing by initializing a subscriber in your application:
//!
//! ```rust,ignore
//! use tracing_subscriber::{fmt, prelude::*, EnvFilter};
//!
//! tracing_subscriber::registry()
//!     .with(fmt::layer())
//!     .with(EnvFilter::from_default_env())
//!     .init();
//!
//! // Set RUST_LOG=quad_remesh=debug for detailed output
//! ```
//!
//! # Log Levels
//!
//! - **ERROR**: Corrupted connectivity, invalid splices
//! - **WARN**: Passes that gave up, per-patch failures
//! - **INFO**: Pass summaries, timing
//! - **DEBUG**: Cavity growth, per-defect decisions
//! - **TRACE**: Per-flip and per-vertex logging

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::types::SurfacePatch;

/// Times a repair or smoothing pass and logs the duration when dropped.
///
/// The finish event always lands on the `quad_remesh::timing` target; when
/// the timer was started with [`PassTimer::for_patch`] it also carries the
/// patch tag, and the patch size is logged up front at debug level.
///
/// # Example
///
/// ```rust,ignore
/// use quad_remesh::tracing_ext::PassTimer;
///
/// fn winslow_pass(patch: &mut SurfacePatch) {
///     let _timer = PassTimer::for_patch("winslow", patch);
///     // ... relax ...
/// } // logs "pass finished" with the elapsed milliseconds
/// ```
pub struct PassTimer {
    pass: &'static str,
    patch_tag: Option<u32>,
    start: Instant,
}

impl PassTimer {
    /// Time a pass not tied to a single patch.
    pub fn start(pass: &'static str) -> Self {
        Self {
            pass,
            patch_tag: None,
            start: Instant::now(),
        }
    }

    /// Time a pass over one patch.
    pub fn for_patch(pass: &'static str, patch: &SurfacePatch) -> Self {
        debug!(
            target: "quad_remesh::timing",
            pass,
            patch = patch.tag(),
            quads = patch.quad_count(),
            vertices = patch.vertex_count(),
            "pass started"
        );
        Self {
            pass,
            patch_tag: Some(patch.tag()),
            start: Instant::now(),
        }
    }

    /// Time spent since the timer was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PassTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.patch_tag {
            Some(tag) => info!(
                target: "quad_remesh::timing",
                pass = self.pass,
                patch = tag,
                elapsed_ms = format!("{:.2}", elapsed_ms),
                "pass finished"
            ),
            None => info!(
                target: "quad_remesh::timing",
                pass = self.pass,
                elapsed_ms = format!("{:.2}", elapsed_ms),
                "pass finished"
            ),
        }
    }
}

/// Log patch statistics at debug level.
pub fn log_patch_stats(patch: &SurfacePatch, context: &str) {
    let singular = patch.singular_vertices().len();
    debug!(
        target: "quad_remesh::patch_state",
        context = context,
        tag = patch.tag(),
        vertices = patch.vertex_count(),
        quads = patch.quad_count(),
        singular = singular,
        "patch state"
    );
}

/// Log a repair pass result.
pub fn log_repair_result(operation: &str, items_fixed: usize, elapsed_ms: f64) {
    info!(
        target: "quad_remesh::repair",
        operation = operation,
        items_fixed = items_fixed,
        elapsed_ms = format!("{:.2}", elapsed_ms),
        "repair pass completed"
    );
}

/// Log progress of cavity growth.
pub fn log_growth_progress(operation: &str, cavity_quads: usize, boundary_edges: usize) {
    debug!(
        target: "quad_remesh::progress",
        operation = operation,
        cavity_quads = cavity_quads,
        boundary_edges = boundary_edges,
        "growth progress"
    );
}

/// Macro for creating instrumented remeshing spans.
///
/// Creates a tracing span carrying the patch dimensions.
#[macro_export]
macro_rules! quad_span {
    ($name:expr, $patch:expr) => {
        tracing::info_span!(
            $name,
            tag = $patch.tag(),
            vertices = $patch.vertex_count(),
            quads = $patch.quad_count()
        )
    };
    ($name:expr, $patch:expr, $($field:tt)*) => {
        tracing::info_span!(
            $name,
            tag = $patch.tag(),
            vertices = $patch.vertex_count(),
            quads = $patch.quad_count(),
            $($field)*
        )
    };
}
