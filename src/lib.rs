//! Whitewater reach tracing.
//!
//! Reaches described by American Whitewater are resolved onto the EPA WATERS
//! hydrographic network, with an elevation-derived hydrology service as a
//! fallback, and the traced centerline, centroid and access points are
//! persisted for mapping.

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod geometry;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod reach;
pub mod reach_point;
pub mod retry;
pub mod store;
pub mod trace;
pub mod verify;

pub use model::{ReachError, Result};
pub use reach::Reach;
pub use reach_point::ReachPoint;
pub use trace::{TraceMethod, TraceOrchestrator, TraceState};
