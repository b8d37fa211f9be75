//! Persistence sinks for reaches.
//!
//! A reach is written to three layers: the traced line, a centroid record
//! carrying the descriptive attributes, and one record per access point.
//! Publishing tolerates partial failure; it succeeds when the descriptive
//! sinks (centroid and points) do, even if the line sink fails.

pub mod pg;

pub use pg::PgReachLayer;

use crate::logging::{self, Service};
use crate::model::{Feature, Result};
use crate::reach::Reach;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Line,
    Centroid,
    Points,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Line => write!(f, "line"),
            LayerKind::Centroid => write!(f, "centroid"),
            LayerKind::Points => write!(f, "points"),
        }
    }
}

/// The features a reach contributes to a layer of `kind`.
///
/// An untraced reach has nothing to put in the line layer.
pub fn features_for(kind: LayerKind, reach: &Reach) -> Vec<Feature> {
    match kind {
        LayerKind::Line => reach.geometry().map(|_| vec![reach.as_feature()]).unwrap_or_default(),
        LayerKind::Centroid => vec![reach.as_centroid_feature()],
        LayerKind::Points => reach.points_as_features(),
    }
}

/// One feature layer keyed by reach id.
pub trait ReachLayer {
    fn kind(&self) -> LayerKind;

    fn query_by_reach_id(&mut self, reach_id: &str) -> Result<Vec<Feature>>;

    /// Appends the reach's features, returning how many were written.
    fn add(&mut self, reach: &Reach) -> Result<usize>;

    /// Replaces whatever the layer holds for the reach.
    fn update(&mut self, reach: &Reach) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SinkStatus {
    Written(usize),
    Skipped,
    Failed(String),
}

impl SinkStatus {
    pub fn is_written(&self) -> bool {
        matches!(self, SinkStatus::Written(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub reach_id: String,
    pub line: SinkStatus,
    pub centroid: SinkStatus,
    pub points: SinkStatus,
}

impl PublishReport {
    /// True when the descriptive records made it, whatever happened to the line.
    pub fn success(&self) -> bool {
        self.centroid.is_written() && self.points.is_written()
    }
}

/// Adds the reach to a layer, or replaces it if the layer already has it.
fn write(layer: &mut dyn ReachLayer, reach: &Reach) -> SinkStatus {
    let kind = layer.kind();
    let result = layer
        .query_by_reach_id(&reach.reach_id)
        .and_then(|existing| {
            if existing.is_empty() {
                layer.add(reach)
            } else {
                layer.update(reach)
            }
        });

    match result {
        Ok(count) => {
            logging::debug(
                Service::Store,
                Some(&reach.reach_id),
                &format!("wrote {} feature(s) to the {} layer", count, kind),
            );
            SinkStatus::Written(count)
        }
        Err(e) => {
            logging::log_failure(Service::Store, Some(&reach.reach_id), &format!("{} layer write", kind), &e);
            SinkStatus::Failed(e.to_string())
        }
    }
}

/// Persists a reach to all three sinks.
///
/// The line is written only for reaches without an error. Centroid and
/// points are always written.
pub fn publish(
    reach: &Reach,
    line: &mut dyn ReachLayer,
    centroid: &mut dyn ReachLayer,
    points: &mut dyn ReachLayer,
) -> PublishReport {
    let line = if reach.error || reach.geometry().is_none() {
        SinkStatus::Skipped
    } else {
        write(line, reach)
    };

    let report = PublishReport {
        reach_id: reach.reach_id.clone(),
        line,
        centroid: write(centroid, reach),
        points: write(points, reach),
    };

    if report.success() {
        logging::info(Service::Store, Some(&reach.reach_id), "published");
    } else {
        logging::warn(Service::Store, Some(&reach.reach_id), "publish incomplete");
    }
    report
}

/// Rebuilds a reach from the three sinks. `None` if no sink knows the id.
pub fn load_reach(
    reach_id: &str,
    line: &mut dyn ReachLayer,
    centroid: &mut dyn ReachLayer,
    points: &mut dyn ReachLayer,
) -> Result<Option<Reach>> {
    let lines = line.query_by_reach_id(reach_id)?;
    let centroids = centroid.query_by_reach_id(reach_id)?;
    let point_features = points.query_by_reach_id(reach_id)?;

    if lines.is_empty() && centroids.is_empty() && point_features.is_empty() {
        return Ok(None);
    }
    Reach::from_features(reach_id, lines.first(), centroids.first(), &point_features).map(Some)
}

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Layer held in memory, used for dry runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryReachLayer {
    kind: LayerKind,
    features: Vec<Feature>,
}

impl MemoryReachLayer {
    pub fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            features: Vec::new(),
        }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }
}

fn belongs_to(feature: &Feature, reach_id: &str) -> bool {
    feature.text("reach_id").as_deref() == Some(reach_id)
}

impl ReachLayer for MemoryReachLayer {
    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn query_by_reach_id(&mut self, reach_id: &str) -> Result<Vec<Feature>> {
        Ok(self
            .features
            .iter()
            .filter(|f| belongs_to(f, reach_id))
            .cloned()
            .collect())
    }

    fn add(&mut self, reach: &Reach) -> Result<usize> {
        let features = features_for(self.kind, reach);
        let count = features.len();
        self.features.extend(features);
        Ok(count)
    }

    fn update(&mut self, reach: &Reach) -> Result<usize> {
        self.features.retain(|f| !belongs_to(f, &reach.reach_id));
        self.add(reach)
    }
}
