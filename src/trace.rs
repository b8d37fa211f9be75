//! Dual-service trace orchestration.
//!
//! A reach is traced on the EPA WATERS hydrographic network when its put-in
//! can be found there. Coverage stops at the US border and has gaps, so any
//! failure on the primary path falls back to the elevation-derived hydrology
//! service, which can approximate a line almost anywhere.
//!
//! The orchestrator never returns an error. Every outcome is recorded on the
//! reach as a terminal [`TraceState`] with `error` and `notes` filled in, so a
//! batch can move on to the next reach.

use crate::config::RetryConfig;
use crate::geometry::{self, GeometryService};
use crate::ingest::hydrology::{HydrologyParams, HydrologyService};
use crate::ingest::waters::HydroNetwork;
use crate::logging::{self, Service};
use crate::model::{
    AttributeValue, Attributes, Feature, FeatureSet, Field, Geometry, GeometryType, Point, Polyline, ReachError,
    Result,
};
use crate::reach::Reach;
use crate::reach_point::ReachPoint;
use crate::retry::{CancelToken, RetryPolicy};
use std::fmt;
use std::str::FromStr;

const PRIMARY: &str = "primary network";
const FALLBACK: &str = "fallback elevation service";

/// Fallback lines with this many coordinate pairs or fewer are kept as-is.
const SMOOTH_MIN_COORDS: usize = 3;

pub const PUTIN_NOT_ON_NETWORK: &str = "put-in not on primary network";

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMethod {
    PrimaryNetwork,
    FallbackElevation,
}

impl TraceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceMethod::PrimaryNetwork => PRIMARY,
            TraceMethod::FallbackElevation => FALLBACK,
        }
    }
}

impl fmt::Display for TraceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceMethod {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            PRIMARY => Ok(TraceMethod::PrimaryNetwork),
            FALLBACK => Ok(TraceMethod::FallbackElevation),
            other => Err(ReachError::InvalidParameter {
                name: "tracing_method",
                reason: format!("unknown tracing method '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceState {
    #[default]
    Untraced,
    PutinSnapped,
    PrimaryTraceAttempted,
    FallbackAttempted,
    Traced(TraceMethod),
    Failed,
}

impl TraceState {
    const LABELS: [(TraceState, &'static str); 7] = [
        (TraceState::Untraced, "untraced"),
        (TraceState::PutinSnapped, "put-in snapped"),
        (TraceState::PrimaryTraceAttempted, "primary trace attempted"),
        (TraceState::FallbackAttempted, "fallback attempted"),
        (TraceState::Traced(TraceMethod::PrimaryNetwork), "traced via primary network"),
        (TraceState::Traced(TraceMethod::FallbackElevation), "traced via fallback elevation service"),
        (TraceState::Failed, "failed"),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::LABELS
            .iter()
            .find(|(state, _)| state == self)
            .map(|(_, label)| *label)
            .unwrap_or("untraced")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TraceState::Traced(_) | TraceState::Failed)
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceState {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        Self::LABELS
            .iter()
            .find(|(_, label)| *label == s)
            .map(|(state, _)| *state)
            .ok_or_else(|| ReachError::InvalidParameter {
                name: "trace_state",
                reason: format!("unknown trace state '{}'", s),
            })
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct TraceOrchestrator<'a> {
    network: &'a dyn HydroNetwork,
    hydrology: Option<&'a dyn HydrologyService>,
    geometry: &'a dyn GeometryService,
    params: HydrologyParams,
    rounds: RetryPolicy,
    fallback: RetryPolicy,
    smooth: RetryPolicy,
    cancel: CancelToken,
}

/// A single point wrapped as hydrology task input.
fn point_input(reach_id: &str, point: &Point) -> FeatureSet {
    let mut attributes = Attributes::new();
    attributes.insert("reach_id".to_string(), AttributeValue::from(reach_id));
    FeatureSet {
        geometry_type: GeometryType::Point,
        spatial_reference: point.spatial_reference,
        fields: vec![Field {
            name: "reach_id".to_string(),
            field_type: Some("esriFieldTypeString".to_string()),
        }],
        features: vec![Feature::new(Some(point.clone().into()), attributes)],
    }
}

impl<'a> TraceOrchestrator<'a> {
    /// Primary-only orchestrator with the default retry ceilings.
    pub fn new(network: &'a dyn HydroNetwork, geometry: &'a dyn GeometryService) -> Self {
        let retry = RetryConfig::default();
        Self {
            network,
            hydrology: None,
            geometry,
            params: HydrologyParams::default(),
            rounds: retry.trace_rounds(),
            fallback: retry.fallback(),
            smooth: retry.smooth(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_fallback(mut self, hydrology: &'a dyn HydrologyService) -> Self {
        self.hydrology = Some(hydrology);
        self
    }

    pub fn with_params(mut self, params: HydrologyParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry(mut self, retry: &RetryConfig) -> Self {
        self.rounds = retry.trace_rounds();
        self.fallback = retry.fallback();
        self.smooth = retry.smooth();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Traces `reach`, recording the terminal state on it.
    pub fn run(&self, reach: &mut Reach) -> TraceState {
        reach.trace_state = TraceState::Untraced;
        reach.tracing_method = None;
        reach.error = false;
        reach.notes = None;

        if reach.putin().is_none() || reach.takeout().is_none() {
            return self.fail(
                reach,
                "Reach does not have both a put-in and a take-out location defined; no trace attempted.".to_string(),
            );
        }

        let primary_note = match self.trace_primary(reach) {
            Ok(()) => return self.finish(reach, TraceMethod::PrimaryNetwork),
            Err(ReachError::Cancelled) => return self.cancelled(reach),
            Err(ReachError::PutinUnresolved(_)) => {
                logging::info(Service::Trace, Some(&reach.reach_id), PUTIN_NOT_ON_NETWORK);
                PUTIN_NOT_ON_NETWORK.to_string()
            }
            Err(e) => {
                logging::log_failure(Service::Trace, Some(&reach.reach_id), "primary network trace", &e);
                format!("{} trace failed: {}", PRIMARY, e)
            }
        };
        reach.notes = Some(primary_note.clone());

        let fallback_note = match self.hydrology {
            None => format!("{} is not configured", FALLBACK),
            Some(hydrology) => match self.trace_fallback(reach, hydrology) {
                Ok(()) => return self.finish(reach, TraceMethod::FallbackElevation),
                Err(ReachError::Cancelled) => return self.cancelled(reach),
                Err(e) => {
                    logging::log_failure(Service::Hydrology, Some(&reach.reach_id), "fallback trace", &e);
                    e.to_string()
                }
            },
        };

        let exhausted = ReachError::TraceExhausted(reach.reach_id.clone());
        self.fail(
            reach,
            format!("{}. Primary: {}. Fallback: {}.", exhausted, primary_note, fallback_note),
        )
    }

    fn finish(&self, reach: &mut Reach, method: TraceMethod) -> TraceState {
        reach.trace_state = TraceState::Traced(method);
        reach.tracing_method = Some(method);
        reach.error = false;
        logging::info(
            Service::Trace,
            Some(&reach.reach_id),
            &format!("traced via {}", method),
        );
        reach.trace_state
    }

    fn fail(&self, reach: &mut Reach, note: String) -> TraceState {
        logging::warn(Service::Trace, Some(&reach.reach_id), &note);
        reach.trace_state = TraceState::Failed;
        reach.error = true;
        reach.notes = Some(note);
        reach.trace_state
    }

    fn cancelled(&self, reach: &mut Reach) -> TraceState {
        self.fail(reach, "Trace was cancelled before it completed.".to_string())
    }

    // -- primary ------------------------------------------------------------

    fn trace_primary(&self, reach: &mut Reach) -> Result<()> {
        let (Some(mut putin), Some(takeout)) = (reach.putin().cloned(), reach.takeout().cloned()) else {
            return Err(ReachError::PutinUnresolved(PRIMARY));
        };

        self.cancel.check()?;
        if !putin.snap_to_network(self.network)? {
            return Err(ReachError::PutinUnresolved(PRIMARY));
        }
        reach.set_putin(putin.clone());
        reach.trace_state = TraceState::PutinSnapped;
        let reach_id = reach.reach_id.clone();
        logging::debug(
            Service::Trace,
            Some(&reach_id),
            &format!(
                "put-in snapped to edge {:?} at measure {:?}",
                putin.nhdplus_reach_id, putin.nhdplus_measure
            ),
        );

        reach.trace_state = TraceState::PrimaryTraceAttempted;
        let (takeout, line) = self.rounds.run(&self.cancel, |round| {
            self.primary_round(&putin, &takeout).inspect_err(|e| {
                logging::log_failure(
                    Service::Waters,
                    Some(&reach_id),
                    &format!("primary trace round {}", round),
                    e,
                )
            })
        })?;

        reach.set_takeout(takeout);
        reach.set_geometry(Some(line));
        Ok(())
    }

    /// Downstream trace, take-out resolution, then the point-to-point trace.
    fn primary_round(&self, putin: &ReachPoint, takeout: &ReachPoint) -> Result<(ReachPoint, Polyline)> {
        let (Some(start_edge), Some(start_measure)) = (putin.nhdplus_reach_id, putin.nhdplus_measure) else {
            return Err(ReachError::PutinUnresolved(PRIMARY));
        };

        self.cancel.check()?;
        let downstream = self.network.trace_downstream(start_edge, start_measure)?;
        let takeout_point = geometry::match_reference(
            &takeout.geometry().clone().into(),
            &downstream.clone().into(),
            self.geometry,
        )?
        .into_point()?;
        let on_line = geometry::snap_to_line(&takeout_point, &downstream)?;

        let mut takeout = takeout.clone();
        takeout.set_geometry(on_line.into())?;
        self.cancel.check()?;
        if !takeout.snap_to_network(self.network)? {
            return Err(ReachError::TakeoutUnresolved(PRIMARY));
        }
        let (Some(stop_edge), Some(stop_measure)) = (takeout.nhdplus_reach_id, takeout.nhdplus_measure) else {
            return Err(ReachError::TakeoutUnresolved(PRIMARY));
        };

        self.cancel.check()?;
        let line = self
            .network
            .trace_between(start_edge, start_measure, stop_edge, stop_measure)?;
        Ok((takeout, line))
    }

    // -- fallback -----------------------------------------------------------

    fn trace_fallback(&self, reach: &mut Reach, hydrology: &dyn HydrologyService) -> Result<()> {
        reach.trace_state = TraceState::FallbackAttempted;
        let (Some(mut putin), Some(mut takeout)) = (reach.putin().cloned(), reach.takeout().cloned()) else {
            return Err(ReachError::PutinUnresolved(FALLBACK));
        };
        let putin_sr = putin.geometry().spatial_reference;
        let takeout_sr = takeout.geometry().spatial_reference;

        let input = point_input(&reach.reach_id, putin.geometry());
        let watershed = self
            .fallback
            .run(&self.cancel, |_| hydrology.watershed(&input, &self.params))?;
        let mut snapped = watershed
            .snapped_points
            .geometries()
            .into_iter()
            .next()
            .ok_or(ReachError::PutinUnresolved(FALLBACK))?;
        if snapped.spatial_reference().is_none() {
            snapped.set_spatial_reference(putin_sr);
        }
        let snapped = match putin_sr {
            Some(sr) => geometry::reproject(&snapped, sr, self.geometry)?,
            None => snapped,
        }
        .into_point()?;
        putin.set_geometry(snapped.clone().into())?;

        let input = point_input(&reach.reach_id, &snapped);
        let trace = self
            .fallback
            .run(&self.cancel, |_| hydrology.trace_downstream(&input, &self.params))?;
        let mut traced = trace.line;
        if traced.spatial_reference.is_none() {
            traced.spatial_reference = putin_sr;
        }

        let takeout_point = geometry::match_reference(
            &takeout.geometry().clone().into(),
            &traced.clone().into(),
            self.geometry,
        )?
        .into_point()?;
        let on_line = geometry::snap_to_line(&takeout_point, &traced)?;
        let trimmed = geometry::trim_at_point(&traced, &on_line)?;

        let line = if trimmed.coord_count() > SMOOTH_MIN_COORDS && trace.data_resolution > 0.0 {
            geometry::smooth(
                &trimmed.into(),
                2.0 * trace.data_resolution,
                self.geometry,
                &self.smooth,
                &self.cancel,
            )?
        } else {
            Geometry::from(trimmed)
        };
        let line = match putin_sr {
            Some(sr) => geometry::reproject(&line, sr, self.geometry)?,
            None => line,
        }
        .into_polyline()?;

        let takeout_geometry = match takeout_sr {
            Some(sr) => geometry::reproject(&on_line.into(), sr, self.geometry)?,
            None => on_line.into(),
        };
        takeout.set_geometry(takeout_geometry)?;

        reach.set_putin(putin);
        reach.set_takeout(takeout);
        reach.set_geometry(Some(line));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
