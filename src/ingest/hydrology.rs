/// Elevation-derived hydrology geoprocessing client
///
/// Wraps the Watershed and TraceDownstream tasks of an ArcGIS hydrology
/// geoprocessing server. These derive flow paths from elevation rasters, so
/// they cover areas the NHDPlus network does not (at coarser fidelity), and
/// the trace pipeline only reaches for them when the primary network fails.
///
/// Tasks are executed synchronously: `POST {endpoint}/{Task}/execute`.

use crate::config::HydrologyConfig;
use crate::ingest::arcgis::{self, FormParams};
use crate::model::{FeatureSet, Geometry, GeometryType, Polyline, ReachError, Result};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const WATERSHED_TASK: &str = "Watershed";
pub const TRACE_DOWNSTREAM_TASK: &str = "TraceDownstream";

// ============================================================================
// Parameter types
// ============================================================================

/// Elevation source, named by its approximate cell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDatabase {
    Finest,
    TenMeter,
    ThirtyMeter,
    NinetyMeter,
}

impl SourceDatabase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceDatabase::Finest => "Finest",
            SourceDatabase::TenMeter => "10m",
            SourceDatabase::ThirtyMeter => "30m",
            SourceDatabase::NinetyMeter => "90m",
        }
    }
}

impl FromStr for SourceDatabase {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Finest" => Ok(SourceDatabase::Finest),
            "10m" => Ok(SourceDatabase::TenMeter),
            "30m" => Ok(SourceDatabase::ThirtyMeter),
            "90m" => Ok(SourceDatabase::NinetyMeter),
            other => Err(ReachError::InvalidParameter {
                name: "source_database",
                reason: format!("must be one of Finest, 10m, 30m or 90m, not '{}'", other),
            }),
        }
    }
}

impl fmt::Display for SourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapDistanceUnits {
    Meters,
    Kilometers,
    Feet,
    Yards,
    Miles,
}

impl SnapDistanceUnits {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapDistanceUnits::Meters => "Meters",
            SnapDistanceUnits::Kilometers => "Kilometers",
            SnapDistanceUnits::Feet => "Feet",
            SnapDistanceUnits::Yards => "Yards",
            SnapDistanceUnits::Miles => "Miles",
        }
    }
}

impl FromStr for SnapDistanceUnits {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Meters" => Ok(SnapDistanceUnits::Meters),
            "Kilometers" => Ok(SnapDistanceUnits::Kilometers),
            "Feet" => Ok(SnapDistanceUnits::Feet),
            "Yards" => Ok(SnapDistanceUnits::Yards),
            "Miles" => Ok(SnapDistanceUnits::Miles),
            other => Err(ReachError::InvalidParameter {
                name: "snap_distance_units",
                reason: format!("unknown unit '{}'", other),
            }),
        }
    }
}

/// Task parameters shared by Watershed and TraceDownstream.
#[derive(Debug, Clone, PartialEq)]
pub struct HydrologyParams {
    pub point_id_field: Option<String>,
    pub source_database: SourceDatabase,
    /// Ask the service to simplify output lines.
    pub generalize: bool,
    pub snap_distance: f64,
    pub snap_distance_units: SnapDistanceUnits,
}

impl Default for HydrologyParams {
    fn default() -> Self {
        Self {
            point_id_field: None,
            source_database: SourceDatabase::Finest,
            generalize: false,
            snap_distance: 10.0,
            snap_distance_units: SnapDistanceUnits::Meters,
        }
    }
}

impl HydrologyParams {
    pub fn from_config(config: &HydrologyConfig) -> Result<Self> {
        Ok(Self {
            point_id_field: None,
            source_database: config.source_database.parse()?,
            generalize: config.generalize,
            snap_distance: config.snap_distance,
            snap_distance_units: config.snap_distance_units.parse()?,
        })
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct WatershedResult {
    pub snapped_points: FeatureSet,
    pub watershed_areas: FeatureSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamTrace {
    pub line: Polyline,
    /// Cell size of the elevation data the trace was derived from.
    pub data_resolution: f64,
}

pub trait HydrologyService {
    fn watershed(&self, points: &FeatureSet, params: &HydrologyParams) -> Result<WatershedResult>;

    fn trace_downstream(&self, points: &FeatureSet, params: &HydrologyParams) -> Result<DownstreamTrace>;
}

// ============================================================================
// Validation and request building
// ============================================================================

/// Input must be a point feature set; the id field, when given, must be one
/// of its declared fields (sets that declare none are not checked).
pub fn validate_input_points(points: &FeatureSet, point_id_field: Option<&str>) -> Result<()> {
    if points.geometry_type != GeometryType::Point {
        return Err(ReachError::UnsupportedGeometryType {
            expected: "esriGeometryPoint feature set",
            actual: points.geometry_type.to_string(),
        });
    }

    if let Some(odd) = points
        .features
        .iter()
        .find(|f| !matches!(f.geometry, Some(Geometry::Point(_))))
    {
        return Err(ReachError::UnsupportedGeometryType {
            expected: "point feature",
            actual: odd
                .geometry
                .as_ref()
                .map(|g| g.geometry_type().to_string())
                .unwrap_or_else(|| "no geometry".to_string()),
        });
    }

    if let Some(field) = point_id_field {
        let names = points.field_names();
        if !names.is_empty() && !names.contains(&field) {
            return Err(ReachError::InvalidParameter {
                name: "point_id_field",
                reason: format!("'{}' is not among the input fields: {}", field, names.join(",")),
            });
        }
    }

    Ok(())
}

fn base_params(points: &FeatureSet, params: &HydrologyParams, token: Option<&str>) -> Result<FormParams> {
    validate_input_points(points, params.point_id_field.as_deref())?;

    let mut form = FormParams::new(token);
    form.push("InputPoints", serde_json::to_string(points)?)
        .push("SourceDatabase", params.source_database.as_str())
        .push("Generalize", params.generalize.to_string());
    if let Some(field) = &params.point_id_field {
        form.push("PointIDField", field.as_str());
    }
    Ok(form)
}

pub fn watershed_params(points: &FeatureSet, params: &HydrologyParams, token: Option<&str>) -> Result<FormParams> {
    if params.snap_distance.is_nan() || params.snap_distance < 0.0 {
        return Err(ReachError::InvalidParameter {
            name: "snap_distance",
            reason: format!("must be zero or positive, got {}", params.snap_distance),
        });
    }
    let mut form = base_params(points, params, token)?;
    form.push("SnapDistance", params.snap_distance.to_string())
        .push("SnapDistanceUnits", params.snap_distance_units.as_str());
    Ok(form)
}

pub fn trace_params(points: &FeatureSet, params: &HydrologyParams, token: Option<&str>) -> Result<FormParams> {
    base_params(points, params, token)
}

// ============================================================================
// Response parsing
// ============================================================================

/// Finds the feature set output named `param_name` in an execute response.
pub fn output_feature_set(body: &Value, param_name: &str) -> Result<FeatureSet> {
    let value = body
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| {
            results
                .iter()
                .find(|r| r.get("paramName").and_then(Value::as_str) == Some(param_name))
        })
        .and_then(|r| r.get("value"))
        .ok_or_else(|| ReachError::Parse(format!("response has no {} output", param_name)))?;

    Ok(serde_json::from_value(value.clone())?)
}

fn resolution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("resolution pattern is valid"))
}

/// Reads a resolution given as a number or as text such as `"30m"` or `"10 Meters"`.
pub fn parse_data_resolution(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => resolution_pattern()
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

pub fn parse_watershed_response(body: &Value) -> Result<WatershedResult> {
    Ok(WatershedResult {
        snapped_points: output_feature_set(body, "SnappedPoints")?,
        watershed_areas: output_feature_set(body, "WatershedArea")?,
    })
}

pub fn parse_trace_response(body: &Value) -> Result<DownstreamTrace> {
    let traces = output_feature_set(body, "OutputTraceLine")?;

    let feature = traces.features.first().ok_or(ReachError::NoFlowlinesFound)?;
    let data_resolution = feature
        .attributes
        .get("DataResolution")
        .and_then(|v| parse_data_resolution(&serde_json::to_value(v).ok()?))
        .ok_or_else(|| ReachError::Parse("trace line has no DataResolution".to_string()))?;

    let line = traces
        .geometries()
        .into_iter()
        .next()
        .ok_or(ReachError::NoFlowlinesFound)?
        .into_polyline()?;
    if line.is_empty() {
        return Err(ReachError::NoFlowlinesFound);
    }

    Ok(DownstreamTrace { line, data_resolution })
}

// ============================================================================
// Client
// ============================================================================

pub struct HydrologyClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
}

impl HydrologyClient {
    pub fn new(client: reqwest::blocking::Client, endpoint: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn task_url(&self, task: &str) -> String {
        format!("{}/{}/execute", self.endpoint, task)
    }
}

impl HydrologyService for HydrologyClient {
    fn watershed(&self, points: &FeatureSet, params: &HydrologyParams) -> Result<WatershedResult> {
        let form = watershed_params(points, params, self.token.as_deref())?;
        let body = arcgis::post_form(&self.client, &self.task_url(WATERSHED_TASK), &form)?;
        parse_watershed_response(&body)
    }

    fn trace_downstream(&self, points: &FeatureSet, params: &HydrologyParams) -> Result<DownstreamTrace> {
        let form = trace_params(points, params, self.token.as_deref())?;
        let body = arcgis::post_form(&self.client, &self.task_url(TRACE_DOWNSTREAM_TASK), &form)?;
        parse_trace_response(&body)
    }
}

// ============================================================================
// Tests
// ============================================================================
