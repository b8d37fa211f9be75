/// EPA WATERS hydrographic network client
///
/// Resolves coordinates onto the NHDPlus flow network and traces along it.
/// Three services are used:
/// - PointIndexing: snaps a WGS84 point to the nearest flow-line (5 km radius)
/// - Navigation (DM): traces downstream from an edge id + measure
/// - UpstreamDownStream (PP): traces between two edge id + measure pairs
///
/// Service documentation: https://www.epa.gov/waterdata/waters-web-services
///
/// URL building and response parsing are pure functions so they can be
/// exercised without the network; [`WatersClient`] adds the transport and the
/// bounded retry loop.

use crate::geometry::merge_lines;
use crate::logging::{self, Service};
use crate::model::{Coord, Point, Polyline, ReachError, Result, SpatialReference};
use crate::retry::{CancelToken, RetryPolicy};
use reqwest::Url;
use serde_json::Value;

/// Search radius handed to the point indexing service, in kilometres.
pub const SNAP_SEARCH_DISTANCE_KM: u32 = 5;

/// Downstream navigation cap, in kilometres.
pub const MAX_TRACE_DISTANCE_KM: u32 = 5000;

const CRS84: &str = "SRSNAME=urn:ogc:def:crs:OGC::CRS84";

// ============================================================================
// Types
// ============================================================================

/// A point resolved onto the network, with the addressing needed for tracing.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnap {
    pub geometry: Point,
    /// Position along the matched edge.
    pub measure: f64,
    /// NHDPlus ComID of the matched edge.
    pub edge_id: i64,
}

/// Primary hydrographic network operations used by the trace pipeline.
pub trait HydroNetwork {
    /// `Ok(None)` when the location has no network coverage.
    fn snap_point(&self, x: f64, y: f64) -> Result<Option<NetworkSnap>>;

    fn trace_downstream(&self, edge_id: i64, measure: f64) -> Result<Polyline>;

    fn trace_between(
        &self,
        start_edge_id: i64,
        start_measure: f64,
        stop_edge_id: i64,
        stop_measure: f64,
    ) -> Result<Polyline>;
}

// ============================================================================
// URL builders
// ============================================================================

fn build_url(base: &str, params: &[(&str, String)]) -> Result<Url> {
    Url::parse_with_params(base, params)
        .map_err(|e| ReachError::Parse(format!("invalid service URL '{}': {}", base, e)))
}

pub fn build_point_indexing_url(base: &str, x: f64, y: f64) -> Result<Url> {
    build_url(
        base,
        &[
            ("pGeometry", format!("POINT({} {})", x, y)),
            ("pGeometryMod", format!("WKT,{}", CRS84)),
            ("pPointIndexingMethod", "DISTANCE".to_string()),
            ("pPointIndexingMaxDist", SNAP_SEARCH_DISTANCE_KM.to_string()),
            ("pOutputPathFlag", "TRUE".to_string()),
            ("pReturnFlowlineGeomFlag", "FALSE".to_string()),
            ("optOutCS", CRS84.to_string()),
            ("optOutPrettyPrint", "0".to_string()),
            ("f", "json".to_string()),
        ],
    )
}

pub fn build_downstream_url(base: &str, edge_id: i64, measure: f64) -> Result<Url> {
    build_url(
        base,
        &[
            ("pNavigationType", "DM".to_string()),
            ("pStartComID", edge_id.to_string()),
            ("pStartMeasure", measure.to_string()),
            ("pMaxDistanceKm", MAX_TRACE_DISTANCE_KM.to_string()),
            ("pReturnFlowlineAttr", "TRUE".to_string()),
            ("f", "json".to_string()),
        ],
    )
}

pub fn build_point_to_point_url(
    base: &str,
    start_edge_id: i64,
    start_measure: f64,
    stop_edge_id: i64,
    stop_measure: f64,
) -> Result<Url> {
    build_url(
        base,
        &[
            ("pNavigationType", "PP".to_string()),
            ("pStartComID", start_edge_id.to_string()),
            ("pStartMeasure", start_measure.to_string()),
            ("pStopComID", stop_edge_id.to_string()),
            ("pStopMeasure", stop_measure.to_string()),
            ("pFlowlinelist", "TRUE".to_string()),
            ("f", "json".to_string()),
        ],
    )
}

// ============================================================================
// Response parsing
// ============================================================================

fn as_edge_id(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_measure(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Parses a point indexing response. A null `output` means no coverage.
pub fn parse_snap_response(body: &Value) -> Result<Option<NetworkSnap>> {
    let output = match body.get("output") {
        None | Some(Value::Null) => return Ok(None),
        Some(o) => o,
    };

    let coords = output
        .pointer("/end_point/coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| ReachError::Parse("point indexing output has no end_point".to_string()))?;
    let (x, y) = match (coords.first().and_then(Value::as_f64), coords.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(ReachError::Parse("end_point coordinates are not numeric".to_string())),
    };

    let flowline = output
        .pointer("/ary_flowlines/0")
        .ok_or_else(|| ReachError::Parse("point indexing output has no flowlines".to_string()))?;
    let measure = flowline
        .get("fmeasure")
        .and_then(as_measure)
        .ok_or_else(|| ReachError::Parse("flowline has no fmeasure".to_string()))?;
    let edge_id = flowline
        .get("comid")
        .and_then(as_edge_id)
        .ok_or_else(|| ReachError::Parse("flowline has no comid".to_string()))?;

    Ok(Some(NetworkSnap {
        geometry: Point::wgs84(x, y),
        measure,
        edge_id,
    }))
}

fn geojson_line(coords: &Value) -> Option<Vec<Coord>> {
    coords
        .as_array()?
        .iter()
        .map(|c| {
            let c = c.as_array()?;
            Some([c.first()?.as_f64()?, c.get(1)?.as_f64()?])
        })
        .collect()
}

/// Splits a GeoJSON LineString or MultiLineString into coordinate runs.
fn shape_segments(shape: &Value) -> Result<Vec<Vec<Coord>>> {
    let kind = shape.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = shape
        .get("coordinates")
        .ok_or_else(|| ReachError::Parse("flowline shape has no coordinates".to_string()))?;

    let segments = match kind {
        "LineString" => geojson_line(coords).map(|l| vec![l]),
        "MultiLineString" => coords
            .as_array()
            .and_then(|parts| parts.iter().map(geojson_line).collect::<Option<Vec<_>>>()),
        other => {
            return Err(ReachError::UnsupportedGeometryType {
                expected: "LineString or MultiLineString",
                actual: other.to_string(),
            });
        }
    };

    segments.ok_or_else(|| ReachError::Parse("flowline coordinates are malformed".to_string()))
}

/// Merges the flow-lines listed under `output.<key>` into one WGS84 line.
pub fn parse_flowlines(body: &Value, key: &str) -> Result<Polyline> {
    let flowlines = body
        .get("output")
        .and_then(|o| o.get(key))
        .and_then(Value::as_array)
        .filter(|list| !list.is_empty())
        .ok_or(ReachError::NoFlowlinesFound)?;

    let mut segments = Vec::new();
    for flowline in flowlines {
        let shape = flowline
            .get("shape")
            .ok_or_else(|| ReachError::Parse("flowline has no shape".to_string()))?;
        segments.extend(shape_segments(shape)?);
    }

    let mut chains = merge_lines(segments);
    match chains.len() {
        0 => Err(ReachError::NoFlowlinesFound),
        1 => Ok(Polyline::new(vec![chains.remove(0)], Some(SpatialReference::WGS84))),
        n => Err(ReachError::Parse(format!(
            "flowlines did not merge into one continuous line ({} parts)",
            n
        ))),
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct WatersClient {
    client: reqwest::blocking::Client,
    point_indexing_url: String,
    navigation_url: String,
    updown_url: String,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl WatersClient {
    pub fn new(
        client: reqwest::blocking::Client,
        point_indexing_url: &str,
        navigation_url: &str,
        updown_url: &str,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            client,
            point_indexing_url: point_indexing_url.to_string(),
            navigation_url: navigation_url.to_string(),
            updown_url: updown_url.to_string(),
            policy,
            cancel,
        }
    }

    /// GETs `url`, retrying while the status is not a success.
    fn get_json(&self, url: &Url) -> Result<Value> {
        let result = self.policy.run(&self.cancel, |attempt| {
            let response = self
                .client
                .get(url.clone())
                .header("Accept", "application/json")
                .send()?;

            let status = response.status();
            if !status.is_success() {
                logging::debug(
                    Service::Waters,
                    None,
                    &format!("attempt {:02} failed with status {}", attempt, status),
                );
                return Err(ReachError::Parse(format!("HTTP {}", status)));
            }
            Ok(response.json::<Value>()?)
        });

        result.map_err(|e| match e {
            ReachError::Cancelled => ReachError::Cancelled,
            other => ReachError::NetworkUnavailable {
                service: "WATERS",
                attempts: self.policy.max_attempts.max(1),
                detail: other.to_string(),
            },
        })
    }
}

impl HydroNetwork for WatersClient {
    fn snap_point(&self, x: f64, y: f64) -> Result<Option<NetworkSnap>> {
        let url = build_point_indexing_url(&self.point_indexing_url, x, y)?;
        parse_snap_response(&self.get_json(&url)?)
    }

    fn trace_downstream(&self, edge_id: i64, measure: f64) -> Result<Polyline> {
        let url = build_downstream_url(&self.navigation_url, edge_id, measure)?;
        parse_flowlines(&self.get_json(&url)?, "ntNavResultsStandard")
    }

    fn trace_between(
        &self,
        start_edge_id: i64,
        start_measure: f64,
        stop_edge_id: i64,
        stop_measure: f64,
    ) -> Result<Polyline> {
        let url = build_point_to_point_url(
            &self.updown_url,
            start_edge_id,
            start_measure,
            stop_edge_id,
            stop_measure,
        )?;
        parse_flowlines(&self.get_json(&url)?, "flowlines_traversed")
    }
}

// ============================================================================
// Tests
// ============================================================================
