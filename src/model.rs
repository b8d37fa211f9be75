/// Core data types for the whitewater reach tracing service.
///
/// This module defines the shared geometry and feature model imported by all
/// other modules, plus the crate error type. Geometry structs serialize as
/// Esri JSON, which is what the hydrology, geometry and feature services speak.

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Spatial references
// ---------------------------------------------------------------------------

/// WKID for geographic WGS84 coordinates, used by the WATERS services.
pub const WKID_WGS84: u32 = 4326;

/// Well-known identifier for a coordinate system.
///
/// Esri services report both `wkid` and `latestWkid`; the same system can
/// appear under either (102100 vs 3857), so equality checks go through
/// [`SpatialReference::is_equivalent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_wkid: Option<u32>,
}

impl SpatialReference {
    pub const WGS84: SpatialReference = SpatialReference {
        wkid: Some(WKID_WGS84),
        latest_wkid: None,
    };

    pub fn from_wkid(wkid: u32) -> Self {
        Self {
            wkid: Some(wkid),
            latest_wkid: None,
        }
    }

    /// Identifier to hand to a projection service, preferring the latest alias.
    pub fn code(&self) -> Option<u32> {
        self.latest_wkid.or(self.wkid)
    }

    /// True if any pairing of wkid/latestWkid across both references match.
    pub fn is_equivalent(&self, other: &SpatialReference) -> bool {
        if self == other {
            return true;
        }
        let mine = [self.wkid, self.latest_wkid];
        let theirs = [other.wkid, other.latest_wkid];
        mine.iter()
            .flatten()
            .any(|a| theirs.iter().flatten().any(|b| a == b))
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.wkid, self.latest_wkid) {
            (Some(w), Some(l)) if w != l => write!(f, "wkid {} (latest {})", w, l),
            (Some(w), _) => write!(f, "wkid {}", w),
            (None, Some(l)) => write!(f, "wkid {}", l),
            (None, None) => write!(f, "undefined"),
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry types
// ---------------------------------------------------------------------------

/// A single x/y coordinate pair.
pub type Coord = [f64; 2];

/// Deserializes Esri path/ring arrays, dropping any z or m values.
fn deserialize_paths<'de, D>(deserializer: D) -> std::result::Result<Vec<Vec<Coord>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<Vec<f64>>> = Vec::deserialize(deserializer)?;
    raw.into_iter()
        .map(|path| {
            path.into_iter()
                .map(|c| {
                    if c.len() < 2 {
                        Err(serde::de::Error::custom("coordinate needs at least x and y"))
                    } else {
                        Ok([c[0], c[1]])
                    }
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
}

impl Point {
    pub fn new(x: f64, y: f64, spatial_reference: Option<SpatialReference>) -> Self {
        Self {
            x,
            y,
            spatial_reference,
        }
    }

    /// Longitude/latitude point in WGS84.
    pub fn wgs84(x: f64, y: f64) -> Self {
        Self::new(x, y, Some(SpatialReference::WGS84))
    }

    pub fn coord(&self) -> Coord {
        [self.x, self.y]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    #[serde(deserialize_with = "deserialize_paths")]
    pub paths: Vec<Vec<Coord>>,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
}

impl Polyline {
    pub fn new(paths: Vec<Vec<Coord>>, spatial_reference: Option<SpatialReference>) -> Self {
        Self {
            paths,
            spatial_reference,
        }
    }

    /// Total number of coordinate pairs across all paths.
    pub fn coord_count(&self) -> usize {
        self.paths.iter().map(Vec::len).sum()
    }

    pub fn first_coord(&self) -> Option<Coord> {
        self.paths.iter().find_map(|p| p.first().copied())
    }

    pub fn last_coord(&self) -> Option<Coord> {
        self.paths.iter().rev().find_map(|p| p.last().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.coord_count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    #[serde(deserialize_with = "deserialize_paths")]
    pub rings: Vec<Vec<Coord>>,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
}

/// Esri geometry type keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    #[serde(rename = "esriGeometryPoint")]
    Point,
    #[serde(rename = "esriGeometryPolyline")]
    Polyline,
    #[serde(rename = "esriGeometryPolygon")]
    Polygon,
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryType::Point => write!(f, "esriGeometryPoint"),
            GeometryType::Polyline => write!(f, "esriGeometryPolyline"),
            GeometryType::Polygon => write!(f, "esriGeometryPolygon"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geometry {
    Point(Point),
    Polyline(Polyline),
    Polygon(Polygon),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Polyline(_) => GeometryType::Polyline,
            Geometry::Polygon(_) => GeometryType::Polygon,
        }
    }

    pub fn spatial_reference(&self) -> Option<SpatialReference> {
        match self {
            Geometry::Point(g) => g.spatial_reference,
            Geometry::Polyline(g) => g.spatial_reference,
            Geometry::Polygon(g) => g.spatial_reference,
        }
    }

    pub fn set_spatial_reference(&mut self, sr: Option<SpatialReference>) {
        match self {
            Geometry::Point(g) => g.spatial_reference = sr,
            Geometry::Polyline(g) => g.spatial_reference = sr,
            Geometry::Polygon(g) => g.spatial_reference = sr,
        }
    }

    pub fn into_point(self) -> std::result::Result<Point, ReachError> {
        match self {
            Geometry::Point(p) => Ok(p),
            other => Err(ReachError::UnsupportedGeometryType {
                expected: "point",
                actual: other.geometry_type().to_string(),
            }),
        }
    }

    pub fn into_polyline(self) -> std::result::Result<Polyline, ReachError> {
        match self {
            Geometry::Polyline(l) => Ok(l),
            other => Err(ReachError::UnsupportedGeometryType {
                expected: "polyline",
                actual: other.geometry_type().to_string(),
            }),
        }
    }
}

impl From<Point> for Geometry {
    fn from(p: Point) -> Self {
        Geometry::Point(p)
    }
}

impl From<Polyline> for Geometry {
    fn from(l: Polyline) -> Self {
        Geometry::Polyline(l)
    }
}

impl From<Polygon> for Geometry {
    fn from(p: Polygon) -> Self {
        Geometry::Polygon(p)
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// A single attribute value as it travels through feature services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        self.as_str()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), DATETIME_FORMAT).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<Option<String>> for AttributeValue {
    fn from(v: Option<String>) -> Self {
        v.map(AttributeValue::Text).unwrap_or(AttributeValue::Null)
    }
}

impl From<Option<&str>> for AttributeValue {
    fn from(v: Option<&str>) -> Self {
        v.map(|s| AttributeValue::Text(s.to_string()))
            .unwrap_or(AttributeValue::Null)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<Option<f64>> for AttributeValue {
    fn from(v: Option<f64>) -> Self {
        v.map(AttributeValue::Float).unwrap_or(AttributeValue::Null)
    }
}

impl From<Option<i64>> for AttributeValue {
    fn from(v: Option<i64>) -> Self {
        v.map(AttributeValue::Int).unwrap_or(AttributeValue::Null)
    }
}

impl From<Option<NaiveDateTime>> for AttributeValue {
    fn from(v: Option<NaiveDateTime>) -> Self {
        v.map(|d| AttributeValue::Text(d.format(DATETIME_FORMAT).to_string()))
            .unwrap_or(AttributeValue::Null)
    }
}

impl From<Option<bool>> for AttributeValue {
    fn from(v: Option<bool>) -> Self {
        v.map(AttributeValue::Bool).unwrap_or(AttributeValue::Null)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Timestamp layout used by AW and by stored attribute values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: Option<Geometry>, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.attribute(key).and_then(|v| match v {
            AttributeValue::Text(s) => Some(s.clone()),
            AttributeValue::Int(i) => Some(i.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// A homogeneous collection of features, as exchanged with geoprocessing tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub geometry_type: GeometryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_reference: Option<SpatialReference>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Geometry of each feature, with the set-level spatial reference filled in
    /// where the feature geometry omits one.
    pub fn geometries(&self) -> Vec<Geometry> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.clone())
            .map(|mut g| {
                if g.spatial_reference().is_none() {
                    g.set_spatial_reference(self.spatial_reference);
                }
                g
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while snapping, tracing, reprojecting or persisting reaches.
#[derive(Error, Debug)]
pub enum ReachError {
    /// Both geometries carry a spatial reference, but not the same one.
    #[error("spatial reference mismatch: {left} vs {right}")]
    ReferenceMismatch { left: String, right: String },

    /// Advisory: a geometry has no spatial reference, so it cannot be compared.
    #[error("spatial reference is not defined for the {0}")]
    UndefinedReference(&'static str),

    #[error("unsupported geometry type: expected {expected}, got {actual}")]
    UnsupportedGeometryType {
        expected: &'static str,
        actual: String,
    },

    #[error("the tracing operation did not find any hydrolines")]
    NoFlowlinesFound,

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Retry ceiling reached without a successful response.
    #[error("{service} unavailable after {attempts} attempts: {detail}")]
    NetworkUnavailable {
        service: &'static str,
        attempts: u32,
        detail: String,
    },

    #[error("put-in could not be located on the {0}")]
    PutinUnresolved(&'static str),

    #[error("take-out could not be located on the {0}")]
    TakeoutUnresolved(&'static str),

    #[error("reach {0} could not be traced by the primary network or the fallback service")]
    TraceExhausted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("store error: {0}")]
    Store(#[from] postgres::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ReachError {
    /// Advisory conditions callers may log and continue past.
    pub fn is_advisory(&self) -> bool {
        matches!(self, ReachError::UndefinedReference(_))
    }
}

pub type Result<T> = std::result::Result<T, ReachError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
