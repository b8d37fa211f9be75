/// Remote geometry service
///
/// Datum transformation lookup, projection, densify and simplify are
/// delegated to an ArcGIS-compatible geometry server. The trait is the seam
/// the trace pipeline depends on, so tests can substitute an in-process double.

use crate::ingest::arcgis::{self, FormParams};
use crate::model::{Geometry, ReachError, Result, SpatialReference};
use serde_json::Value;

/// A datum transformation definition, passed back verbatim to `project`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    pub definition: Value,
}

impl Transformation {
    pub fn wkid(&self) -> Option<u32> {
        self.definition
            .get("wkid")
            .and_then(Value::as_u64)
            .and_then(|w| u32::try_from(w).ok())
    }
}

pub trait GeometryService {
    /// Best transformation between two references, if one is needed.
    fn find_transformation(&self, in_wkid: u32, out_wkid: u32) -> Result<Option<Transformation>>;

    fn project(
        &self,
        geometries: &[Geometry],
        in_wkid: u32,
        out_wkid: u32,
        transformation: Option<&Transformation>,
    ) -> Result<Vec<Geometry>>;

    /// Adds vertices so no segment exceeds `max_segment_length` (in the
    /// units of the geometry's reference).
    fn densify(&self, geometry: &Geometry, max_segment_length: f64) -> Result<Geometry>;

    fn simplify(&self, geometry: &Geometry) -> Result<Geometry>;
}

// ============================================================================
// Response parsing
// ============================================================================

/// Picks the first transformation out of a findTransformations response.
///
/// The server answers with a bare transformation object, a
/// `transformations` list, or an empty object when none applies.
pub fn parse_transformation(body: &Value) -> Option<Transformation> {
    if let Some(list) = body.get("transformations").and_then(Value::as_array) {
        return list.first().cloned().map(|definition| Transformation { definition });
    }
    if let Some(list) = body.as_array() {
        return list.first().cloned().map(|definition| Transformation { definition });
    }
    if body.get("wkid").is_some() || body.get("geoTransforms").is_some() {
        return Some(Transformation { definition: body.clone() });
    }
    None
}

fn single(mut geometries: Vec<Geometry>, operation: &str) -> Result<Geometry> {
    if geometries.is_empty() {
        return Err(ReachError::Parse(format!("{} returned no geometries", operation)));
    }
    Ok(geometries.swap_remove(0))
}

fn reference_code(geometry: &Geometry) -> Result<u32> {
    geometry
        .spatial_reference()
        .and_then(|sr| sr.code())
        .ok_or(ReachError::UndefinedReference("geometry sent to the geometry service"))
}

// ============================================================================
// REST client
// ============================================================================

pub struct ArcGisGeometryService {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
}

impl ArcGisGeometryService {
    pub fn new(client: reqwest::blocking::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }

    fn params(&self) -> FormParams {
        FormParams::new(self.token.as_deref())
    }
}

impl GeometryService for ArcGisGeometryService {
    fn find_transformation(&self, in_wkid: u32, out_wkid: u32) -> Result<Option<Transformation>> {
        let mut params = self.params();
        params.push("inSR", in_wkid.to_string()).push("outSR", out_wkid.to_string());
        let body = arcgis::post_form(&self.client, &self.endpoint("findTransformations"), &params)?;
        Ok(parse_transformation(&body))
    }

    fn project(
        &self,
        geometries: &[Geometry],
        in_wkid: u32,
        out_wkid: u32,
        transformation: Option<&Transformation>,
    ) -> Result<Vec<Geometry>> {
        let mut params = self.params();
        params
            .push("geometries", arcgis::geometries_param(geometries)?)
            .push("inSR", in_wkid.to_string())
            .push("outSR", out_wkid.to_string());
        if let Some(t) = transformation {
            params
                .push("transformation", t.definition.to_string())
                .push("transformForward", "true");
        }

        let body = arcgis::post_form(&self.client, &self.endpoint("project"), &params)?;
        arcgis::parse_geometries(&body, Some(SpatialReference::from_wkid(out_wkid)))
    }

    fn densify(&self, geometry: &Geometry, max_segment_length: f64) -> Result<Geometry> {
        let sr = reference_code(geometry)?;
        let mut params = self.params();
        params
            .push("geometries", arcgis::geometries_param(std::slice::from_ref(geometry))?)
            .push("sr", sr.to_string())
            .push("maxSegmentLength", max_segment_length.to_string())
            .push("geodesic", "false");

        let body = arcgis::post_form(&self.client, &self.endpoint("densify"), &params)?;
        single(arcgis::parse_geometries(&body, geometry.spatial_reference())?, "densify")
    }

    fn simplify(&self, geometry: &Geometry) -> Result<Geometry> {
        let sr = reference_code(geometry)?;
        let mut params = self.params();
        params
            .push("geometries", arcgis::geometries_param(std::slice::from_ref(geometry))?)
            .push("sr", sr.to_string());

        let body = arcgis::post_form(&self.client, &self.endpoint("simplify"), &params)?;
        single(arcgis::parse_geometries(&body, geometry.spatial_reference())?, "simplify")
    }
}
