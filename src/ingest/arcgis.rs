/// Shared plumbing for ArcGIS REST endpoints
///
/// Both the hydrology geoprocessing server and the geometry server answer
/// with HTTP 200 even when a request fails, carrying an `error` object in the
/// body instead. Everything that talks to them goes through [`post_form`] so
/// that envelope is unwrapped in one place.

use crate::model::{Geometry, GeometryType, ReachError, Result};
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Request helpers
// ============================================================================

/// Form parameters for one request, `f=json` always included.
#[derive(Debug, Clone, Default)]
pub struct FormParams {
    pairs: Vec<(String, String)>,
}

impl FormParams {
    pub fn new(token: Option<&str>) -> Self {
        let mut params = FormParams::default();
        params.push("f", "json");
        if let Some(token) = token {
            params.push("token", token);
        }
        params
    }

    pub fn push(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.to_string(), value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// `{"geometryType": ..., "geometries": [...]}` with per-geometry references
/// stripped, as the geometry server expects.
pub fn geometries_param(geometries: &[Geometry]) -> Result<String> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Envelope {
        geometry_type: GeometryType,
        geometries: Vec<Geometry>,
    }

    let geometry_type = geometries
        .first()
        .map(Geometry::geometry_type)
        .ok_or_else(|| ReachError::InvalidParameter {
            name: "geometries",
            reason: "at least one geometry is required".to_string(),
        })?;

    if let Some(odd) = geometries.iter().find(|g| g.geometry_type() != geometry_type) {
        return Err(ReachError::UnsupportedGeometryType {
            expected: "geometries of a single type",
            actual: odd.geometry_type().to_string(),
        });
    }

    let stripped = geometries
        .iter()
        .cloned()
        .map(|mut g| {
            g.set_spatial_reference(None);
            g
        })
        .collect();

    Ok(serde_json::to_string(&Envelope { geometry_type, geometries: stripped })?)
}

// ============================================================================
// Response helpers
// ============================================================================

/// Surfaces an in-body `{"error": {...}}` as a parse error.
pub fn check_service_error(body: &Value) -> Result<()> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
    let details = error
        .get("details")
        .and_then(Value::as_array)
        .map(|d| d.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("; "))
        .unwrap_or_default();

    if details.is_empty() {
        Err(ReachError::Parse(format!("service error {}: {}", code, message)))
    } else {
        Err(ReachError::Parse(format!("service error {}: {} ({})", code, message, details)))
    }
}

/// POSTs `params` to `url` and returns the decoded JSON body.
pub fn post_form(client: &reqwest::blocking::Client, url: &str, params: &FormParams) -> Result<Value> {
    let response = client
        .post(url)
        .header("Accept", "application/json")
        .form(params.pairs())
        .send()?;

    if !response.status().is_success() {
        return Err(ReachError::Parse(format!("HTTP {} from {}", response.status(), url)));
    }

    let body: Value = response.json()?;
    check_service_error(&body)?;
    Ok(body)
}

/// Decodes `{"geometries": [...]}`, stamping `sr` on each result.
pub fn parse_geometries(body: &Value, sr: Option<crate::model::SpatialReference>) -> Result<Vec<Geometry>> {
    let raw = body
        .get("geometries")
        .and_then(Value::as_array)
        .ok_or_else(|| ReachError::Parse("response has no geometries".to_string()))?;

    raw.iter()
        .map(|g| {
            let mut geometry: Geometry = serde_json::from_value(g.clone())?;
            if geometry.spatial_reference().is_none() {
                geometry.set_spatial_reference(sr);
            }
            Ok(geometry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, Polyline, SpatialReference};
    use serde_json::json;

    #[test]
    fn test_form_params_carry_format_and_token() {
        let mut params = FormParams::new(Some("secret"));
        params.push("inSR", "4326");
        assert_eq!(params.get("f"), Some("json"));
        assert_eq!(params.get("token"), Some("secret"));
        assert_eq!(params.get("inSR"), Some("4326"));
        assert_eq!(FormParams::new(None).get("token"), None);
    }

    #[test]
    fn test_geometries_param_strips_references() {
        let text = geometries_param(&[Point::wgs84(1.0, 2.0).into()]).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["geometryType"], "esriGeometryPoint");
        assert_eq!(value["geometries"][0], json!({"x": 1.0, "y": 2.0}));
    }

    #[test]
    fn test_geometries_param_rejects_mixed_types() {
        let line = Polyline::new(vec![vec![[0.0, 0.0], [1.0, 1.0]]], None);
        let result = geometries_param(&[Point::wgs84(1.0, 2.0).into(), line.into()]);
        assert!(matches!(result, Err(ReachError::UnsupportedGeometryType { .. })));
        assert!(geometries_param(&[]).is_err());
    }

    #[test]
    fn test_in_body_error_is_surfaced() {
        let body = json!({"error": {"code": 400, "message": "Unable to complete operation.", "details": ["Invalid wkid"]}});
        match check_service_error(&body) {
            Err(ReachError::Parse(msg)) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("Invalid wkid"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
        assert!(check_service_error(&json!({"geometries": []})).is_ok());
    }

    #[test]
    fn test_parse_geometries_fills_reference() {
        let body = json!({"geometries": [{"x": -13540000.0, "y": 5750000.0}]});
        let sr = Some(SpatialReference::from_wkid(3857));
        let geometries = parse_geometries(&body, sr).unwrap();
        assert_eq!(geometries[0].spatial_reference(), sr);
        assert!(parse_geometries(&json!({}), sr).is_err());
    }
}
