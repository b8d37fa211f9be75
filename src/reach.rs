/// Whitewater reach model
///
/// A reach is a named, navigable stretch of river between a put-in and a
/// take-out. It carries descriptive metadata from American Whitewater, the
/// access points, and, once traced, the river centerline between them.
///
/// Field export goes through the explicit [`Reach::FIELDS`] list so stored
/// records always have the same shape.

use crate::classify::{self, GaugeStage};
use crate::ingest::whitewater::{self, aw_number, aw_text};
use crate::model::{
    AttributeValue, Attributes, DATETIME_FORMAT, Feature, Geometry, Point, Polyline, ReachError, Result,
};
use crate::reach_point::{PointSubtype, PointType, ReachPoint};
use crate::trace::{TraceMethod, TraceOrchestrator, TraceState};
use chrono::NaiveDateTime;
use geo::{BoundingRect, Centroid};
use serde_json::Value;

/// Number of gauge range boundaries a reach can carry.
pub const GAUGE_BOUNDARY_COUNT: usize = 10;

const GAUGE_FIELDS: [&str; GAUGE_BOUNDARY_COUNT] = [
    "gauge_r0", "gauge_r1", "gauge_r2", "gauge_r3", "gauge_r4", "gauge_r5", "gauge_r6", "gauge_r7",
    "gauge_r8", "gauge_r9",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reach {
    pub reach_id: String,
    pub river_name: Option<String>,
    pub river_name_alternate: Option<String>,
    pub reach_name: Option<String>,
    pub reach_name_alternate: Option<String>,
    difficulty: Option<String>,
    difficulty_minimum: Option<String>,
    difficulty_maximum: Option<String>,
    difficulty_outlier: Option<String>,
    pub abstract_text: Option<String>,
    pub description: Option<String>,
    pub agency: Option<String>,
    pub huc: Option<String>,
    /// Reach length in miles, as reported by AW.
    pub length: Option<f64>,
    pub update_aw: Option<NaiveDateTime>,
    pub update_arcgis: Option<NaiveDateTime>,
    pub validated: Option<bool>,
    pub validated_by: Option<String>,
    pub error: bool,
    pub notes: Option<String>,
    pub tracing_method: Option<TraceMethod>,
    pub trace_state: TraceState,
    pub gauge_boundaries: [Option<f64>; GAUGE_BOUNDARY_COUNT],
    pub gauge_observation: Option<f64>,
    geometry: Option<Polyline>,
    points: Vec<ReachPoint>,
}

fn to_geo_lines(line: &Polyline) -> geo::MultiLineString<f64> {
    geo::MultiLineString::new(
        line.paths
            .iter()
            .map(|path| geo::LineString::from(path.iter().map(|c| (c[0], c[1])).collect::<Vec<_>>()))
            .collect(),
    )
}

impl Reach {
    /// Exported attribute names.
    pub const FIELDS: &'static [&'static str] = &[
        "reach_id",
        "river_name",
        "river_name_alternate",
        "reach_name",
        "reach_name_alternate",
        "difficulty",
        "difficulty_minimum",
        "difficulty_maximum",
        "difficulty_outlier",
        "abstract",
        "description",
        "agency",
        "huc",
        "length",
        "update_aw",
        "update_arcgis",
        "validated",
        "validated_by",
        "error",
        "notes",
        "tracing_method",
        "trace_state",
        "gauge_r0",
        "gauge_r1",
        "gauge_r2",
        "gauge_r3",
        "gauge_r4",
        "gauge_r5",
        "gauge_r6",
        "gauge_r7",
        "gauge_r8",
        "gauge_r9",
        "gauge_observation",
        "gauge_stage",
    ];

    pub fn new(reach_id: &str) -> Self {
        Self {
            reach_id: reach_id.to_string(),
            ..Self::default()
        }
    }

    // -- difficulty ---------------------------------------------------------

    pub fn difficulty(&self) -> Option<&str> {
        self.difficulty.as_deref()
    }

    pub fn difficulty_minimum(&self) -> Option<&str> {
        self.difficulty_minimum.as_deref()
    }

    pub fn difficulty_maximum(&self) -> Option<&str> {
        self.difficulty_maximum.as_deref()
    }

    pub fn difficulty_outlier(&self) -> Option<&str> {
        self.difficulty_outlier.as_deref()
    }

    /// Stores the combined grade and re-derives its parts.
    pub fn set_difficulty(&mut self, difficulty: Option<String>) {
        let parts = difficulty
            .as_deref()
            .map(classify::parse_difficulty)
            .unwrap_or_default();
        self.difficulty = difficulty;
        self.difficulty_minimum = parts.minimum;
        self.difficulty_maximum = parts.maximum;
        self.difficulty_outlier = parts.outlier;
    }

    // -- gauge --------------------------------------------------------------

    pub fn gauge_stage(&self) -> Option<GaugeStage> {
        classify::classify_gauge_stage(&self.gauge_boundaries, self.gauge_observation)
    }

    // -- points -------------------------------------------------------------

    pub fn points(&self) -> &[ReachPoint] {
        &self.points
    }

    fn access(&self, subtype: PointSubtype) -> Option<&ReachPoint> {
        self.points
            .iter()
            .find(|p| p.point_type == PointType::Access && p.is_subtype(subtype))
    }

    fn access_mut(&mut self, subtype: PointSubtype) -> Option<&mut ReachPoint> {
        self.points
            .iter_mut()
            .find(|p| p.point_type == PointType::Access && p.is_subtype(subtype))
    }

    pub fn putin(&self) -> Option<&ReachPoint> {
        self.access(PointSubtype::Putin)
    }

    pub fn takeout(&self) -> Option<&ReachPoint> {
        self.access(PointSubtype::Takeout)
    }

    pub fn putin_mut(&mut self) -> Option<&mut ReachPoint> {
        self.access_mut(PointSubtype::Putin)
    }

    pub fn takeout_mut(&mut self) -> Option<&mut ReachPoint> {
        self.access_mut(PointSubtype::Takeout)
    }

    pub fn intermediate_accesses(&self) -> Vec<&ReachPoint> {
        self.points
            .iter()
            .filter(|p| p.is_subtype(PointSubtype::Intermediate))
            .collect()
    }

    fn replace_access(&mut self, mut access: ReachPoint, subtype: PointSubtype) {
        self.points.retain(|p| !p.is_subtype(subtype));
        access.point_type = PointType::Access;
        access.subtype = Some(subtype);
        access.reach_id = self.reach_id.clone();
        self.points.push(access);
    }

    /// Sets the put-in, replacing any existing one.
    pub fn set_putin(&mut self, access: ReachPoint) {
        self.replace_access(access, PointSubtype::Putin);
    }

    /// Sets the take-out, replacing any existing one.
    pub fn set_takeout(&mut self, access: ReachPoint) {
        self.replace_access(access, PointSubtype::Takeout);
    }

    pub fn add_intermediate_access(&mut self, mut access: ReachPoint) {
        access.subtype = Some(PointSubtype::Intermediate);
        access.reach_id = self.reach_id.clone();
        self.points.push(access);
    }

    // -- geometry -----------------------------------------------------------

    pub fn geometry(&self) -> Option<&Polyline> {
        self.geometry.as_ref()
    }

    pub(crate) fn set_geometry(&mut self, geometry: Option<Polyline>) {
        self.geometry = geometry;
    }

    /// Representative point: the line's centroid, else the midpoint of the
    /// accesses, else whichever single access exists.
    pub fn centroid(&self) -> Option<Point> {
        if let Some(line) = self.geometry.as_ref().filter(|l| !l.is_empty()) {
            if let Some(c) = to_geo_lines(line).centroid() {
                return Some(Point::new(c.x(), c.y(), line.spatial_reference));
            }
        }

        match (self.putin(), self.takeout()) {
            (Some(putin), Some(takeout)) => {
                let (p, t) = (putin.geometry(), takeout.geometry());
                Some(Point::new((p.x + t.x) / 2.0, (p.y + t.y) / 2.0, p.spatial_reference))
            }
            (Some(single), None) | (None, Some(single)) => Some(single.geometry().clone()),
            (None, None) => None,
        }
    }

    /// `(xmin, ymin, xmax, ymax)` of the line, or of the accesses before tracing.
    pub fn extent(&self) -> Option<(f64, f64, f64, f64)> {
        if let Some(line) = self.geometry.as_ref() {
            if let Some(rect) = to_geo_lines(line).bounding_rect() {
                return Some((rect.min().x, rect.min().y, rect.max().x, rect.max().y));
            }
        }

        let accesses: Vec<&Point> = [self.putin(), self.takeout()]
            .into_iter()
            .flatten()
            .map(ReachPoint::geometry)
            .collect();
        let first = accesses.first()?;
        Some(accesses.iter().fold(
            (first.x, first.y, first.x, first.y),
            |(xmin, ymin, xmax, ymax), p| (xmin.min(p.x), ymin.min(p.y), xmax.max(p.x), ymax.max(p.y)),
        ))
    }

    // -- tracing ------------------------------------------------------------

    /// Resolves the accesses onto the river network and traces the line
    /// between them. The outcome is recorded on the reach.
    pub fn update_putin_takeout_and_trace(&mut self, orchestrator: &TraceOrchestrator<'_>) -> TraceState {
        orchestrator.run(self)
    }

    // -- export -------------------------------------------------------------

    pub fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        let mut put = |key: &str, value: AttributeValue| {
            attrs.insert(key.to_string(), value);
        };

        put("reach_id", self.reach_id.as_str().into());
        put("river_name", self.river_name.clone().into());
        put("river_name_alternate", self.river_name_alternate.clone().into());
        put("reach_name", self.reach_name.clone().into());
        put("reach_name_alternate", self.reach_name_alternate.clone().into());
        put("difficulty", self.difficulty.clone().into());
        put("difficulty_minimum", self.difficulty_minimum.clone().into());
        put("difficulty_maximum", self.difficulty_maximum.clone().into());
        put("difficulty_outlier", self.difficulty_outlier.clone().into());
        put("abstract", self.abstract_text.clone().into());
        put("description", self.description.clone().into());
        put("agency", self.agency.clone().into());
        put("huc", self.huc.clone().into());
        put("length", self.length.into());
        put("update_aw", self.update_aw.into());
        put("update_arcgis", self.update_arcgis.into());
        put("validated", self.validated.into());
        put("validated_by", self.validated_by.clone().into());
        put("error", self.error.into());
        put("notes", self.notes.clone().into());
        put("tracing_method", self.tracing_method.map(|m| m.as_str()).into());
        put("trace_state", self.trace_state.as_str().into());
        for (key, value) in GAUGE_FIELDS.iter().zip(self.gauge_boundaries) {
            put(key, value.into());
        }
        put("gauge_observation", self.gauge_observation.into());
        put("gauge_stage", self.gauge_stage().map(|s| s.as_str()).into());

        attrs
    }

    /// The reach as a line feature. Geometry is absent until traced.
    pub fn as_feature(&self) -> Feature {
        Feature::new(self.geometry.clone().map(Geometry::from), self.attributes())
    }

    pub fn as_centroid_feature(&self) -> Feature {
        Feature::new(self.centroid().map(Geometry::from), self.attributes())
    }

    pub fn points_as_features(&self) -> Vec<Feature> {
        self.points.iter().map(ReachPoint::as_feature).collect()
    }

    // -- loading ------------------------------------------------------------

    fn apply_attributes(&mut self, feature: &Feature) -> Result<()> {
        let number = |key: &str| feature.attribute(key).and_then(AttributeValue::as_f64);

        self.river_name = feature.text("river_name");
        self.river_name_alternate = feature.text("river_name_alternate");
        self.reach_name = feature.text("reach_name");
        self.reach_name_alternate = feature.text("reach_name_alternate");
        self.set_difficulty(feature.text("difficulty"));
        self.abstract_text = feature.text("abstract");
        self.description = feature.text("description");
        self.agency = feature.text("agency");
        self.huc = feature.text("huc");
        self.length = number("length");
        self.update_aw = feature.attribute("update_aw").and_then(AttributeValue::as_datetime);
        self.update_arcgis = feature.attribute("update_arcgis").and_then(AttributeValue::as_datetime);
        self.validated = feature.attribute("validated").and_then(AttributeValue::as_bool);
        self.validated_by = feature.text("validated_by");
        self.error = feature.attribute("error").and_then(AttributeValue::as_bool).unwrap_or(false);
        self.notes = feature.text("notes");
        self.tracing_method = feature.text("tracing_method").map(|m| m.parse::<TraceMethod>()).transpose()?;
        self.trace_state = feature
            .text("trace_state")
            .map(|s| s.parse::<TraceState>())
            .transpose()?
            .unwrap_or_default();
        for (slot, key) in self.gauge_boundaries.iter_mut().zip(GAUGE_FIELDS) {
            *slot = number(key);
        }
        self.gauge_observation = number("gauge_observation");
        Ok(())
    }

    /// Rebuilds a reach from stored features.
    ///
    /// Attributes come from the line feature when present, otherwise from the
    /// centroid feature. Only a polyline geometry is taken as the reach line.
    pub fn from_features(
        reach_id: &str,
        line: Option<&Feature>,
        centroid: Option<&Feature>,
        points: &[Feature],
    ) -> Result<Reach> {
        let mut reach = Reach::new(reach_id);

        if let Some(record) = line.or(centroid) {
            reach.apply_attributes(record)?;
        }
        if let Some(Geometry::Polyline(l)) = line.and_then(|f| f.geometry.clone()) {
            reach.geometry = Some(l);
        }
        for feature in points {
            let point = ReachPoint::from_feature(feature)?;
            if point.reach_id == reach.reach_id {
                reach.points.push(point);
            }
        }
        Ok(reach)
    }

    /// Builds a reach from an American Whitewater reach detail document.
    pub fn from_aw_json(reach_id: &str, raw: &Value) -> Result<Reach> {
        let info = whitewater::reach_info(raw)?;
        let mut reach = Reach::new(reach_id);

        reach.river_name = aw_text(info, "river");
        reach.reach_name = aw_text(info, "section");
        reach.reach_name_alternate = aw_text(info, "altname");
        reach.huc = aw_text(info, "huc");
        reach.description = aw_text(info, "description");
        reach.abstract_text = aw_text(info, "abstract");
        reach.agency = aw_text(info, "agency");
        reach.length = aw_number(info, "length");
        reach.update_aw = match info.get("edited").and_then(Value::as_str) {
            Some(edited) => Some(NaiveDateTime::parse_from_str(edited.trim(), DATETIME_FORMAT).map_err(|e| {
                ReachError::Parse(format!("edited timestamp '{}': {}", edited, e))
            })?),
            None => None,
        };
        reach.set_difficulty(aw_text(info, "class"));

        if let (Some(x), Some(y)) = (aw_number(info, "plon"), aw_number(info, "plat")) {
            reach.set_putin(ReachPoint::access(reach_id, Point::wgs84(x, y), PointSubtype::Putin));
        }
        if let (Some(x), Some(y)) = (aw_number(info, "tlon"), aw_number(info, "tlat")) {
            reach.set_takeout(ReachPoint::access(reach_id, Point::wgs84(x, y), PointSubtype::Takeout));
        }

        Ok(reach)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SpatialReference;
    use serde_json::json;

    fn aw_document() -> Value {
        json!({
            "CContainerViewJSON_view": {
                "CRiverMainGadgetJSON_main": {
                    "info": {
                        "river": "White Salmon",
                        "section": "BZ Corner to Husum",
                        "altname": "  ",
                        "huc": "17070105",
                        "description": "<p>Classic  run.</p>\n\n\n\n",
                        "abstract": "N/A",
                        "agency": null,
                        "length": "5.2",
                        "edited": "2019-06-14 17:03:12",
                        "class": "III-IV(V)",
                        "plon": "-121.634402",
                        "plat": "45.794848",
                        "tlon": "-121.645582",
                        "tlat": "45.718817"
                    }
                }
            }
        })
    }

    #[test]
    fn test_from_aw_json() {
        let reach = Reach::from_aw_json("3066", &aw_document()).unwrap();
        assert_eq!(reach.river_name.as_deref(), Some("White Salmon"));
        assert_eq!(reach.reach_name.as_deref(), Some("BZ Corner to Husum"));
        assert_eq!(reach.reach_name_alternate, None);
        assert_eq!(reach.abstract_text, None);
        assert_eq!(reach.agency, None);
        assert_eq!(reach.description.as_deref(), Some("Classic run."));
        assert_eq!(reach.length, Some(5.2));
        assert_eq!(reach.difficulty_minimum(), Some("III"));
        assert_eq!(reach.difficulty_maximum(), Some("IV"));
        assert_eq!(reach.difficulty_outlier(), Some("V"));
        assert_eq!(
            reach.update_aw.map(|d| d.format(DATETIME_FORMAT).to_string()).as_deref(),
            Some("2019-06-14 17:03:12")
        );

        let putin = reach.putin().unwrap();
        assert_eq!(putin.geometry(), &Point::wgs84(-121.634402, 45.794848));
        assert_eq!(putin.reach_id, "3066");
        assert!(reach.takeout().is_some());
    }

    #[test]
    fn test_from_aw_json_without_coordinates_has_no_accesses() {
        let mut doc = aw_document();
        doc["CContainerViewJSON_view"]["CRiverMainGadgetJSON_main"]["info"]["plon"] = Value::Null;
        doc["CContainerViewJSON_view"]["CRiverMainGadgetJSON_main"]["info"]["tlat"] = Value::Null;
        let reach = Reach::from_aw_json("3066", &doc).unwrap();
        assert!(reach.putin().is_none());
        assert!(reach.takeout().is_none());
        assert!(reach.centroid().is_none());
    }

    #[test]
    fn test_bad_edited_timestamp_is_parse_error() {
        let mut doc = aw_document();
        doc["CContainerViewJSON_view"]["CRiverMainGadgetJSON_main"]["info"]["edited"] = json!("yesterday");
        assert!(matches!(Reach::from_aw_json("1", &doc), Err(ReachError::Parse(_))));
    }

    #[test]
    fn test_setting_putin_replaces_existing() {
        let mut reach = Reach::new("1");
        reach.set_putin(ReachPoint::access("1", Point::wgs84(0.0, 0.0), PointSubtype::Putin));
        reach.set_putin(ReachPoint::access("1", Point::wgs84(1.0, 1.0), PointSubtype::Putin));
        reach.add_intermediate_access(ReachPoint::access("1", Point::wgs84(2.0, 2.0), PointSubtype::Putin));

        assert_eq!(reach.points().len(), 2);
        assert_eq!(reach.putin().unwrap().geometry(), &Point::wgs84(1.0, 1.0));
        assert_eq!(reach.intermediate_accesses().len(), 1);
    }

    #[test]
    fn test_centroid_fallbacks() {
        let mut reach = Reach::new("1");
        assert_eq!(reach.centroid(), None);

        reach.set_putin(ReachPoint::access("1", Point::wgs84(-121.634402, 45.794848), PointSubtype::Putin));
        assert_eq!(reach.centroid(), Some(Point::wgs84(-121.634402, 45.794848)));

        reach.set_takeout(ReachPoint::access("1", Point::wgs84(-121.645582, 45.718817), PointSubtype::Takeout));
        let mid = reach.centroid().unwrap();
        assert!((mid.x - (-121.639992)).abs() < 1e-9);
        assert!((mid.y - 45.7568325).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_is_length_weighted_on_line() {
        let mut reach = Reach::new("1");
        reach.set_putin(ReachPoint::access("1", Point::wgs84(50.0, 50.0), PointSubtype::Putin));
        reach.set_geometry(Some(Polyline::new(
            vec![vec![[0.0, 0.0], [10.0, 0.0], [10.0, 1.0]]],
            Some(SpatialReference::WGS84),
        )));
        let c = reach.centroid().unwrap();
        // 10 units along y=0 centred at x=5, 1 unit along x=10 centred at y=0.5
        assert!((c.x - (10.0 * 5.0 + 10.0) / 11.0).abs() < 1e-9);
        assert!((c.y - 0.5 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_extent_from_accesses_then_line() {
        let mut reach = Reach::new("1");
        assert_eq!(reach.extent(), None);
        reach.set_putin(ReachPoint::access("1", Point::wgs84(-121.6, 45.8), PointSubtype::Putin));
        reach.set_takeout(ReachPoint::access("1", Point::wgs84(-121.7, 45.7), PointSubtype::Takeout));
        assert_eq!(reach.extent(), Some((-121.7, 45.7, -121.6, 45.8)));

        reach.set_geometry(Some(Polyline::new(
            vec![vec![[-121.6, 45.8], [-121.65, 45.9], [-121.7, 45.7]]],
            Some(SpatialReference::WGS84),
        )));
        assert_eq!(reach.extent(), Some((-121.7, 45.7, -121.6, 45.9)));
    }

    #[test]
    fn test_gauge_stage_is_derived() {
        let mut reach = Reach::new("1");
        reach.gauge_boundaries[0] = Some(1.0);
        reach.gauge_boundaries[3] = Some(4.0);
        reach.gauge_boundaries[1] = Some(2.0);
        reach.gauge_boundaries[2] = Some(3.0);
        reach.gauge_observation = Some(2.5);
        assert_eq!(reach.gauge_stage(), Some(GaugeStage::Medium));
        assert_eq!(reach.attributes()["gauge_stage"], AttributeValue::from("medium"));
    }

    #[test]
    fn test_attributes_cover_declared_fields() {
        let reach = Reach::new("1");
        let attrs = reach.attributes();
        let mut keys: Vec<&str> = attrs.keys().map(String::as_str).collect();
        let mut fields = Reach::FIELDS.to_vec();
        keys.sort();
        fields.sort();
        assert_eq!(keys, fields);
    }

    #[test]
    fn test_features_reload() {
        let mut reach = Reach::from_aw_json("3066", &aw_document()).unwrap();
        reach.error = true;
        reach.notes = Some("put-in not on primary network".into());
        reach.trace_state = TraceState::Failed;
        reach.gauge_boundaries[0] = Some(2.0);

        let reloaded = Reach::from_features(
            "3066",
            None,
            Some(&reach.as_centroid_feature()),
            &reach.points_as_features(),
        )
        .unwrap();
        assert_eq!(reloaded, reach);
    }

    #[test]
    fn test_line_feature_supplies_geometry() {
        let mut reach = Reach::new("7");
        let line = Polyline::new(vec![vec![[0.0, 0.0], [1.0, 1.0]]], Some(SpatialReference::WGS84));
        reach.set_geometry(Some(line.clone()));
        reach.trace_state = TraceState::Traced(TraceMethod::PrimaryNetwork);
        reach.tracing_method = Some(TraceMethod::PrimaryNetwork);

        let reloaded = Reach::from_features("7", Some(&reach.as_feature()), None, &[]).unwrap();
        assert_eq!(reloaded.geometry(), Some(&line));
        assert_eq!(reloaded.tracing_method, Some(TraceMethod::PrimaryNetwork));
        assert_eq!(reloaded.trace_state, TraceState::Traced(TraceMethod::PrimaryNetwork));
    }
}
