//! In-process stand-ins for the remote services, shared by integration tests.

#![allow(dead_code)]

use reach_service::geometry::{GeometryService, Transformation, locate_on_line};
use reach_service::ingest::hydrology::{DownstreamTrace, HydrologyParams, HydrologyService, WatershedResult};
use reach_service::ingest::waters::{HydroNetwork, NetworkSnap};
use reach_service::model::{
    Coord, Feature, FeatureSet, Geometry, GeometryType, Point, Polyline, ReachError, Result, SpatialReference,
};
use reach_service::reach_point::{PointSubtype, ReachPoint};
use reach_service::Reach;
use std::cell::Cell;

pub const PUTIN: (f64, f64) = (-121.634402, 45.794848);
pub const TAKEOUT: (f64, f64) = (-121.645582, 45.718817);

/// White Salmon centerline from just above the put-in to below the take-out.
pub const RIVER: [Coord; 7] = [
    [-121.6340, 45.7960],
    [-121.6352, 45.7810],
    [-121.6378, 45.7650],
    [-121.6405, 45.7480],
    [-121.6431, 45.7320],
    [-121.6457, 45.7180],
    [-121.6490, 45.7010],
];

pub fn river() -> Polyline {
    Polyline::new(vec![RIVER.to_vec()], Some(SpatialReference::WGS84))
}

pub fn white_salmon() -> Reach {
    let mut reach = Reach::new("3066");
    reach.river_name = Some("White Salmon".to_string());
    reach.set_putin(ReachPoint::access("3066", Point::wgs84(PUTIN.0, PUTIN.1), PointSubtype::Putin));
    reach.set_takeout(ReachPoint::access("3066", Point::wgs84(TAKEOUT.0, TAKEOUT.1), PointSubtype::Takeout));
    reach
}

// ---------------------------------------------------------------------------
// Primary network
// ---------------------------------------------------------------------------

const FIRST_EDGE: i64 = 23773400;

/// Each river segment is one network edge; the measure is the percentage
/// along the edge.
pub struct MockNetwork {
    covered: bool,
    pub snaps: Cell<u32>,
    pub traces: Cell<u32>,
}

impl MockNetwork {
    pub fn covering() -> Self {
        Self {
            covered: true,
            snaps: Cell::new(0),
            traces: Cell::new(0),
        }
    }

    pub fn without_coverage() -> Self {
        Self {
            covered: false,
            ..Self::covering()
        }
    }

    fn slice(&self, start: i64, stop: Option<i64>) -> Result<Polyline> {
        self.traces.set(self.traces.get() + 1);
        let from = usize::try_from(start - FIRST_EDGE).map_err(|_| ReachError::NoFlowlinesFound)?;
        let to = match stop {
            Some(edge) => usize::try_from(edge - FIRST_EDGE + 1).map_err(|_| ReachError::NoFlowlinesFound)?,
            None => RIVER.len() - 1,
        };
        if from > to || to >= RIVER.len() {
            return Err(ReachError::NoFlowlinesFound);
        }
        Ok(Polyline::new(vec![RIVER[from..=to].to_vec()], Some(SpatialReference::WGS84)))
    }
}

impl HydroNetwork for MockNetwork {
    fn snap_point(&self, x: f64, y: f64) -> Result<Option<NetworkSnap>> {
        self.snaps.set(self.snaps.get() + 1);
        if !self.covered {
            return Ok(None);
        }

        let location = locate_on_line(&river(), [x, y]).ok_or(ReachError::NoFlowlinesFound)?;
        let [a, b] = [RIVER[location.segment], RIVER[location.segment + 1]];
        let along = (location.coord[0] - a[0]).hypot(location.coord[1] - a[1]);
        let length = (b[0] - a[0]).hypot(b[1] - a[1]);

        Ok(Some(NetworkSnap {
            geometry: Point::wgs84(location.coord[0], location.coord[1]),
            measure: 100.0 * along / length,
            edge_id: FIRST_EDGE + location.segment as i64,
        }))
    }

    fn trace_downstream(&self, edge_id: i64, _measure: f64) -> Result<Polyline> {
        self.slice(edge_id, None)
    }

    fn trace_between(&self, start_edge_id: i64, _sm: f64, stop_edge_id: i64, _tm: f64) -> Result<Polyline> {
        self.slice(start_edge_id, Some(stop_edge_id))
    }
}

// ---------------------------------------------------------------------------
// Geometry service
// ---------------------------------------------------------------------------

/// Everything is already in one reference, so projection is the identity.
#[derive(Default)]
pub struct IdentityGeometry {
    pub densified: Cell<u32>,
    pub simplified: Cell<u32>,
}

impl GeometryService for IdentityGeometry {
    fn find_transformation(&self, _in_wkid: u32, _out_wkid: u32) -> Result<Option<Transformation>> {
        Ok(None)
    }

    fn project(
        &self,
        geometries: &[Geometry],
        _in_wkid: u32,
        _out_wkid: u32,
        _transformation: Option<&Transformation>,
    ) -> Result<Vec<Geometry>> {
        Ok(geometries.to_vec())
    }

    fn densify(&self, geometry: &Geometry, _max_segment_length: f64) -> Result<Geometry> {
        self.densified.set(self.densified.get() + 1);
        Ok(geometry.clone())
    }

    fn simplify(&self, geometry: &Geometry) -> Result<Geometry> {
        self.simplified.set(self.simplified.get() + 1);
        Ok(geometry.clone())
    }
}

// ---------------------------------------------------------------------------
// Fallback hydrology
// ---------------------------------------------------------------------------

/// Elevation-derived trace that follows the river, or a service that is down.
pub struct MockHydrology {
    line: Option<Polyline>,
    data_resolution: f64,
    pub watershed_calls: Cell<u32>,
    pub trace_calls: Cell<u32>,
}

impl MockHydrology {
    pub fn tracing(line: Polyline, data_resolution: f64) -> Self {
        Self {
            line: Some(line),
            data_resolution,
            watershed_calls: Cell::new(0),
            trace_calls: Cell::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            line: None,
            data_resolution: 0.0,
            watershed_calls: Cell::new(0),
            trace_calls: Cell::new(0),
        }
    }

    fn down() -> ReachError {
        ReachError::Parse("HTTP 503".to_string())
    }
}

impl HydrologyService for MockHydrology {
    fn watershed(&self, points: &FeatureSet, _params: &HydrologyParams) -> Result<WatershedResult> {
        self.watershed_calls.set(self.watershed_calls.get() + 1);
        let line = self.line.as_ref().ok_or_else(Self::down)?;
        let start = line.first_coord().ok_or(ReachError::NoFlowlinesFound)?;

        Ok(WatershedResult {
            snapped_points: FeatureSet {
                geometry_type: GeometryType::Point,
                spatial_reference: line.spatial_reference,
                fields: points.fields.clone(),
                features: vec![Feature::new(
                    Some(Point::new(start[0], start[1], None).into()),
                    points.features.first().map(|f| f.attributes.clone()).unwrap_or_default(),
                )],
            },
            watershed_areas: FeatureSet {
                geometry_type: GeometryType::Polygon,
                spatial_reference: line.spatial_reference,
                fields: vec![],
                features: vec![],
            },
        })
    }

    fn trace_downstream(&self, _points: &FeatureSet, _params: &HydrologyParams) -> Result<DownstreamTrace> {
        self.trace_calls.set(self.trace_calls.get() + 1);
        let line = self.line.clone().ok_or_else(Self::down)?;
        Ok(DownstreamTrace {
            line,
            data_resolution: self.data_resolution,
        })
    }
}
