/// Access and intermediate points along a reach
///
/// A `ReachPoint` is always a point geometry. Put-in and take-out points are
/// moved in place when they are snapped to the hydrographic network, which
/// also records the matched NHDPlus edge and measure for tracing.

use crate::ingest::waters::HydroNetwork;
use crate::model::{
    AttributeValue, Attributes, Feature, Geometry, Point, ReachError, Result, SpatialReference,
};
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Point classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Access,
    Intermediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointSubtype {
    Putin,
    Takeout,
    Intermediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideOfRiver {
    Left,
    Right,
}

impl PointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointType::Access => "access",
            PointType::Intermediate => "intermediate",
        }
    }
}

impl PointSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointSubtype::Putin => "putin",
            PointSubtype::Takeout => "takeout",
            PointSubtype::Intermediate => "intermediate",
        }
    }
}

impl SideOfRiver {
    pub fn as_str(&self) -> &'static str {
        match self {
            SideOfRiver::Left => "left",
            SideOfRiver::Right => "right",
        }
    }
}

impl FromStr for PointType {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "access" => Ok(PointType::Access),
            "intermediate" => Ok(PointType::Intermediate),
            other => Err(ReachError::InvalidParameter {
                name: "point_type",
                reason: format!("must be access or intermediate, not '{}'", other),
            }),
        }
    }
}

impl FromStr for PointSubtype {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "putin" => Ok(PointSubtype::Putin),
            "takeout" => Ok(PointSubtype::Takeout),
            "intermediate" => Ok(PointSubtype::Intermediate),
            other => Err(ReachError::InvalidParameter {
                name: "subtype",
                reason: format!("must be putin, takeout or intermediate, not '{}'", other),
            }),
        }
    }
}

impl FromStr for SideOfRiver {
    type Err = ReachError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(SideOfRiver::Left),
            "right" => Ok(SideOfRiver::Right),
            other => Err(ReachError::InvalidParameter {
                name: "side_of_river",
                reason: format!("must be either left or right, not '{}'", other),
            }),
        }
    }
}

impl fmt::Display for PointSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReachPoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ReachPoint {
    pub reach_id: String,
    pub point_type: PointType,
    pub subtype: Option<PointSubtype>,
    pub uid: String,
    pub name: Option<String>,
    side_of_river: Option<SideOfRiver>,
    pub collection_method: Option<String>,
    pub update_date: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<String>,
    pub nhdplus_measure: Option<f64>,
    pub nhdplus_reach_id: Option<i64>,
    geometry: Point,
}

fn new_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

impl ReachPoint {
    /// Exported attribute names, in storage order.
    pub const FIELDS: [&'static str; 14] = [
        "reach_id",
        "type_id",
        "point_type",
        "subtype",
        "uid",
        "name",
        "side_of_river",
        "collection_method",
        "update_date",
        "notes",
        "description",
        "difficulty",
        "nhdplus_measure",
        "nhdplus_reach_id",
    ];

    /// A detached point. Fails unless `geometry` is a point.
    pub fn new(reach_id: &str, geometry: Geometry, point_type: PointType) -> Result<Self> {
        Ok(Self::at(reach_id, geometry.into_point()?, point_type))
    }

    fn at(reach_id: &str, geometry: Point, point_type: PointType) -> Self {
        Self {
            reach_id: reach_id.to_string(),
            point_type,
            subtype: None,
            uid: new_uid(),
            name: None,
            side_of_river: None,
            collection_method: None,
            update_date: None,
            notes: None,
            description: None,
            difficulty: None,
            nhdplus_measure: None,
            nhdplus_reach_id: None,
            geometry,
        }
    }

    /// An access point of the given subtype.
    pub fn access(reach_id: &str, point: Point, subtype: PointSubtype) -> Self {
        let mut access = Self::at(reach_id, point, PointType::Access);
        access.subtype = Some(subtype);
        access
    }

    pub fn geometry(&self) -> &Point {
        &self.geometry
    }

    /// Replaces the location. Anything other than a point is rejected.
    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<()> {
        self.geometry = geometry.into_point()?;
        Ok(())
    }

    pub fn side_of_river(&self) -> Option<SideOfRiver> {
        self.side_of_river
    }

    pub fn set_side_of_river(&mut self, side: Option<&str>) -> Result<()> {
        self.side_of_river = side.map(str::parse::<SideOfRiver>).transpose()?;
        Ok(())
    }

    pub fn is_subtype(&self, subtype: PointSubtype) -> bool {
        self.subtype == Some(subtype)
    }

    /// `reach_id_pointtype_subtype`, with `null` for a missing subtype.
    pub fn type_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.reach_id,
            self.point_type.as_str(),
            self.subtype.map(|s| s.as_str()).unwrap_or("null")
        )
    }

    /// Moves the point onto the network and records the matched edge.
    ///
    /// Returns `false`, leaving the point untouched, when the location has no
    /// network coverage.
    pub fn snap_to_network(&mut self, network: &dyn HydroNetwork) -> Result<bool> {
        if let Some(sr) = self.geometry.spatial_reference {
            if !sr.is_equivalent(&SpatialReference::WGS84) {
                return Err(ReachError::ReferenceMismatch {
                    left: sr.to_string(),
                    right: SpatialReference::WGS84.to_string(),
                });
            }
        }

        match network.snap_point(self.geometry.x, self.geometry.y)? {
            Some(snap) => {
                self.geometry = snap.geometry;
                self.nhdplus_measure = Some(snap.measure);
                self.nhdplus_reach_id = Some(snap.edge_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn attributes(&self) -> Attributes {
        let values: [AttributeValue; 14] = [
            self.reach_id.as_str().into(),
            self.type_id().as_str().into(),
            self.point_type.as_str().into(),
            self.subtype.map(|s| s.as_str()).into(),
            self.uid.as_str().into(),
            self.name.clone().into(),
            self.side_of_river.map(|s| s.as_str()).into(),
            self.collection_method.clone().into(),
            self.update_date.into(),
            self.notes.clone().into(),
            self.description.clone().into(),
            self.difficulty.clone().into(),
            self.nhdplus_measure.into(),
            self.nhdplus_reach_id.into(),
        ];
        Self::FIELDS
            .iter()
            .map(|k| k.to_string())
            .zip(values)
            .collect()
    }

    pub fn as_feature(&self) -> Feature {
        Feature::new(Some(self.geometry.clone().into()), self.attributes())
    }

    /// Rebuilds a point from a stored feature.
    pub fn from_feature(feature: &Feature) -> Result<Self> {
        let geometry = feature.geometry.clone().ok_or_else(|| ReachError::UnsupportedGeometryType {
            expected: "point",
            actual: "no geometry".to_string(),
        })?;
        let reach_id = feature.text("reach_id").ok_or_else(|| ReachError::InvalidParameter {
            name: "reach_id",
            reason: "stored point has no reach_id".to_string(),
        })?;
        let point_type: PointType = feature
            .text("point_type")
            .as_deref()
            .unwrap_or("access")
            .parse()?;

        let mut point = Self::new(&reach_id, geometry, point_type)?;
        point.subtype = feature.text("subtype").map(|s| s.parse::<PointSubtype>()).transpose()?;
        if let Some(uid) = feature.text("uid") {
            point.uid = uid;
        }
        point.name = feature.text("name");
        point.set_side_of_river(feature.text("side_of_river").as_deref())?;
        point.collection_method = feature.text("collection_method");
        point.update_date = feature.attribute("update_date").and_then(AttributeValue::as_datetime);
        point.notes = feature.text("notes");
        point.description = feature.text("description");
        point.difficulty = feature.text("difficulty");
        point.nhdplus_measure = feature.attribute("nhdplus_measure").and_then(AttributeValue::as_f64);
        point.nhdplus_reach_id = feature.attribute("nhdplus_reach_id").and_then(AttributeValue::as_i64);
        Ok(point)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
