//! Geometry operations used by the trace pipeline.
//!
//! Snapping, splitting and merging are local vector math on the typed
//! geometries in [`crate::model`]. Coordinate transformation, densify and
//! simplify are delegated to a remote [`GeometryService`].
//!
//! Submodules:
//! - `merge`: joins flow-line segments that share endpoints.
//! - `spline`: order-2 parametric spline fit used by [`smooth`].
//! - `service`: the remote geometry service seam and its REST client.

pub mod merge;
pub mod service;
pub mod spline;

pub use merge::merge_lines;
pub use service::{ArcGisGeometryService, GeometryService, Transformation};

use crate::logging::{self, Service};
use crate::model::{
    Coord, Geometry, Point, Polygon, Polyline, ReachError, Result, SpatialReference,
};
use crate::retry::{CancelToken, RetryPolicy};
use geo::{Closest, ClosestPoint, EuclideanDistance};

/// Tolerance (in coordinate units) below which consecutive spline control
/// points are treated as one.
pub const SPLINE_SMOOTHING: f64 = 1e-6;

/// Spline output carries this many points per input vertex.
pub const SPLINE_DENSITY: usize = 5;

// ---------------------------------------------------------------------------
// Spatial reference checks
// ---------------------------------------------------------------------------

/// Both references must be defined and equivalent.
///
/// `what_a`/`what_b` name the geometries in the advisory error.
pub fn require_matching_references(
    a: Option<SpatialReference>,
    what_a: &'static str,
    b: Option<SpatialReference>,
    what_b: &'static str,
) -> Result<()> {
    let a = a.ok_or(ReachError::UndefinedReference(what_a))?;
    let b = b.ok_or(ReachError::UndefinedReference(what_b))?;
    if a.is_equivalent(&b) {
        Ok(())
    } else {
        Err(ReachError::ReferenceMismatch {
            left: a.to_string(),
            right: b.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Nearest location on a line
// ---------------------------------------------------------------------------

/// Where a coordinate falls when projected onto a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineLocation {
    pub path: usize,
    /// Index of the segment start vertex within the path.
    pub segment: usize,
    /// Projected coordinate.
    pub coord: Coord,
    pub distance: f64,
}

fn geo_point(c: Coord) -> geo::Point<f64> {
    geo::Point::new(c[0], c[1])
}

/// Closest coordinate on the segment `a`-`b`. A zero-length segment has no
/// unique answer, so its start stands in.
fn closest_on_segment(p: &geo::Point<f64>, a: Coord, b: Coord) -> Coord {
    match geo::Line::new(geo_point(a), geo_point(b)).closest_point(p) {
        Closest::Intersection(c) | Closest::SinglePoint(c) => [c.x(), c.y()],
        Closest::Indeterminate => a,
    }
}

/// Finds the location on `line` nearest to `coord`. Ties go to the first segment.
pub fn locate_on_line(line: &Polyline, coord: Coord) -> Option<LineLocation> {
    let target = geo_point(coord);
    let mut best: Option<LineLocation> = None;
    let mut consider = |path: usize, segment: usize, on_line: Coord| {
        let distance = target.euclidean_distance(&geo_point(on_line));
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(LineLocation { path, segment, coord: on_line, distance });
        }
    };

    for (pi, path) in line.paths.iter().enumerate() {
        if let [only] = path.as_slice() {
            consider(pi, 0, *only);
            continue;
        }
        for (si, pair) in path.windows(2).enumerate() {
            consider(pi, si, closest_on_segment(&target, pair[0], pair[1]));
        }
    }

    best
}

// ---------------------------------------------------------------------------
// Snap / split / trim
// ---------------------------------------------------------------------------

/// Returns a new point at the nearest location along `line`, in the line's reference.
pub fn snap_to_line(point: &Point, line: &Polyline) -> Result<Point> {
    require_matching_references(point.spatial_reference, "point", line.spatial_reference, "line")?;

    let location = locate_on_line(line, point.coord()).ok_or(ReachError::InvalidParameter {
        name: "line",
        reason: "line has no coordinates to snap to".to_string(),
    })?;

    Ok(Point::new(location.coord[0], location.coord[1], line.spatial_reference))
}

/// Splits `line` at the location nearest `point`, returning `[entry, exit]`.
///
/// The entry segment ends and the exit segment starts at the split location,
/// so appending the exit to the entry reproduces the original line. A split at
/// either end yields a zero-length side with the split coordinate repeated.
pub fn split_at_point(line: &Polyline, point: &Point) -> Result<[Polyline; 2]> {
    require_matching_references(line.spatial_reference, "line", point.spatial_reference, "point")?;

    let location = locate_on_line(line, point.coord()).ok_or(ReachError::InvalidParameter {
        name: "line",
        reason: "line has no coordinates to split".to_string(),
    })?;

    let split = location.coord;
    let path = &line.paths[location.path];

    let mut head: Vec<Coord> = path[..=location.segment].to_vec();
    if head.last() != Some(&split) {
        head.push(split);
    }
    if head.len() < 2 {
        head.push(split);
    }

    let mut tail: Vec<Coord> = vec![split];
    for c in &path[location.segment + 1..] {
        if tail.last() != Some(c) {
            tail.push(*c);
        }
    }
    if tail.len() < 2 {
        tail.push(split);
    }

    let mut entry_paths: Vec<Vec<Coord>> = line.paths[..location.path].to_vec();
    entry_paths.push(head);

    let mut exit_paths: Vec<Vec<Coord>> = vec![tail];
    exit_paths.extend_from_slice(&line.paths[location.path + 1..]);

    Ok([
        Polyline::new(entry_paths, line.spatial_reference),
        Polyline::new(exit_paths, line.spatial_reference),
    ])
}

/// The portion of `line` upstream of `point`.
pub fn trim_at_point(line: &Polyline, point: &Point) -> Result<Polyline> {
    let [entry, _] = split_at_point(line, point)?;
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Reprojection
// ---------------------------------------------------------------------------

/// Projects `geometry` into `target`, applying the best available transformation.
///
/// Equivalent references short-circuit without a service call. The result
/// always carries `target`, since the project response omits it.
pub fn reproject(
    geometry: &Geometry,
    target: SpatialReference,
    service: &dyn GeometryService,
) -> Result<Geometry> {
    let source = geometry
        .spatial_reference()
        .ok_or(ReachError::UndefinedReference("geometry to reproject"))?;

    if source.is_equivalent(&target) {
        return Ok(geometry.clone());
    }

    let in_wkid = source.code().ok_or(ReachError::UndefinedReference("geometry to reproject"))?;
    let out_wkid = target.code().ok_or(ReachError::UndefinedReference("target reference"))?;

    let transformation = service.find_transformation(in_wkid, out_wkid)?;
    let mut projected = service
        .project(std::slice::from_ref(geometry), in_wkid, out_wkid, transformation.as_ref())?
        .into_iter()
        .next()
        .ok_or_else(|| ReachError::Parse("project returned no geometries".to_string()))?;

    projected.set_spatial_reference(Some(target));
    Ok(projected)
}

/// Projects `geometry` into the spatial reference of `other`.
pub fn match_reference(
    geometry: &Geometry,
    other: &Geometry,
    service: &dyn GeometryService,
) -> Result<Geometry> {
    let target = other
        .spatial_reference()
        .ok_or(ReachError::UndefinedReference("geometry to match"))?;
    reproject(geometry, target, service)
}

// ---------------------------------------------------------------------------
// Smoothing
// ---------------------------------------------------------------------------

fn spline_paths(paths: &[Vec<Coord>], closed: bool) -> Vec<Vec<Coord>> {
    paths
        .iter()
        .map(|path| {
            let mut smoothed = spline::fit_quadratic(path, SPLINE_SMOOTHING, SPLINE_DENSITY);
            if closed {
                if let (Some(first), Some(last)) = (smoothed.first().copied(), smoothed.last_mut()) {
                    *last = first;
                }
            }
            smoothed
        })
        .collect()
}

/// Densify, spline-fit and simplify a line or polygon.
///
/// Densify and simplify are best-effort refinements: if the service keeps
/// failing past the retry ceiling, the geometry from the previous step is
/// carried forward. Cancellation is still surfaced.
pub fn smooth(
    geometry: &Geometry,
    segment_length: f64,
    service: &dyn GeometryService,
    policy: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Geometry> {
    if let Geometry::Point(_) = geometry {
        return Err(ReachError::UnsupportedGeometryType {
            expected: "polyline or polygon",
            actual: geometry.geometry_type().to_string(),
        });
    }
    if segment_length.is_nan() || segment_length <= 0.0 {
        return Err(ReachError::InvalidParameter {
            name: "segment_length",
            reason: format!("must be positive, got {}", segment_length),
        });
    }

    let densified = match policy.run(cancel, |_| service.densify(geometry, segment_length)) {
        Ok(g) => g,
        Err(ReachError::Cancelled) => return Err(ReachError::Cancelled),
        Err(e) => {
            logging::log_failure(Service::Geometry, None, "densify", &e);
            geometry.clone()
        }
    };

    let sr = densified.spatial_reference().or(geometry.spatial_reference());
    let splined = match &densified {
        Geometry::Polyline(line) => Geometry::Polyline(Polyline::new(spline_paths(&line.paths, false), sr)),
        Geometry::Polygon(poly) => Geometry::Polygon(Polygon {
            rings: spline_paths(&poly.rings, true),
            spatial_reference: sr,
        }),
        Geometry::Point(_) => densified.clone(),
    };

    match policy.run(cancel, |_| service.simplify(&splined)) {
        Ok(mut g) => {
            if g.spatial_reference().is_none() {
                g.set_spatial_reference(sr);
            }
            Ok(g)
        }
        Err(ReachError::Cancelled) => Err(ReachError::Cancelled),
        Err(e) => {
            logging::log_failure(Service::Geometry, None, "simplify", &e);
            Ok(splined)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use geo::EuclideanLength;
    use std::cell::Cell;

    fn wgs84_line(coords: &[Coord]) -> Polyline {
        Polyline::new(vec![coords.to_vec()], Some(SpatialReference::WGS84))
    }

    fn length(line: &Polyline) -> f64 {
        line.paths
            .iter()
            .map(|p| {
                let ls: geo::LineString<f64> = p.iter().map(|c| (c[0], c[1])).collect();
                ls.euclidean_length()
            })
            .sum()
    }

    fn rejoin(entry: &Polyline, exit: &Polyline) -> Vec<Coord> {
        let mut coords: Vec<Coord> = entry.paths.concat();
        coords.extend(exit.paths.concat().into_iter().skip(1));
        coords.dedup();
        coords
    }

    // --- snap_to_line -----------------------------------------------------

    #[test]
    fn test_snap_projects_orthogonally_onto_segment() {
        let line = wgs84_line(&[[0.0, 0.0], [10.0, 0.0]]);
        let snapped = snap_to_line(&Point::wgs84(3.0, 4.0), &line).unwrap();
        assert_eq!((snapped.x, snapped.y), (3.0, 0.0));
        assert_eq!(snapped.spatial_reference, Some(SpatialReference::WGS84));
    }

    #[test]
    fn test_snap_clamps_to_line_end() {
        let line = wgs84_line(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]);
        let snapped = snap_to_line(&Point::wgs84(14.0, 15.0), &line).unwrap();
        assert_eq!((snapped.x, snapped.y), (10.0, 10.0));
    }

    #[test]
    fn test_snap_is_never_farther_than_geo_closest_point() {
        let coords = [[0.0, 0.0], [2.0, 3.0], [5.0, 1.0], [7.0, 6.0], [9.0, -2.0]];
        let line = wgs84_line(&coords);
        let ls: geo::LineString<f64> = coords.iter().map(|c| (c[0], c[1])).collect();

        for (x, y) in [(1.0, 2.0), (4.0, 4.0), (8.0, 0.0), (-3.0, -3.0), (6.0, 2.5)] {
            let snapped = snap_to_line(&Point::wgs84(x, y), &line).unwrap();
            let ours = (snapped.x - x).hypot(snapped.y - y);
            let reference = match ls.closest_point(&geo::Point::new(x, y)) {
                geo::Closest::SinglePoint(p) | geo::Closest::Intersection(p) => {
                    (p.x() - x).hypot(p.y() - y)
                }
                geo::Closest::Indeterminate => panic!("closest point should be determinate"),
            };
            assert!(ours <= reference + 1e-9, "snap at ({}, {}) was {} vs {}", x, y, ours, reference);
        }
    }

    #[test]
    fn test_snap_skips_repeated_vertex() {
        let line = wgs84_line(&[[0.0, 0.0], [5.0, 0.0], [5.0, 0.0], [5.0, 5.0]]);
        let snapped = snap_to_line(&Point::wgs84(7.0, 3.0), &line).unwrap();
        assert_eq!((snapped.x, snapped.y), (5.0, 3.0));

        let location = locate_on_line(&line, [7.0, 3.0]).unwrap();
        assert_eq!(location.segment, 2);
        assert!((location.distance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_locate_on_single_vertex_path() {
        let line = Polyline::new(
            vec![vec![[1.0, 1.0]], vec![[10.0, 0.0], [20.0, 0.0]]],
            Some(SpatialReference::WGS84),
        );
        let location = locate_on_line(&line, [2.0, 1.0]).unwrap();
        assert_eq!((location.path, location.coord), (0, [1.0, 1.0]));
        let location = locate_on_line(&line, [15.0, 1.0]).unwrap();
        assert_eq!((location.path, location.segment, location.coord), (1, 0, [15.0, 0.0]));
    }

    #[test]
    fn test_snap_accepts_latest_wkid_alias() {
        let line = Polyline::new(
            vec![vec![[0.0, 0.0], [10.0, 0.0]]],
            Some(SpatialReference { wkid: Some(102100), latest_wkid: Some(3857) }),
        );
        let point = Point::new(5.0, 5.0, Some(SpatialReference::from_wkid(3857)));
        assert!(snap_to_line(&point, &line).is_ok());
    }

    #[test]
    fn test_snap_reference_mismatch_and_undefined() {
        let line = wgs84_line(&[[0.0, 0.0], [10.0, 0.0]]);
        let mercator = Point::new(1.0, 1.0, Some(SpatialReference::from_wkid(3857)));
        assert!(matches!(
            snap_to_line(&mercator, &line),
            Err(ReachError::ReferenceMismatch { .. })
        ));

        let bare = Point::new(1.0, 1.0, None);
        let err = snap_to_line(&bare, &line).unwrap_err();
        assert!(matches!(err, ReachError::UndefinedReference("point")));
        assert!(err.is_advisory());
    }

    // --- split / trim -----------------------------------------------------

    #[test]
    fn test_split_mid_segment_reconstructs_original() {
        let coords = [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [8.0, 4.0]];
        let line = wgs84_line(&coords);
        let [entry, exit] = split_at_point(&line, &Point::wgs84(4.0, 1.5)).unwrap();

        assert_eq!(entry.last_coord(), Some([4.0, 1.5]));
        assert_eq!(exit.first_coord(), Some([4.0, 1.5]));
        assert_eq!(entry.first_coord(), line.first_coord());
        assert_eq!(exit.last_coord(), line.last_coord());
        assert!((length(&entry) + length(&exit) - length(&line)).abs() < 1e-9);
        assert_eq!(rejoin(&entry, &exit), vec![[0.0, 0.0], [4.0, 0.0], [4.0, 1.5], [4.0, 4.0], [8.0, 4.0]]);
    }

    #[test]
    fn test_split_on_vertex_does_not_duplicate_it() {
        let line = wgs84_line(&[[0.0, 0.0], [4.0, 0.0], [4.0, 4.0]]);
        let [entry, exit] = split_at_point(&line, &Point::wgs84(4.0, 0.0)).unwrap();
        assert_eq!(entry.paths, vec![vec![[0.0, 0.0], [4.0, 0.0]]]);
        assert_eq!(exit.paths, vec![vec![[4.0, 0.0], [4.0, 4.0]]]);
    }

    #[test]
    fn test_split_at_ends_yields_zero_length_side() {
        let line = wgs84_line(&[[0.0, 0.0], [4.0, 0.0]]);

        let [entry, exit] = split_at_point(&line, &Point::wgs84(-1.0, 0.0)).unwrap();
        assert_eq!(entry.paths, vec![vec![[0.0, 0.0], [0.0, 0.0]]]);
        assert_eq!(exit.paths, line.paths);

        let [entry, exit] = split_at_point(&line, &Point::wgs84(9.0, 0.0)).unwrap();
        assert_eq!(entry.paths, line.paths);
        assert_eq!(exit.paths, vec![vec![[4.0, 0.0], [4.0, 0.0]]]);
    }

    #[test]
    fn test_split_multipath_keeps_other_paths_on_their_side() {
        let line = Polyline::new(
            vec![vec![[0.0, 0.0], [1.0, 0.0]], vec![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]],
            Some(SpatialReference::WGS84),
        );
        let [entry, exit] = split_at_point(&line, &Point::wgs84(2.5, 0.2)).unwrap();
        assert_eq!(entry.paths.len(), 2);
        assert_eq!(entry.paths[0], vec![[0.0, 0.0], [1.0, 0.0]]);
        assert_eq!(exit.paths, vec![vec![[2.5, 0.0], [3.0, 0.0]]]);
    }

    #[test]
    fn test_trim_is_first_split_segment() {
        let line = wgs84_line(&[[0.0, 0.0], [3.0, 3.0], [6.0, 0.0]]);
        for (x, y) in [(1.0, 1.0), (3.0, 3.0), (5.0, 1.0), (0.0, 0.0)] {
            let point = Point::wgs84(x, y);
            let [entry, _] = split_at_point(&line, &point).unwrap();
            assert_eq!(trim_at_point(&line, &point).unwrap(), entry);
        }
    }

    #[test]
    fn test_split_requires_matching_reference() {
        let line = wgs84_line(&[[0.0, 0.0], [4.0, 0.0]]);
        let point = Point::new(1.0, 0.0, Some(SpatialReference::from_wkid(3857)));
        assert!(matches!(
            split_at_point(&line, &point),
            Err(ReachError::ReferenceMismatch { .. })
        ));
    }

    // --- reproject --------------------------------------------------------

    /// Geometry service double that shifts x by 1000 and counts calls.
    struct ShiftingService {
        calls: Cell<u32>,
        transformation: Option<Transformation>,
        fail_densify: bool,
    }

    impl ShiftingService {
        fn new() -> Self {
            Self { calls: Cell::new(0), transformation: None, fail_densify: false }
        }
    }

    impl GeometryService for ShiftingService {
        fn find_transformation(&self, _in: u32, _out: u32) -> Result<Option<Transformation>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.transformation.clone())
        }

        fn project(
            &self,
            geometries: &[Geometry],
            _in: u32,
            _out: u32,
            _t: Option<&Transformation>,
        ) -> Result<Vec<Geometry>> {
            self.calls.set(self.calls.get() + 1);
            Ok(geometries
                .iter()
                .map(|g| match g {
                    Geometry::Point(p) => Geometry::Point(Point::new(p.x + 1000.0, p.y, None)),
                    other => other.clone(),
                })
                .collect())
        }

        fn densify(&self, geometry: &Geometry, _max: f64) -> Result<Geometry> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_densify {
                Err(ReachError::Parse("densify unavailable".into()))
            } else {
                Ok(geometry.clone())
            }
        }

        fn simplify(&self, geometry: &Geometry) -> Result<Geometry> {
            self.calls.set(self.calls.get() + 1);
            Ok(geometry.clone())
        }
    }

    #[test]
    fn test_reproject_same_reference_is_noop_without_calls() {
        let service = ShiftingService::new();
        let point: Geometry = Point::wgs84(-121.6, 45.7).into();
        let out = reproject(&point, SpatialReference::WGS84, &service).unwrap();
        assert_eq!(out, point);
        assert_eq!(service.calls.get(), 0);
    }

    #[test]
    fn test_reproject_stamps_target_reference() {
        let service = ShiftingService::new();
        let point: Geometry = Point::wgs84(1.0, 2.0).into();
        let target = SpatialReference::from_wkid(3857);
        let out = reproject(&point, target, &service).unwrap();
        assert_eq!(out, Geometry::Point(Point::new(1001.0, 2.0, Some(target))));
        assert_eq!(service.calls.get(), 2);
    }

    #[test]
    fn test_match_reference_uses_other_geometry_reference() {
        let service = ShiftingService::new();
        let point: Geometry = Point::wgs84(1.0, 2.0).into();
        let other: Geometry = Polyline::new(
            vec![vec![[0.0, 0.0], [1.0, 1.0]]],
            Some(SpatialReference::from_wkid(3857)),
        )
        .into();
        let out = match_reference(&point, &other, &service).unwrap();
        assert_eq!(out.spatial_reference(), Some(SpatialReference::from_wkid(3857)));
    }

    #[test]
    fn test_reproject_without_source_reference_is_advisory() {
        let service = ShiftingService::new();
        let point: Geometry = Point::new(1.0, 2.0, None).into();
        assert!(reproject(&point, SpatialReference::WGS84, &service).unwrap_err().is_advisory());
    }

    // --- smooth -----------------------------------------------------------

    #[test]
    fn test_smooth_rejects_points() {
        let service = ShiftingService::new();
        let point: Geometry = Point::wgs84(1.0, 2.0).into();
        let result = smooth(&point, 10.0, &service, &RetryPolicy::immediate(5), &CancelToken::new());
        assert!(matches!(result, Err(ReachError::UnsupportedGeometryType { .. })));
    }

    #[test]
    fn test_smooth_keeps_endpoints_and_densifies_output() {
        let service = ShiftingService::new();
        let line: Geometry = wgs84_line(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [20.0, 10.0]]).into();
        let out = smooth(&line, 5.0, &service, &RetryPolicy::immediate(5), &CancelToken::new())
            .unwrap()
            .into_polyline()
            .unwrap();
        assert_eq!(out.first_coord(), Some([0.0, 0.0]));
        assert_eq!(out.last_coord(), Some([20.0, 10.0]));
        assert_eq!(out.coord_count(), 4 * SPLINE_DENSITY);
        assert_eq!(out.spatial_reference, Some(SpatialReference::WGS84));
    }

    #[test]
    fn test_smooth_survives_exhausted_densify() {
        let mut service = ShiftingService::new();
        service.fail_densify = true;
        let line: Geometry = wgs84_line(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]).into();
        let out = smooth(&line, 5.0, &service, &RetryPolicy::immediate(5), &CancelToken::new());
        assert!(out.is_ok());
        // five failed densify attempts plus one simplify
        assert_eq!(service.calls.get(), 6);
    }

    #[test]
    fn test_smooth_closes_polygon_rings() {
        let service = ShiftingService::new();
        let poly: Geometry = Polygon {
            rings: vec![vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]],
            spatial_reference: Some(SpatialReference::WGS84),
        }
        .into();
        match smooth(&poly, 5.0, &service, &RetryPolicy::immediate(5), &CancelToken::new()).unwrap() {
            Geometry::Polygon(p) => assert_eq!(p.rings[0].first(), p.rings[0].last()),
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_smooth_propagates_cancellation() {
        let service = ShiftingService::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let line: Geometry = wgs84_line(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]).into();
        assert!(matches!(
            smooth(&line, 5.0, &service, &RetryPolicy::immediate(5), &cancel),
            Err(ReachError::Cancelled)
        ));
    }
}
