/// End-to-end trace scenarios against in-process service doubles
///
/// These tests verify:
/// 1. A reach fully covered by the primary network traces on it
/// 2. A put-in outside primary coverage falls back to the hydrology service
/// 3. When both services fail the reach ends up Failed but still has a centroid
/// 4. Re-tracing with identical responses gives identical geometry
/// 5. A traced reach publishes to all three sinks and reloads unchanged

mod common;

use common::{IdentityGeometry, MockHydrology, MockNetwork, PUTIN, TAKEOUT, river, white_salmon};
use reach_service::store::{self, LayerKind, MemoryReachLayer};
use reach_service::trace::PUTIN_NOT_ON_NETWORK;
use reach_service::{Reach, TraceMethod, TraceOrchestrator, TraceState};
use serde_json::json;

fn assert_close(a: [f64; 2], b: [f64; 2]) {
    assert!(
        (a[0] - b[0]).abs() < 1e-6 && (a[1] - b[1]).abs() < 1e-6,
        "{:?} != {:?}",
        a,
        b
    );
}

// ---------------------------------------------------------------------------
// Primary network
// ---------------------------------------------------------------------------

#[test]
fn test_primary_network_traces_covered_reach() {
    let network = MockNetwork::covering();
    let geometry = IdentityGeometry::default();
    let orchestrator = TraceOrchestrator::new(&network, &geometry);
    let mut reach = white_salmon();

    let state = reach.update_putin_takeout_and_trace(&orchestrator);

    assert_eq!(state, TraceState::Traced(TraceMethod::PrimaryNetwork));
    assert!(!reach.error);
    assert_eq!(reach.notes, None);
    assert_eq!(reach.tracing_method, Some(TraceMethod::PrimaryNetwork));
    assert_eq!(
        reach.attributes()["tracing_method"],
        reach_service::model::AttributeValue::from("primary network")
    );

    let line = reach.geometry().expect("traced reach has a line");
    assert!(line.coord_count() >= 2);
    assert_close(line.first_coord().unwrap(), river().first_coord().unwrap());

    // both accesses now sit on the network
    let putin = reach.putin().unwrap();
    let takeout = reach.takeout().unwrap();
    assert!(putin.nhdplus_reach_id.is_some());
    assert!(takeout.nhdplus_reach_id.is_some());
    assert!(takeout.nhdplus_reach_id >= putin.nhdplus_reach_id);
}

#[test]
fn test_primary_trace_is_idempotent() {
    let network = MockNetwork::covering();
    let geometry = IdentityGeometry::default();
    let orchestrator = TraceOrchestrator::new(&network, &geometry);
    let mut reach = white_salmon();

    orchestrator.run(&mut reach);
    let first = reach.geometry().cloned();
    assert_eq!(orchestrator.run(&mut reach), TraceState::Traced(TraceMethod::PrimaryNetwork));
    let second = reach.geometry().cloned();

    assert!(first.is_some());
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

#[test]
fn test_fallback_traces_when_putin_is_outside_coverage() {
    let network = MockNetwork::without_coverage();
    let geometry = IdentityGeometry::default();
    let hydrology = MockHydrology::tracing(river(), 0.0005);
    let orchestrator = TraceOrchestrator::new(&network, &geometry).with_fallback(&hydrology);
    let mut reach = white_salmon();

    let state = orchestrator.run(&mut reach);

    assert_eq!(state, TraceState::Traced(TraceMethod::FallbackElevation));
    assert!(!reach.error);
    assert_eq!(reach.tracing_method, Some(TraceMethod::FallbackElevation));
    assert_eq!(reach.notes.as_deref(), Some(PUTIN_NOT_ON_NETWORK));
    assert_eq!(hydrology.watershed_calls.get(), 1);
    assert_eq!(hydrology.trace_calls.get(), 1);

    // trimmed line is long enough to be smoothed
    assert_eq!(geometry.densified.get(), 1);
    assert_eq!(geometry.simplified.get(), 1);

    let line = reach.geometry().expect("fallback produced a line");
    let putin = reach.putin().unwrap().geometry().coord();
    let takeout = reach.takeout().unwrap().geometry().coord();
    assert_close(line.first_coord().unwrap(), putin);
    assert_close(line.last_coord().unwrap(), takeout);
    // take-out was moved onto the trace, upstream of its end
    assert!(takeout[1] > river().last_coord().unwrap()[1]);
}

#[test]
fn test_short_fallback_line_is_not_smoothed() {
    let network = MockNetwork::without_coverage();
    let geometry = IdentityGeometry::default();
    let short = reach_service::model::Polyline::new(
        vec![vec![[PUTIN.0, PUTIN.1], [TAKEOUT.0, TAKEOUT.1 - 0.01]]],
        Some(reach_service::model::SpatialReference::WGS84),
    );
    let hydrology = MockHydrology::tracing(short, 0.0005);
    let orchestrator = TraceOrchestrator::new(&network, &geometry).with_fallback(&hydrology);
    let mut reach = white_salmon();

    assert_eq!(orchestrator.run(&mut reach), TraceState::Traced(TraceMethod::FallbackElevation));
    assert_eq!(geometry.densified.get(), 0);
    assert_eq!(reach.geometry().unwrap().coord_count(), 2);
}

#[test]
fn test_both_services_failing_leaves_reach_failed() {
    let network = MockNetwork::without_coverage();
    let geometry = IdentityGeometry::default();
    let hydrology = MockHydrology::unavailable();
    let orchestrator = TraceOrchestrator::new(&network, &geometry).with_fallback(&hydrology);
    let mut reach = white_salmon();

    let state = orchestrator.run(&mut reach);

    assert_eq!(state, TraceState::Failed);
    assert!(reach.error);
    assert!(reach.geometry().is_none());
    assert_eq!(reach.tracing_method, None);
    assert_eq!(hydrology.watershed_calls.get(), 10);
    assert_eq!(hydrology.trace_calls.get(), 0);

    let notes = reach.notes.as_deref().unwrap();
    assert!(notes.contains(PUTIN_NOT_ON_NETWORK), "{}", notes);
    assert!(notes.contains("HTTP 503"), "{}", notes);

    let centroid = reach.centroid().unwrap();
    assert!((centroid.x - (PUTIN.0 + TAKEOUT.0) / 2.0).abs() < 1e-9);
    assert!((centroid.y - (PUTIN.1 + TAKEOUT.1) / 2.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// AW document through publish
// ---------------------------------------------------------------------------

#[test]
fn test_aw_reach_traces_publishes_and_reloads() {
    let raw = json!({
        "CContainerViewJSON_view": {
            "CRiverMainGadgetJSON_main": {
                "info": {
                    "river": "White Salmon",
                    "section": "BZ Corner to Husum",
                    "class": "IV-V(V+)",
                    "edited": "2021-04-02 09:15:00",
                    "plon": PUTIN.0,
                    "plat": PUTIN.1,
                    "tlon": TAKEOUT.0,
                    "tlat": TAKEOUT.1
                }
            }
        }
    });
    let mut reach = Reach::from_aw_json("3066", &raw).unwrap();
    assert_eq!(reach.difficulty_outlier(), Some("V+"));

    let network = MockNetwork::covering();
    let geometry = IdentityGeometry::default();
    reach.update_putin_takeout_and_trace(&TraceOrchestrator::new(&network, &geometry));

    let mut line = MemoryReachLayer::new(LayerKind::Line);
    let mut centroid = MemoryReachLayer::new(LayerKind::Centroid);
    let mut points = MemoryReachLayer::new(LayerKind::Points);
    let report = store::publish(&reach, &mut line, &mut centroid, &mut points);
    assert!(report.success());
    assert_eq!(report.line, store::SinkStatus::Written(1));

    let loaded = store::load_reach("3066", &mut line, &mut centroid, &mut points)
        .unwrap()
        .unwrap();
    assert_eq!(loaded, reach);
}
