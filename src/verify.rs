//! Service Availability Verification
//!
//! Probes each remote service the trace pipeline depends on with a known
//! reach and location, and reports which are reachable and answering with
//! usable data. Run it before a large batch to tell a coverage gap apart from
//! an outage.

use crate::config::Config;
use crate::geometry::{ArcGisGeometryService, GeometryService};
use crate::ingest::waters::{HydroNetwork, WatersClient};
use crate::ingest::whitewater::WhitewaterClient;
use crate::ingest::hydrology::{TRACE_DOWNSTREAM_TASK, WATERSHED_TASK};
use crate::model::{Result, WKID_WGS84};
use crate::retry::{CancelToken, RetryPolicy};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// White Salmon, BZ Corner to Husum: well covered by every service.
pub const PROBE_REACH_ID: &str = "3066";
pub const PROBE_LOCATION: (f64, f64) = (-121.634402, 45.794848);

const WEB_MERCATOR: u32 = 3857;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub results: Vec<ServiceVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceVerification {
    pub service: String,
    pub endpoint: String,
    pub status: VerificationStatus,
    pub responsive: bool,
    pub detail: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
    Skipped,
}

impl ServiceVerification {
    fn new(service: &str, endpoint: &str) -> Self {
        Self {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
            status: VerificationStatus::Failed,
            responsive: false,
            detail: None,
            error_message: None,
        }
    }
}

// ============================================================================
// WATERS
// ============================================================================

pub fn verify_waters(waters: &WatersClient, point_indexing_url: &str) -> ServiceVerification {
    let mut result = ServiceVerification::new("WATERS", point_indexing_url);
    let (x, y) = PROBE_LOCATION;

    match waters.snap_point(x, y) {
        Ok(Some(snap)) => {
            result.responsive = true;
            match waters.trace_downstream(snap.edge_id, snap.measure) {
                Ok(line) => {
                    result.status = VerificationStatus::Success;
                    result.detail = Some(format!(
                        "edge {} snapped, downstream trace has {} vertices",
                        snap.edge_id,
                        line.coord_count()
                    ));
                }
                Err(e) => {
                    result.status = VerificationStatus::PartialSuccess;
                    result.error_message = Some(format!("navigation failed: {}", e));
                }
            }
        }
        Ok(None) => {
            result.responsive = true;
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some("probe location reported as outside coverage".to_string());
        }
        Err(e) => {
            result.error_message = Some(format!("point indexing failed: {}", e));
        }
    }

    result
}

// ============================================================================
// Hydrology geoprocessing
// ============================================================================

/// Task names listed in a geoprocessing service description.
pub fn listed_tasks(description: &Value) -> Vec<String> {
    description
        .get("tasks")
        .and_then(Value::as_array)
        .map(|tasks| {
            tasks
                .iter()
                .filter_map(|t| t.as_str().or_else(|| t.get("name").and_then(Value::as_str)))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn verify_hydrology(client: &reqwest::blocking::Client, endpoint: Option<&str>) -> ServiceVerification {
    let Some(endpoint) = endpoint else {
        let mut result = ServiceVerification::new("Hydrology", "(not configured)");
        result.status = VerificationStatus::Skipped;
        return result;
    };
    let mut result = ServiceVerification::new("Hydrology", endpoint);

    let response = client
        .get(endpoint)
        .query(&[("f", "json")])
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.json::<Value>());

    match response {
        Ok(description) => {
            result.responsive = true;
            let tasks = listed_tasks(&description);
            let missing: Vec<&str> = [WATERSHED_TASK, TRACE_DOWNSTREAM_TASK]
                .into_iter()
                .filter(|task| !tasks.iter().any(|t| t == task))
                .collect();

            if missing.is_empty() {
                result.status = VerificationStatus::Success;
                result.detail = Some(format!("{} tasks published", tasks.len()));
            } else {
                result.status = VerificationStatus::PartialSuccess;
                result.error_message = Some(format!("missing tasks: {}", missing.join(", ")));
            }
        }
        Err(e) => {
            result.error_message = Some(format!("request failed: {}", e));
        }
    }

    result
}

// ============================================================================
// Geometry service
// ============================================================================

pub fn verify_geometry(service: &dyn GeometryService, endpoint: &str) -> ServiceVerification {
    let mut result = ServiceVerification::new("Geometry", endpoint);

    match service.find_transformation(WKID_WGS84, WEB_MERCATOR) {
        Ok(transformation) => {
            result.responsive = true;
            result.status = VerificationStatus::Success;
            result.detail = Some(match transformation.and_then(|t| t.wkid()) {
                Some(wkid) => format!("transformation {} available", wkid),
                None => "no transformation required".to_string(),
            });
        }
        Err(e) => {
            result.error_message = Some(format!("findTransformations failed: {}", e));
        }
    }

    result
}

// ============================================================================
// American Whitewater
// ============================================================================

pub fn verify_whitewater(aw: &WhitewaterClient, base_url: &str) -> ServiceVerification {
    let mut result = ServiceVerification::new("American Whitewater", base_url);

    match aw.fetch_reach_json(PROBE_REACH_ID) {
        Ok(Some(_)) => {
            result.responsive = true;
            result.status = VerificationStatus::Success;
            result.detail = Some(format!("reach {} downloaded", PROBE_REACH_ID));
        }
        Ok(None) => {
            result.responsive = true;
            result.status = VerificationStatus::PartialSuccess;
            result.error_message = Some(format!("reach {} came back empty", PROBE_REACH_ID));
        }
        Err(e) => {
            result.error_message = Some(format!("download failed: {}", e));
        }
    }

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

fn summarize(results: &[ServiceVerification]) -> VerificationSummary {
    let checked: Vec<&ServiceVerification> = results
        .iter()
        .filter(|r| r.status != VerificationStatus::Skipped)
        .collect();
    let working = checked
        .iter()
        .filter(|r| matches!(r.status, VerificationStatus::Success | VerificationStatus::PartialSuccess))
        .count();
    VerificationSummary {
        total: checked.len(),
        working,
        failed: checked.len() - working,
    }
}

/// Probes every configured service once, without retries.
pub fn run_full_verification(config: &Config) -> Result<VerificationReport> {
    let client = config.http.build_client()?;
    let services = &config.services;
    let single = RetryPolicy::immediate(1);
    let cancel = CancelToken::new();

    let waters = WatersClient::new(
        client.clone(),
        &services.point_indexing_url,
        &services.navigation_url,
        &services.updown_url,
        single,
        cancel.clone(),
    );
    let geometry = ArcGisGeometryService::new(client.clone(), &services.geometry_url, services.token.clone());
    let aw = WhitewaterClient::new(client.clone(), &services.whitewater_url, single, cancel);

    let results = vec![
        verify_waters(&waters, &services.point_indexing_url),
        verify_hydrology(&client, services.hydrology_url.as_deref()),
        verify_geometry(&geometry, &services.geometry_url),
        verify_whitewater(&aw, &services.whitewater_url),
    ];

    Ok(VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        summary: summarize(&results),
        results,
    })
}

fn status_mark(status: &VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Success => "OK",
        VerificationStatus::PartialSuccess => "PARTIAL",
        VerificationStatus::Failed => "FAILED",
        VerificationStatus::Skipped => "SKIPPED",
    }
}

pub fn print_summary(report: &VerificationReport) {
    println!("\n{}", "=".repeat(60));
    println!("SERVICE VERIFICATION SUMMARY ({})", report.timestamp);
    println!("{}", "=".repeat(60));
    for result in &report.results {
        let note = result
            .error_message
            .as_deref()
            .or(result.detail.as_deref())
            .unwrap_or("");
        println!("  {:<20} {:<8} {}", result.service, status_mark(&result.status), note);
    }
    println!();
    println!(
        "Services: {}/{} working ({} failed)",
        report.summary.working, report.summary.total, report.summary.failed
    );
    println!("{}", "=".repeat(60));
}

pub fn generate_markdown_report(report: &VerificationReport) -> String {
    let mut md = format!("# Service Verification\n\nGenerated: {}\n\n", report.timestamp);
    md.push_str("| Service | Endpoint | Status | Notes |\n");
    md.push_str("|---------|----------|--------|-------|\n");
    for result in &report.results {
        let note = result
            .error_message
            .as_deref()
            .or(result.detail.as_deref())
            .unwrap_or("");
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            result.service,
            result.endpoint,
            status_mark(&result.status),
            note
        ));
    }
    md.push_str(&format!(
        "\n**{}/{} services working**\n",
        report.summary.working, report.summary.total
    ));
    md
}
