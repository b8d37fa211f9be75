use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use reach_service::config::Config;
use reach_service::geometry::ArcGisGeometryService;
use reach_service::ingest::hydrology::{HydrologyClient, HydrologyParams, HydrologyService};
use reach_service::ingest::waters::WatersClient;
use reach_service::ingest::whitewater::WhitewaterClient;
use reach_service::logging::{self, LogLevel, Service};
use reach_service::retry::CancelToken;
use reach_service::store::{self, LayerKind, MemoryReachLayer, PgReachLayer, ReachLayer};
use reach_service::{Reach, TraceOrchestrator, TraceState, verify};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reach_service", version, about = "Trace whitewater reaches onto the river network")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append log entries to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Include debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download, trace and publish reaches by AW reach id
    Trace {
        #[arg(required = true)]
        reach_ids: Vec<String>,

        /// Publish to memory instead of the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Check that every remote service is answering
    Verify {
        /// Also write a markdown report to this path
        #[arg(long)]
        markdown: Option<PathBuf>,
    },
}

struct Sinks {
    line: Box<dyn ReachLayer>,
    centroid: Box<dyn ReachLayer>,
    points: Box<dyn ReachLayer>,
}

fn open_sinks(config: &Config, dry_run: bool) -> anyhow::Result<Sinks> {
    if dry_run {
        return Ok(Sinks {
            line: Box::new(MemoryReachLayer::new(LayerKind::Line)),
            centroid: Box::new(MemoryReachLayer::new(LayerKind::Centroid)),
            points: Box::new(MemoryReachLayer::new(LayerKind::Points)),
        });
    }

    let Some(url) = config.store.database_url.as_deref() else {
        bail!("DATABASE_URL is not set; pass --dry-run to trace without publishing");
    };
    let open = |kind: LayerKind, table: &str| -> anyhow::Result<Box<dyn ReachLayer>> {
        let mut layer = PgReachLayer::connect(url, kind, table)
            .with_context(|| format!("connecting {} layer", kind))?;
        layer.ensure_table().with_context(|| format!("creating table {}", table))?;
        Ok(Box::new(layer))
    };

    Ok(Sinks {
        line: open(LayerKind::Line, &config.store.line_table)?,
        centroid: open(LayerKind::Centroid, &config.store.centroid_table)?,
        points: open(LayerKind::Points, &config.store.point_table)?,
    })
}

/// Returns true when the reach was traced and its records published.
fn trace_one(
    reach_id: &str,
    aw: &WhitewaterClient,
    orchestrator: &TraceOrchestrator<'_>,
    sinks: &mut Sinks,
) -> anyhow::Result<bool> {
    let Some(raw) = aw.fetch_reach_json(reach_id)? else {
        logging::warn(Service::Whitewater, Some(reach_id), "reach does not exist on American Whitewater");
        return Ok(false);
    };

    let mut reach = Reach::from_aw_json(reach_id, &raw).context("parsing AW reach")?;
    reach.update_arcgis = Some(Utc::now().naive_utc());
    let state = reach.update_putin_takeout_and_trace(orchestrator);

    let report = store::publish(
        &reach,
        sinks.line.as_mut(),
        sinks.centroid.as_mut(),
        sinks.points.as_mut(),
    );
    Ok(matches!(state, TraceState::Traced(_)) && report.success())
}

fn run_trace(config: &Config, reach_ids: &[String], dry_run: bool) -> anyhow::Result<()> {
    let client = config.http.build_client()?;
    let services = &config.services;
    let cancel = CancelToken::new();

    let waters = WatersClient::new(
        client.clone(),
        &services.point_indexing_url,
        &services.navigation_url,
        &services.updown_url,
        config.retry.network(),
        cancel.clone(),
    );
    let geometry = ArcGisGeometryService::new(client.clone(), &services.geometry_url, services.token.clone());
    let hydrology = services
        .hydrology_url
        .as_deref()
        .map(|url| HydrologyClient::new(client.clone(), url, services.token.clone()));
    let aw = WhitewaterClient::new(client, &services.whitewater_url, config.retry.network(), cancel.clone());

    let mut orchestrator = TraceOrchestrator::new(&waters, &geometry)
        .with_params(HydrologyParams::from_config(&config.hydrology)?)
        .with_retry(&config.retry)
        .with_cancel(cancel);
    if let Some(hydrology) = hydrology.as_ref() {
        orchestrator = orchestrator.with_fallback(hydrology as &dyn HydrologyService);
    }

    let mut sinks = open_sinks(config, dry_run)?;

    let mut traced = 0;
    for reach_id in reach_ids {
        match trace_one(reach_id, &aw, &orchestrator, &mut sinks) {
            Ok(true) => traced += 1,
            Ok(false) => {}
            Err(e) => logging::error(Service::System, Some(reach_id), &format!("{:#}", e)),
        }
    }

    logging::log_batch_summary(reach_ids.len(), traced, reach_ids.len() - traced);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    logging::init_logger(level, cli.log_file.as_deref(), cli.log_file.is_some());

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Trace { reach_ids, dry_run } => run_trace(&config, &reach_ids, dry_run),
        Command::Verify { markdown } => {
            let report = verify::run_full_verification(&config)?;
            verify::print_summary(&report);
            if let Some(path) = markdown {
                std::fs::write(&path, verify::generate_markdown_report(&report))
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Ok(())
        }
    }
}
