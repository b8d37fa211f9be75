//! Service configuration.
//!
//! Settings come from an optional TOML file, with every field defaulted so a
//! bare run works against the public endpoints. A `.env` file is loaded first;
//! `DATABASE_URL` and `ARCGIS_TOKEN` from the environment override the file.

use crate::model::{ReachError, Result};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POINT_INDEXING_URL: &str = "https://ofmpub.epa.gov/waters10/PointIndexing.Service";
pub const DEFAULT_NAVIGATION_URL: &str = "https://ofmpub.epa.gov/waters10/Navigation.Service";
pub const DEFAULT_UPDOWN_URL: &str = "https://ofmpub.epa.gov/waters10/UpstreamDownStream.Service";
pub const DEFAULT_HYDROLOGY_URL: &str =
    "https://hydro.arcgis.com/arcgis/rest/services/Tools/Hydrology/GPServer";
pub const DEFAULT_GEOMETRY_URL: &str =
    "https://utility.arcgisonline.com/ArcGIS/rest/services/Geometry/GeometryServer";
pub const DEFAULT_WHITEWATER_URL: &str = "https://www.americanwhitewater.org/content/River/detail/id";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub services: ServiceConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    pub hydrology: HydrologyConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub point_indexing_url: String,
    pub navigation_url: String,
    pub updown_url: String,
    /// Geoprocessing server hosting the Watershed and TraceDownstream tasks.
    /// Leaving it unset disables the fallback path.
    pub hydrology_url: Option<String>,
    pub geometry_url: String,
    pub whitewater_url: String,
    /// ArcGIS token for the hydrology and geometry services.
    pub token: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            point_indexing_url: DEFAULT_POINT_INDEXING_URL.to_string(),
            navigation_url: DEFAULT_NAVIGATION_URL.to_string(),
            updown_url: DEFAULT_UPDOWN_URL.to_string(),
            hydrology_url: Some(DEFAULT_HYDROLOGY_URL.to_string()),
            geometry_url: DEFAULT_GEOMETRY_URL.to_string(),
            whitewater_url: DEFAULT_WHITEWATER_URL.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl HttpConfig {
    pub fn build_client(&self) -> Result<reqwest::blocking::Client> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;
        Ok(client)
    }
}

/// Attempt ceilings for each retry loop in the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub network_attempts: u32,
    pub trace_rounds: u32,
    pub fallback_attempts: u32,
    pub smooth_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network_attempts: 10,
            trace_rounds: 5,
            fallback_attempts: 10,
            smooth_attempts: 5,
            delay_ms: 0,
        }
    }
}

impl RetryConfig {
    fn policy(&self, attempts: u32) -> RetryPolicy {
        RetryPolicy::immediate(attempts).with_delay(Duration::from_millis(self.delay_ms))
    }

    pub fn network(&self) -> RetryPolicy {
        self.policy(self.network_attempts)
    }

    pub fn trace_rounds(&self) -> RetryPolicy {
        self.policy(self.trace_rounds)
    }

    pub fn fallback(&self) -> RetryPolicy {
        self.policy(self.fallback_attempts)
    }

    pub fn smooth(&self) -> RetryPolicy {
        self.policy(self.smooth_attempts)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HydrologyConfig {
    pub source_database: String,
    pub snap_distance: f64,
    pub snap_distance_units: String,
    pub generalize: bool,
}

impl Default for HydrologyConfig {
    fn default() -> Self {
        Self {
            source_database: "Finest".to_string(),
            snap_distance: 10.0,
            snap_distance_units: "Meters".to_string(),
            generalize: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub line_table: String,
    pub centroid_table: String,
    pub point_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            line_table: "reach_line".to_string(),
            centroid_table: "reach_centroid".to_string(),
            point_table: "reach_point".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Config> {
        toml::from_str(text).map_err(|e| ReachError::Config(e.to_string()))
    }

    /// Loads `.env`, then the TOML file if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ReachError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.database_url = Some(url);
        }
        if let Some(token) = lookup("ARCGIS_TOKEN") {
            self.services.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(ReachError::Config("http.timeout_secs must be positive".into()));
        }
        for table in [
            &self.store.line_table,
            &self.store.centroid_table,
            &self.store.point_table,
        ] {
            crate::store::pg::validate_table_name(table)?;
        }
        Ok(())
    }
}
