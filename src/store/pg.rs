/// PostgreSQL-backed reach layer
///
/// Each layer is one table holding a row per feature. Geometry is stored as
/// Esri JSON text and attributes as a JSON object, so the same table shape
/// serves the line, centroid and point layers.
///
/// Prerequisites:
/// - PostgreSQL reachable at `DATABASE_URL`
/// - Tables created with [`PgReachLayer::ensure_table`] or an equivalent migration

use crate::model::{Attributes, Feature, Geometry, ReachError, Result};
use crate::reach::Reach;
use crate::store::{LayerKind, ReachLayer, features_for};
use postgres::{Client, NoTls};
use regex::Regex;
use std::sync::OnceLock;

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("table name pattern is valid")
    })
}

/// Table names are interpolated into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
pub fn validate_table_name(table: &str) -> Result<()> {
    if table_pattern().is_match(table) {
        Ok(())
    } else {
        Err(ReachError::Config(format!("invalid table name '{}'", table)))
    }
}

/// Serializes a feature into its `(geometry, attributes)` columns.
pub fn encode_feature(feature: &Feature) -> Result<(Option<String>, String)> {
    let geometry = feature.geometry.as_ref().map(serde_json::to_string).transpose()?;
    let attributes = serde_json::to_string(&feature.attributes)?;
    Ok((geometry, attributes))
}

pub fn decode_feature(geometry: Option<&str>, attributes: &str) -> Result<Feature> {
    let geometry = geometry.map(serde_json::from_str::<Geometry>).transpose()?;
    let attributes: Attributes = serde_json::from_str(attributes)?;
    Ok(Feature::new(geometry, attributes))
}

pub struct PgReachLayer {
    client: Client,
    kind: LayerKind,
    table: String,
}

impl PgReachLayer {
    pub fn connect(database_url: &str, kind: LayerKind, table: &str) -> Result<Self> {
        let client = Client::connect(database_url, NoTls)?;
        Self::from_client(client, kind, table)
    }

    pub fn from_client(client: Client, kind: LayerKind, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            client,
            kind,
            table: table.to_string(),
        })
    }

    pub fn ensure_table(&mut self) -> Result<()> {
        self.client.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id          BIGSERIAL PRIMARY KEY,
                reach_id    TEXT NOT NULL,
                geometry    TEXT,
                attributes  TEXT NOT NULL,
                written_at  TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
            );
            CREATE INDEX IF NOT EXISTS {index}_reach_id_idx ON {table} (reach_id);",
            table = self.table,
            index = self.table.replace('.', "_"),
        ))?;
        Ok(())
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (reach_id, geometry, attributes) VALUES ($1, $2, $3)",
            self.table
        )
    }
}

impl ReachLayer for PgReachLayer {
    fn kind(&self) -> LayerKind {
        self.kind
    }

    fn query_by_reach_id(&mut self, reach_id: &str) -> Result<Vec<Feature>> {
        let rows = self.client.query(
            &format!(
                "SELECT geometry, attributes FROM {} WHERE reach_id = $1 ORDER BY id",
                self.table
            ),
            &[&reach_id],
        )?;

        rows.iter()
            .map(|row| {
                let geometry: Option<String> = row.get(0);
                let attributes: String = row.get(1);
                decode_feature(geometry.as_deref(), &attributes)
            })
            .collect()
    }

    fn add(&mut self, reach: &Reach) -> Result<usize> {
        self.write(reach, false)
    }

    fn update(&mut self, reach: &Reach) -> Result<usize> {
        self.write(reach, true)
    }
}

/// Encodes every feature of `reach` for this layer before anything is written.
pub fn encode_rows(kind: LayerKind, reach: &Reach) -> Result<Vec<(Option<String>, String)>> {
    features_for(kind, reach).iter().map(encode_feature).collect()
}

impl PgReachLayer {
    /// Inserts all rows for the reach in one transaction, first clearing the
    /// existing rows when `replace` is set. Nothing is kept if any row fails.
    fn write(&mut self, reach: &Reach, replace: bool) -> Result<usize> {
        let rows = encode_rows(self.kind, reach)?;
        let sql = self.insert_sql();

        let mut transaction = self.client.transaction()?;
        if replace {
            transaction.execute(
                &format!("DELETE FROM {} WHERE reach_id = $1", self.table),
                &[&reach.reach_id],
            )?;
        }
        for (geometry, attributes) in &rows {
            transaction.execute(&sql, &[&reach.reach_id, geometry, attributes])?;
        }
        transaction.commit()?;
        Ok(rows.len())
    }
}
