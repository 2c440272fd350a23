use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connection::Providers;
use crate::{TaskOutput, WharfError};

/// Declared intent of the destination table. Fact and dimension loads share
/// one algorithm; the role is metadata for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableRole {
    Fact,
    Dimension,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TableRole::Fact => "fact",
            TableRole::Dimension => "dimension",
        })
    }
}

/// Configuration for populating a derived table from staged data. The table
/// name and insert fragment come from the static task definition only; they
/// are never taken from run-time input.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub connection_id: String,
    pub table: String,
    pub insert_select: String,
    pub truncate: bool,
    pub role: TableRole,
}

pub(crate) async fn run(cfg: &TransformConfig, providers: &Providers) -> Result<TaskOutput, WharfError> {
    let warehouse = providers.connections.resolve(&cfg.connection_id).await?;

    if cfg.truncate {
        // Truncate-then-insert makes a re-run equivalent to a first run.
        debug!(table = %cfg.table, role = %cfg.role, "truncating destination table");
        warehouse
            .execute(&format!("TRUNCATE TABLE {}", cfg.table))
            .await
            .map_err(|err| WharfError::Load {
                table: cfg.table.clone(),
                message: format!("truncate failed: {err}"),
            })?;
    }

    let rows = warehouse
        .execute(&format!("INSERT INTO {} {}", cfg.table, cfg.insert_select))
        .await
        .map_err(|err| WharfError::Load {
            table: cfg.table.clone(),
            message: err.to_string(),
        })?;

    info!(table = %cfg.table, role = %cfg.role, rows, "load finished");
    let mut output = TaskOutput::new();
    output.insert("rows_inserted".into(), serde_json::json!(rows));
    output.insert("role".into(), serde_json::json!(cfg.role));
    Ok(output)
}
