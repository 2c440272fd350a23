use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::Providers;
use crate::{TaskOutput, WharfError};

/// Why a table failed the gate: the count query returned no row at all, or
/// it returned a zero count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFailure {
    NoResult,
    Empty,
}

impl fmt::Display for QualityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityFailure::NoResult => "no_result",
            QualityFailure::Empty => "empty",
        })
    }
}

/// Row-count gate over a declared list of tables. This is a hard gate: the
/// first failing table fails the task, which the engine then propagates as
/// skips to everything downstream.
#[derive(Debug, Clone)]
pub struct QualityCheckConfig {
    pub connection_id: String,
    pub tables: Vec<String>,
}

pub(crate) async fn run(
    cfg: &QualityCheckConfig,
    providers: &Providers,
) -> Result<TaskOutput, WharfError> {
    let warehouse = providers.connections.resolve(&cfg.connection_id).await?;
    let mut output = TaskOutput::new();

    for table in &cfg.tables {
        let rows = warehouse
            .query(&format!("SELECT COUNT(*) FROM {table}"))
            .await?;

        let count = match rows.first().and_then(|row| row.first()) {
            // A non-numeric cell is a malformed provider response, not an
            // empty table; report it as such instead of coercing to zero.
            Some(value) => value.as_i64().ok_or_else(|| {
                WharfError::Warehouse(format!(
                    "count query for {table} returned non-numeric value {value}"
                ))
            })?,
            None => {
                return Err(WharfError::Quality {
                    table: table.clone(),
                    reason: QualityFailure::NoResult,
                });
            }
        };

        if count < 1 {
            return Err(WharfError::Quality {
                table: table.clone(),
                reason: QualityFailure::Empty,
            });
        }

        info!(%table, count, "data quality record count check passed");
        output.insert(table.clone(), serde_json::json!(count));
    }

    Ok(output)
}
