use tracing::{debug, info, warn};

use crate::connection::{Credentials, Providers, Warehouse};
use crate::context::RunContext;
use crate::{TaskOutput, WharfError};

/// How many recent load-error diagnostic rows to attach to a failed transfer.
const LOAD_ERROR_LIMIT: usize = 10;

const LOAD_ERROR_SQL: &str =
    "SELECT * FROM sys_load_error_detail ORDER BY start_time DESC LIMIT 10";

/// Configuration for copying JSON objects from object storage into a raw
/// landing table. `key_template` may contain `RunContext` placeholders such
/// as `{year}/{month}/{day}` so timestamped objects resolve per run.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub connection_id: String,
    pub credentials_id: String,
    pub table: String,
    pub bucket: String,
    pub key_template: String,
    pub json_path: String,
    pub region: String,
}

fn copy_statement(cfg: &StageConfig, path: &str, credentials: &Credentials) -> String {
    format!(
        "COPY {} FROM '{}' ACCESS_KEY_ID '{}' SECRET_ACCESS_KEY '{}' JSON '{}' REGION '{}'",
        cfg.table, path, credentials.access_key, credentials.secret_key, cfg.json_path, cfg.region,
    )
}

/// Best-effort fetch of the warehouse's most recent load-error rows. A
/// failure here must not mask the original transfer error.
async fn load_error_detail(warehouse: &dyn Warehouse) -> Option<String> {
    match warehouse.query(LOAD_ERROR_SQL).await {
        Ok(rows) => {
            if rows.is_empty() {
                return None;
            }
            let lines: Vec<String> = rows
                .iter()
                .take(LOAD_ERROR_LIMIT)
                .map(|row| {
                    row.iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect();
            Some(lines.join("\n"))
        }
        Err(err) => {
            warn!(error = %err, "could not fetch load-error diagnostics");
            None
        }
    }
}

pub(crate) async fn run(
    cfg: &StageConfig,
    providers: &Providers,
    rctx: &RunContext,
) -> Result<TaskOutput, WharfError> {
    let credentials = providers.credentials.resolve(&cfg.credentials_id).await?;
    let warehouse = providers.connections.resolve(&cfg.connection_id).await?;

    // Full delete before load keeps staging idempotent under retry.
    debug!(table = %cfg.table, "clearing destination table before staging load");
    warehouse
        .execute(&format!("DELETE FROM {}", cfg.table))
        .await
        .map_err(|err| WharfError::Transfer {
            table: cfg.table.clone(),
            detail: format!("clearing destination failed: {err}"),
        })?;

    let key = rctx.render(&cfg.key_template)?;
    let path = format!("s3://{}/{}", cfg.bucket, key);

    debug!(table = %cfg.table, source = %path, "copying data from object store");
    match warehouse
        .execute(&copy_statement(cfg, &path, &credentials))
        .await
    {
        Ok(rows) => {
            info!(table = %cfg.table, source = %path, rows, "staging load finished");
            let mut output = TaskOutput::new();
            output.insert("rows_loaded".into(), serde_json::json!(rows));
            output.insert("source".into(), serde_json::json!(path));
            Ok(output)
        }
        Err(err) => {
            let detail = match load_error_detail(warehouse.as_ref()).await {
                Some(diagnostics) => format!("{err}; recent load errors:\n{diagnostics}"),
                None => err.to_string(),
            };
            Err(WharfError::Transfer {
                table: cfg.table.clone(),
                detail,
            })
        }
    }
}
