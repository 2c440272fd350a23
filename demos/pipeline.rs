use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wharf::{
    CancellationToken, Credentials, Engine, Graph, Operation, Providers, QualityCheckConfig,
    RetryPolicy, RunContext, StageConfig, StaticConnections, StaticCredentials, TableRole, Task,
    TransformConfig, Warehouse, WharfError,
};

/// Toy warehouse that models tables as row counts, enough to exercise the
/// full pipeline without a cluster.
struct InMemoryWarehouse {
    tables: Mutex<HashMap<String, i64>>,
}

impl InMemoryWarehouse {
    fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64, WharfError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut tables = self.tables.lock().unwrap();
        let first_word = |rest: &str| {
            rest.split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string()
        };
        if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            tables.insert(first_word(rest), 0);
            Ok(0)
        } else if let Some(rest) = sql.strip_prefix("TRUNCATE TABLE ") {
            tables.insert(first_word(rest), 0);
            Ok(0)
        } else if let Some(rest) = sql.strip_prefix("COPY ") {
            *tables.entry(first_word(rest)).or_insert(0) += 8056;
            Ok(8056)
        } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            *tables.entry(first_word(rest)).or_insert(0) += 320;
            Ok(320)
        } else {
            Err(WharfError::Warehouse(format!("unsupported statement: {sql}")))
        }
    }

    async fn query(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>, WharfError> {
        if let Some(rest) = sql.strip_prefix("SELECT COUNT(*) FROM ") {
            let table = rest.split_whitespace().next().unwrap_or_default();
            let count = self.tables.lock().unwrap().get(table).copied().unwrap_or(0);
            return Ok(vec![vec![serde_json::json!(count)]]);
        }
        Ok(vec![])
    }
}

fn stage(name: &str, table: &str, key_template: &str) -> Task {
    Task::new(
        name,
        Operation::Stage(StageConfig {
            connection_id: "redshift".into(),
            credentials_id: "aws".into(),
            table: table.into(),
            bucket: "dend-lake".into(),
            key_template: key_template.into(),
            json_path: "auto".into(),
            region: "us-west-2".into(),
        }),
    )
}

fn load(name: &str, table: &str, role: TableRole, select: &str) -> Task {
    Task::new(
        name,
        Operation::Transform(TransformConfig {
            connection_id: "redshift".into(),
            table: table.into(),
            insert_select: select.into(),
            truncate: true,
            role,
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wharf=debug")),
        )
        .init();

    let warehouse = Arc::new(InMemoryWarehouse::new());
    let providers = Providers::new(
        Arc::new(StaticConnections::new().with("redshift", warehouse)),
        Arc::new(StaticCredentials::new().with(
            "aws",
            Credentials {
                access_key: "AKIADEMO".into(),
                secret_key: "demo-secret".into(),
            },
        )),
    );

    let graph = Graph::build(
        vec![
            stage("stage_events", "staging_events", "log_data/{year}/{month}"),
            stage("stage_songs", "staging_songs", "song_data"),
            load(
                "load_songplays",
                "songplays",
                TableRole::Fact,
                "SELECT ... FROM staging_events e JOIN staging_songs s ON e.song = s.title",
            )
            .after(["stage_events", "stage_songs"]),
            load("load_users", "users", TableRole::Dimension, "SELECT DISTINCT userid, ... FROM staging_events")
                .after(["load_songplays"]),
            load("load_songs", "songs", TableRole::Dimension, "SELECT DISTINCT song_id, ... FROM staging_songs")
                .after(["load_songplays"]),
            load("load_artists", "artists", TableRole::Dimension, "SELECT DISTINCT artist_id, ... FROM staging_songs")
                .after(["load_songplays"]),
            load("load_time", "time", TableRole::Dimension, "SELECT start_time, ... FROM songplays")
                .after(["load_songplays"]),
            Task::new(
                "quality_checks",
                Operation::QualityCheck(QualityCheckConfig {
                    connection_id: "redshift".into(),
                    tables: vec![
                        "songplays".into(),
                        "users".into(),
                        "songs".into(),
                        "artists".into(),
                        "time".into(),
                    ],
                }),
            )
            .after(["load_users", "load_songs", "load_artists", "load_time"]),
        ],
        vec![],
    )?;

    let engine = Engine::new(providers).with_default_retry(RetryPolicy {
        max_attempts: 3,
        ..RetryPolicy::default()
    });

    let result = engine
        .run(&graph, &RunContext::now("demo-run"), CancellationToken::new())
        .await?;

    println!("\nrun {}", if result.succeeded() { "succeeded" } else { "failed" });
    println!("execution order: {}", result.execution_order.join(" -> "));
    let mut names: Vec<_> = result.states.keys().collect();
    names.sort();
    for name in names {
        let state = serde_json::to_string(&result.states[name])?;
        match result.output(name) {
            Some(output) => println!("  {name:<16} {state:<12} {}", serde_json::to_string(output)?),
            None => println!("  {name:<16} {state}"),
        }
    }

    Ok(())
}
