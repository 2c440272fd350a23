use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::WharfError;

/// Short-lived object-store credentials. Resolved per task invocation and
/// never stored on a task or graph, so key rotation takes effect on the
/// next execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// Warehouse command interface. Implementations are expected to surface
/// provider-native failures as `WharfError::Warehouse` with the original
/// message attached; operations reclassify them.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs a DML statement and returns the affected-row count.
    async fn execute(&self, sql: &str) -> Result<u64, WharfError>;

    /// Runs a query and returns its rows as JSON values.
    async fn query(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>, WharfError>;
}

impl std::fmt::Debug for dyn Warehouse + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Warehouse")
    }
}

/// Resolves a named connection to a warehouse handle. A handle is checked
/// out per task execution and never shared between two in-flight tasks;
/// pooling is the provider's concern.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn resolve(&self, conn_id: &str) -> Result<Arc<dyn Warehouse>, WharfError>;
}

/// Resolves a named credential id to live object-store credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, cred_id: &str) -> Result<Credentials, WharfError>;
}

/// The external collaborators every operation executes against.
#[derive(Clone)]
pub struct Providers {
    pub connections: Arc<dyn ConnectionProvider>,
    pub credentials: Arc<dyn CredentialProvider>,
}

impl Providers {
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connections,
            credentials,
        }
    }
}

/// Fixed name-to-handle mapping, for embedding and tests.
#[derive(Default)]
pub struct StaticConnections {
    handles: HashMap<String, Arc<dyn Warehouse>>,
}

impl StaticConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, conn_id: impl Into<String>, handle: Arc<dyn Warehouse>) -> Self {
        self.handles.insert(conn_id.into(), handle);
        self
    }
}

#[async_trait]
impl ConnectionProvider for StaticConnections {
    async fn resolve(&self, conn_id: &str) -> Result<Arc<dyn Warehouse>, WharfError> {
        self.handles
            .get(conn_id)
            .cloned()
            .ok_or_else(|| WharfError::UnknownConnection(conn_id.to_string()))
    }
}

/// Fixed name-to-credentials mapping, for embedding and tests.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cred_id: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(cred_id.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn resolve(&self, cred_id: &str) -> Result<Credentials, WharfError> {
        self.entries
            .get(cred_id)
            .cloned()
            .ok_or_else(|| WharfError::UnknownCredential(cred_id.to_string()))
    }
}
