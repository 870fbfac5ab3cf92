//! Sync target and credential settings.

use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context};

pub const DEFAULT_CREDENTIALS_PATH: &str = "/opt/google_credentials.json";

/// How rows reach BigQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Streaming inserts through `tabledata.insertAll`.
    #[default]
    Insert,
    /// One newline-delimited JSON load job per batch.
    Load,
}

impl FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "load" => Ok(Self::Load),
            other => Err(anyhow!("Unknown BIGQUERY_SYNC_MODE '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    pub mode: SyncMode,
    /// Service-account key file shipped in a layer
    pub credentials_path: String,
    /// Takes precedence over `credentials_path` when set
    pub credentials_secret_arn: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{} not set", key));

        let mode = match var("BIGQUERY_SYNC_MODE") {
            Some(raw) => raw.parse()?,
            None => SyncMode::default(),
        };

        Ok(Self {
            project_id: required("GOOGLE_CLOUD_PROJECT_ID")?,
            dataset_id: required("BIGQUERY_DATASET_ID")?,
            table_id: required("BIGQUERY_TABLE_ID")?,
            mode,
            credentials_path: var("GOOGLE_CREDENTIALS_PATH")
                .unwrap_or_else(|| DEFAULT_CREDENTIALS_PATH.to_string()),
            credentials_secret_arn: var("GOOGLE_CREDENTIALS_SECRET_ARN"),
        })
    }

    /// `project.dataset.table`, as shown in logs.
    pub fn table_ref(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}
