//! BigQuery REST client authenticated as a Google service account.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::stream::OrderRow;

const API_BASE: &str = "https://bigquery.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fields of a service-account key file that token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("Invalid service account key")
    }

    fn assertion(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Service account private key is not RSA PEM")?;
        encode(&Header::new(Algorithm::RS256), &TokenClaims::new(self, now), &key)
            .context("Failed to sign token assertion")
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct TokenClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl TokenClaims {
    fn new(key: &ServiceAccountKey, now: DateTime<Utc>) -> Self {
        let iat = now.timestamp();
        Self {
            iss: key.client_email.clone(),
            scope: BIGQUERY_SCOPE.to_string(),
            aud: key.token_uri.clone(),
            iat,
            exp: iat + 3600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Per-row failure reported by `insertAll`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RowError {
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    error_result: Option<Value>,
}

/// Destination for order rows.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Streaming insert; returns the rows BigQuery rejected.
    async fn insert_rows(&self, rows: &[OrderRow]) -> anyhow::Result<Vec<RowError>>;

    /// Append rows with a load job and wait for it to finish.
    async fn load_rows(&self, rows: &[OrderRow]) -> anyhow::Result<()>;
}

pub struct BigQueryClient {
    http_client: Client,
    key: ServiceAccountKey,
    project_id: String,
    dataset_id: String,
    table_id: String,
    token: Mutex<Option<CachedToken>>,
}

impl BigQueryClient {
    pub fn new(config: &SyncConfig, key: ServiceAccountKey) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            key,
            project_id: config.project_id.clone(),
            dataset_id: config.dataset_id.clone(),
            table_id: config.table_id.clone(),
            token: Mutex::new(None),
        })
    }

    /// Access token, refreshed a minute before it expires.
    async fn access_token(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - chrono::Duration::seconds(60) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let assertion = self.key.assertion(now)?;
        let response = self
            .http_client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Token request failed")?;
        let token: TokenResponse = checked(response, "token exchange").await?;

        debug!(expires_in = token.expires_in, "Obtained BigQuery access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }

    fn table_path(&self) -> String {
        format!(
            "/bigquery/v2/projects/{}/datasets/{}/tables/{}",
            self.project_id, self.dataset_id, self.table_id
        )
    }

    async fn wait_for_job(&self, mut job: Job) -> anyhow::Result<()> {
        let job_id = job.job_reference.job_id.clone();
        let mut url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            API_BASE, self.project_id, job_id
        );
        if let Some(location) = &job.job_reference.location {
            url = format!("{}?location={}", url, location);
        }

        while job.status.state != "DONE" {
            debug!(job_id = %job_id, state = %job.status.state, "Waiting for load job");
            tokio::time::sleep(JOB_POLL_INTERVAL).await;
            let token = self.access_token().await?;
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .context("Job status request failed")?;
            job = checked(response, "job status").await?;
        }

        if let Some(error) = job.status.error_result {
            bail!("Load job {} failed: {}", job_id, error);
        }
        info!(job_id = %job_id, "Load job finished");
        Ok(())
    }
}

#[async_trait]
impl RowSink for BigQueryClient {
    async fn insert_rows(&self, rows: &[OrderRow]) -> anyhow::Result<Vec<RowError>> {
        let token = self.access_token().await?;
        let body = json!({
            "rows": rows.iter().map(|row| json!({ "json": row })).collect::<Vec<_>>(),
        });

        let response = self
            .http_client
            .post(format!("{}{}/insertAll", API_BASE, self.table_path()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("insertAll request failed")?;
        let result: InsertAllResponse = checked(response, "insertAll").await?;
        Ok(result.insert_errors)
    }

    async fn load_rows(&self, rows: &[OrderRow]) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let metadata = load_job_config(&self.project_id, &self.dataset_id, &self.table_id);
        let boundary = format!("cloudmart-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, &to_ndjson(rows)?);

        let response = self
            .http_client
            .post(format!(
                "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
                API_BASE, self.project_id
            ))
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .context("Load job request failed")?;
        let job: Job = checked(response, "load job").await?;

        info!(job_id = %job.job_reference.job_id, rows = rows.len(), "Started load job");
        self.wait_for_job(job).await
    }
}

async fn checked<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    what: &str,
) -> anyhow::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "No error body".to_string());
        warn!(status = %status, error = %body, "BigQuery {} failed", what);
        return Err(anyhow!("{} returned {}: {}", what, status, body));
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

fn load_job_config(project_id: &str, dataset_id: &str, table_id: &str) -> Value {
    json!({
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": project_id,
                    "datasetId": dataset_id,
                    "tableId": table_id,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
            }
        }
    })
}

/// One JSON document per line.
pub fn to_ndjson(rows: &[OrderRow]) -> anyhow::Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

fn multipart_related(boundary: &str, metadata: &Value, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n--{b}--\r\n",
        b = boundary,
        meta = metadata,
        data = data,
    )
}
