//! BigQuery Sync Lambda - Copies newly placed orders into the analytics warehouse.
//!
//! Triggered by the orders table's DynamoDB Stream:
//! 1. Skips every record that is not an `INSERT`
//! 2. Reads the order out of `NewImage` and flattens it into a warehouse row
//! 3. Streams the rows with `insertAll`, or appends them with a load job
//!
//! Any failure other than per-row insert errors is returned so Lambda retries the batch.

mod bigquery;
mod config;
mod stream;

use std::sync::Arc;

use anyhow::Context;
use aws_lambda_events::event::dynamodb::Event;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bigquery::{BigQueryClient, RowSink, ServiceAccountKey};
use crate::config::{SyncConfig, SyncMode};
use crate::stream::OrderRow;

const SUCCESS_BODY: &str = "Successfully processed records";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncResponse {
    status_code: u16,
    body: String,
    synced: usize,
    skipped: usize,
    failed: usize,
}

struct AppState {
    sink: Arc<dyn RowSink>,
    mode: SyncMode,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = SyncConfig::from_env()?;
        let raw_key = match &config.credentials_secret_arn {
            Some(arn) => {
                let aws_config =
                    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
                shared::get_secret(&secrets_client, arn).await?
            }
            None => tokio::fs::read_to_string(&config.credentials_path)
                .await
                .with_context(|| format!("Failed to read {}", config.credentials_path))?,
        };
        let key = ServiceAccountKey::from_json(&raw_key)?;

        info!(
            table = %config.table_ref(),
            mode = ?config.mode,
            service_account = %key.client_email,
            "BigQuery sync initialized"
        );

        Ok(Self {
            sink: Arc::new(BigQueryClient::new(&config, key)?),
            mode: config.mode,
        })
    }
}

async fn sync(state: &AppState, event: Event) -> anyhow::Result<SyncResponse> {
    let mut rows = Vec::new();
    let mut skipped = 0;
    for record in &event.records {
        match OrderRow::from_record(record)? {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }

    info!(records = event.records.len(), inserts = rows.len(), skipped, "Processing stream batch");

    let mut rejected = Vec::new();
    if !rows.is_empty() {
        match state.mode {
            SyncMode::Insert => {
                for row_error in state.sink.insert_rows(&rows).await? {
                    let order_id = rows.get(row_error.index).map(|r| r.order_id.as_str());
                    error!(order_id = ?order_id, errors = ?row_error.errors, "Error inserting order");
                    rejected.push(row_error.index);
                }
            }
            SyncMode::Load => state.sink.load_rows(&rows).await?,
        }
    }

    for (index, row) in rows.iter().enumerate() {
        if !rejected.contains(&index) {
            info!(order_id = %row.order_id, "Synced order to BigQuery");
        }
    }
    let failed = rejected.len();

    Ok(SyncResponse {
        status_code: 200,
        body: serde_json::to_string(SUCCESS_BODY)?,
        synced: rows.len().saturating_sub(failed),
        skipped,
        failed,
    })
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Event>) -> Result<SyncResponse, Error> {
    sync(&state, event.payload).await.map_err(|e| {
        error!("Error: {:#}", e);
        e.into()
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigquery::RowError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        inserted: Mutex<Vec<OrderRow>>,
        loaded: Mutex<Vec<OrderRow>>,
        reject_index: Option<usize>,
    }

    #[async_trait]
    impl RowSink for RecordingSink {
        async fn insert_rows(&self, rows: &[OrderRow]) -> anyhow::Result<Vec<RowError>> {
            self.inserted.lock().unwrap().extend_from_slice(rows);
            Ok(self
                .reject_index
                .map(|index| RowError {
                    index,
                    errors: vec![json!({"reason": "invalid"})],
                })
                .into_iter()
                .collect())
        }

        async fn load_rows(&self, rows: &[OrderRow]) -> anyhow::Result<()> {
            self.loaded.lock().unwrap().extend_from_slice(rows);
            Ok(())
        }
    }

    fn record(event_name: &str, id: &str) -> Value {
        json!({
            "eventID": format!("evt-{}", id),
            "eventName": event_name,
            "eventSource": "aws:dynamodb",
            "awsRegion": "us-east-1",
            "dynamodb": {
                "ApproximateCreationDateTime": 1714557600,
                "SequenceNumber": format!("seq-{}", id),
                "SizeBytes": 96,
                "StreamViewType": "NEW_AND_OLD_IMAGES",
                "Keys": { "id": { "S": id } },
                "NewImage": {
                    "id": { "S": id },
                    "userEmail": { "S": "demo@example.com" },
                    "items": { "L": [] },
                    "total": { "N": "20.5" },
                    "status": { "S": "Pending" },
                    "createdAt": { "S": "2024-05-01T10:00:00Z" }
                }
            }
        })
    }

    fn event(records: Vec<Value>) -> Event {
        serde_json::from_value(json!({ "Records": records })).unwrap()
    }

    fn state(sink: Arc<RecordingSink>, mode: SyncMode) -> AppState {
        AppState { sink, mode }
    }

    #[tokio::test]
    async fn test_only_inserts_are_synced() {
        let sink = Arc::new(RecordingSink::default());
        let state = state(sink.clone(), SyncMode::Insert);

        let response = sync(
            &state,
            event(vec![
                record("INSERT", "a"),
                record("MODIFY", "b"),
                record("INSERT", "c"),
                record("REMOVE", "d"),
            ]),
        )
        .await
        .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "\"Successfully processed records\"");
        assert_eq!(response.synced, 2);
        assert_eq!(response.skipped, 2);
        let inserted = sink.inserted.lock().unwrap();
        let ids: Vec<&str> = inserted.iter().map(|r| r.order_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_load_mode_uses_load_job() {
        let sink = Arc::new(RecordingSink::default());
        let state = state(sink.clone(), SyncMode::Load);

        sync(&state, event(vec![record("INSERT", "a")])).await.unwrap();
        assert!(sink.inserted.lock().unwrap().is_empty());
        assert_eq!(sink.loaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_row_errors_are_counted_not_raised() {
        let sink = Arc::new(RecordingSink {
            reject_index: Some(0),
            ..Default::default()
        });
        let state = state(sink, SyncMode::Insert);

        let response = sync(&state, event(vec![record("INSERT", "a"), record("INSERT", "b")]))
            .await
            .unwrap();
        assert_eq!(response.failed, 1);
        assert_eq!(response.synced, 1);
    }

    #[tokio::test]
    async fn test_malformed_insert_fails_batch() {
        let sink = Arc::new(RecordingSink::default());
        let state = state(sink.clone(), SyncMode::Insert);

        let mut bad = record("INSERT", "a");
        bad["dynamodb"]["NewImage"]["total"] = json!({ "N": "lots" });
        assert!(sync(&state, event(vec![bad])).await.is_err());
        assert!(sink.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let sink = Arc::new(RecordingSink::default());
        let state = state(sink, SyncMode::Insert);
        let response = sync(&state, event(vec![])).await.unwrap();
        assert_eq!(response.synced, 0);
        assert_eq!(response.skipped, 0);
    }
}
