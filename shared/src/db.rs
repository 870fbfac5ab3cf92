//! DynamoDB client construction and error mapping.

use std::collections::HashMap;
use std::fmt::Debug;

use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::scan::builders::ScanFluentBuilder;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;

use crate::{Error, Result};

/// A raw DynamoDB item.
pub type Item = HashMap<String, AttributeValue>;

/// Create a DynamoDB client using the default credential chain.
pub async fn create_client() -> Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    Client::new(&config)
}

/// Map any DynamoDB SDK error to a database error, keeping the service message.
pub fn map_sdk_error<E, R>(operation: &str, table: &str, err: SdkError<E, R>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    Error::Database(format!(
        "{} on {} failed: {}",
        operation,
        table,
        DisplayErrorContext(&err)
    ))
}

/// Run a scan to completion, following `LastEvaluatedKey` across pages.
pub async fn scan_all(request: ScanFluentBuilder, table: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;

    loop {
        let page = request
            .clone()
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| map_sdk_error("Scan", table, e))?;

        items.extend(page.items.unwrap_or_default());

        match page.last_evaluated_key {
            Some(key) if !key.is_empty() => start_key = Some(key),
            _ => break,
        }
    }

    Ok(items)
}

/// Primary key for the single-attribute `id` key schema all tables share.
pub fn id_key(id: &str) -> Item {
    HashMap::from([("id".to_string(), AttributeValue::S(id.to_string()))])
}
