//! Orders table stream records mapped onto warehouse rows.

use anyhow::Context;
use aws_lambda_events::event::dynamodb::EventRecord;
use serde::Serialize;
use shared::models::{timestamp, Order};

/// One row of the orders table in BigQuery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub order_id: String,
    pub user_email: String,
    /// JSON column, sent as its serialized text
    pub items: String,
    pub total: f64,
    pub status: String,
    /// TIMESTAMP column, microsecond precision
    pub created_at: String,
}

impl OrderRow {
    pub fn from_order(order: &Order) -> anyhow::Result<Self> {
        Ok(Self {
            order_id: order.id.clone(),
            user_email: order.user_email.clone(),
            items: serde_json::to_string(&order.items)?,
            total: order.total,
            status: order.status.to_string(),
            created_at: timestamp::format(&order.created_at),
        })
    }

    /// Build a row from an `INSERT` record, or `None` for any other change.
    pub fn from_record(record: &EventRecord) -> anyhow::Result<Option<Self>> {
        if record.event_name != "INSERT" {
            return Ok(None);
        }
        let order: Order = serde_dynamo::from_item(record.change.new_image.clone())
            .with_context(|| format!("record {} does not hold an order", record.event_id))?;
        Self::from_order(&order).map(Some)
    }
}
