//! Persistence traits for products, orders and tickets, with DynamoDB implementations.
//!
//! Every table is keyed by a single string attribute `id`. Lookups that are not
//! by key are table scans.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use serde_dynamo::{from_item, to_item};
use tracing::{debug, error};

use crate::db::{id_key, map_sdk_error, scan_all, Item};
use crate::models::{Order, OrderStatus, Product, Ticket};
use crate::Result;

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// List products, optionally keeping only names that contain `name_contains`.
    async fn list(&self, name_contains: Option<&str>) -> Result<Vec<Product>>;
    async fn get(&self, id: &str) -> Result<Option<Product>>;
    /// Insert or replace a product.
    async fn put(&self, product: &Product) -> Result<()>;
    /// Delete a product, returning whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Order>>;
    async fn list_by_user(&self, user_email: &str) -> Result<Vec<Order>>;
    async fn get(&self, id: &str) -> Result<Option<Order>>;
    async fn put(&self, order: &Order) -> Result<()>;
    /// Set an order's status, returning the updated order or `None` if it does not exist.
    async fn update_status(&self, id: &str, status: OrderStatus) -> Result<Option<Order>>;
    /// Delete an order, returning whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Ticket>>;
    async fn get(&self, id: &str) -> Result<Option<Ticket>>;
    async fn put(&self, ticket: &Ticket) -> Result<()>;
}

/// DynamoDB-backed store for one table.
#[derive(Debug, Clone)]
pub struct DynamoStore {
    client: Client,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(id_key(id)))
            .send()
            .await
            .map_err(|e| map_sdk_error("GetItem", &self.table_name, e))?;

        Ok(result.item)
    }

    async fn put_item(&self, item: Item) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| map_sdk_error("PutItem", &self.table_name, e))?;

        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<bool> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(id_key(id)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| map_sdk_error("DeleteItem", &self.table_name, e))?;

        Ok(result.attributes.is_some_and(|a| !a.is_empty()))
    }

    async fn scan(&self) -> Result<Vec<Item>> {
        scan_all(self.client.scan().table_name(&self.table_name), &self.table_name).await
    }
}

#[async_trait]
impl ProductStore for DynamoStore {
    async fn list(&self, name_contains: Option<&str>) -> Result<Vec<Product>> {
        let mut request = self.client.scan().table_name(&self.table_name);
        if let Some(name) = name_contains {
            request = request
                .filter_expression("contains(#name, :name)")
                .expression_attribute_names("#name", "name")
                .expression_attribute_values(":name", AttributeValue::S(name.to_string()));
        }

        let items = scan_all(request, &self.table_name).await?;
        debug!(table = %self.table_name, count = items.len(), "Scanned products");

        items
            .into_iter()
            .map(|item| from_item(item).map_err(Into::into))
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Product>> {
        match self.get_item(id).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, product: &Product) -> Result<()> {
        self.put_item(to_item(product)?).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_item(id).await
    }
}

#[async_trait]
impl OrderStore for DynamoStore {
    async fn list(&self) -> Result<Vec<Order>> {
        self.scan()
            .await?
            .into_iter()
            .map(|item| from_item(item).map_err(Into::into))
            .collect()
    }

    async fn list_by_user(&self, user_email: &str) -> Result<Vec<Order>> {
        let request = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression("userEmail = :email")
            .expression_attribute_values(":email", AttributeValue::S(user_email.to_string()));

        scan_all(request, &self.table_name)
            .await?
            .into_iter()
            .map(|item| from_item(item).map_err(Into::into))
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        match self.get_item(id).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, order: &Order) -> Result<()> {
        self.put_item(to_item(order)?).await
    }

    async fn update_status(&self, id: &str, status: OrderStatus) -> Result<Option<Order>> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(id_key(id)))
            .update_expression("set #status = :status")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":status", AttributeValue::S(status.to_string()))
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => match output.attributes {
                Some(item) => Ok(Some(from_item(item)?)),
                None => Ok(None),
            },
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(map_sdk_error("UpdateItem", &self.table_name, err)),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.delete_item(id).await
    }
}

#[async_trait]
impl TicketStore for DynamoStore {
    async fn list(&self) -> Result<Vec<Ticket>> {
        let items = self.scan().await?;
        debug!(table = %self.table_name, count = items.len(), "Scanned tickets");
        Ok(parse_tickets(&self.table_name, items))
    }

    async fn get(&self, id: &str) -> Result<Option<Ticket>> {
        match self.get_item(id).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, ticket: &Ticket) -> Result<()> {
        self.put_item(to_item(ticket)?).await
    }
}

/// Tickets from scanned items. Items that do not parse are logged and skipped.
fn parse_tickets(table_name: &str, items: Vec<Item>) -> Vec<Ticket> {
    let mut tickets = Vec::with_capacity(items.len());
    for item in items {
        let id = item.get("id").and_then(|v| v.as_s().ok()).cloned();
        match from_item::<_, Ticket>(item) {
            Ok(ticket) => tickets.push(ticket),
            Err(e) => error!(table = %table_name, id = ?id, error = %e, "Skipping unparseable ticket"),
        }
    }
    tickets
}
