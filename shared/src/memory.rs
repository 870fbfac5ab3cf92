//! In-memory store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Order, OrderStatus, Product, Ticket};
use crate::store::{OrderStore, ProductStore, TicketStore};
use crate::Result;

/// In-memory storage backend for tests and local runs.
///
/// Data is not persisted and is lost when the store is dropped.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    products: Arc<RwLock<HashMap<String, Product>>>,
    orders: Arc<RwLock<HashMap<String, Order>>>,
    tickets: Arc<RwLock<HashMap<String, Ticket>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn list(&self, name_contains: Option<&str>) -> Result<Vec<Product>> {
        let products = self.products.read().await;
        Ok(products
            .values()
            .filter(|p| name_contains.map_or(true, |n| p.name.contains(n)))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn put(&self, product: &Product) -> Result<()> {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.products.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<Order>> {
        Ok(self.orders.read().await.values().cloned().collect())
    }

    async fn list_by_user(&self, user_email: &str) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| o.user_email == user_email)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn put(&self, order: &Order) -> Result<()> {
        self.orders
            .write()
            .await
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, status: OrderStatus) -> Result<Option<Order>> {
        let mut orders = self.orders.write().await;
        Ok(orders.get_mut(id).map(|order| {
            order.status = status;
            order.clone()
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.orders.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<Ticket>> {
        Ok(self.tickets.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Ticket>> {
        Ok(self.tickets.read().await.get(id).cloned())
    }

    async fn put(&self, ticket: &Ticket) -> Result<()> {
        self.tickets
            .write()
            .await
            .insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }
}
