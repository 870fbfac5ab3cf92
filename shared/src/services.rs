//! Product and order services.
//!
//! Thin mappings between request models and store calls. Validation happens here
//! so every entry point (HTTP, assistant tools) gets the same checks.

use std::sync::Arc;

use tracing::info;
use validator::Validate;

use crate::models::{NewOrder, Order, OrderStatus, Product, ProductCreate};
use crate::store::{OrderStore, ProductStore};
use crate::Result;

#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn ProductStore>,
}

impl ProductService {
    pub fn new(store: Arc<dyn ProductStore>) -> Self {
        Self { store }
    }

    pub async fn list_products(&self, name_contains: Option<&str>) -> Result<Vec<Product>> {
        self.store.list(name_contains).await
    }

    pub async fn get_product(&self, id: &str) -> Result<Option<Product>> {
        self.store.get(id).await
    }

    pub async fn create_product(&self, fields: ProductCreate) -> Result<Product> {
        fields.validate()?;
        let product = Product::new(fields);
        self.store.put(&product).await?;
        info!(product_id = %product.id, "Created product");
        Ok(product)
    }

    /// Replace an existing product. Returns `None` when no product has this id.
    pub async fn update_product(&self, id: &str, fields: ProductCreate) -> Result<Option<Product>> {
        fields.validate()?;
        if self.store.get(id).await?.is_none() {
            return Ok(None);
        }

        let product = Product::with_id(id, fields);
        self.store.put(&product).await?;
        info!(product_id = %id, "Updated product");
        Ok(Some(product))
    }

    /// Returns `false` when no product has this id.
    pub async fn delete_product(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(product_id = %id, "Deleted product");
        }
        Ok(deleted)
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        request.validate()?;
        let order = Order::new(request);
        self.store.put(&order).await?;
        info!(order_id = %order.id, user_email = %order.user_email, "Created order");
        Ok(order)
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<Order>> {
        self.store.get(id).await
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        self.store.list().await
    }

    pub async fn get_user_orders(&self, user_email: &str) -> Result<Vec<Order>> {
        self.store.list_by_user(user_email).await
    }

    pub async fn update_order_status(&self, id: &str, status: OrderStatus) -> Result<Option<Order>> {
        let updated = self.store.update_status(id, status).await?;
        if updated.is_some() {
            info!(order_id = %id, status = %status, "Updated order status");
        }
        Ok(updated)
    }

    pub async fn cancel_order(&self, id: &str) -> Result<Option<Order>> {
        self.update_order_status(id, OrderStatus::Canceled).await
    }

    pub async fn delete_order(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete(id).await?;
        if deleted {
            info!(order_id = %id, "Deleted order");
        }
        Ok(deleted)
    }
}
