//! Orders Lambda - Handles order endpoints.
//!
//! Endpoints:
//! - GET /orders - List orders (optional `userEmail` filter)
//! - GET /orders/{id} - Get an order
//! - POST /orders - Place an order
//! - PUT /orders/{id}/status - Change an order's status
//! - POST /orders/{id}/cancel - Cancel an order
//! - DELETE /orders/{id} - Delete an order

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_response, route_segments, success_response};
use shared::models::{NewOrder, OrderStatus, UpdateOrderStatusRequest};
use shared::{parse_body, try_service, Config, DynamoStore, OrderService};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    orders: OrderService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env();
        let client = shared::db::create_client().await;
        let store = DynamoStore::new(client, &config.orders_table);

        info!(table = %config.orders_table, "Orders service initialized");

        Ok(Self {
            orders: OrderService::new(Arc::new(store)),
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    let method = event.method().as_str();

    info!("Received request: method={}, path={}", method, raw_path);

    let Some(segments) = route_segments(raw_path, "orders") else {
        return error_response(404, "Not found");
    };

    match (method, segments.as_slice()) {
        ("GET", []) => {
            let params = event.query_string_parameters();
            let orders = match params.first("userEmail").filter(|e| !e.is_empty()) {
                Some(email) => try_service!(state.orders.get_user_orders(email).await),
                None => try_service!(state.orders.list_orders().await),
            };
            success_response(200, orders)
        }

        ("POST", []) => {
            let request: NewOrder = parse_body!(event.body());
            let order = try_service!(state.orders.create_order(request).await);
            success_response(201, order)
        }

        ("GET", [id]) => match try_service!(state.orders.get_order(id).await) {
            Some(order) => success_response(200, order),
            None => error_response(404, "Order not found"),
        },

        ("DELETE", [id]) => {
            if try_service!(state.orders.delete_order(id).await) {
                success_response(200, serde_json::json!({"message": "Order deleted successfully"}))
            } else {
                error_response(404, "Order not found")
            }
        }

        ("PUT", [id, "status"]) => {
            let request: UpdateOrderStatusRequest = parse_body!(event.body());
            let status: OrderStatus = match request.status.parse() {
                Ok(status) => status,
                Err(message) => return error_response(400, message),
            };
            match try_service!(state.orders.update_order_status(id, status).await) {
                Some(order) => success_response(200, order),
                None => error_response(404, "Order not found"),
            }
        }

        ("POST", [id, "cancel"]) => match try_service!(state.orders.cancel_order(id).await) {
            Some(order) => success_response(200, order),
            None => error_response(404, "Order not found"),
        },

        (_, []) | (_, [_]) | (_, [_, "status"]) | (_, [_, "cancel"]) => {
            error_response(405, "Method not allowed")
        }

        _ => error_response(404, "Not found"),
    }
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
