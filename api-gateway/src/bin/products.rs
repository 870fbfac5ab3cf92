//! Products Lambda - CRUD over the products table.
//!
//! Endpoints:
//! - GET /products - List products (optional `name` substring filter)
//! - GET /products/{id} - Get a product
//! - POST /products - Create a product
//! - PUT /products/{id} - Replace a product
//! - DELETE /products/{id} - Delete a product

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_response, route_segments, success_response};
use shared::models::ProductCreate;
use shared::{parse_body, try_service, Config, DynamoStore, ProductService};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    products: ProductService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env();
        let client = shared::db::create_client().await;
        let store = DynamoStore::new(client, &config.products_table);

        info!(table = %config.products_table, "Products service initialized");

        Ok(Self {
            products: ProductService::new(Arc::new(store)),
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    let method = event.method().as_str();

    info!("Received request: method={}, path={}", method, raw_path);

    let Some(segments) = route_segments(raw_path, "products") else {
        return error_response(404, "Not found");
    };

    match (method, segments.as_slice()) {
        ("GET", []) => {
            let params = event.query_string_parameters();
            let name = params.first("name").filter(|n| !n.is_empty());
            let products = try_service!(state.products.list_products(name).await);
            success_response(200, products)
        }

        ("POST", []) => {
            let request: ProductCreate = parse_body!(event.body());
            let product = try_service!(state.products.create_product(request).await);
            success_response(201, product)
        }

        ("GET", [id]) => match try_service!(state.products.get_product(id).await) {
            Some(product) => success_response(200, product),
            None => error_response(404, "Product not found"),
        },

        ("PUT", [id]) => {
            let request: ProductCreate = parse_body!(event.body());
            match try_service!(state.products.update_product(id, request).await) {
                Some(product) => success_response(200, product),
                None => error_response(404, "Product not found"),
            }
        }

        ("DELETE", [id]) => {
            if try_service!(state.products.delete_product(id).await) {
                success_response(200, serde_json::json!({"message": "Product deleted successfully"}))
            } else {
                error_response(404, "Product not found")
            }
        }

        (_, []) | (_, [_]) => error_response(405, "Method not allowed"),

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
