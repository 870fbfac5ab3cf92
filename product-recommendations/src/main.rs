//! Product Recommendations Lambda - Product lookups for the storefront and the Bedrock agent.
//!
//! Accepts two invocation shapes:
//! - API Gateway proxy events, filtered by the `name` query parameter
//! - Bedrock agent action-group events, filtered by the `name` parameter
//!
//! Both scan the products table and keep products whose name contains the filter.

use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::event::bedrock_agent_runtime::AgentEvent;
use aws_lambda_events::encodings::Body;
use aws_lambda_events::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use aws_lambda_events::http::{HeaderMap, HeaderValue};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Serialize;
use serde_json::{json, Value};
use shared::{Config, DynamoStore, ProductService};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// `name` query parameter, if present and non-empty.
fn proxy_name_filter(request: &ApiGatewayProxyRequest) -> Option<String> {
    request
        .query_string_parameters
        .first("name")
        .filter(|n| !n.is_empty())
        .map(String::from)
}

/// `name` from the agent's parameter list, falling back to the JSON request body properties.
fn agent_name_filter(event: &AgentEvent) -> Option<String> {
    let from_body = || {
        event
            .request_body
            .as_ref()?
            .content
            .get("application/json")?
            .properties
            .iter()
            .find(|p| p.name == "name")
            .map(|p| p.value.clone())
    };

    event
        .parameters
        .iter()
        .flatten()
        .find(|p| p.name == "name")
        .map(|p| p.value.clone())
        .or_else(from_body)
        .filter(|n| !n.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionGroupResponse {
    message_version: &'static str,
    response: ActionResponseBody,
    session_attributes: HashMap<String, String>,
    prompt_session_attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionResponseBody {
    action_group: String,
    api_path: String,
    http_method: String,
    http_status_code: u16,
    response_body: HashMap<&'static str, Value>,
}

/// Application state
struct AppState {
    products: ProductService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env();
        let client = shared::db::create_client().await;
        info!(table = %config.products_table, "Product recommendations initialized");

        Ok(Self {
            products: ProductService::new(Arc::new(DynamoStore::new(client, &config.products_table))),
        })
    }

    /// Matching products as `{products, count}`, or the error message.
    async fn search(&self, name: Option<&str>) -> Result<Value, String> {
        match self.products.list_products(name).await {
            Ok(products) => {
                info!(filter = ?name, count = products.len(), "Listed products");
                Ok(json!({ "count": products.len(), "products": products }))
            }
            Err(e) => {
                error!(filter = ?name, error = %e, "Failed to list products");
                Err(e.to_string())
            }
        }
    }
}

fn proxy_response(status_code: i64, body: &Value) -> ApiGatewayProxyResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    ApiGatewayProxyResponse {
        status_code,
        headers,
        body: Some(Body::Text(body.to_string())),
        ..Default::default()
    }
}

async fn handle_proxy(state: &AppState, request: ApiGatewayProxyRequest) -> ApiGatewayProxyResponse {
    match state.search(proxy_name_filter(&request).as_deref()).await {
        Ok(body) => proxy_response(200, &body),
        Err(message) => proxy_response(500, &json!({ "error": message })),
    }
}

async fn handle_action_group(state: &AppState, event: AgentEvent) -> ActionGroupResponse {
    info!(
        agent = %event.agent.name,
        action_group = %event.action_group,
        api_path = %event.api_path,
        "Agent action invoked"
    );

    let (status, body) = match state.search(agent_name_filter(&event).as_deref()).await {
        Ok(body) => (200, body),
        Err(message) => (500, json!({ "error": message })),
    };

    ActionGroupResponse {
        message_version: "1.0",
        response: ActionResponseBody {
            action_group: event.action_group,
            api_path: event.api_path,
            http_method: event.http_method,
            http_status_code: status,
            response_body: HashMap::from([("application/json", json!({ "body": body.to_string() }))]),
        },
        session_attributes: event.session_attributes,
        prompt_session_attributes: event.prompt_session_attributes,
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<Value, Error> {
    let payload = event.payload;

    if payload.get("actionGroup").is_some() {
        let request: AgentEvent = serde_json::from_value(payload)?;
        Ok(serde_json::to_value(handle_action_group(&state, request).await)?)
    } else {
        let request = serde_json::from_value::<ApiGatewayProxyRequest>(payload).unwrap_or_else(|e| {
            warn!(error = %e, "Unrecognized proxy event, listing without a filter");
            ApiGatewayProxyRequest::default()
        });
        Ok(serde_json::to_value(handle_proxy(&state, request).await)?)
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

#[cfg(test)]
mod tests {
    use super::*;
    use aws_lambda_events::query_map::QueryMap;
    use shared::models::ProductCreate;
    use shared::InMemoryStore;

    async fn state() -> Arc<AppState> {
        let products = ProductService::new(Arc::new(InMemoryStore::new()));
        for (name, price) in [("Cloud Mug", 12.99), ("Cloud Hoodie", 49.0), ("Sticker Pack", 3.5)] {
            products
                .create_product(ProductCreate {
                    name: name.to_string(),
                    description: format!("{} description", name),
                    price,
                    stock: 10,
                    category: "merch".to_string(),
                })
                .await
                .unwrap();
        }
        Arc::new(AppState { products })
    }

    fn proxy_request(query: &[(&str, &str)]) -> ApiGatewayProxyRequest {
        let query: HashMap<String, String> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiGatewayProxyRequest {
            path: Some("/products".to_string()),
            query_string_parameters: QueryMap::from(query),
            ..Default::default()
        }
    }

    fn body_json(response: &ApiGatewayProxyResponse) -> Value {
        match &response.body {
            Some(Body::Text(text)) => serde_json::from_str(text).unwrap(),
            other => panic!("unexpected body {:?}", other),
        }
    }

    fn agent_event(parameters: Value, request_body: Value) -> Value {
        json!({
            "messageVersion": "1.0",
            "agent": {
                "name": "cloudmart-agent",
                "id": "AGENT123",
                "alias": "TSTALIASID",
                "version": "DRAFT"
            },
            "inputText": "Do you sell stickers?",
            "sessionId": "1714557600000",
            "actionGroup": "product-search",
            "apiPath": "/products",
            "httpMethod": "GET",
            "parameters": parameters,
            "requestBody": request_body,
            "sessionAttributes": { "user": "demo" },
            "promptSessionAttributes": {}
        })
    }

    #[tokio::test]
    async fn test_proxy_filters_by_name() {
        let state = state().await;
        let response = handle_proxy(&state, proxy_request(&[("name", "Cloud")])).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
        let body = body_json(&response);
        assert_eq!(body["count"], 2);
        assert_eq!(body["products"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_proxy_without_query_lists_everything() {
        let state = state().await;
        let response = handle_proxy(&state, proxy_request(&[])).await;
        assert_eq!(body_json(&response)["count"], 3);

        let response = handle_proxy(&state, proxy_request(&[("name", "")])).await;
        assert_eq!(body_json(&response)["count"], 3);
    }

    #[tokio::test]
    async fn test_action_group_envelope() {
        let state = state().await;
        let event = LambdaEvent::new(
            agent_event(json!([{ "name": "name", "type": "string", "value": "Sticker" }]), Value::Null),
            lambda_runtime::Context::default(),
        );

        let response = handler(state, event).await.unwrap();
        assert_eq!(response["messageVersion"], "1.0");
        assert_eq!(response["sessionAttributes"]["user"], "demo");
        let inner = &response["response"];
        assert_eq!(inner["actionGroup"], "product-search");
        assert_eq!(inner["apiPath"], "/products");
        assert_eq!(inner["httpMethod"], "GET");
        assert_eq!(inner["httpStatusCode"], 200);

        let body: Value = serde_json::from_str(
            inner["responseBody"]["application/json"]["body"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["products"][0]["name"], "Sticker Pack");
    }

    #[test]
    fn test_action_group_name_from_request_body() {
        let event: AgentEvent = serde_json::from_value(agent_event(
            json!([]),
            json!({ "content": { "application/json": {
                "properties": [{ "name": "name", "type": "string", "value": "Mug" }]
            } } }),
        ))
        .unwrap();
        assert_eq!(agent_name_filter(&event).as_deref(), Some("Mug"));

        let empty: AgentEvent = serde_json::from_value(agent_event(
            json!([{ "name": "name", "type": "string", "value": "" }]),
            Value::Null,
        ))
        .unwrap();
        assert!(agent_name_filter(&empty).is_none());
    }
}
