//! Tickets Lambda - Support tickets answered by an OpenAI assistant.
//!
//! Endpoints:
//! - GET /tickets - List tickets
//! - GET /tickets/{id} - Get a ticket
//! - POST /tickets - Open a ticket with a first message
//! - POST /tickets/{id}/message - Add a message to an open ticket
//! - POST /tickets/{id}/close - Close a ticket
//! - POST /tickets/{id}/sentiment - Score and store the customer's sentiment

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{error_response, route_segments, success_response};
use shared::models::TicketMessageRequest;
use shared::{
    parse_body, resolve_credential, try_service, AssistantDefinition, Config, DynamoStore,
    OpenAiClient, TextAnalyticsClient, TicketService,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    tickets: TicketService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env();
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
        let store = DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&aws_config),
            &config.tickets_table,
        );

        let api_key = resolve_credential(
            &secrets_client,
            config.openai.api_key.as_deref(),
            config.openai.api_key_secret_arn.as_deref(),
            "OPENAI_API_KEY",
        )
        .await?;
        let openai = OpenAiClient::new(&config.openai, api_key)?;
        let assistant_id = openai
            .ensure_assistant(
                config.openai.ticket_assistant_id.as_deref(),
                &AssistantDefinition::ticket_support(),
            )
            .await?;

        let mut tickets = TicketService::new(
            Arc::new(store),
            Arc::new(openai),
            assistant_id,
            config.openai.poll_interval,
        );

        match config.azure.endpoint.as_deref() {
            Some(endpoint) => {
                let key = resolve_credential(
                    &secrets_client,
                    config.azure.api_key.as_deref(),
                    config.azure.api_key_secret_arn.as_deref(),
                    "AZURE_LANGUAGE_KEY",
                )
                .await?;
                tickets = tickets.with_sentiment(Arc::new(TextAnalyticsClient::new(endpoint, key)?));
            }
            None => warn!("AZURE_LANGUAGE_ENDPOINT not set, sentiment analysis disabled"),
        }

        info!(table = %config.tickets_table, "Tickets service initialized");
        Ok(Self { tickets })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    let method = event.method().as_str();

    info!("Received request: method={}, path={}", method, raw_path);

    let Some(segments) = route_segments(raw_path, "tickets") else {
        return error_response(404, "Not found");
    };

    match (method, segments.as_slice()) {
        ("GET", []) => {
            let tickets = try_service!(state.tickets.list_tickets().await);
            success_response(200, tickets)
        }

        ("POST", []) => {
            let request: TicketMessageRequest = parse_body!(event.body());
            let ticket = try_service!(state.tickets.create_ticket(&request.message).await);
            success_response(201, ticket)
        }

        ("GET", [id]) => match try_service!(state.tickets.get_ticket(id).await) {
            Some(ticket) => success_response(200, ticket),
            None => error_response(404, "Ticket not found"),
        },

        ("POST", [id, "message"]) => {
            let request: TicketMessageRequest = parse_body!(event.body());
            match try_service!(state.tickets.send_message(id, &request.message).await) {
                Some(ticket) => success_response(200, ticket),
                None => error_response(404, "Ticket not found or closed"),
            }
        }

        ("POST", [id, "close"]) => match try_service!(state.tickets.close_ticket(id).await) {
            Some(ticket) => success_response(200, ticket),
            None => error_response(404, "Ticket not found"),
        },

        ("POST", [id, "sentiment"]) => {
            match try_service!(state.tickets.analyze_sentiment(id).await) {
                Some(ticket) => success_response(200, ticket),
                None => error_response(404, "Ticket not found"),
            }
        }

        (_, []) | (_, [_]) | (_, [_, "message" | "close" | "sentiment"]) => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lambda_http::http;
    use serde_json::{json, Value};
    use shared::models::{SentimentAnalysis, SentimentLabel, SentimentScores};
    use shared::openai::{Run, RunStatus, ToolOutput};
    use shared::{AssistantApi, InMemoryStore, SentimentAnalyzer};
    use std::time::Duration;

    struct CannedAssistant;

    fn completed() -> Run {
        Run {
            id: "run_1".to_string(),
            status: RunStatus::Completed,
            required_action: None,
            last_error: None,
        }
    }

    #[async_trait]
    impl AssistantApi for CannedAssistant {
        async fn create_thread(&self) -> shared::Result<String> {
            Ok("thread_abc".to_string())
        }
        async fn add_user_message(&self, _thread_id: &str, _content: &str) -> shared::Result<()> {
            Ok(())
        }
        async fn create_run(&self, _thread_id: &str, _assistant_id: &str) -> shared::Result<Run> {
            Ok(completed())
        }
        async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> shared::Result<Run> {
            Ok(completed())
        }
        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            _outputs: Vec<ToolOutput>,
        ) -> shared::Result<Run> {
            Ok(completed())
        }
        async fn latest_assistant_reply(&self, _thread_id: &str) -> shared::Result<Option<String>> {
            Ok(Some("Thanks for reaching out!".to_string()))
        }
    }

    struct PositiveAnalyzer;

    #[async_trait]
    impl SentimentAnalyzer for PositiveAnalyzer {
        async fn analyze(&self, _text: &str) -> shared::Result<SentimentAnalysis> {
            Ok(SentimentAnalysis {
                label: SentimentLabel::Positive,
                scores: SentimentScores {
                    positive: 0.9,
                    neutral: 0.08,
                    negative: 0.02,
                },
            })
        }
    }

    fn state() -> Arc<AppState> {
        let tickets = TicketService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(CannedAssistant),
            "asst_1".to_string(),
            Duration::ZERO,
        )
        .with_sentiment(Arc::new(PositiveAnalyzer));
        Arc::new(AppState { tickets })
    }

    fn request(method: &str, path: &str, body: Option<Value>) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(body.map_or(Body::Empty, |b| Body::from(b.to_string())))
            .unwrap()
    }

    fn body_json(response: &Response<Body>) -> Value {
        serde_json::from_slice(response.body().as_ref()).unwrap()
    }

    async fn open_ticket(state: &Arc<AppState>) -> String {
        let response = handler(
            state.clone(),
            request("POST", "/api/tickets", Some(json!({"message": "My order never arrived"}))),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 201);
        body_json(&response)["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_open_ticket_and_reply() {
        let state = state();
        let id = open_ticket(&state).await;

        let response = handler(
            state.clone(),
            request(
                "POST",
                &format!("/api/tickets/{}/message", id),
                Some(json!({"message": "Order ab12cd34"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 200);
        let body = body_json(&response);
        let messages = body["data"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3]["role"], "assistant");
        assert_eq!(messages[3]["content"], "Thanks for reaching out!");
        assert_eq!(body["data"]["thread_id"], "thread_abc");

        let listed = handler(state, request("GET", "/api/tickets", None)).await.unwrap();
        assert_eq!(body_json(&listed)["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_ticket_returns_404_for_messages() {
        let state = state();
        let id = open_ticket(&state).await;

        let response = handler(
            state.clone(),
            request("POST", &format!("/api/tickets/{}/close", id), None),
        )
        .await
        .unwrap();
        assert_eq!(body_json(&response)["data"]["status"], "closed");

        let response = handler(
            state,
            request(
                "POST",
                &format!("/api/tickets/{}/message", id),
                Some(json!({"message": "hello?"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(body_json(&response)["error"], "Ticket not found or closed");
    }

    #[tokio::test]
    async fn test_sentiment_is_persisted() {
        let state = state();
        let id = open_ticket(&state).await;

        let response = handler(
            state.clone(),
            request("POST", &format!("/api/tickets/{}/sentiment", id), None),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(body_json(&response)["data"]["sentiment"], "positive");

        let fetched = handler(state, request("GET", &format!("/api/tickets/{}", id), None))
            .await
            .unwrap();
        assert_eq!(
            body_json(&fetched)["data"]["sentiment_scores"]["positive"],
            0.9
        );
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state();

        let response = handler(
            state.clone(),
            request("POST", "/api/tickets", Some(json!({"message": ""}))),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 400);

        let response = handler(state.clone(), request("GET", "/api/tickets/missing", None))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let response = handler(state, request("GET", "/api/tickets/x/close", None))
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }
}
