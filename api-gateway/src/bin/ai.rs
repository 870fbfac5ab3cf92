//! AI Lambda - Conversational order support over OpenAI Assistants or a Bedrock agent.
//!
//! Endpoints:
//! - POST /ai/openai/start - Create an assistant thread
//! - POST /ai/openai/message - Send `{threadId, message}` and wait for the reply
//! - POST /ai/bedrock/start - Allocate a Bedrock session id
//! - POST /ai/bedrock/message - Send `{sessionId, message}` to the agent

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{error_response, route_segments, success_response};
use shared::models::{ConversationMessageRequest, ConversationReply, SessionStarted, ThreadStarted};
use shared::{
    parse_body, resolve_credential, try_service, AgentApi, AgentClient, AiService,
    AssistantDefinition, Config, DynamoStore, OpenAiClient, OrderService,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    ai: AiService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env();
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

        let orders = OrderService::new(Arc::new(DynamoStore::new(
            aws_sdk_dynamodb::Client::new(&aws_config),
            &config.orders_table,
        )));

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
                config.openai.assistant_id.as_deref(),
                &AssistantDefinition::order_support(),
            )
            .await?;

        let agent: Option<Arc<dyn AgentApi>> = if config.bedrock.agent_id.is_some() {
            let client = aws_sdk_bedrockagentruntime::Client::new(&aws_config);
            Some(Arc::new(AgentClient::from_config(client, &config.bedrock)?))
        } else {
            warn!("BEDROCK_AGENT_ID not set, Bedrock conversations disabled");
            None
        };

        info!(assistant_id = %assistant_id, "AI service initialized");

        Ok(Self {
            ai: AiService::new(
                Arc::new(openai),
                assistant_id,
                config.openai.poll_interval,
                orders,
                agent,
            ),
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    let method = event.method().as_str();

    info!("Received request: method={}, path={}", method, raw_path);

    let Some(segments) = route_segments(raw_path, "ai") else {
        return error_response(404, "Not found");
    };

    match (method, segments.as_slice()) {
        ("POST", ["openai", "start"]) => {
            let thread_id = try_service!(state.ai.create_openai_conversation().await);
            success_response(200, ThreadStarted { thread_id })
        }

        ("POST", ["openai", "message"]) => {
            let request: ConversationMessageRequest = parse_body!(event.body());
            let Some(thread_id) = request.thread_id.filter(|id| !id.is_empty()) else {
                return error_response(400, "Thread ID and message are required");
            };
            if request.message.is_empty() {
                return error_response(400, "Thread ID and message are required");
            }
            let response = try_service!(state.ai.send_openai_message(&thread_id, &request.message).await);
            success_response(200, ConversationReply { response })
        }

        ("POST", ["bedrock", "start"]) => {
            let session_id = state.ai.create_bedrock_conversation();
            success_response(200, SessionStarted { session_id })
        }

        ("POST", ["bedrock", "message"]) => {
            let request: ConversationMessageRequest = parse_body!(event.body());
            let Some(session_id) = request.session_id.filter(|id| !id.is_empty()) else {
                return error_response(400, "Session ID and message are required");
            };
            if request.message.is_empty() {
                return error_response(400, "Session ID and message are required");
            }
            let response = try_service!(state.ai.send_bedrock_message(&session_id, &request.message).await);
            success_response(200, ConversationReply { response })
        }

        (_, ["openai" | "bedrock", "start" | "message"]) => error_response(405, "Method not allowed"),

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
    use shared::openai::{Run, RunStatus, ToolOutput};
    use shared::{AgentCompletion, AssistantApi, InMemoryStore};
    use std::time::Duration;

    struct EchoAssistant;

    fn completed() -> Run {
        Run {
            id: "run_1".to_string(),
            status: RunStatus::Completed,
            required_action: None,
            last_error: None,
        }
    }

    #[async_trait]
    impl AssistantApi for EchoAssistant {
        async fn create_thread(&self) -> shared::Result<String> {
            Ok("thread_42".to_string())
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
        async fn latest_assistant_reply(&self, thread_id: &str) -> shared::Result<Option<String>> {
            Ok(Some(format!("reply on {}", thread_id)))
        }
    }

    struct FixedAgent;

    #[async_trait]
    impl AgentApi for FixedAgent {
        async fn invoke(&self, session_id: &str, input: &str) -> shared::Result<AgentCompletion> {
            Ok(AgentCompletion {
                text: format!("{}: {}", session_id, input),
                chunks: 1,
            })
        }
    }

    fn state(agent: Option<Arc<dyn AgentApi>>) -> Arc<AppState> {
        Arc::new(AppState {
            ai: AiService::new(
                Arc::new(EchoAssistant),
                "asst_orders".to_string(),
                Duration::ZERO,
                OrderService::new(Arc::new(InMemoryStore::new())),
                agent,
            ),
        })
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

    #[tokio::test]
    async fn test_openai_conversation() {
        let state = state(None);

        let started = handler(state.clone(), request("POST", "/api/ai/openai/start", None))
            .await
            .unwrap();
        assert_eq!(started.status(), 200);
        assert_eq!(body_json(&started)["data"]["threadId"], "thread_42");

        let reply = handler(
            state,
            request(
                "POST",
                "/api/ai/openai/message",
                Some(json!({"threadId": "thread_42", "message": "Cancel my order"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(reply.status(), 200);
        assert_eq!(body_json(&reply)["data"]["response"], "reply on thread_42");
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let state = state(None);

        let response = handler(
            state.clone(),
            request("POST", "/api/ai/openai/message", Some(json!({"message": "hi"}))),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 400);

        let response = handler(
            state,
            request("POST", "/api/ai/bedrock/message", Some(json!({"sessionId": "s1"}))),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 400);
        assert_eq!(
            body_json(&response)["error"],
            "Session ID and message are required"
        );
    }

    #[tokio::test]
    async fn test_bedrock_conversation() {
        let state = state(Some(Arc::new(FixedAgent)));

        let started = handler(state.clone(), request("POST", "/ai/bedrock/start", None))
            .await
            .unwrap();
        let session_id = body_json(&started)["data"]["sessionId"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(session_id.parse::<i64>().is_ok());

        let reply = handler(
            state,
            request(
                "POST",
                "/ai/bedrock/message",
                Some(json!({"sessionId": session_id, "message": "recommend a mug"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(
            body_json(&reply)["data"]["response"],
            format!("{}: recommend a mug", session_id)
        );
    }

    #[tokio::test]
    async fn test_bedrock_without_agent_is_server_error() {
        let state = state(None);
        let response = handler(
            state.clone(),
            request(
                "POST",
                "/ai/bedrock/message",
                Some(json!({"sessionId": "1", "message": "hello"})),
            ),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), 500);

        let response = handler(state, request("GET", "/ai/openai/start", None)).await.unwrap();
        assert_eq!(response.status(), 405);
    }
}
