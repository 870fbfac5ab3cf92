//! OpenAI Assistants API client.
//!
//! Covers the thread/run/tool-call subset CloudMart needs. Conversation logic
//! talks to [`AssistantApi`] so it can run against a scripted fake in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::config::OpenAiConfig;
use crate::{Error, Result};

/// Execution state of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

impl Run {
    /// Tool calls the run is waiting on, if any.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.required_action
            .as_ref()
            .map(|a| a.submit_tool_outputs.tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredAction {
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.as_deref().unwrap_or("unknown_error"),
            self.message.as_deref().unwrap_or("no message")
        )
    }
}

/// Output for one tool call, returned to the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Definition used when an assistant has to be created on cold start.
#[derive(Debug, Clone)]
pub struct AssistantDefinition {
    pub name: &'static str,
    pub instructions: &'static str,
    pub tools: Vec<Value>,
}

impl AssistantDefinition {
    /// Customer-support assistant attached to tickets.
    pub fn ticket_support() -> Self {
        Self {
            name: "CloudMart Customer Support",
            instructions: "You are a customer support agent for CloudMart, an e-commerce platform. \
                Your role is to assist customers with general inquiries, order issues, and provide helpful \
                information about using the CloudMart platform. You don't have direct access to specific \
                product or inventory information. Always be polite, patient, and focus on providing excellent \
                customer service. If a customer asks about specific products or inventory, politely explain \
                that you don't have access to that information and suggest they check the website or speak \
                with a sales representative.",
            tools: Vec::new(),
        }
    }

    /// Support assistant that can cancel and delete orders.
    pub fn order_support() -> Self {
        Self {
            name: "CloudMart Customer Support",
            instructions: "You are a customer support assistant for CloudMart, an e-commerce platform. \
                Your role is to help customers with their inquiries and issues. Be professional, helpful, \
                and empathetic. Focus on providing clear solutions. If a technical issue is reported, \
                provide troubleshooting steps. For product-related questions, guide customers to the \
                appropriate resources. For complex issues, explain that a human support agent will review \
                the ticket. You can also help with order management, including canceling or deleting orders.",
            tools: vec![
                order_tool("delete_order", "Delete an order by order ID", "The ID of the order to be deleted"),
                order_tool(
                    "cancel_order",
                    "Cancel an order by changing its status to 'canceled'",
                    "The ID of the order to be canceled",
                ),
            ],
        }
    }
}

fn order_tool(name: &str, description: &str, id_description: &str) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": {
                "type": "object",
                "properties": {
                    "orderId": {
                        "type": "string",
                        "description": id_description
                    }
                },
                "required": ["orderId"]
            }
        }
    })
}

/// Thread and run operations against an assistant backend.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<String>;
    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()>;
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run>;
    /// Text of the most recent assistant message on the thread.
    async fn latest_assistant_reply(&self, thread_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

/// HTTP client for the OpenAI Assistants v2 API.
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig, api_key: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            error!("OpenAI request failed: {}", e);
            Error::Upstream(format!("OpenAI {} failed: {}", what, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "No error body".to_string());
            error!(status = %status, error = %body, "OpenAI API error during {}", what);
            return Err(Error::Upstream(format!(
                "OpenAI {} returned {}: {}",
                what, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse OpenAI {} response: {}", what, e)))
    }

    /// Use the configured assistant id, or create the assistant when none is configured.
    pub async fn ensure_assistant(
        &self,
        configured_id: Option<&str>,
        definition: &AssistantDefinition,
    ) -> Result<String> {
        if let Some(id) = configured_id {
            return Ok(id.to_string());
        }

        info!(name = definition.name, "No assistant id configured, creating assistant");
        let body = json!({
            "name": definition.name,
            "instructions": definition.instructions,
            "model": self.model,
            "tools": definition.tools,
        });

        let created: IdOnly = self
            .send(self.request(Method::POST, "/assistants").json(&body), "create assistant")
            .await?;

        info!(assistant_id = %created.id, "Created assistant");
        Ok(created.id)
    }
}

#[async_trait]
impl AssistantApi for OpenAiClient {
    async fn create_thread(&self) -> Result<String> {
        let thread: IdOnly = self
            .send(self.request(Method::POST, "/threads").json(&json!({})), "create thread")
            .await?;
        debug!(thread_id = %thread.id, "Created thread");
        Ok(thread.id)
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let _: IdOnly = self
            .send(
                self.request(Method::POST, &format!("/threads/{}/messages", thread_id))
                    .json(&json!({ "role": "user", "content": content })),
                "create message",
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        self.send(
            self.request(Method::POST, &format!("/threads/{}/runs", thread_id))
                .json(&json!({ "assistant_id": assistant_id })),
            "create run",
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.send(
            self.request(Method::GET, &format!("/threads/{}/runs/{}", thread_id, run_id)),
            "retrieve run",
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run> {
        self.send(
            self.request(
                Method::POST,
                &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            )
            .json(&json!({ "tool_outputs": outputs })),
            "submit tool outputs",
        )
        .await
    }

    async fn latest_assistant_reply(&self, thread_id: &str) -> Result<Option<String>> {
        let messages: MessageList = self
            .send(
                self.request(
                    Method::GET,
                    &format!("/threads/{}/messages?order=desc&limit=20", thread_id),
                ),
                "list messages",
            )
            .await?;

        Ok(first_assistant_text(messages))
    }
}

fn first_assistant_text(messages: MessageList) -> Option<String> {
    messages
        .data
        .into_iter()
        .find(|m| m.role == "assistant")
        .and_then(|m| {
            m.content
                .into_iter()
                .find(|c| c.content_type == "text")
                .and_then(|c| c.text)
                .map(|t| t.value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_requiring_action() {
        let run: Run = serde_json::from_value(json!({
            "id": "run_1",
            "object": "thread.run",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "cancel_order", "arguments": "{\"orderId\":\"ab12cd34\"}" }
                    }]
                }
            },
            "last_error": null
        }))
        .unwrap();

        assert_eq!(run.status, RunStatus::RequiresAction);
        assert_eq!(run.tool_calls().len(), 1);
        assert_eq!(run.tool_calls()[0].function.name, "cancel_order");
    }

    #[test]
    fn test_unknown_status_and_error_display() {
        let run: Run = serde_json::from_value(json!({
            "id": "run_2",
            "status": "something_new",
            "last_error": { "code": "rate_limit_exceeded", "message": "slow down" }
        }))
        .unwrap();

        assert_eq!(run.status, RunStatus::Unknown);
        assert!(run.tool_calls().is_empty());
        assert_eq!(
            run.last_error.unwrap().to_string(),
            "rate_limit_exceeded: slow down"
        );
    }

    #[test]
    fn test_first_assistant_text_skips_user_messages() {
        let messages: MessageList = serde_json::from_value(json!({
            "data": [
                { "role": "user", "content": [{ "type": "text", "text": { "value": "hi" } }] },
                { "role": "assistant", "content": [
                    { "type": "image_file", "image_file": { "file_id": "f" } },
                    { "type": "text", "text": { "value": "Hello! How can I help?" } }
                ] },
                { "role": "assistant", "content": [{ "type": "text", "text": { "value": "older" } }] }
            ]
        }))
        .unwrap();

        assert_eq!(
            first_assistant_text(messages).as_deref(),
            Some("Hello! How can I help?")
        );
    }

    #[test]
    fn test_order_support_tools() {
        let definition = AssistantDefinition::order_support();
        let names: Vec<&str> = definition
            .tools
            .iter()
            .filter_map(|t| t["function"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["delete_order", "cancel_order"]);
        assert!(AssistantDefinition::ticket_support().tools.is_empty());
    }
}
