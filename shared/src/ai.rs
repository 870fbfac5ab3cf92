//! AI conversation orchestration over OpenAI Assistants and Bedrock Agents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::agents::AgentApi;
use crate::openai::{AssistantApi, RunStatus, ToolCall, ToolOutput};
use crate::services::OrderService;
use crate::{Error, Result};

/// Reply used when a thread has no assistant message after a run.
pub const NO_RESPONSE: &str = "No response generated";

/// Reply used when the agent produced no completion events at all.
pub const AGENT_UNAVAILABLE: &str =
    "I'm sorry, but I couldn't generate a response at the moment. Please try again later.";

/// Produces the output for a tool call requested by a run.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, call: &ToolCall) -> String;
}

/// Handler for assistants that declare no tools.
pub struct NoTools;

#[async_trait]
impl ToolHandler for NoTools {
    async fn handle(&self, call: &ToolCall) -> String {
        warn!(tool = %call.function.name, "Run requested a tool on an assistant without tools");
        format!("Tool {} is not available.", call.function.name)
    }
}

/// Post a user message to a thread, run the assistant and return its reply.
///
/// The run is polled at `poll_interval` until it completes. Tool calls are
/// answered through `tools`. There is no timeout: a run that never leaves a
/// non-terminal state is polled indefinitely.
pub async fn converse(
    api: &dyn AssistantApi,
    assistant_id: &str,
    thread_id: &str,
    message: &str,
    poll_interval: Duration,
    tools: &dyn ToolHandler,
) -> Result<String> {
    api.add_user_message(thread_id, message).await?;
    let mut run = api.create_run(thread_id, assistant_id).await?;
    debug!(thread_id, run_id = %run.id, "Started run");

    loop {
        run = api.retrieve_run(thread_id, &run.id).await?;

        match run.status {
            RunStatus::RequiresAction => {
                let mut outputs = Vec::with_capacity(run.tool_calls().len());
                for call in run.tool_calls() {
                    let output = tools.handle(call).await;
                    debug!(tool = %call.function.name, output = %output, "Tool call handled");
                    outputs.push(ToolOutput {
                        tool_call_id: call.id.clone(),
                        output,
                    });
                }

                if !outputs.is_empty() {
                    api.submit_tool_outputs(thread_id, &run.id, outputs).await?;
                }
            }
            RunStatus::Completed => break,
            RunStatus::Failed => {
                let reason = run
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".to_string());
                error!(thread_id, run_id = %run.id, reason = %reason, "Run failed");
                return Err(Error::Upstream(format!("Run failed: {}", reason)));
            }
            RunStatus::Cancelled | RunStatus::Expired | RunStatus::Incomplete => {
                error!(thread_id, run_id = %run.id, status = ?run.status, "Run ended without completing");
                return Err(Error::Upstream(format!(
                    "Run ended with status {:?}",
                    run.status
                )));
            }
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling | RunStatus::Unknown => {}
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(api
        .latest_assistant_reply(thread_id)
        .await?
        .unwrap_or_else(|| NO_RESPONSE.to_string()))
}

#[derive(Debug, Deserialize)]
struct OrderToolArgs {
    #[serde(rename = "orderId")]
    order_id: String,
}

/// Answers `delete_order` and `cancel_order` tool calls against the orders table.
pub struct OrderTools {
    orders: OrderService,
}

impl OrderTools {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }

    async fn apply(&self, name: &str, order_id: &str) -> Result<String> {
        if self.orders.get_order(order_id).await?.is_none() {
            return Ok(format!("Order with ID {} does not exist.", order_id));
        }

        match name {
            "delete_order" => {
                self.orders.delete_order(order_id).await?;
                Ok(format!("Order {} has been successfully deleted.", order_id))
            }
            "cancel_order" => match self.orders.cancel_order(order_id).await? {
                Some(order) => Ok(format!(
                    "Order {} has been successfully canceled. New status: {}",
                    order_id, order.status
                )),
                None => Ok(format!("Order with ID {} does not exist.", order_id)),
            },
            other => Ok(format!("Unknown function: {}", other)),
        }
    }
}

#[async_trait]
impl ToolHandler for OrderTools {
    async fn handle(&self, call: &ToolCall) -> String {
        let args: OrderToolArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.function.name, error = %e, "Invalid tool arguments");
                return format!("Invalid arguments for {}: {}", call.function.name, e);
            }
        };

        info!(tool = %call.function.name, order_id = %args.order_id, "Handling order tool call");

        match self.apply(&call.function.name, &args.order_id).await {
            Ok(output) => output,
            Err(e) => format!("An error occurred while processing the order: {}", e),
        }
    }
}

/// Conversation entry points behind `/api/ai`.
pub struct AiService {
    assistant: Arc<dyn AssistantApi>,
    assistant_id: String,
    poll_interval: Duration,
    order_tools: OrderTools,
    agent: Option<Arc<dyn AgentApi>>,
}

impl AiService {
    pub fn new(
        assistant: Arc<dyn AssistantApi>,
        assistant_id: String,
        poll_interval: Duration,
        orders: OrderService,
        agent: Option<Arc<dyn AgentApi>>,
    ) -> Self {
        Self {
            assistant,
            assistant_id,
            poll_interval,
            order_tools: OrderTools::new(orders),
            agent,
        }
    }

    pub async fn create_openai_conversation(&self) -> Result<String> {
        self.assistant.create_thread().await
    }

    pub async fn send_openai_message(&self, thread_id: &str, message: &str) -> Result<String> {
        converse(
            self.assistant.as_ref(),
            &self.assistant_id,
            thread_id,
            message,
            self.poll_interval,
            &self.order_tools,
        )
        .await
    }

    /// Bedrock sessions are client-named; the current epoch milliseconds is used.
    pub fn create_bedrock_conversation(&self) -> String {
        Utc::now().timestamp_millis().to_string()
    }

    pub async fn send_bedrock_message(&self, session_id: &str, message: &str) -> Result<String> {
        let agent = self
            .agent
            .as_ref()
            .ok_or_else(|| Error::Config("Bedrock agent is not configured".to_string()))?;

        let completion = agent.invoke(session_id, message).await.map_err(|e| {
            error!(session_id, error = %e, "Error sending message to Bedrock");
            e
        })?;

        if completion.chunks == 0 {
            return Ok(AGENT_UNAVAILABLE.to_string());
        }
        if completion.text.is_empty() {
            return Ok(NO_RESPONSE.to_string());
        }
        Ok(completion.text)
    }
}
