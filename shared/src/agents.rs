//! Bedrock Agent client for CloudMart conversations.

use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::error::DisplayErrorContext;
use aws_sdk_bedrockagentruntime::types::ResponseStream;
use aws_sdk_bedrockagentruntime::Client as BedrockAgentClient;
use tracing::{debug, info, warn};

use crate::config::BedrockConfig;
use crate::{Error, Result};

/// Text reconstructed from an agent's streamed completion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentCompletion {
    /// Concatenated chunk text
    pub text: String,
    /// Number of chunk events received
    pub chunks: usize,
}

/// Accumulates completion chunks in arrival order.
///
/// A character split across chunk boundaries is held back until its remaining
/// bytes arrive. Invalid byte sequences are dropped.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    completion: AgentCompletion,
    pending: Vec<u8>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk payload.
    pub fn push(&mut self, bytes: &[u8]) {
        self.completion.chunks += 1;
        self.pending.extend_from_slice(bytes);

        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    self.completion.text.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    self.completion
                        .text
                        .push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match e.error_len() {
                        Some(len) => {
                            warn!(len, "Dropping undecodable bytes in agent chunk");
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    pub fn finish(self) -> AgentCompletion {
        if !self.pending.is_empty() {
            warn!(len = self.pending.len(), "Dropping truncated character at end of agent completion");
        }
        self.completion
    }
}

/// Conversational agent invoked by session.
#[async_trait]
pub trait AgentApi: Send + Sync {
    async fn invoke(&self, session_id: &str, input: &str) -> Result<AgentCompletion>;
}

/// Client for invoking a Bedrock agent alias.
pub struct AgentClient {
    client: BedrockAgentClient,
    agent_id: String,
    agent_alias_id: String,
}

impl AgentClient {
    /// Create a new agent client.
    pub fn new(client: BedrockAgentClient, agent_id: String, agent_alias_id: String) -> Self {
        Self {
            client,
            agent_id,
            agent_alias_id,
        }
    }

    /// Create a client from configuration, failing when the agent is not configured.
    pub fn from_config(client: BedrockAgentClient, config: &BedrockConfig) -> Result<Self> {
        let agent_id = config
            .agent_id
            .clone()
            .ok_or_else(|| Error::Config("BEDROCK_AGENT_ID not set".to_string()))?;
        let agent_alias_id = config
            .agent_alias_id
            .clone()
            .ok_or_else(|| Error::Config("BEDROCK_AGENT_ALIAS_ID not set".to_string()))?;

        Ok(Self::new(client, agent_id, agent_alias_id))
    }
}

#[async_trait]
impl AgentApi for AgentClient {
    async fn invoke(&self, session_id: &str, input: &str) -> Result<AgentCompletion> {
        info!(agent_id = %self.agent_id, session_id, "Invoking Bedrock agent");

        let output = self
            .client
            .invoke_agent()
            .agent_id(&self.agent_id)
            .agent_alias_id(&self.agent_alias_id)
            .session_id(session_id)
            .input_text(input)
            .send()
            .await
            .map_err(|e| Error::Aws(format!("Failed to invoke agent: {}", DisplayErrorContext(&e))))?;

        let mut stream = output.completion;
        let mut assembler = ChunkAssembler::new();

        while let Some(event) = stream
            .recv()
            .await
            .map_err(|e| Error::Aws(format!("Agent stream failed: {}", DisplayErrorContext(&e))))?
        {
            match event {
                ResponseStream::Chunk(part) => {
                    if let Some(bytes) = part.bytes() {
                        assembler.push(bytes.as_ref());
                    }
                }
                other => debug!("Ignoring agent stream event: {:?}", other),
            }
        }

        let completion = assembler.finish();
        debug!(chunks = completion.chunks, len = completion.text.len(), "Agent stream complete");
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_concatenate_in_order() {
        let mut assembler = ChunkAssembler::new();
        assembler.push(b"Your order ");
        assembler.push("ships tomorrow \u{1F69A}".as_bytes());
        assembler.push(b".");

        let completion = assembler.finish();
        assert_eq!(completion.text, "Your order ships tomorrow \u{1F69A}.");
        assert_eq!(completion.chunks, 3);
    }

    #[test]
    fn test_character_split_across_chunks() {
        let truck = "\u{1F69A}".as_bytes();
        let mut assembler = ChunkAssembler::new();
        assembler.push(b"On its way ");
        assembler.push(&truck[..1]);
        assembler.push(&truck[1..3]);
        assembler.push(&[truck[3], b'!']);

        let completion = assembler.finish();
        assert_eq!(completion.text, "On its way \u{1F69A}!");
        assert_eq!(completion.chunks, 4);
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let mut assembler = ChunkAssembler::new();
        assembler.push("ok \u{e9}".as_bytes());
        assembler.push(&"\u{e9}".as_bytes()[..1]);
        assert_eq!(assembler.finish().text, "ok \u{e9}");
    }

    #[test]
    fn test_invalid_chunk_is_dropped() {
        let mut assembler = ChunkAssembler::new();
        assembler.push(b"ok");
        assembler.push(&[0xff, 0xfe]);

        let completion = assembler.finish();
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.chunks, 2);
    }

    #[test]
    fn test_from_config_requires_agent() {
        let sdk_config = aws_sdk_bedrockagentruntime::Config::builder()
            .behavior_version(aws_sdk_bedrockagentruntime::config::BehaviorVersion::latest())
            .region(aws_sdk_bedrockagentruntime::config::Region::new("us-east-1"))
            .build();
        let client = BedrockAgentClient::from_conf(sdk_config);

        let result = AgentClient::from_config(client, &BedrockConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
