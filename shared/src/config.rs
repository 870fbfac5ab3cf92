//! Configuration management for Lambda functions.

use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// DynamoDB table holding products
    pub products_table: String,
    /// DynamoDB table holding orders
    pub orders_table: String,
    /// DynamoDB table holding support tickets
    pub tickets_table: String,
    pub openai: OpenAiConfig,
    pub bedrock: BedrockConfig,
    pub azure: AzureLanguageConfig,
}

/// OpenAI Assistants settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key supplied directly in the environment
    pub api_key: Option<String>,
    /// ARN of a secret holding the API key
    pub api_key_secret_arn: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Assistant with order-management tools; created on cold start when unset
    pub assistant_id: Option<String>,
    /// Customer-support assistant used by tickets; created on cold start when unset
    pub ticket_assistant_id: Option<String>,
    /// Interval between run status checks
    pub poll_interval: Duration,
}

/// Bedrock agent settings.
#[derive(Debug, Clone, Default)]
pub struct BedrockConfig {
    pub agent_id: Option<String>,
    pub agent_alias_id: Option<String>,
}

/// Azure AI Language (Text Analytics) settings.
#[derive(Debug, Clone, Default)]
pub struct AzureLanguageConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_key_secret_arn: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poll_interval_ms = var("RUN_POLL_INTERVAL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1000);

        Self {
            products_table: var("PRODUCTS_TABLE").unwrap_or_else(|| "cloudmart-products".to_string()),
            orders_table: var("ORDERS_TABLE").unwrap_or_else(|| "cloudmart-orders".to_string()),
            tickets_table: var("TICKETS_TABLE").unwrap_or_else(|| "cloudmart-tickets".to_string()),
            openai: OpenAiConfig {
                api_key: var("OPENAI_API_KEY"),
                api_key_secret_arn: var("OPENAI_API_KEY_SECRET_ARN"),
                base_url: var("OPENAI_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-4-turbo-preview".to_string()),
                assistant_id: var("OPENAI_ASSISTANT_ID"),
                ticket_assistant_id: var("OPENAI_TICKET_ASSISTANT_ID"),
                poll_interval: Duration::from_millis(poll_interval_ms),
            },
            bedrock: BedrockConfig {
                agent_id: var("BEDROCK_AGENT_ID"),
                agent_alias_id: var("BEDROCK_AGENT_ALIAS_ID"),
            },
            azure: AzureLanguageConfig {
                endpoint: var("AZURE_LANGUAGE_ENDPOINT"),
                api_key: var("AZURE_LANGUAGE_KEY"),
                api_key_secret_arn: var("AZURE_LANGUAGE_KEY_SECRET_ARN"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.products_table, "cloudmart-products");
        assert_eq!(config.orders_table, "cloudmart-orders");
        assert_eq!(config.tickets_table, "cloudmart-tickets");
        assert_eq!(config.openai.poll_interval, Duration::from_secs(1));
        assert_eq!(config.openai.model, "gpt-4-turbo-preview");
        assert!(config.bedrock.agent_id.is_none());
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("ORDERS_TABLE", "orders-dev"),
            ("RUN_POLL_INTERVAL_MS", "250"),
            ("OPENAI_ASSISTANT_ID", "  "),
            ("BEDROCK_AGENT_ID", "AGENT1"),
        ]
        .into_iter()
        .collect();

        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.orders_table, "orders-dev");
        assert_eq!(config.openai.poll_interval, Duration::from_millis(250));
        assert!(config.openai.assistant_id.is_none());
        assert_eq!(config.bedrock.agent_id.as_deref(), Some("AGENT1"));
    }
}
