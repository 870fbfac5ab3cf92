//! Shared library for CloudMart Lambda functions.
//!
//! This crate provides the models, storage, services and cloud clients used
//! across all Lambda functions.

pub mod agents;
pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod memory;
pub mod models;
pub mod openai;
pub mod secrets;
pub mod sentiment;
pub mod services;
pub mod store;
pub mod tickets;

pub use agents::{AgentApi, AgentClient, AgentCompletion};
pub use ai::AiService;
pub use config::Config;
pub use error::{Error, Result};
pub use http::ApiResponse;
pub use memory::InMemoryStore;
pub use openai::{AssistantApi, AssistantDefinition, OpenAiClient};
pub use secrets::{get_secret, resolve_credential};
pub use sentiment::{SentimentAnalyzer, TextAnalyticsClient};
pub use services::{OrderService, ProductService};
pub use store::{DynamoStore, OrderStore, ProductStore, TicketStore};
pub use tickets::TicketService;
