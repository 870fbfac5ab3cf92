//! Support tickets backed by assistant threads.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ai::{converse, NoTools};
use crate::models::{timestamp, Message, Ticket, TicketStatus};
use crate::openai::AssistantApi;
use crate::sentiment::SentimentAnalyzer;
use crate::store::TicketStore;
use crate::{Error, Result};

pub struct TicketService {
    store: Arc<dyn TicketStore>,
    assistant: Arc<dyn AssistantApi>,
    assistant_id: String,
    poll_interval: Duration,
    sentiment: Option<Arc<dyn SentimentAnalyzer>>,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        assistant: Arc<dyn AssistantApi>,
        assistant_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            assistant,
            assistant_id,
            poll_interval,
            sentiment: None,
        }
    }

    /// Enable sentiment scoring.
    pub fn with_sentiment(mut self, analyzer: Arc<dyn SentimentAnalyzer>) -> Self {
        self.sentiment = Some(analyzer);
        self
    }

    async fn ai_reply(&self, thread_id: &str, message: &str) -> Result<String> {
        converse(
            self.assistant.as_ref(),
            &self.assistant_id,
            thread_id,
            message,
            self.poll_interval,
            &NoTools,
        )
        .await
    }

    pub async fn list_tickets(&self) -> Result<Vec<Ticket>> {
        let tickets = self.store.list().await?;
        info!(count = tickets.len(), "Listed tickets");
        Ok(tickets)
    }

    pub async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        self.store.get(id).await
    }

    /// Open a ticket on a fresh thread and record the first exchange.
    pub async fn create_ticket(&self, message: &str) -> Result<Ticket> {
        if message.trim().is_empty() {
            return Err(Error::Validation("Message cannot be empty".to_string()));
        }

        let thread_id = self.assistant.create_thread().await?;
        let mut ticket = Ticket::new(thread_id);
        ticket.messages.push(Message::user(message));

        let reply = self.ai_reply(&ticket.thread_id, message).await?;
        ticket.messages.push(Message::assistant(reply));

        self.store.put(&ticket).await?;
        info!(ticket_id = %ticket.id, thread_id = %ticket.thread_id, "Created ticket");
        Ok(ticket)
    }

    /// Add a customer message and the assistant's reply.
    ///
    /// Returns `None` when the ticket does not exist or is closed.
    pub async fn send_message(&self, ticket_id: &str, message: &str) -> Result<Option<Ticket>> {
        if message.trim().is_empty() {
            return Err(Error::Validation("Message cannot be empty".to_string()));
        }

        let mut ticket = match self.store.get(ticket_id).await? {
            Some(ticket) if !ticket.is_closed() => ticket,
            Some(_) => {
                warn!(ticket_id, "Message sent to closed ticket");
                return Ok(None);
            }
            None => return Ok(None),
        };

        ticket.messages.push(Message::user(message));
        let reply = self.ai_reply(&ticket.thread_id, message).await?;
        ticket.messages.push(Message::assistant(reply));
        ticket.updated_at = timestamp::now();

        self.store.put(&ticket).await?;
        Ok(Some(ticket))
    }

    pub async fn close_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        let Some(mut ticket) = self.store.get(ticket_id).await? else {
            return Ok(None);
        };

        ticket.status = TicketStatus::Closed;
        ticket.updated_at = timestamp::now();
        self.store.put(&ticket).await?;
        info!(ticket_id, "Closed ticket");
        Ok(Some(ticket))
    }

    /// Score the customer's side of the conversation and store the result on the ticket.
    pub async fn analyze_sentiment(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        let analyzer = self
            .sentiment
            .as_ref()
            .ok_or_else(|| Error::Config("Sentiment analysis is not configured".to_string()))?;

        let Some(mut ticket) = self.store.get(ticket_id).await? else {
            return Ok(None);
        };

        let text = ticket.customer_text();
        if text.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Ticket {} has no customer messages to analyze",
                ticket_id
            )));
        }

        let analysis = analyzer.analyze(&text).await?;
        ticket.apply_sentiment(analysis);
        self.store.put(&ticket).await?;
        info!(ticket_id, sentiment = ?ticket.sentiment, "Stored ticket sentiment");
        Ok(Some(ticket))
    }
}
