//! Sentiment scoring with Azure AI Language (Text Analytics).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::models::{SentimentAnalysis, SentimentLabel, SentimentScores};
use crate::{Error, Result};

/// Text Analytics rejects documents longer than this many characters.
pub const MAX_DOCUMENT_CHARS: usize = 5120;

/// Scores the sentiment of free text.
#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<SentimentAnalysis>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentimentResponse {
    #[serde(default)]
    documents: Vec<DocumentSentiment>,
    #[serde(default)]
    errors: Vec<DocumentError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSentiment {
    sentiment: SentimentLabel,
    confidence_scores: SentimentScores,
}

#[derive(Debug, Deserialize)]
struct DocumentError {
    id: String,
    error: serde_json::Value,
}

/// Client for the Text Analytics v3.1 sentiment endpoint.
pub struct TextAnalyticsClient {
    http_client: Client,
    endpoint: String,
    api_key: String,
}

impl TextAnalyticsClient {
    pub fn new(endpoint: &str, api_key: String) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl SentimentAnalyzer for TextAnalyticsClient {
    async fn analyze(&self, text: &str) -> Result<SentimentAnalysis> {
        let document = truncate_chars(text, MAX_DOCUMENT_CHARS);
        let body = json!({
            "documents": [{ "id": "1", "language": "en", "text": document }]
        });

        let response = self
            .http_client
            .post(format!("{}/text/analytics/v3.1/sentiment", self.endpoint))
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "No error body".to_string());
            error!(status = %status, error = %body, "Text Analytics API error");
            return Err(Error::Upstream(format!(
                "Text Analytics returned {}: {}",
                status, body
            )));
        }

        let parsed: SentimentResponse = response.json().await?;
        let analysis = into_analysis(parsed)?;
        info!(sentiment = ?analysis.label, "Scored document sentiment");
        Ok(analysis)
    }
}

fn into_analysis(response: SentimentResponse) -> Result<SentimentAnalysis> {
    if let Some(doc_error) = response.errors.first() {
        return Err(Error::Upstream(format!(
            "Text Analytics rejected document {}: {}",
            doc_error.id, doc_error.error
        )));
    }

    let document = response
        .documents
        .into_iter()
        .next()
        .ok_or_else(|| Error::Upstream("Text Analytics returned no documents".to_string()))?;

    Ok(SentimentAnalysis {
        label: document.sentiment,
        scores: document.confidence_scores,
    })
}

/// Truncate on a character boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_sentiment() {
        let response: SentimentResponse = serde_json::from_value(json!({
            "documents": [{
                "id": "1",
                "sentiment": "mixed",
                "confidenceScores": { "positive": 0.4, "neutral": 0.1, "negative": 0.5 },
                "sentences": [],
                "warnings": []
            }],
            "errors": [],
            "modelVersion": "2022-11-01"
        }))
        .unwrap();

        let analysis = into_analysis(response).unwrap();
        assert_eq!(analysis.label, SentimentLabel::Mixed);
        assert_eq!(analysis.scores.negative, 0.5);
    }

    #[test]
    fn test_document_error_is_upstream_error() {
        let response: SentimentResponse = serde_json::from_value(json!({
            "documents": [],
            "errors": [{ "id": "1", "error": { "code": "InvalidArgument", "message": "Document text is empty." } }]
        }))
        .unwrap();

        assert!(matches!(into_analysis(response), Err(Error::Upstream(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
