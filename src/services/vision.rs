// Vision collaborator
// Sends an item photo to the configured vision model and turns its free-text
// reply into a structured listing draft. Any non-conforming or empty reply is
// terminal for the request (mapped to a bad-gateway error) and must never
// consume quota - admission stays read-only until this succeeds.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use crate::app_config::VisionConfig;

const DRAFT_PROMPT: &str = "You are a marketplace listing assistant. Look at the item in the \
photo and respond with a single JSON object and nothing else, using exactly these fields: \
\"title\" (short, catchy), \"description\" (2-3 sentences a seller could post as-is), \
\"condition\" (one of: new, like new, good, fair, poor), \"price\" (estimated resale value \
in dollars as a number, or null if you cannot tell), \"location\" (null unless the photo \
clearly shows one).";

// Models routinely wrap the object in prose or a ```json fence; take the
// outermost brace pair.
static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("listing draft pattern is valid"));

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vision provider returned status {0}")]
    UpstreamStatus(u16),

    #[error("Vision provider returned an empty response")]
    EmptyResponse,

    #[error("Vision response was not a usable listing draft: {0}")]
    Malformed(String),
}

/// Structured draft extracted from the model's reply. Title, description and
/// condition are required and non-empty; price and location are best-effort.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub condition: String,
    pub price: Option<f64>,
    pub location: Option<String>,
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Returns the provider's raw text reply for an image.
    async fn analyze_image(&self, image: &[u8], mime: &str) -> Result<String, VisionError>;
}

/// Chat-completions style vision client (OpenAI-compatible endpoint).
pub struct OpenAiVisionClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
}

impl OpenAiVisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionClient {
    #[instrument(skip(self, image))]
    async fn analyze_image(&self, image: &[u8], mime: &str) -> Result<String, VisionError> {
        let data_url = format!("data:{};base64,{}", mime, BASE64.encode(image));

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": DRAFT_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Vision provider returned {}", status);
            return Err(VisionError::UpstreamStatus(status.as_u16()));
        }

        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if content.trim().is_empty() {
            return Err(VisionError::EmptyResponse);
        }

        Ok(content)
    }
}

/// Extract a `ListingDraft` out of the provider's free-text reply.
pub fn parse_listing_draft(raw: &str) -> Result<ListingDraft, VisionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VisionError::EmptyResponse);
    }

    let block = JSON_BLOCK
        .find(trimmed)
        .map(|m| m.as_str())
        .ok_or_else(|| VisionError::Malformed("no JSON object in response".to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(block).map_err(|e| VisionError::Malformed(e.to_string()))?;

    let required = |field: &str| -> Result<String, VisionError> {
        value[field]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| VisionError::Malformed(format!("missing or empty field: {}", field)))
    };

    // Price sometimes comes back as a quoted string; accept both.
    let price = match &value["price"] {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_start_matches('$').parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| *p >= 0.0);

    let location = value["location"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ListingDraft {
        title: required("title")?,
        description: required("description")?,
        condition: required("condition")?,
        price,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let raw = r#"{"title":"Vintage Lamp","description":"A mid-century brass lamp in working order.","condition":"good","price":45.0,"location":null}"#;
        let draft = parse_listing_draft(raw).unwrap();
        assert_eq!(draft.title, "Vintage Lamp");
        assert_eq!(draft.condition, "good");
        assert_eq!(draft.price, Some(45.0));
        assert!(draft.location.is_none());
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let raw = "Here is the listing you asked for:\n```json\n{\"title\": \"Road Bike\", \
                   \"description\": \"Aluminium frame, recently serviced.\", \"condition\": \
                   \"like new\", \"price\": \"$250\", \"location\": \"Austin, TX\"}\n```\nLet me know!";
        let draft = parse_listing_draft(raw).unwrap();
        assert_eq!(draft.title, "Road Bike");
        assert_eq!(draft.price, Some(250.0));
        assert_eq!(draft.location.as_deref(), Some("Austin, TX"));
    }

    #[test]
    fn test_parse_rejects_missing_required_field() {
        let raw = r#"{"title":"Chair","description":"","condition":"good"}"#;
        assert!(matches!(
            parse_listing_draft(raw),
            Err(VisionError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_and_non_json() {
        assert!(matches!(
            parse_listing_draft("   "),
            Err(VisionError::EmptyResponse)
        ));
        assert!(matches!(
            parse_listing_draft("I could not identify the item, sorry."),
            Err(VisionError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_negative_price_dropped() {
        let raw = r#"{"title":"Box","description":"Cardboard moving box.","condition":"fair","price":-3}"#;
        let draft = parse_listing_draft(raw).unwrap();
        assert_eq!(draft.price, None);
    }
}
