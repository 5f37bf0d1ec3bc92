use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{error, info, instrument};

use crate::error::GenerationError;

use super::{TextGenerator, TextRequest};

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct GatewayTextGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl GatewayTextGenerator {
    pub fn new(endpoint: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
            model: model.to_string(),
        }
    }

    fn body(&self, request: &TextRequest) -> Value {
        let user_content = match &request.image {
            Some(image) => json!([
                { "type": "text", "text": request.user_prompt },
                { "type": "image_url", "image_url": { "url": image } }
            ]),
            None => json!(request.user_prompt),
        };

        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": user_content }
            ]
        })
    }
}

fn extract_content(body: &Value) -> Option<String> {
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[rocket::async_trait]
impl TextGenerator for GatewayTextGenerator {
    #[instrument(skip_all)]
    async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationError::Other("AI gateway API key not configured".to_string())
        })?;

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&self.body(&request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "AI gateway error");

            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited,
                StatusCode::PAYMENT_REQUIRED => GenerationError::CreditsExhausted,
                _ => GenerationError::Other(format!("AI gateway error: {}", status.as_u16())),
            });
        }

        let body: Value = resp.json().await?;
        let content = extract_content(&body).ok_or_else(|| {
            GenerationError::Other("AI gateway response had no message content".to_string())
        })?;

        info!(model = %self.model, chars = content.len(), "Text generated");
        Ok(content)
    }
}
