pub mod gateway;
pub mod prompts;

pub use gateway::GatewayTextGenerator;

use crate::error::GenerationError;

/// One chat turn sent to the model. `image` is a data URL when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub image: Option<String>,
}

#[rocket::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<String, GenerationError>;
}
