mod client;
pub(crate) mod schema;
pub(crate) mod types;

pub use schema::StructuredOutput;

use std::time::Duration;

use client::OpenAiClient;
use types::{JsonSchemaFormat, ResponseFormat, StructuredRequest, WireMessage};

use crate::error::{AiError, Result};
use crate::util::strip_code_fence;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
    max_tokens: u32,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_tokens: 500,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<OpenAiClient> {
        OpenAiClient::new(&self.api_key, &self.base_url, self.timeout)
    }

    fn request(&self, system: &str, user: &str, name: &str, schema: serde_json::Value) -> StructuredRequest {
        StructuredRequest {
            model: self.model.clone(),
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            temperature: types::supports_temperature(&self.model).then_some(0.0),
            max_tokens: Some(self.max_tokens),
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: name.to_string(),
                    strict: true,
                    schema,
                },
            },
        }
    }

    /// Structured completion returning the raw message text. Callers that
    /// must validate the payload themselves should use this over `extract`.
    pub async fn structured_output(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
    ) -> Result<String> {
        let request = self.request(system, user, "structured_response", schema);
        self.client()?.structured_output(&request).await
    }

    /// Type-safe structured output extraction.
    pub async fn extract<T: StructuredOutput>(&self, system: &str, user: &str) -> Result<T> {
        let request = self.request(system, user, "structured_response", T::openai_schema());
        let raw = self.client()?.structured_output(&request).await?;
        serde_json::from_str(strip_code_fence(&raw)).map_err(|e| AiError::Parse(e.to_string()))
    }
}
