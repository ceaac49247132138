use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{LlmBackend, LlmConfig};
use crate::errors::PortError;
use crate::ports::TextGenerator;

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint or an
/// Ollama `/api/generate` endpoint.
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    top_p: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions<'a>,
}

#[derive(Serialize)]
struct OllamaOptions<'a> {
    temperature: f32,
    top_p: f32,
    stop: &'a [String],
    num_predict: usize,
    num_ctx: usize,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, PortError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty() && !k.eq_ignore_ascii_case("not-needed"))
    }

    async fn openai_generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
    ) -> Result<String, PortError> {
        let url = format!("{}/chat/completions", self.base_url());
        let body = ChatCompletionRequest {
            model: &self.config.model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens,
            stop,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::status(status.as_u16(), text));
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(e.to_string()))?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Parse("no response choices returned from API".into()))?;
        Ok(choice.message.content.unwrap_or_default().trim().to_string())
    }

    async fn ollama_generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
    ) -> Result<String, PortError> {
        let url = format!("{}/api/generate", self.base_url());
        let body = OllamaRequest {
            model: &self.config.model_name,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                stop: stop.unwrap_or(&[]),
                num_predict: max_tokens,
                num_ctx: self.config.n_ctx,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::status(status.as_u16(), text));
        }

        let payload: OllamaResponse = response
            .json()
            .await
            .map_err(|e| PortError::Parse(e.to_string()))?;
        Ok(payload.response.trim().to_string())
    }
}

fn map_send_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout
    } else {
        PortError::Http(e)
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: usize,
        stop: Option<&[String]>,
    ) -> Result<String, PortError> {
        let attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.config.backend {
                LlmBackend::OpenAi => self.openai_generate(prompt, max_tokens, stop).await,
                LlmBackend::Ollama => self.ollama_generate(prompt, max_tokens, stop).await,
            };
            match result {
                Ok(text) => return Ok(text),
                Err(e) if attempt < attempts && e.is_transient() => {
                    log::warn!(
                        "generation request failed (attempt {attempt}/{attempts}): {e}, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * attempt as u32).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
