use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{status_error, transport_error};
use crate::errors::{ReportError, Result};
use crate::wire::{CompletionRequest, ReplyFormat};

/// OpenAI chat completions: the role framing goes in as the system message,
/// the compiled prompt as the single user message.
pub struct OpenAIProvider {
    model: String,
    api_key: String,
    api_base: String,
    temperature: f32,
    client: Client,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(model: String, api_key: String, api_base: String, temperature: f32, timeout: Duration) -> Self {
        Self {
            model,
            api_key,
            api_base,
            temperature,
            client: Client::new(),
            timeout,
        }
    }

    fn body(&self, req: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": req.instruction.system },
                { "role": "user", "content": req.instruction.user }
            ],
            "temperature": self.temperature,
        });
        if req.format == ReplyFormat::Json {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

fn reply_text(raw: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| ReportError::CompletionService(format!("failed to parse OpenAI response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .ok_or_else(|| ReportError::CompletionService("OpenAI: empty choices".into()))
}

#[async_trait]
impl super::Provider for OpenAIProvider {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        tracing::debug!(stage = %req.stage, %url, model = %self.model, "openai: POST");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.body(req))
            .send()
            .await
            .map_err(|e| transport_error("OpenAI", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error("OpenAI", e))?;
        if !status.is_success() {
            return Err(status_error("OpenAI", status, &text));
        }
        reply_text(&text)
    }

    fn describe(&self) -> String {
        format!("openai/{}", self.model)
    }
}
