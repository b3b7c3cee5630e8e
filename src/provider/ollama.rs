use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{status_error, transport_error, Provider};
use crate::errors::{ReportError, Result};
use crate::wire::{CompletionRequest, Instruction, ReplyFormat};

pub struct Ollama {
    pub model: String,
    pub url: String,
    pub timeout: Duration,
    pub temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: MsgOut,
}

#[derive(Deserialize)]
struct MsgOut {
    content: String,
}

fn to_messages(ins: &Instruction) -> Vec<Msg<'_>> {
    vec![
        Msg { role: "system", content: &ins.system },
        Msg { role: "user", content: &ins.user },
    ]
}

#[async_trait]
impl Provider for Ollama {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| transport_error("ollama", e))?;
        let body = ChatRequest {
            model: &self.model,
            messages: to_messages(&req.instruction),
            stream: false,
            format: (req.format == ReplyFormat::Json).then_some("json"),
            options: OllamaOptions { temperature: self.temperature },
        };

        tracing::debug!(stage = %req.stage, %url, model = %self.model, "ollama: POST");

        let resp = client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("ollama", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error("ollama", e))?;
        if !status.is_success() {
            return Err(status_error("ollama", status, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ReportError::CompletionService(format!("ollama response parse error: {e}")))?;
        Ok(parsed.message.content.trim().to_string())
    }

    fn describe(&self) -> String {
        format!("ollama/{}", self.model)
    }
}
