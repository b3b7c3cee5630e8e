use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{status_error, transport_error, Provider};
use crate::errors::{ReportError, Result};
use crate::wire::CompletionRequest;

pub struct Anthropic {
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
    pub api_base: String,
    pub api_version: String,
    pub temperature: f32,
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Msg<'a>>,
    system: &'a str,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    content: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

fn reply_text(raw: &str) -> Result<String> {
    let parsed: MsgResponse = serde_json::from_str(raw)
        .map_err(|e| ReportError::CompletionService(format!("anthropic response parse error: {e}")))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|b| b.r#type == "text")
        .map(|b| b.text)
        .collect();
    if text.trim().is_empty() {
        return Err(ReportError::CompletionService("anthropic: empty content".into()));
    }
    Ok(text.trim().to_string())
}

#[async_trait]
impl Provider for Anthropic {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| transport_error("anthropic", e))?;
        let body = MsgRequest {
            model: &self.model,
            max_tokens: 4096,
            temperature: self.temperature,
            messages: vec![Msg { role: "user", content: &req.instruction.user }],
            system: &req.instruction.system,
        };

        tracing::debug!(stage = %req.stage, %url, model = %self.model, "anthropic: POST");

        let resp = client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("anthropic", e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| transport_error("anthropic", e))?;
        if !status.is_success() {
            return Err(status_error("anthropic", status, &text));
        }
        reply_text(&text)
    }

    fn describe(&self) -> String {
        format!("anthropic/{}", self.model)
    }
}
