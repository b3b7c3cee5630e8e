use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::config::Config;
use crate::errors::{ReportError, Result};
use crate::wire::CompletionRequest;

pub mod openai;
pub mod anthropic;
pub mod ollama;

/// The text-completion boundary: one instruction in, one text reply out.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String>;

    fn describe(&self) -> String;
}

pub type DynProvider = Box<dyn Provider + Send + Sync>;

pub fn make_provider(cfg: &Config) -> AnyResult<DynProvider> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    match cfg.provider {
        ProviderKind::OpenAI => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("OPENAI_API_KEY env var is not set"))?;
            Ok(Box::new(openai::OpenAIProvider::new(
                cfg.model.clone(),
                api_key,
                cfg.openai_base.clone(),
                cfg.temperature,
                timeout,
            )))
        }
        ProviderKind::Anthropic => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow!("ANTHROPIC_API_KEY env var is not set"))?;
            Ok(Box::new(anthropic::Anthropic {
                model: cfg.model.clone(),
                api_key,
                timeout,
                api_base: cfg.anthropic_base.clone(),
                api_version: cfg.anthropic_version.clone(),
                temperature: cfg.temperature,
            }))
        }
        ProviderKind::Ollama => Ok(Box::new(ollama::Ollama {
            model: cfg.model.clone(),
            url: cfg.ollama_url.clone(),
            timeout,
            temperature: cfg.temperature,
        })),
    }
}

pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> ReportError {
    if e.is_timeout() {
        ReportError::CompletionService(format!("{service} request timed out"))
    } else {
        ReportError::CompletionService(format!("{service} request failed: {e}"))
    }
}

pub(crate) fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> ReportError {
    let body: String = body.chars().take(500).collect();
    ReportError::CompletionService(format!("{service} API error ({status}): {body}"))
}
