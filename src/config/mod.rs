use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Args, ProviderKind};
use crate::errors::{ReportError, Result};
use crate::wire::ReplyFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub template_path: PathBuf,
    pub prompt_format: ReplyFormat,
    /// Re-ask once with a stricter instruction before failing a parse.
    pub strict_retry: bool,
    /// Blank the placeholders of sections that had no bullets.
    pub clear_unfilled_sections: bool,
    pub openai_base: String,
    pub anthropic_base: String,
    pub anthropic_version: String,
    pub ollama_url: String,
    /// Overrides the `soffice`/`libreoffice` lookup.
    pub converter_program: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub save_exchanges: bool,
    /// SQLite file for paid sessions; in-memory when unset.
    pub session_db: Option<PathBuf>,
    /// Held submissions older than this are dropped; 0 keeps them forever.
    pub session_ttl_hours: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAI,
            model: "gpt-4o".into(),
            temperature: 0.7,
            timeout_secs: 120,
            template_path: "doc_templates/report_template.docx".into(),
            prompt_format: ReplyFormat::Delimited,
            strict_retry: true,
            clear_unfilled_sections: false,
            openai_base: "https://api.openai.com/v1".into(),
            anthropic_base: "https://api.anthropic.com".into(),
            anthropic_version: "2023-06-01".into(),
            ollama_url: "http://localhost:11434".into(),
            converter_program: None,
            artifacts_dir: ".neuroreport".into(),
            save_exchanges: false,
            session_db: None,
            session_ttl_hours: 72,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ReportError::Config(format!("{}: {e}", path.display())))
    }

    /// File (if any) first, then flags.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(p) = args.provider {
            cfg.provider = p;
        }
        if let Some(m) = &args.model {
            cfg.model = m.clone();
        }
        if let Some(t) = &args.template {
            cfg.template_path = t.clone();
        }
        if let Some(s) = args.timeout_secs {
            cfg.timeout_secs = s;
        }
        cfg.save_exchanges |= args.save_exchanges;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        (self.session_ttl_hours > 0).then(|| Duration::from_secs(self.session_ttl_hours * 3600))
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ReportError::Config("timeout_secs must be greater than zero".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ReportError::Config(format!("temperature {} is outside 0.0..=2.0", self.temperature)));
        }
        if self.model.trim().is_empty() {
            return Err(ReportError::Config("model must not be empty".into()));
        }
        Ok(())
    }
}
