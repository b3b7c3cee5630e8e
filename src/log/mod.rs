use chrono::Utc;
use fs_err as fs;
use serde_json::{json, to_string_pretty};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::errors::Result;
use crate::wire::CompletionRequest;

/// Install the global subscriber. `RUST_LOG` wins over `debug`.
pub fn init(debug: bool) {
    let default = if debug { "neuroreport=debug,info" } else { "neuroreport=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn tx_dir(root: &Path, tx: Uuid) -> PathBuf {
    root.join("tx").join(tx.to_string())
}

/// Where prompts and replies of one generation are kept, when enabled.
#[derive(Debug, Clone)]
pub struct ExchangeLog {
    dir: Option<PathBuf>,
}

impl ExchangeLog {
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn open(root: &Path, tx: Uuid, provider: &str) -> Result<Self> {
        let dir = tx_dir(root, tx);
        fs::create_dir_all(&dir)?;
        let meta = json!({
            "transaction": tx,
            "started_at": Utc::now(),
            "provider": provider,
        });
        fs::write(dir.join("meta.json"), to_string_pretty(&meta)?)?;
        tracing::debug!(dir = %dir.display(), "saving exchanges");
        Ok(Self { dir: Some(dir) })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn save(&self, req: &CompletionRequest, reply: &str) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let prompt = format!("[SYSTEM]\n{}\n\n[USER]\n{}\n", req.instruction.system, req.instruction.user);
        fs::write(dir.join(format!("{}.prompt.txt", req.stage)), prompt)?;
        fs::write(dir.join(format!("{}.reply.txt", req.stage)), reply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Instruction, ReplyFormat};

    #[test]
    fn exchanges_land_under_the_transaction() {
        let root = tempfile::tempdir().unwrap();
        let tx = Uuid::new_v4();
        let log = ExchangeLog::open(root.path(), tx, "openai/gpt-4o").unwrap();
        let req = CompletionRequest {
            stage: "sections".into(),
            instruction: Instruction { system: "sys".into(), user: "usr".into() },
            format: ReplyFormat::Delimited,
        };
        log.save(&req, "reply").unwrap();

        let dir = root.path().join("tx").join(tx.to_string());
        assert!(dir.join("meta.json").exists());
        assert_eq!(fs::read_to_string(dir.join("sections.reply.txt")).unwrap(), "reply");
        assert!(fs::read_to_string(dir.join("sections.prompt.txt")).unwrap().contains("[USER]\nusr"));
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let log = ExchangeLog::disabled();
        assert!(log.dir().is_none());
        let req = CompletionRequest {
            stage: "x".into(),
            instruction: Instruction { system: String::new(), user: String::new() },
            format: ReplyFormat::Json,
        };
        assert!(log.save(&req, "r").is_ok());
    }
}
