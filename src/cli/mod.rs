use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(alias = "open-ai", alias = "openai")]
    OpenAI,
    #[value(alias = "anthropic")]
    Anthropic,
    #[value(alias = "ollama")]
    Ollama,
}

#[derive(Parser, Debug)]
#[command(name = "neuroreport", version, about = "Generate neuropsychological reports from form input and an LLM")]
pub struct Args {
    /// TOML config file; flags below override it.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub template: Option<PathBuf>,

    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Keep every prompt and reply under the artifacts directory.
    #[arg(long, default_value_t = false, global = true)]
    pub save_exchanges: bool,

    #[arg(long, default_value_t = false, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a report and write it to --out.
    Generate {
        /// Form fields as JSON.
        #[arg(long)]
        form: PathBuf,
        /// Convert to PDF (overrides the form's own flag).
        #[arg(long, default_value_t = false)]
        pdf: bool,
        /// Output file; defaults to the suggested download name.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a starter template carrying every token.
    Template {
        #[arg(long, default_value = "report_template.docx")]
        out: PathBuf,
    },
    /// Hold a submission until payment is confirmed; prints the session id.
    Checkout {
        #[arg(long)]
        form: PathBuf,
    },
    /// Release a held submission after a verified payment and generate it.
    Confirm {
        #[arg(long)]
        session: String,
    },
    /// Retrieve a paid report.
    Fetch {
        #[arg(long)]
        session: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
