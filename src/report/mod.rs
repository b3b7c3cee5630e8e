//! Report assembly: template -> batched completion calls -> parsed paragraphs
//! -> one substitution pass -> footer stamp -> saved (and maybe converted) file.

use fs_err as fs;
use futures::future::{try_join, try_join_all};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::convert::Converter;
use crate::document::docx;
use crate::errors::{ReportError, Result};
use crate::form::{token, ReportForm, SectionSpec, TestSpec, BASIC_FIELDS, SECTIONS};
use crate::log::ExchangeLog;
use crate::parse;
use crate::prompt::{self, Framing};
use crate::provider::DynProvider;
use crate::substitute::{substitute, ReplacementMap, SubstitutionStats};
use crate::wire::{CompletionRequest, PromptBatch, ReplyFormat};

pub const FOOTER_PREFIX: &str = "Report generated by: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Docx,
    Pdf,
}

impl OutputFormat {
    pub fn download_name(self) -> &'static str {
        match self {
            OutputFormat::Docx => "neuropsych_report.docx",
            OutputFormat::Pdf => "neuropsych_report.pdf",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "docx" => Some(OutputFormat::Docx),
            "pdf" => Some(OutputFormat::Pdf),
            _ => None,
        }
    }
}

/// Steps of one generation, recorded in the order they were reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FieldsCollected,
    SectionsPrepared,
    ParagraphsGenerated,
    ParagraphsSkipped,
    TestsProcessed,
    Merged,
    Substituted,
    FooterStamped,
    Persisted,
    Converted,
    Done,
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub template_path: PathBuf,
    pub format: ReplyFormat,
    pub strict_retry: bool,
    pub timeout: Duration,
    pub clear_unfilled_sections: bool,
    /// Root for saved prompts/replies; `None` keeps nothing.
    pub exchanges_root: Option<PathBuf>,
}

impl GeneratorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            template_path: cfg.template_path.clone(),
            format: cfg.prompt_format,
            strict_retry: cfg.strict_retry,
            timeout: Duration::from_secs(cfg.timeout_secs),
            clear_unfilled_sections: cfg.clear_unfilled_sections,
            exchanges_root: cfg.save_exchanges.then(|| cfg.artifacts_dir.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationSummary {
    pub sections: usize,
    pub tests: usize,
    pub completion_calls: usize,
    pub substitution: SubstitutionStats,
    pub stages: Vec<Stage>,
    pub exchanges_dir: Option<PathBuf>,
}

/// A finished report living in its own temporary directory. Dropping it
/// removes the directory, whatever happened to the file.
#[derive(Debug)]
pub struct GeneratedReport {
    _dir: TempDir,
    path: PathBuf,
    pub format: OutputFormat,
    pub summary: GenerationSummary,
}

impl GeneratedReport {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn download_name(&self) -> &'static str {
        self.format.download_name()
    }

    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Copy the report out of its temporary directory.
    pub fn persist_to(&self, dest: &Path) -> Result<u64> {
        Ok(fs::copy(&self.path, dest)?)
    }
}

pub struct ReportGenerator {
    provider: DynProvider,
    converter: Box<dyn Converter>,
    settings: GeneratorSettings,
}

/// State of one generation: where exchanges go and how many calls were made.
struct Generation<'a> {
    gen: &'a ReportGenerator,
    log: ExchangeLog,
    calls: AtomicUsize,
}

impl ReportGenerator {
    pub fn new(
        provider: DynProvider,
        converter: Box<dyn Converter>,
        settings: GeneratorSettings,
    ) -> Self {
        Self { provider, converter, settings }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub async fn generate(&self, form: &ReportForm) -> Result<GeneratedReport> {
        let tx = Uuid::new_v4();
        let span = tracing::info_span!("generate", %tx);
        match self.run(form, tx).instrument(span).await {
            Ok(report) => {
                tracing::info!(
                    path = %report.path.display(),
                    calls = report.summary.completion_calls,
                    "report ready"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "report generation failed");
                Err(e)
            }
        }
    }

    async fn run(&self, form: &ReportForm, tx: Uuid) -> Result<GeneratedReport> {
        let mut summary = GenerationSummary::default();
        summary.stages.push(Stage::FieldsCollected);

        let mut doc = docx::load(&self.settings.template_path)?;

        let log = match &self.settings.exchanges_root {
            Some(root) => ExchangeLog::open(root, tx, &self.provider.describe())?,
            None => ExchangeLog::disabled(),
        };
        summary.exchanges_dir = log.dir().map(Path::to_path_buf);
        let generation = Generation { gen: self, log, calls: AtomicUsize::new(0) };

        let sections = form.section_specs();
        let tests = form.test_specs();
        summary.sections = sections.len();
        summary.tests = tests.len();
        summary.stages.push(Stage::SectionsPrepared);
        tracing::info!(sections = sections.len(), tests = tests.len(), "fields collected");

        let (section_map, test_blocks) = try_join(
            generation.sections(&sections, &form.appendix),
            generation.tests(&tests, &form.appendix),
        )
        .await?;
        summary.stages.push(if sections.is_empty() {
            Stage::ParagraphsSkipped
        } else {
            Stage::ParagraphsGenerated
        });
        summary.stages.push(Stage::TestsProcessed);
        summary.completion_calls = generation.calls.load(Ordering::SeqCst);

        let mut map = self.base_map(form, &tests, &test_blocks);
        map.extend(section_map);
        summary.stages.push(Stage::Merged);

        summary.substitution = substitute(&mut doc, &map);
        summary.stages.push(Stage::Substituted);

        stamp_footer(&mut doc, &form.psychologist_name)?;
        summary.stages.push(Stage::FooterStamped);

        let dir = tempfile::tempdir()?;
        let docx_path = dir.path().join("report.docx");
        docx::save(&doc, &docx_path)?;
        summary.stages.push(Stage::Persisted);
        tracing::debug!(path = %docx_path.display(), "document saved");

        let (path, format) = if form.pdf {
            let pdf = self.converter.to_pdf(&docx_path, dir.path()).await?;
            summary.stages.push(Stage::Converted);
            (pdf, OutputFormat::Pdf)
        } else {
            (docx_path, OutputFormat::Docx)
        };
        summary.stages.push(Stage::Done);

        Ok(GeneratedReport { _dir: dir, path, format, summary })
    }

    /// Everything except the generated section paragraphs.
    fn base_map(
        &self,
        form: &ReportForm,
        tests: &[TestSpec],
        test_blocks: &[String],
    ) -> ReplacementMap {
        let mut map = ReplacementMap::new();
        for field in BASIC_FIELDS {
            map.insert(token(field), form.basic_field(field));
        }
        map.insert(token("psychologist_name"), form.psychologist_name.as_str());
        map.insert(token("footer_information"), form.footer_information());
        map.insert(token("appendix"), form.appendix.as_str());
        map.insert(token("test_paragraphs"), test_blocks.join("\n\n"));
        map.insert(
            token("test_list"),
            tests.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", "),
        );
        if self.settings.clear_unfilled_sections {
            for (id, _) in SECTIONS {
                map.insert(token(&format!("{id}_paragraph")), "");
            }
        }
        map
    }
}

/// Overwrite the first paragraph of the last section's footer.
pub fn stamp_footer(doc: &mut crate::document::Document, psychologist: &str) -> Result<()> {
    let footer = doc
        .last_section_footer_mut()
        .ok_or_else(|| ReportError::Template("template has no footer to stamp".into()))?;
    let name = footer.name.clone();
    let first = footer
        .paragraphs
        .first_mut()
        .ok_or_else(|| ReportError::Template(format!("footer {name} has no paragraph")))?;
    first.set_text(format!("{FOOTER_PREFIX}{psychologist}"));
    Ok(())
}

fn test_block(name: &str, summary: Option<&str>, analysis: &str) -> String {
    match summary {
        Some(s) => format!("{name}:\n{s}\n\n{analysis}"),
        None => format!("{name}:\n{analysis}"),
    }
}

impl Generation<'_> {
    fn format(&self) -> ReplyFormat {
        self.gen.settings.format
    }

    async fn sections(&self, sections: &[SectionSpec], appendix: &str) -> Result<ReplacementMap> {
        let mut map = ReplacementMap::new();
        let batch = prompt::section_batch(sections, appendix, self.format());
        let paragraphs = self.ask(&batch, Framing::Sections, "sections").await?;
        for (entry, paragraph) in batch.entries.iter().zip(paragraphs) {
            if let Some(placeholder) = &entry.placeholder {
                map.insert(placeholder.as_str(), paragraph);
            }
        }
        Ok(map)
    }

    async fn tests(&self, tests: &[TestSpec], appendix: &str) -> Result<Vec<String>> {
        try_join_all(tests.iter().enumerate().map(|(i, t)| self.test(i + 1, t, appendix))).await
    }

    async fn test(&self, n: usize, test: &TestSpec, appendix: &str) -> Result<String> {
        let summary_batch =
            prompt::test_summary_batch(std::slice::from_ref(test), appendix, self.format());
        let summary = self
            .ask(&summary_batch, Framing::TestSummary, &format!("test-{n}-summary"))
            .await?
            .into_iter()
            .next();

        let analysis_batch = prompt::test_analysis_batch(test, appendix, self.format());
        let analysis = self
            .ask(&analysis_batch, Framing::TestAnalysis, &format!("test-{n}-analysis"))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        Ok(test_block(&test.name, summary.as_deref(), &analysis))
    }

    /// Compile, call, parse. An empty batch issues no call. A reply that does
    /// not line up with the request gets one stricter re-ask when enabled.
    async fn ask(&self, batch: &PromptBatch, framing: Framing, stage: &str) -> Result<Vec<String>> {
        let Some(instruction) = prompt::compile(batch, framing) else {
            return Ok(Vec::new());
        };
        let req = CompletionRequest {
            stage: stage.to_string(),
            instruction,
            format: batch.format,
        };
        let reply = self.call(&req).await?;

        match parse::parse_reply(&reply, batch) {
            Ok(paragraphs) => Ok(paragraphs),
            Err(e @ (ReportError::ParseMismatch { .. } | ReportError::InvalidJson(_)))
                if self.gen.settings.strict_retry =>
            {
                tracing::warn!(stage, error = %e, "reply did not line up; asking again strictly");
                let mut strict = req.clone();
                strict.stage = format!("{stage}.strict");
                strict.instruction.user.push_str(&prompt::strict_suffix(batch));
                let reply = self.call(&strict).await?;
                parse::parse_reply(&reply, batch)
            }
            Err(e) => Err(e),
        }
    }

    async fn call(&self, req: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let timeout = self.gen.settings.timeout;
        let reply = tokio::time::timeout(timeout, self.gen.provider.complete(req))
            .await
            .map_err(|_| {
                let msg = format!("{} timed out after {}s", req.stage, timeout.as_secs());
                ReportError::CompletionService(msg)
            })??;
        tracing::debug!(stage = %req.stage, bytes = reply.len(), "completion received");
        self.log.save(req, &reply)?;
        Ok(reply)
    }
}
