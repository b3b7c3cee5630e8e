#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use neuroreport::convert::Converter;
use neuroreport::document::docx;
use neuroreport::provider::Provider;
use neuroreport::wire::{CompletionRequest, ReplyFormat};
use neuroreport::{GeneratorSettings, ReportGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Answer every requested heading, in order.
    Echo,
    /// Answer every heading but the last one.
    DropLast,
    /// Sleep past any reasonable timeout.
    Stall,
    /// JSON object keyed by every requested label.
    JsonEcho,
    /// JSON object missing the last requested label.
    JsonDropLast,
    /// Prose instead of JSON, until asked again strictly.
    JsonProseUntilStrict,
}

/// Stands in for the completion service and records what it was asked.
#[derive(Clone)]
pub struct ScriptedProvider {
    script: Script,
    pub calls: Arc<AtomicUsize>,
    pub stages: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            stages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sorted_stages(&self) -> Vec<String> {
        let mut s = self.stages.lock().clone();
        s.sort();
        s
    }
}

/// Heading lines of the original request, ignoring any strict re-ask suffix.
pub fn requested_headings(user: &str) -> Vec<String> {
    user.lines()
        .take_while(|l| !l.starts_with("STRICT MODE"))
        .filter(|l| l.starts_with("### "))
        .map(str::to_string)
        .collect()
}

/// Labels listed in the `Data:` block of a JSON-format request.
pub fn requested_labels(user: &str) -> Vec<String> {
    let data = user.split_once("Data: ").map(|(_, d)| d).unwrap_or("");
    let data = data.split("\nSTRICT MODE").next().unwrap_or("");
    let value: serde_json::Value = serde_json::from_str(data.trim()).expect("request data is JSON");
    value["sections"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|e| e["heading"].as_str().map(str::to_string))
        .collect()
}

fn json_reply(labels: &[String]) -> String {
    let object: serde_json::Map<String, serde_json::Value> = labels
        .iter()
        .map(|l| (l.clone(), serde_json::Value::String(format!("Paragraph for {l}."))))
        .collect();
    serde_json::Value::Object(object).to_string()
}

pub fn paragraph_for(heading_line: &str) -> String {
    let title = heading_line.splitn(2, ". ").nth(1).unwrap_or(heading_line);
    format!("Paragraph for {title}.")
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, req: &CompletionRequest) -> neuroreport::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stages.lock().push(req.stage.clone());
        match self.script {
            Script::JsonEcho | Script::JsonDropLast | Script::JsonProseUntilStrict => {
                assert_eq!(req.format, ReplyFormat::Json);
                let mut labels = requested_labels(&req.instruction.user);
                if self.script == Script::JsonDropLast {
                    labels.pop();
                }
                if self.script == Script::JsonProseUntilStrict && !req.stage.ends_with(".strict") {
                    return Ok("Here are the paragraphs you asked for.".into());
                }
                return Ok(format!("```json\n{}\n```", json_reply(&labels)));
            }
            _ => assert_eq!(req.format, ReplyFormat::Delimited),
        }

        let mut headings = requested_headings(&req.instruction.user);
        match self.script {
            Script::Echo => {}
            Script::DropLast => {
                headings.pop();
            }
            Script::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Script::JsonEcho | Script::JsonDropLast | Script::JsonProseUntilStrict => {}
        }
        Ok(headings
            .iter()
            .map(|h| format!("{h}\n{}", paragraph_for(h)))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn describe(&self) -> String {
        format!("scripted:{:?}", self.script)
    }
}

/// Pretends to convert by copying the source next to it with a `.pdf` name.
pub struct CopyConverter;

#[async_trait]
impl Converter for CopyConverter {
    async fn to_pdf(&self, source: &Path, out_dir: &Path) -> neuroreport::Result<PathBuf> {
        let pdf = out_dir.join("report.pdf");
        fs_err::copy(source, &pdf)?;
        Ok(pdf)
    }
}

pub const TEMPLATE_BODY: &[&str] = &[
    "Name: {{name}}",
    "DOB: {{dob}} Age: {{age}}",
    "Grade {{grade}} at {{school}}",
    "Seen on {{eval_dates}} by {{psychologist_name}}",
    "{{referral_paragraph}}",
    "{{family_details_paragraph}}",
    "{{observations_paragraph}}",
    "Tests: {{test_list}}",
    "{{test_paragraphs}}",
    "Notes: {{appendix}}",
];

/// A template with one paragraph per entry in `TEMPLATE_BODY`, plus a
/// paragraph whose `{{school}}` token is split across three runs.
pub fn write_template(dir: &Path) -> PathBuf {
    let mut body: String = TEMPLATE_BODY.iter().map(|l| docx::plain_paragraph(l)).collect();
    body.push_str(concat!(
        r#"<w:p><w:r><w:rPr><w:i/></w:rPr><w:t>School: {{sch</w:t></w:r>"#,
        r#"<w:r><w:t>oo</w:t></w:r>"#,
        r#"<w:r><w:t xml:space="preserve">l}} (verified)</w:t></w:r></w:p>"#,
    ));
    let footer = format!(
        "{}{}",
        docx::plain_paragraph("Clinic footer"),
        docx::plain_paragraph("Page 1")
    );
    let path = dir.join("template.docx");
    fs_err::write(&path, docx::build_package(&body, &footer).unwrap()).unwrap();
    path
}

pub fn settings(template: PathBuf) -> GeneratorSettings {
    GeneratorSettings {
        template_path: template,
        format: ReplyFormat::Delimited,
        strict_retry: true,
        timeout: Duration::from_secs(5),
        clear_unfilled_sections: false,
        exchanges_root: None,
    }
}

pub fn generator(
    provider: &ScriptedProvider,
    converter: Box<dyn Converter>,
    settings: GeneratorSettings,
) -> ReportGenerator {
    ReportGenerator::new(Box::new(provider.clone()), converter, settings)
}

pub fn body_texts(doc: &neuroreport::document::Document) -> Vec<String> {
    doc.body().unwrap().paragraphs.iter().map(|p| p.text()).collect()
}
