use serde_json::json;

use crate::form::{SectionSpec, TestSpec};
use crate::wire::{Instruction, PromptBatch, PromptEntry, ReplyFormat};

/// Who the model is asked to be for a given batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sections,
    TestSummary,
    TestAnalysis,
}

fn role(framing: Framing) -> &'static str {
    match framing {
        Framing::Sections => r#"You are an experienced pediatric neuropsychologist drafting sections of a clinical neuropsychological evaluation report.
Write in a professional, third-person clinical register. Use only the facts in the bullet points and the appendix; do not invent history, scores or diagnoses."#,
        Framing::TestSummary => r#"You are an experienced pediatric neuropsychologist summarizing a clinician's notes about an assessment instrument for a clinical report.
Turn the bullet points into one cohesive paragraph in a professional, third-person clinical register. Do not add facts that are not in the notes or the appendix."#,
        Framing::TestAnalysis => r#"You are an experienced pediatric neuropsychologist interpreting the results of a named assessment instrument for a clinical report.
Write one paragraph describing what the instrument measures and what the results indicate, using the scores in the appendix when present. Do not invent scores."#,
    }
}

fn entry(label: &str, heading: String, content: &[String], placeholder: Option<String>) -> PromptEntry {
    PromptEntry {
        label: label.to_string(),
        heading,
        content: content.to_vec(),
        placeholder,
    }
}

/// One entry per non-empty section, headed `<label> Section`.
pub fn section_batch(sections: &[SectionSpec], appendix: &str, format: ReplyFormat) -> PromptBatch {
    PromptBatch {
        entries: sections
            .iter()
            .map(|s| entry(&s.label, format!("{} Section", s.label), &s.bullets, Some(s.placeholder())))
            .collect(),
        appendix: appendix.to_string(),
        format,
    }
}

/// Bullet summaries for the given tests; tests without bullets are left out.
pub fn test_summary_batch(tests: &[TestSpec], appendix: &str, format: ReplyFormat) -> PromptBatch {
    PromptBatch {
        entries: tests
            .iter()
            .filter(|t| !t.bullets.is_empty())
            .map(|t| entry(&t.name, format!("{} Summary", t.name), &t.bullets, None))
            .collect(),
        appendix: appendix.to_string(),
        format,
    }
}

pub fn test_analysis_batch(test: &TestSpec, appendix: &str, format: ReplyFormat) -> PromptBatch {
    PromptBatch {
        entries: vec![entry(&test.name, format!("{} Analysis", test.name), &test.bullets, None)],
        appendix: appendix.to_string(),
        format,
    }
}

/// Delimited heading line for the 1-based position `n`.
pub fn heading_line(n: usize, heading: &str) -> String {
    format!("### {n}. {heading}")
}

/// Compile a batch into one instruction. An empty batch compiles to nothing:
/// no call should be issued for it.
pub fn compile(batch: &PromptBatch, framing: Framing) -> Option<Instruction> {
    if batch.is_empty() {
        return None;
    }
    let user = match batch.format {
        ReplyFormat::Delimited => delimited_body(batch),
        ReplyFormat::Json => json_body(batch),
    };
    Some(Instruction { system: role(framing).to_string(), user })
}

fn delimited_body(batch: &PromptBatch) -> String {
    let k = batch.len();
    let mut entries = String::new();
    for (i, e) in batch.entries.iter().enumerate() {
        entries.push_str(&heading_line(i + 1, &e.heading));
        entries.push('\n');
        if e.content.is_empty() {
            entries.push_str("(no bullet points supplied; rely on the appendix)\n");
        }
        for b in &e.content {
            entries.push_str("- ");
            entries.push_str(b.trim());
            entries.push('\n');
        }
        entries.push('\n');
    }

    let appendix = if batch.appendix.trim().is_empty() { "(none)" } else { batch.appendix.as_str() };
    let example = heading_line(1, &batch.entries[0].heading);

    format!(
"Write exactly {k} paragraph(s), one for each numbered entry below, in the same order.
Start each paragraph with its heading line copied exactly as given (for example \"{example}\"), then write the paragraph on the following line.
Do not add any other headings, titles, lists or commentary.

{entries}Appendix (shared context for every entry):
{appendix}
"
    )
}

fn json_body(batch: &PromptBatch) -> String {
    let entries: Vec<_> = batch
        .entries
        .iter()
        .map(|e| json!({ "heading": e.label, "bullets": e.content }))
        .collect();
    let data = json!({ "sections": entries, "appendix": batch.appendix });
    format!(
"Generate a JSON object where each key is one of the headings below and the value is a paragraph based on the given bullet points and appendix.
Use the headings exactly as given as keys. Only return JSON.

Data: {data}"
    )
}

/// Appended to the user message when a reply could not be matched to the request.
pub fn strict_suffix(batch: &PromptBatch) -> String {
    let k = batch.len();
    match batch.format {
        ReplyFormat::Delimited => {
            let headings: Vec<String> = batch
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| heading_line(i + 1, &e.heading))
                .collect();
            format!(
"\nSTRICT MODE: your previous reply could not be matched to the entries. Reply with exactly {k} block(s). Each block is one of these heading lines, verbatim and in this order, followed by its paragraph:
{}
",
                headings.join("\n")
            )
        }
        ReplyFormat::Json => {
            let keys: Vec<&str> = batch.entries.iter().map(|e| e.label.as_str()).collect();
            format!(
"\nSTRICT MODE: your previous reply was not a valid JSON object. Return one JSON object with exactly these {k} key(s) and string values, and nothing else: {}",
                json!(keys)
            )
        }
    }
}
