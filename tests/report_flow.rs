mod common;

use common::*;
use std::io::Read;
use std::time::Duration;

use neuroreport::convert::{LibreOfficeConverter, NoConverter};
use neuroreport::document::docx;
use neuroreport::report::Stage;
use neuroreport::session::{Entitlements, MemorySessionStore};
use neuroreport::wire::ReplyFormat;
use neuroreport::{EntitlementError, OutputFormat, ReportError, ReportForm, TestSpec};

fn basic_form() -> ReportForm {
    ReportForm {
        name: "Sam Doe".into(),
        dob: "2015-03-02".into(),
        age: "9".into(),
        grade: "4".into(),
        school: "Lincoln Elementary".into(),
        eval_dates: "2024-05-01".into(),
        psychologist_name: "Dr. Lee".into(),
        ..Default::default()
    }
}

fn document_xml(path: &std::path::Path) -> String {
    let mut archive = zip::ZipArchive::new(fs_err::File::open(path).unwrap()).unwrap();
    let mut xml = String::new();
    archive.by_name("word/document.xml").unwrap().read_to_string(&mut xml).unwrap();
    xml
}

#[tokio::test]
async fn single_section_takes_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["poor attention".into(), "reading delays".into()]);

    let report = gen.generate(&form).await.unwrap();
    assert_eq!(provider.call_count(), 1);
    assert_eq!(provider.sorted_stages(), vec!["sections"]);
    assert_eq!(report.format, OutputFormat::Docx);
    assert_eq!(report.download_name(), "neuropsych_report.docx");
    assert_eq!(report.summary.completion_calls, 1);

    let doc = docx::load(report.path()).unwrap();
    let body = body_texts(&doc);
    assert_eq!(body[0], "Name: Sam Doe");
    assert_eq!(body[4], "Paragraph for Reason for Referral Section.");
    assert_eq!(body[5], "{{family_details_paragraph}}");
    assert_eq!(body[6], "{{observations_paragraph}}");
}

#[tokio::test]
async fn basics_only_makes_no_calls() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let report = gen.generate(&basic_form()).await.unwrap();
    assert_eq!(provider.call_count(), 0);
    assert!(report.summary.stages.contains(&Stage::ParagraphsSkipped));
    assert_eq!(report.summary.stages.last(), Some(&Stage::Done));

    let doc = docx::load(report.path()).unwrap();
    assert_eq!(
        body_texts(&doc),
        vec![
            "Name: Sam Doe",
            "DOB: 2015-03-02 Age: 9",
            "Grade 4 at Lincoln Elementary",
            "Seen on 2024-05-01 by Dr. Lee",
            "{{referral_paragraph}}",
            "{{family_details_paragraph}}",
            "{{observations_paragraph}}",
            "Tests: ",
            "",
            "Notes: ",
            "School: Lincoln Elementary (verified)",
        ]
    );
}

#[tokio::test]
async fn tests_are_summarized_and_analyzed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.tests = vec![
        TestSpec {
            name: "WISC-V".into(),
            bullets: vec!["FSIQ 98".into(), "weak processing speed".into()],
        },
        TestSpec { name: "BASC-3".into(), bullets: vec![] },
    ];

    let report = gen.generate(&form).await.unwrap();
    assert_eq!(provider.call_count(), 3);
    assert_eq!(
        provider.sorted_stages(),
        vec!["test-1-analysis", "test-1-summary", "test-2-analysis"]
    );

    let doc = docx::load(report.path()).unwrap();
    let body = body_texts(&doc);
    assert_eq!(body[7], "Tests: WISC-V, BASC-3");
    assert_eq!(
        body[8],
        concat!(
            "WISC-V:Paragraph for WISC-V Summary.Paragraph for WISC-V Analysis.",
            "BASC-3:Paragraph for BASC-3 Analysis."
        )
    );

    let xml = document_xml(report.path());
    assert!(xml.contains(concat!(
        r#"Paragraph for WISC-V Analysis.</w:t><w:br/><w:t xml:space="preserve"></w:t>"#,
        r#"<w:br/><w:t xml:space="preserve">BASC-3:"#
    )));
}

#[tokio::test]
async fn footer_is_stamped_and_split_tokens_are_filled() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let report = gen.generate(&basic_form()).await.unwrap();
    let doc = docx::load(report.path()).unwrap();

    let footer = doc.story("word/footer1.xml").unwrap();
    assert_eq!(footer.paragraphs[0].text(), "Report generated by: Dr. Lee");
    assert_eq!(footer.paragraphs[1].text(), "Page 1");

    assert_eq!(body_texts(&doc)[10], "School: Lincoln Elementary (verified)");
    assert!(report.summary.substitution.paragraphs_rebuilt >= 1);
    assert!(document_xml(report.path()).contains("<w:i/>"));
}

#[tokio::test]
async fn substituted_values_are_not_rescanned() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.appendix = "literal {{name}} stays".into();
    let report = gen.generate(&form).await.unwrap();

    let doc = docx::load(report.path()).unwrap();
    assert_eq!(body_texts(&doc)[9], "Notes: literal {{name}} stays");
}

#[tokio::test]
async fn control_characters_in_appendix_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.appendix = "score\u{1}table\u{c}end".into();
    let report = gen.generate(&form).await.unwrap();

    let xml = document_xml(report.path());
    assert!(!xml.chars().any(|c| c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r')));
    assert_eq!(body_texts(&docx::load(report.path()).unwrap())[9], "Notes: scoretableend");
}

#[tokio::test]
async fn unfilled_sections_can_be_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let mut s = settings(write_template(dir.path()));
    s.clear_unfilled_sections = true;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("observations".into(), vec!["cooperative".into()]);
    let report = gen.generate(&form).await.unwrap();

    let body = body_texts(&docx::load(report.path()).unwrap());
    assert_eq!(body[4], "");
    assert_eq!(body[5], "");
    assert_eq!(body[6], "Paragraph for Behavioral Observations Section.");
}

#[tokio::test]
async fn short_reply_fails_after_strict_retry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::DropLast);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    form.sections.insert("observations".into(), vec!["b".into()]);

    let err = gen.generate(&form).await.unwrap_err();
    match err {
        ReportError::ParseMismatch { requested, parsed, missing } => {
            assert_eq!(requested, 2);
            assert_eq!(parsed, 1);
            assert_eq!(missing.as_deref(), Some("Behavioral Observations"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.sorted_stages(), vec!["sections", "sections.strict"]);
}

#[tokio::test]
async fn short_reply_fails_at_once_without_strict_retry() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::DropLast);
    let mut s = settings(write_template(dir.path()));
    s.strict_retry = false;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    form.sections.insert("school_history".into(), vec!["b".into()]);

    assert!(matches!(gen.generate(&form).await, Err(ReportError::ParseMismatch { .. })));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn json_replies_fill_sections_and_missing_keys_stay_empty() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::JsonDropLast);
    let mut s = settings(write_template(dir.path()));
    s.format = ReplyFormat::Json;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    form.sections.insert("observations".into(), vec!["b".into()]);

    let report = gen.generate(&form).await.unwrap();
    assert_eq!(provider.sorted_stages(), vec!["sections"]);

    let body = body_texts(&docx::load(report.path()).unwrap());
    assert_eq!(body[4], "Paragraph for Reason for Referral.");
    assert_eq!(body[5], "{{family_details_paragraph}}");
    assert_eq!(body[6], "");
}

#[tokio::test]
async fn json_echo_fills_every_section() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::JsonEcho);
    let mut s = settings(write_template(dir.path()));
    s.format = ReplyFormat::Json;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("family_details".into(), vec!["two siblings".into()]);
    form.sections.insert("observations".into(), vec!["cooperative".into()]);

    let report = gen.generate(&form).await.unwrap();
    assert_eq!(provider.call_count(), 1);
    let body = body_texts(&docx::load(report.path()).unwrap());
    assert_eq!(body[5], "Paragraph for Family Details.");
    assert_eq!(body[6], "Paragraph for Behavioral Observations.");
}

#[tokio::test]
async fn invalid_json_is_asked_again_strictly() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::JsonProseUntilStrict);
    let mut s = settings(write_template(dir.path()));
    s.format = ReplyFormat::Json;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);

    let report = gen.generate(&form).await.unwrap();
    assert_eq!(provider.sorted_stages(), vec!["sections", "sections.strict"]);
    let body = body_texts(&docx::load(report.path()).unwrap());
    assert_eq!(body[4], "Paragraph for Reason for Referral.");
}

#[tokio::test]
async fn invalid_json_without_strict_retry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::JsonProseUntilStrict);
    let mut s = settings(write_template(dir.path()));
    s.format = ReplyFormat::Json;
    s.strict_retry = false;
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);

    assert!(matches!(gen.generate(&form).await, Err(ReportError::InvalidJson(_))));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn slow_service_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Stall);
    let mut s = settings(write_template(dir.path()));
    s.timeout = Duration::from_millis(50);
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    assert!(matches!(gen.generate(&form).await, Err(ReportError::CompletionService(_))));
}

#[tokio::test]
async fn pdf_without_converter_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let mut form = basic_form();
    form.pdf = true;

    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));
    assert!(matches!(gen.generate(&form).await, Err(ReportError::UnsupportedConversion(_))));

    let missing = LibreOfficeConverter::new(Some(dir.path().join("no-such-soffice")));
    let gen = generator(&provider, Box::new(missing), settings(write_template(dir.path())));
    assert!(matches!(gen.generate(&form).await, Err(ReportError::UnsupportedConversion(_))));
}

#[tokio::test]
async fn pdf_request_returns_converted_file() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(CopyConverter), settings(write_template(dir.path())));

    let mut form = basic_form();
    form.pdf = true;
    let report = gen.generate(&form).await.unwrap();
    assert_eq!(report.format, OutputFormat::Pdf);
    assert_eq!(report.download_name(), "neuropsych_report.pdf");
    assert!(report.summary.stages.contains(&Stage::Converted));

    let out = dir.path().join("copy.pdf");
    assert!(report.persist_to(&out).unwrap() > 0);
}

#[tokio::test]
async fn missing_template_is_reported_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(dir.path().join("absent.docx")));

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    assert!(matches!(gen.generate(&form).await, Err(ReportError::Template(_))));
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn exchanges_are_saved_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let mut s = settings(write_template(dir.path()));
    s.exchanges_root = Some(dir.path().join("artifacts"));
    let gen = generator(&provider, Box::new(NoConverter), s);

    let mut form = basic_form();
    form.sections.insert("referral".into(), vec!["a".into()]);
    let report = gen.generate(&form).await.unwrap();

    let tx = report.summary.exchanges_dir.clone().unwrap();
    assert!(tx.starts_with(dir.path().join("artifacts")));
    assert!(tx.join("meta.json").exists());
    let prompt = fs_err::read_to_string(tx.join("sections.prompt.txt")).unwrap();
    assert!(prompt.contains("### 1. Reason for Referral Section"));
    assert!(tx.join("sections.reply.txt").exists());
}

#[tokio::test]
async fn paid_report_is_released_after_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(Script::Echo);
    let gen = generator(&provider, Box::new(NoConverter), settings(write_template(dir.path())));
    let ent = Entitlements::new(MemorySessionStore::new());

    let id = ent.begin(&basic_form()).unwrap();
    assert!(matches!(
        ent.fetch(&id),
        Err(ReportError::MissingEntitlement(EntitlementError::NotReady(_)))
    ));

    let stored = ent.confirm(&id, &gen).await.unwrap();
    assert_eq!(stored.format, OutputFormat::Docx);

    let fetched = ent.fetch(&id).unwrap();
    assert_eq!(fetched, stored);
    assert_eq!(fetched.download_name(), "neuropsych_report.docx");
    let doc = docx::from_bytes(&fetched.bytes).unwrap();
    assert_eq!(body_texts(&doc)[0], "Name: Sam Doe");

    assert!(matches!(
        ent.pending(&id),
        Err(ReportError::MissingEntitlement(EntitlementError::NotFound(_)))
    ));
    assert!(matches!(
        ent.confirm("unknown", &gen).await,
        Err(ReportError::MissingEntitlement(EntitlementError::NotFound(_)))
    ));
}
