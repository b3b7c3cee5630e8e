//! `.docx` package load/save. The package is a zip of XML parts; text lives in
//! `<w:t>` elements inside `<w:p>` paragraphs of the body, header and footer
//! parts. Only edited `<w:t>` elements are rewritten on save.

use fs_err as fs;
use regex::Regex;
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{Anchor, Document, Paragraph, Run, Story, StoryKind};
use crate::errors::{ReportError, Result};

pub const BODY_PART: &str = "word/document.xml";
const BODY_RELS_PART: &str = "word/_rels/document.xml.rels";

/// Opening, self-closing and closing `<w:p>` tags.
fn paragraph_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<w:p(?:\s[^>]*)?/?>|</w:p>").expect("paragraph pattern is valid"))
}

fn text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<w:t(?:\s[^>]*?)?(?:/>|>(.*?)</w:t>)").expect("text pattern is valid"))
}

fn sect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<w:sectPr(?:\s[^>]*?)?(?:/>|>(.*?)</w:sectPr>)").expect("section pattern is valid")
    })
}

fn tag_re(name: &str) -> Regex {
    Regex::new(&format!(r"<{}\b[^>]*>", regex::escape(name))).expect("tag pattern is valid")
}

fn story_kind(part: &str) -> Option<StoryKind> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^word/(header|footer)\d*\.xml$").expect("part pattern is valid"));
    if part == BODY_PART {
        return Some(StoryKind::Body);
    }
    re.captures(part).map(|c| match &c[1] {
        "header" => StoryKind::Header,
        _ => StoryKind::Footer,
    })
}

pub fn load(path: &Path) -> Result<Document> {
    let bytes = fs::read(path)
        .map_err(|e| ReportError::Template(format!("cannot read {}: {e}", path.display())))?;
    from_bytes(&bytes).map_err(|e| match e {
        ReportError::Template(m) => ReportError::Template(format!("{}: {m}", path.display())),
        other => ReportError::Template(format!("{}: {other}", path.display())),
    })
}

pub fn from_bytes(bytes: &[u8]) -> Result<Document> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut package = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        package.push((file.name().to_string(), data));
    }

    let mut stories = Vec::new();
    for (name, data) in &package {
        if let Some(kind) = story_kind(name) {
            let xml = String::from_utf8(data.clone())
                .map_err(|_| ReportError::Template(format!("{name} is not UTF-8")))?;
            stories.push(parse_story(name, kind, xml));
        }
    }
    if !stories.iter().any(|s| s.kind == StoryKind::Body) {
        return Err(ReportError::Template(format!("package has no {BODY_PART}")));
    }

    let section_footers = section_footers(&package);
    Ok(Document { stories, section_footers, package })
}

pub fn save(doc: &Document, path: &Path) -> Result<()> {
    fs::write(path, to_bytes(doc)?)?;
    Ok(())
}

pub fn to_bytes(doc: &Document) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in &doc.package {
        if name.ends_with('/') {
            writer.add_directory(name.as_str(), opts)?;
            continue;
        }
        writer.start_file(name.as_str(), opts)?;
        match doc.story(name) {
            Some(story) => writer.write_all(render_story(story).as_bytes())?,
            None => writer.write_all(data)?,
        }
    }
    Ok(writer.finish()?.into_inner())
}

/// A `<w:p>` whose closing tag has not been reached yet.
struct OpenParagraph {
    slot: usize,
    start: usize,
    content: usize,
    /// Paragraphs nested inside this one (text boxes); their runs are not ours.
    nested: Vec<Range<usize>>,
}

fn parse_story(name: &str, kind: StoryKind, xml: String) -> Story {
    let mut slots: Vec<Option<Paragraph>> = Vec::new();
    let mut open: Vec<OpenParagraph> = Vec::new();

    for tag in paragraph_tag_re().find_iter(&xml) {
        if tag.as_str() == "</w:p>" {
            let Some(p) = open.pop() else { continue };
            let close = tag.start();
            let runs = runs_between(&xml, p.content..close, &p.nested);
            let anchor = Anchor { at: close..close, self_closing: false };
            slots[p.slot] = Some(Paragraph::loaded(runs, anchor));
            if let Some(parent) = open.last_mut() {
                parent.nested.push(p.start..tag.end());
            }
        } else if tag.as_str().ends_with("/>") {
            let anchor = Anchor { at: tag.end() - 2..tag.end(), self_closing: true };
            slots.push(Some(Paragraph::loaded(Vec::new(), anchor)));
        } else {
            slots.push(None);
            open.push(OpenParagraph {
                slot: slots.len() - 1,
                start: tag.start(),
                content: tag.end(),
                nested: Vec::new(),
            });
        }
    }

    // Unclosed paragraphs leave empty slots and are skipped.
    let paragraphs = slots.into_iter().flatten().collect();
    Story { name: name.to_string(), kind, paragraphs, xml: Some(xml) }
}

fn runs_between(xml: &str, span: Range<usize>, nested: &[Range<usize>]) -> Vec<Run> {
    let base = span.start;
    text_re()
        .captures_iter(&xml[span])
        .filter_map(|t| {
            let el = t.get(0)?;
            let start = base + el.start();
            if nested.iter().any(|n| n.contains(&start)) {
                return None;
            }
            let text = t.get(1).map(|c| unescape(c.as_str())).unwrap_or_default();
            Some(Run { text, origin: Some(start..start + el.len()), dirty: false })
        })
        .collect()
}

fn render_story(story: &Story) -> String {
    let Some(xml) = &story.xml else {
        return String::new();
    };

    let mut edits: Vec<(std::ops::Range<usize>, String)> = Vec::new();
    for p in &story.paragraphs {
        let mut grown = String::new();
        for r in p.runs() {
            match &r.origin {
                Some(range) if r.dirty => edits.push((range.clone(), text_element(r.text()))),
                Some(_) => {}
                None => {
                    grown.push_str("<w:r>");
                    grown.push_str(&text_element(r.text()));
                    grown.push_str("</w:r>");
                }
            }
        }
        if let (false, Some(anchor)) = (grown.is_empty(), &p.anchor) {
            let replacement = if anchor.self_closing { format!(">{grown}</w:p>") } else { grown };
            edits.push((anchor.at.clone(), replacement));
        }
    }
    edits.sort_by_key(|(range, _)| range.start);

    let mut out = String::with_capacity(xml.len());
    let mut cursor = 0;
    for (range, text) in edits {
        out.push_str(&xml[cursor..range.start]);
        out.push_str(&text);
        cursor = range.end;
    }
    out.push_str(&xml[cursor..]);
    out
}

/// `<w:t>` for `text`; newlines become `<w:br/>` and tabs `<w:tab/>`.
fn text_element(text: &str) -> String {
    let mut out = String::from(r#"<w:t xml:space="preserve">"#);
    for c in text.chars() {
        match c {
            '\n' => out.push_str(r#"</w:t><w:br/><w:t xml:space="preserve">"#),
            '\t' => out.push_str(r#"</w:t><w:tab/><w:t xml:space="preserve">"#),
            '\u{b}' | '\u{c}' => out.push_str(r#"</w:t><w:br/><w:t xml:space="preserve">"#),
            '\r' => {}
            c if !is_xml_char(c) => {}
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out.push_str("</w:t>");
    out
}

/// Characters XML 1.0 allows in text content.
fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= '\u{20}' && c != '\u{FFFE}' && c != '\u{FFFF}')
}

pub fn escape(text: &str) -> String {
    text.chars()
        .filter(|c| is_xml_char(*c))
        .collect::<String>()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else { break };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                // References to characters XML forbids (`&#0;`, `&#x1;`) are dropped.
                if is_xml_char(c) {
                    out.push(c);
                }
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let start = tag
        .match_indices(&needle)
        .find(|(i, _)| tag[..*i].ends_with(char::is_whitespace))
        .map(|(i, _)| i + needle.len())?;
    let end = tag[start..].find('"')? + start;
    Some(&tag[start..end])
}

/// Default footer part per section, in document order.
fn section_footers(package: &[(String, Vec<u8>)]) -> Vec<Option<String>> {
    let text = |name: &str| {
        package
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, d)| std::str::from_utf8(d).ok())
    };
    let (Some(body), Some(rels)) = (text(BODY_PART), text(BODY_RELS_PART)) else {
        return Vec::new();
    };

    let rel_tag = tag_re("Relationship");
    let target_of = |id: &str| {
        rel_tag
            .find_iter(rels)
            .map(|m| m.as_str())
            .find(|t| attr(t, "Id") == Some(id))
            .and_then(|t| attr(t, "Target"))
            .map(|target| match target.strip_prefix('/') {
                Some(abs) => abs.to_string(),
                None => format!("word/{target}"),
            })
    };

    let footer_tag = tag_re("w:footerReference");
    sect_re()
        .captures_iter(body)
        .map(|c| {
            let inner = c.get(1).map(|m| m.as_str()).unwrap_or("");
            footer_tag
                .find_iter(inner)
                .map(|m| m.as_str())
                .find(|t| attr(t, "w:type").unwrap_or("default") == "default")
                .and_then(|t| attr(t, "r:id"))
                .and_then(target_of)
        })
        .collect()
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/footer1.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.footer+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/footer" Target="footer1.xml"/></Relationships>"#;

const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

/// Minimal single-section package: `body_xml` is the inner XML of `<w:body>`
/// (without the section properties), `footer_xml` the inner XML of `<w:ftr>`.
pub fn build_package(body_xml: &str, footer_xml: &str) -> Result<Vec<u8>> {
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document {NS}><w:body>{body_xml}<w:sectPr><w:footerReference w:type="default" r:id="rId1"/><w:pgSz w:w="12240" w:h="15840"/></w:sectPr></w:body></w:document>"#
    );
    let footer = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:ftr {NS}>{footer_xml}</w:ftr>"#
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", PACKAGE_RELS),
        (BODY_PART, document.as_str()),
        (BODY_RELS_PART, DOCUMENT_RELS),
        ("word/footer1.xml", footer.as_str()),
    ] {
        writer.start_file(name, opts)?;
        writer.write_all(data.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

/// One `<w:p>` with a single plain run.
pub fn plain_paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#, escape(text))
}

fn heading_paragraph(text: &str) -> String {
    format!(r#"<w:p><w:r><w:rPr><w:b/></w:rPr><w:t>{}</w:t></w:r></w:p>"#, escape(text))
}

/// A starter report template carrying every token the generator fills.
pub fn starter_template() -> Result<Vec<u8>> {
    let mut body = String::new();
    body.push_str(&heading_paragraph("Neuropsychological Evaluation"));
    for (label, field) in [
        ("Name", "name"),
        ("Date of Birth", "dob"),
        ("Age", "age"),
        ("Grade", "grade"),
        ("School", "school"),
        ("Evaluation Dates", "eval_dates"),
        ("Examiner", "psychologist_name"),
    ] {
        body.push_str(&plain_paragraph(&format!("{label}: {}", crate::form::token(field))));
    }
    for (id, label) in crate::form::SECTIONS {
        body.push_str(&heading_paragraph(label));
        body.push_str(&plain_paragraph(&crate::form::token(&format!("{id}_paragraph"))));
    }
    body.push_str(&heading_paragraph("Tests Administered"));
    body.push_str(&plain_paragraph(&crate::form::token("test_list")));
    body.push_str(&plain_paragraph(&crate::form::token("test_paragraphs")));
    body.push_str(&heading_paragraph("Appendix"));
    body.push_str(&plain_paragraph(&crate::form::token("appendix")));
    build_package(&body, &plain_paragraph(&crate::form::token("footer_information")))
}
