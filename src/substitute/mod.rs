//! Literal, case-sensitive token replacement over every paragraph of a document.
//!
//! Each paragraph is scanned once against the paragraph's full text. When every
//! match sits inside a single run the runs are edited in place and their
//! formatting survives; when any token straddles a run boundary the paragraph
//! is rebuilt from the replaced full text instead.

use std::collections::BTreeMap;

use crate::document::{Document, Paragraph};

/// Literal token -> final value. Fully built before any substitution runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementMap(BTreeMap<String, String>);

impl ReplacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        self.0.insert(token.into(), value.into());
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn extend(&mut self, other: ReplacementMap) {
        self.0.extend(other.0);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubstitutionStats {
    pub replacements: usize,
    pub paragraphs_touched: usize,
    /// Paragraphs that needed the whole-paragraph rebuild.
    pub paragraphs_rebuilt: usize,
}

struct Hit<'m> {
    start: usize,
    end: usize,
    value: &'m str,
}

/// Non-overlapping matches, leftmost first; on a tie the longest token wins.
fn find_hits<'m>(text: &str, map: &'m ReplacementMap) -> Vec<Hit<'m>> {
    let mut hits = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let best = map
            .0
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .filter_map(|(token, value)| text[pos..].find(token.as_str()).map(|i| (pos + i, token.len(), value)))
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
        let Some((start, len, value)) = best else { break };
        hits.push(Hit { start, end: start + len, value: value.as_str() });
        pos = start + len;
    }
    hits
}

fn apply_hits(text: &str, hits: &[Hit<'_>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for h in hits {
        out.push_str(&text[cursor..h.start]);
        out.push_str(h.value);
        cursor = h.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Replace every token in one paragraph. Returns (replacements, rebuilt).
pub fn substitute_paragraph(paragraph: &mut Paragraph, map: &ReplacementMap) -> (usize, bool) {
    let full = paragraph.text();
    let hits = find_hits(&full, map);
    if hits.is_empty() {
        return (0, false);
    }

    let mut bounds = Vec::with_capacity(paragraph.runs().len());
    let mut offset = 0;
    for r in paragraph.runs() {
        bounds.push(offset..offset + r.text().len());
        offset += r.text().len();
    }

    let run_of = |h: &Hit<'_>| bounds.iter().position(|b| b.start <= h.start && h.end <= b.end);
    let placed: Option<Vec<usize>> = hits.iter().map(run_of).collect();

    match placed {
        Some(runs) => {
            for (i, run) in paragraph.runs_mut().iter_mut().enumerate() {
                let base = bounds[i].start;
                let local: Vec<Hit<'_>> = hits
                    .iter()
                    .zip(&runs)
                    .filter(|(_, r)| **r == i)
                    .map(|(h, _)| Hit { start: h.start - base, end: h.end - base, value: h.value })
                    .collect();
                if !local.is_empty() {
                    let replaced = apply_hits(run.text(), &local);
                    run.set_text(replaced);
                }
            }
            (hits.len(), false)
        }
        None => {
            paragraph.set_text(apply_hits(&full, &hits));
            (hits.len(), true)
        }
    }
}

/// Run the map over every paragraph of every story (body, headers, footers).
pub fn substitute(doc: &mut Document, map: &ReplacementMap) -> SubstitutionStats {
    let mut stats = SubstitutionStats::default();
    for p in doc.paragraphs_mut() {
        let (n, rebuilt) = substitute_paragraph(p, map);
        if n > 0 {
            stats.replacements += n;
            stats.paragraphs_touched += 1;
            if rebuilt {
                stats.paragraphs_rebuilt += 1;
            }
        }
    }
    tracing::debug!(
        replacements = stats.replacements,
        touched = stats.paragraphs_touched,
        rebuilt = stats.paragraphs_rebuilt,
        "substitution pass"
    );
    stats
}
