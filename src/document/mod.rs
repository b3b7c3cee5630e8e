//! In-memory view of a report document: stories (body, headers, footers) made
//! of paragraphs made of text runs. Only run text is editable; everything else
//! in the underlying package is carried through untouched.

use std::ops::Range;

pub mod docx;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    text: String,
    /// Byte range of the source `<w:t>` element, when loaded from a package.
    pub(crate) origin: Option<Range<usize>>,
    pub(crate) dirty: bool,
}

impl Run {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: None, dirty: true }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.dirty = true;
        }
    }
}

/// Where new runs go when a paragraph has to grow one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Anchor {
    /// Empty range just before `</w:p>`, or the `/>` of a self-closing paragraph.
    pub(crate) at: Range<usize>,
    pub(crate) self_closing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    runs: Vec<Run>,
    pub(crate) anchor: Option<Anchor>,
}

impl Paragraph {
    pub fn from_runs<I, S>(runs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { runs: runs.into_iter().map(Run::new).collect(), anchor: None }
    }

    pub(crate) fn loaded(runs: Vec<Run>, anchor: Anchor) -> Self {
        Self { runs, anchor: Some(anchor) }
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn runs_mut(&mut self) -> &mut [Run] {
        &mut self.runs
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(Run::text).collect()
    }

    /// Whole-paragraph rewrite: the first run keeps its formatting and takes
    /// all the text, later runs are emptied.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.runs.split_first_mut() {
            Some((first, rest)) => {
                first.set_text(text);
                for r in rest {
                    r.set_text("");
                }
            }
            None => self.runs.push(Run::new(text)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryKind {
    Body,
    Header,
    Footer,
}

/// One text container: the main body or a single header/footer part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
    pub name: String,
    pub kind: StoryKind,
    pub paragraphs: Vec<Paragraph>,
    pub(crate) xml: Option<String>,
}

impl Story {
    pub fn new(name: impl Into<String>, kind: StoryKind, paragraphs: Vec<Paragraph>) -> Self {
        Self { name: name.into(), kind, paragraphs, xml: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub stories: Vec<Story>,
    /// Per section, in document order: the story name of its default footer.
    pub(crate) section_footers: Vec<Option<String>>,
    /// Raw package entries in their original order.
    pub(crate) package: Vec<(String, Vec<u8>)>,
}

impl Document {
    pub fn new(stories: Vec<Story>) -> Self {
        Self { stories, ..Default::default() }
    }

    pub fn paragraphs(&self) -> impl Iterator<Item = &Paragraph> {
        self.stories.iter().flat_map(|s| s.paragraphs.iter())
    }

    pub fn paragraphs_mut(&mut self) -> impl Iterator<Item = &mut Paragraph> {
        self.stories.iter_mut().flat_map(|s| s.paragraphs.iter_mut())
    }

    pub fn story(&self, name: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.name == name)
    }

    pub fn body(&self) -> Option<&Story> {
        self.stories.iter().find(|s| s.kind == StoryKind::Body)
    }

    /// Concatenated text of every paragraph, one per line.
    pub fn text(&self) -> String {
        self.paragraphs().map(|p| p.text()).collect::<Vec<_>>().join("\n")
    }

    /// Footer of the last section. A section without its own default footer
    /// shows the previous section's, so walk back until one is found; with no
    /// section information at all, take the last footer story.
    pub fn last_section_footer_mut(&mut self) -> Option<&mut Story> {
        let name = self
            .section_footers
            .iter()
            .rev()
            .find_map(|f| f.clone())
            .or_else(|| {
                self.stories
                    .iter()
                    .rev()
                    .find(|s| s.kind == StoryKind::Footer)
                    .map(|s| s.name.clone())
            })?;
        self.stories.iter_mut().find(|s| s.name == name)
    }
}
