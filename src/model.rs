use serde::{Deserialize, Serialize};

/// Heading used when a section has no extractable heading line.
pub const UNTITLED: &str = "Untitled";

/// Separator between the report number and its label in template titles.
const TITLE_LABEL_SEP: &str = " — ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub content: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Report {
    /// Label after the first " — " in the title ("Report 2 — Foo" → "Foo"),
    /// or the whole title when there is no label.
    pub fn short_title(&self) -> &str {
        match self.title.split_once(TITLE_LABEL_SEP) {
            Some((_, label)) if !label.trim().is_empty() => label.trim(),
            _ => &self.title,
        }
    }

    /// Swap in a freshly generated section list. Sections are only ever
    /// replaced as a whole.
    pub fn replace_sections(&mut self, sections: Vec<Section>) {
        self.sections = sections;
    }
}

/// Grounding source returned alongside generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    #[serde(default)]
    pub title: String,
}
