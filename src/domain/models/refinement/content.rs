//! Sectioned lesson content.
//!
//! Content is an ordered list of sections addressed by opaque locators.
//! Every edit produces a new [`LessonContent`]; sections not named in the
//! edit are carried over by clone and so stay byte-identical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainResult, RefinementError};

/// One addressable section of a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Opaque locator, unique within the lesson.
    pub locator: String,
    /// Heading shown to learners.
    #[serde(default)]
    pub title: String,
    /// Section text.
    pub body: String,
    /// Locators of other sections this one refers to.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Section {
    pub fn new(locator: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            body: body.into(),
            references: Vec::new(),
        }
    }

    /// Add a reference to another section.
    pub fn with_reference(mut self, locator: impl Into<String>) -> Self {
        self.references.push(locator.into());
        self
    }

    /// Whether an issue location points into this section.
    ///
    /// A location matches when it equals the locator or extends it with a
    /// `#fragment` or `/path` suffix.
    pub fn contains_location(&self, location: &str) -> bool {
        location_matches(&self.locator, location)
    }

    /// The leading `max_chars` characters of the body, cut on a char
    /// boundary.
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.body.chars().take(max_chars).collect()
    }
}

/// Whether `location` refers to the section at `locator`.
pub fn location_matches(locator: &str, location: &str) -> bool {
    location == locator
        || location
            .strip_prefix(locator)
            .is_some_and(|rest| rest.starts_with('#') || rest.starts_with('/'))
}

/// A complete lesson.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LessonContent {
    #[serde(default)]
    pub title: String,
    pub sections: Vec<Section>,
}

impl LessonContent {
    pub fn new(title: impl Into<String>, sections: Vec<Section>) -> Self {
        Self {
            title: title.into(),
            sections,
        }
    }

    /// Look up a section by locator.
    pub fn section(&self, locator: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.locator == locator)
    }

    /// The section an issue location points into.
    ///
    /// When several locators match (nested locators such as `s1` and
    /// `s1/intro`), the longest one wins.
    pub fn section_for_location(&self, location: &str) -> Option<&Section> {
        self.sections
            .iter()
            .filter(|s| s.contains_location(location))
            .max_by_key(|s| s.locator.len())
    }

    /// Section locators in document order.
    pub fn locators(&self) -> Vec<String> {
        self.sections.iter().map(|s| s.locator.clone()).collect()
    }

    /// Produce a new document with the bodies of the listed sections
    /// replaced.
    ///
    /// Fails when a replacement names a locator the document does not
    /// contain; nothing is applied in that case.
    pub fn replace_sections(&self, replacements: &BTreeMap<String, String>) -> DomainResult<Self> {
        if let Some(unknown) = replacements
            .keys()
            .find(|locator| self.section(locator).is_none())
        {
            return Err(RefinementError::FixApplicationFailed(format!(
                "no section with locator '{unknown}'"
            )));
        }

        let sections = self
            .sections
            .iter()
            .map(|section| match replacements.get(&section.locator) {
                Some(body) => Section {
                    body: body.clone(),
                    ..section.clone()
                },
                None => section.clone(),
            })
            .collect();

        Ok(Self {
            title: self.title.clone(),
            sections,
        })
    }

    /// Render as markdown.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.title.is_empty() {
            out.push_str("# ");
            out.push_str(&self.title);
            out.push_str("\n\n");
        }
        for section in &self.sections {
            if !section.title.is_empty() {
                out.push_str("## ");
                out.push_str(&section.title);
                out.push_str("\n\n");
            }
            out.push_str(&section.body);
            out.push_str("\n\n");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Fix scoping
// ---------------------------------------------------------------------------

/// A short excerpt of a referenced section, passed along for continuity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorExcerpt {
    pub locator: String,
    pub title: String,
    pub excerpt: String,
}

/// Everything the fix generator may see when revising one section.
///
/// Only `target` may be rewritten. Anchors are read-only context and the
/// rest of the lesson is not included at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFixScope {
    pub target: Section,
    pub anchors: Vec<AnchorExcerpt>,
    pub issues: Vec<super::issue::Issue>,
}

/// A revised section body together with what it cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisedSection {
    pub content: String,
    pub tokens_used: u64,
}

/// Content produced by the external regeneration pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegeneratedContent {
    pub content: LessonContent,
    pub tokens_used: u64,
}
