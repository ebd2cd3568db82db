//! Canonical section and assertion records
//!
//! External section stores ship loosely-shaped records (alternate id fields,
//! header vs. title, missing kinds). Ingestion normalizes them exactly once,
//! so every downstream component addresses a single canonical shape.

use serde::{Deserialize, Serialize};

/// Maximum length of a derived section id.
const SLUG_MAX_LEN: usize = 50;

/// What a section is for, as extracted upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Procedures the reader is expected to follow.
    Instruction,
    /// Lookup material (tables, field lists, APIs).
    Reference,
    /// Worked examples.
    Example,
    /// Front matter, changelogs, authorship.
    Metadata,
}

/// One extracted documentation section. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Stable slug, unique within the document.
    pub id: String,
    pub header: String,
    pub content: String,
    pub level: u8,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: SectionKind,
}

/// A section record as it arrives from an external store.
///
/// Field names vary between producers; `id`/`section_id` and
/// `header`/`title` are both accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSection {
    pub id: Option<String>,
    pub section_id: Option<String>,
    pub header: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub start_line: usize,
    #[serde(default)]
    pub end_line: usize,
    pub kind: Option<SectionKind>,
}

fn default_level() -> u8 {
    1
}

impl Section {
    /// Normalize a raw record into a canonical section.
    ///
    /// Id resolution order: `id` → `section_id` → slugified header →
    /// positional fallback. Missing fields never fail ingestion.
    pub fn ingest(raw: RawSection, index: usize) -> Self {
        let header = raw
            .header
            .or(raw.title)
            .unwrap_or_else(|| format!("Section {}", index + 1));

        let id = raw
            .id
            .or(raw.section_id)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| {
                let slug = slugify(&header);
                if slug.is_empty() {
                    format!("section-{}", index)
                } else {
                    slug
                }
            });

        let end_line = raw.end_line.max(raw.start_line);

        Self {
            id,
            header,
            content: raw.content,
            level: raw.level,
            start_line: raw.start_line,
            end_line,
            kind: raw.kind.unwrap_or(SectionKind::Instruction),
        }
    }
}

/// Normalize all records from a store, deduplicating derived ids.
pub fn ingest_all(raw: Vec<RawSection>) -> Vec<Section> {
    let mut seen = std::collections::HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(i, r)| {
            let mut section = Section::ingest(r, i);
            while !seen.insert(section.id.clone()) {
                section.id = format!("{}-{}", section.id, i);
            }
            section
        })
        .collect()
}

/// Convert header text to a stable slug.
///
/// Case-insensitive, punctuation stripped, whitespace collapsed to hyphens,
/// truncated for id stability.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_hyphen = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                slug.push(lower);
            }
            last_hyphen = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let trimmed = slug.trim_matches('-');
    let mut out: String = trimmed.chars().take(SLUG_MAX_LEN).collect();
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// How important it is that readers get an assertion right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Whether a minority misreading of this assertion warrants an issue.
    pub fn is_issue_worthy(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Category of a testable claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    /// Something the reader or system must do.
    Requirement,
    /// A numeric or categorical bound.
    Constraint,
    /// Conditional behavior ("if X, then Y").
    Behavior,
    /// Failure and error handling cases.
    Error,
    /// Declared values, formats, defaults.
    Specification,
    /// Ordered procedure steps.
    Sequence,
}

impl std::fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requirement => write!(f, "requirement"),
            Self::Constraint => write!(f, "constraint"),
            Self::Behavior => write!(f, "behavior"),
            Self::Error => write!(f, "error"),
            Self::Specification => write!(f, "specification"),
            Self::Sequence => write!(f, "sequence"),
        }
    }
}

/// A single testable claim extracted from a section.
///
/// Referenced, never mutated, by the question pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    pub kind: AssertionKind,
    pub text: String,
    pub priority: Priority,
    pub section_id: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(header: &str) -> RawSection {
        RawSection {
            header: Some(header.to_string()),
            content: "body".to_string(),
            ..RawSection::default()
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Step 1: Setup"), "step-1-setup");
        assert_eq!(slugify("  Weird -- Header!! "), "weird-header");
        assert_eq!(slugify("ALL CAPS"), "all-caps");
    }

    #[test]
    fn test_slugify_truncates() {
        let long = "x".repeat(200);
        assert_eq!(slugify(&long).len(), 50);
    }

    #[test]
    fn test_ingest_prefers_explicit_id() {
        let mut r = raw("Setup");
        r.id = Some("custom-id".to_string());
        let section = Section::ingest(r, 0);
        assert_eq!(section.id, "custom-id");
    }

    #[test]
    fn test_ingest_falls_back_to_alternate_id_field() {
        let mut r = raw("Setup");
        r.section_id = Some("alt-id".to_string());
        let section = Section::ingest(r, 0);
        assert_eq!(section.id, "alt-id");
    }

    #[test]
    fn test_ingest_derives_id_from_header() {
        let section = Section::ingest(raw("Step 1: Setup"), 0);
        assert_eq!(section.id, "step-1-setup");
        assert_eq!(section.header, "Step 1: Setup");
    }

    #[test]
    fn test_ingest_positional_fallback() {
        let r = RawSection {
            content: "body".to_string(),
            ..RawSection::default()
        };
        let section = Section::ingest(r, 3);
        assert_eq!(section.id, "section-3");
        assert_eq!(section.header, "Section 4");
    }

    #[test]
    fn test_ingest_title_as_header() {
        let r = RawSection {
            title: Some("From Title".to_string()),
            content: String::new(),
            ..RawSection::default()
        };
        let section = Section::ingest(r, 0);
        assert_eq!(section.header, "From Title");
        assert_eq!(section.id, "from-title");
    }

    #[test]
    fn test_ingest_all_deduplicates_ids() {
        let sections = ingest_all(vec![raw("Setup"), raw("Setup")]);
        assert_eq!(sections[0].id, "setup");
        assert_eq!(sections[1].id, "setup-1");
    }

    #[test]
    fn test_priority_issue_worthy() {
        assert!(Priority::Critical.is_issue_worthy());
        assert!(Priority::High.is_issue_worthy());
        assert!(!Priority::Medium.is_issue_worthy());
        assert!(!Priority::Low.is_issue_worthy());
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&AssertionKind::Specification).unwrap();
        assert_eq!(json, "\"specification\"");
    }
}
