//! Template-origin question rendering.
//!
//! A fixed table maps each assertion kind to rules that pull named
//! components (subject, value, condition, outcome) out of the assertion
//! text with anchored regexes, then render both the question and the
//! expected answer from those components. A rule only fires when every
//! required component matched; assertions no rule parses route to
//! model-assisted generation instead.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::section::{Assertion, AssertionKind, Section};

/// A question plus expected answer rendered from one assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuestion {
    pub text: String,
    pub expected_answer: String,
}

struct TemplateRule {
    kind: AssertionKind,
    pattern: Regex,
    render: fn(&Captures<'_>, &Section) -> RenderedQuestion,
}

fn rule(
    kind: AssertionKind,
    pattern: &str,
    render: fn(&Captures<'_>, &Section) -> RenderedQuestion,
) -> TemplateRule {
    TemplateRule {
        kind,
        pattern: Regex::new(pattern).expect("template pattern"),
        render,
    }
}

/// Lowercase the leading article-ish word so components read naturally
/// mid-sentence.
fn mid_sentence(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches(['.', '!', ',']);
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn clean_value(text: &str) -> String {
    text.trim().trim_end_matches(['.', '!', ',']).to_string()
}

static TEMPLATE_RULES: LazyLock<Vec<TemplateRule>> = LazyLock::new(|| {
    vec![
        // "Maximum batch size: 20 items" -> What is the maximum batch size?
        rule(
            AssertionKind::Constraint,
            r"(?i)^(?:the\s+)?(maximum|minimum|max|min)\s+([A-Za-z0-9 _-]+?)\s*(?:is|:|=)\s*(.+)$",
            |caps, _| RenderedQuestion {
                text: format!(
                    "What is the {} {}?",
                    caps[1].to_lowercase(),
                    mid_sentence(&caps[2])
                ),
                expected_answer: clean_value(&caps[3]),
            },
        ),
        // "The request size must stay under 8 MB" -> limit question
        rule(
            AssertionKind::Constraint,
            r"(?i)^(.+?)\s+(?:must\s+)?(?:be\s+|stay\s+)?(?:at\s+most|at\s+least|no\s+more\s+than|under|below)\s+(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What is the limit on {}?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Specification,
            r"(?i)^(.+?)\s+defaults?\s+to\s+(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What does {} default to?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Specification,
            r"(?i)^(.+?)\s+is\s+set\s+to\s+(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What is {} set to?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        // "Every change must be reviewed before merge"
        rule(
            AssertionKind::Requirement,
            r"(?i)^(.+?)\s+(?:must|shall)\s+(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What is required of {}?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Requirement,
            r"(?i)^(.+?)\s+is\s+required\b.*$",
            |caps, section| RenderedQuestion {
                text: format!(
                    "What does the {} section say is mandatory?",
                    section.header
                ),
                expected_answer: clean_value(&caps[1]),
            },
        ),
        rule(
            AssertionKind::Behavior,
            r"(?i)^(?:if|when|unless)\s+(.+?),\s*(?:then\s+)?(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What happens when {}?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Error,
            r"(?i)^(?:if|when)\s+(.+?)\s+(?:fails?|errors?),\s*(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What happens if {} fails?", mid_sentence(&caps[1])),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Sequence,
            r"(?i)^step\s+(\d+)[:.]\s*(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What does step {} involve?", &caps[1]),
                expected_answer: clean_value(&caps[2]),
            },
        ),
        rule(
            AssertionKind::Sequence,
            r"^(\d+)\.\s+(.+)$",
            |caps, _| RenderedQuestion {
                text: format!("What does step {} involve?", &caps[1]),
                expected_answer: clean_value(&caps[2]),
            },
        ),
    ]
});

/// Render a question from an assertion, if a rule for its kind parses
/// the text. `None` routes the assertion to model-assisted generation.
pub fn render(assertion: &Assertion, section: &Section) -> Option<RenderedQuestion> {
    TEMPLATE_RULES
        .iter()
        .filter(|r| r.kind == assertion.kind)
        .find_map(|r| {
            let caps = r.pattern.captures(assertion.text.trim())?;
            let rendered = (r.render)(&caps, section);
            if rendered.expected_answer.is_empty() {
                return None;
            }
            Some(rendered)
        })
}
