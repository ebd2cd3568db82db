//! Assertion inference — pattern table over section content.
//!
//! When the section store supplies no assertions, each section's content
//! is scanned with one rule per assertion kind. Matches are deduplicated
//! per section so repeated phrasing yields one assertion.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::section::{Assertion, AssertionKind, Priority, Section};

/// One inference rule: a kind, its matchers, and a default priority.
struct InferenceRule {
    kind: AssertionKind,
    priority: Priority,
    patterns: Vec<Regex>,
}

fn rule(kind: AssertionKind, priority: Priority, patterns: &[&str]) -> InferenceRule {
    InferenceRule {
        kind,
        priority,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(&format!("(?im){p}")).expect("inference pattern"))
            .collect(),
    }
}

/// Rule order matters: the first kind to match a span claims it.
static INFERENCE_RULES: LazyLock<Vec<InferenceRule>> = LazyLock::new(|| {
    vec![
        rule(
            AssertionKind::Sequence,
            Priority::Medium,
            &[
                r"^\s*(step\s+\d+[:.].+?)$",
                r"^\s*(\d+\.\s+.+?)$",
            ],
        ),
        rule(
            AssertionKind::Error,
            Priority::High,
            &[
                r"^.*?\b(if\s+.+?\s+fails?,\s*.+?)[.!]?$",
                r"^(.*?\b(?:error|exception|invalid)\b.+?)[.!]?$",
            ],
        ),
        rule(
            AssertionKind::Constraint,
            Priority::High,
            &[
                r"^(.*?\b(?:maximum|minimum|max|min|limit)\b.+?)[.!]?$",
                r"^(.*?\b(?:at\s+most|at\s+least|no\s+more\s+than)\b.+?)[.!]?$",
            ],
        ),
        rule(
            AssertionKind::Specification,
            Priority::Medium,
            &[
                r"^(.*?\bdefaults?\s+to\b.+?)[.!]?$",
                r"^(.*?\bis\s+set\s+to\b.+?)[.!]?$",
            ],
        ),
        rule(
            AssertionKind::Requirement,
            Priority::High,
            &[
                r"^(.*?\b(?:must|shall)\b.+?)[.!]?$",
                r"^(.*?\bis\s+required\b.*?)[.!]?$",
            ],
        ),
        rule(
            AssertionKind::Behavior,
            Priority::Medium,
            &[r"^((?:if|when|unless)\s+.+?,\s*.+?)[.!]?$"],
        ),
    ]
});

/// Infer assertions for every section. Ids are `{section_id}-a{n}`,
/// numbered in match order within the section.
pub fn infer_assertions(sections: &[Section]) -> Vec<Assertion> {
    let mut assertions = Vec::new();

    for section in sections {
        let mut seen: HashSet<String> = HashSet::new();
        let mut counter = 0usize;

        for rule in INFERENCE_RULES.iter() {
            for pattern in &rule.patterns {
                for caps in pattern.captures_iter(&section.content) {
                    let Some(m) = caps.get(1) else { continue };
                    let text = m.as_str().trim().trim_end_matches(['.', '!']).to_string();
                    if text.len() < 12 {
                        continue;
                    }
                    // Dedup key is kind-independent so one sentence cannot
                    // become both a requirement and a constraint.
                    let key = text.chars().take(50).collect::<String>().to_lowercase();
                    if !seen.insert(key) {
                        continue;
                    }

                    let line_offset = section.content[..m.start()].matches('\n').count();
                    let line = section.start_line + line_offset;
                    counter += 1;
                    assertions.push(Assertion {
                        id: format!("{}-a{}", section.id, counter),
                        kind: rule.kind,
                        text,
                        priority: rule.priority,
                        section_id: section.id.clone(),
                        start_line: line,
                        end_line: line,
                    });
                }
            }
        }
    }

    debug!(
        sections = sections.len(),
        assertions = assertions.len(),
        "Assertion inference complete"
    );
    assertions
}
