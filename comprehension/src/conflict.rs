//! Conflict detection — contradictory requirements and value conflicts.
//!
//! Heuristic filter over section pairs: surfaces candidates for human or
//! judge review, never suppresses them on confidence. False positives are
//! expected.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::section::Section;

/// What kind of contradiction a candidate represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// One section demands, the other forbids or relaxes.
    ContradictoryRequirements,
    /// The same term is bound to different values in different sections.
    ValueConflict,
}

/// A matched text span backing a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEvidence {
    pub section_id: String,
    /// The line containing the match, trimmed.
    pub excerpt: String,
}

/// One conflict candidate between two or more sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Involved section ids, in document order. Always two for
    /// contradictory requirements; two or more for value conflicts.
    pub sections: Vec<String>,
    /// One span per involved side.
    pub evidence: Vec<ConflictEvidence>,
    /// The conflicting term (value conflicts) or antagonistic phrase
    /// pair (contradictory requirements).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
}

/// One antagonistic phrase pair.
struct AntagonisticPair {
    positive: &'static str,
    negative: &'static str,
    positive_re: Regex,
    negative_re: Regex,
}

static ANTAGONISTIC_PAIRS: LazyLock<Vec<AntagonisticPair>> = LazyLock::new(|| {
    [
        ("must", "must not", r"\bmust\b", r"\bmust\s+not\b"),
        ("required", "optional", r"\brequired\b", r"\boptional\b"),
        ("always", "never", r"\balways\b", r"\bnever\b"),
        ("should", "should not", r"\bshould\b", r"\bshould\s+not\b"),
    ]
    .into_iter()
    .map(|(positive, negative, pos_re, neg_re)| AntagonisticPair {
        positive,
        negative,
        positive_re: Regex::new(&format!("(?i){pos_re}")).expect("positive pattern"),
        negative_re: Regex::new(&format!("(?i){neg_re}")).expect("negative pattern"),
    })
    .collect()
});

/// Sections must share at least one of these before a pair is compared.
const RESPONSIBILITY_KEYWORDS: &[&str] = &[
    "step",
    "procedure",
    "process",
    "workflow",
    "review",
    "configure",
    "install",
];

/// `term is/=/: value` binding, the raw material for value conflicts.
static VALUE_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9_-]{2,})\s+(?:is|=|:)\s+([^\s,;]+)").expect("binding pattern")
});

/// Scans section pairs for contradiction candidates.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Detect all conflict candidates across the section list.
    pub fn detect(sections: &[Section]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for (i, a) in sections.iter().enumerate() {
            for b in sections.iter().skip(i + 1) {
                if !shares_responsibility_keyword(a, b) {
                    continue;
                }
                if let Some(conflict) = check_contradiction(a, b) {
                    conflicts.push(conflict);
                }
            }
        }

        conflicts.extend(detect_value_conflicts(sections));

        debug!(candidates = conflicts.len(), "Conflict detection complete");
        conflicts
    }
}

fn shares_responsibility_keyword(a: &Section, b: &Section) -> bool {
    let a_lower = a.content.to_lowercase();
    let b_lower = b.content.to_lowercase();
    RESPONSIBILITY_KEYWORDS
        .iter()
        .any(|kw| a_lower.contains(kw) && b_lower.contains(kw))
}

/// First antagonistic pair with one member on each side wins; a single
/// candidate per section pair is enough for review.
fn check_contradiction(a: &Section, b: &Section) -> Option<Conflict> {
    for pair in ANTAGONISTIC_PAIRS.iter() {
        let forward = (find_positive(&a.content, pair), find_negative(&b.content, pair));
        let backward = (find_negative(&a.content, pair), find_positive(&b.content, pair));
        for (span_a, span_b) in [forward, backward] {
            if let (Some(span_a), Some(span_b)) = (span_a, span_b) {
                return Some(Conflict {
                    kind: ConflictKind::ContradictoryRequirements,
                    sections: vec![a.id.clone(), b.id.clone()],
                    evidence: vec![
                        ConflictEvidence {
                            section_id: a.id.clone(),
                            excerpt: span_a,
                        },
                        ConflictEvidence {
                            section_id: b.id.clone(),
                            excerpt: span_b,
                        },
                    ],
                    term: Some(format!("{} / {}", pair.positive, pair.negative)),
                });
            }
        }
    }
    None
}

/// First standalone match of the positive member, skipping matches that
/// begin a negative phrase ("must" inside "must not" does not count).
fn find_positive(content: &str, pair: &AntagonisticPair) -> Option<String> {
    let negative_starts: Vec<usize> = pair
        .negative_re
        .find_iter(content)
        .map(|m| m.start())
        .collect();
    pair.positive_re
        .find_iter(content)
        .find(|m| !negative_starts.contains(&m.start()))
        .map(|m| line_around(content, m.start(), m.end()))
}

fn find_negative(content: &str, pair: &AntagonisticPair) -> Option<String> {
    pair.negative_re
        .find(content)
        .map(|m| line_around(content, m.start(), m.end()))
}

/// The trimmed line containing a match, as evidence.
fn line_around(content: &str, start: usize, end: usize) -> String {
    let line_start = content[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = content[end..]
        .find('\n')
        .map(|i| end + i)
        .unwrap_or(content.len());
    content[line_start..line_end].trim().to_string()
}

/// A term bound to two or more distinct values across sections is one
/// conflict carrying every binding as evidence.
fn detect_value_conflicts(sections: &[Section]) -> Vec<Conflict> {
    // term -> bindings, BTreeMap for stable output order.
    let mut bindings: BTreeMap<String, Vec<(String, String, String)>> = BTreeMap::new();

    for section in sections {
        for caps in VALUE_BINDING.captures_iter(&section.content) {
            let term = caps[1].to_lowercase();
            let value = caps[2].trim_end_matches(['.', '!', '?', ')']).to_string();
            if value.is_empty() {
                continue;
            }
            let excerpt = caps[0].trim().to_string();
            bindings
                .entry(term)
                .or_default()
                .push((section.id.clone(), value, excerpt));
        }
    }

    bindings
        .into_iter()
        .filter_map(|(term, entries)| {
            let distinct: std::collections::BTreeSet<&str> =
                entries.iter().map(|(_, v, _)| v.as_str()).collect();
            if distinct.len() < 2 {
                return None;
            }
            let mut sections: Vec<String> = entries.iter().map(|(s, _, _)| s.clone()).collect();
            sections.dedup();
            Some(Conflict {
                kind: ConflictKind::ValueConflict,
                sections,
                evidence: entries
                    .into_iter()
                    .map(|(section_id, _, excerpt)| ConflictEvidence {
                        section_id,
                        excerpt,
                    })
                    .collect(),
                term: Some(term),
            })
        })
        .collect()
}
