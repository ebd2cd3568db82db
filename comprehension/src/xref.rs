//! Cross-reference analysis — dependency graph between sections.
//!
//! Scans section content for explicit ("see section X") and implicit
//! ("previously mentioned") references, resolves them against a
//! normalized-header lookup, and derives cycles and orphans from the
//! resulting directed graph. Deterministic for a fixed section list.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::section::{slugify, Section};

/// How a reference was phrased in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Names the target section ("see section Setup").
    ExplicitReference,
    /// Positional phrasing ("above", "the following section").
    ImplicitReference,
}

/// One resolved dependency between two sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: ReferenceKind,
}

/// A reference phrase that matched no known section.
///
/// Reported, never fatal — broken references are themselves a
/// documentation signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub section_id: String,
    pub reference_text: String,
    pub pattern_id: &'static str,
}

/// Full output of one analysis pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceAnalysis {
    pub edges: Vec<DependencyEdge>,
    /// Each cycle is the list of section ids on it, in graph order.
    pub cycles: Vec<Vec<String>>,
    /// Sections with no inbound or outbound edges.
    pub orphans: Vec<String>,
    pub unresolved: Vec<UnresolvedReference>,
}

/// How a pattern's capture resolves to a target section.
#[derive(Debug, Clone, Copy)]
enum Resolution {
    /// Capture group 1 names the target; look it up by normalized header.
    NamedTarget,
    /// Phrase points at an earlier section; resolve to the previous one.
    PreviousSection,
    /// Phrase points forward; resolve to the next section.
    NextSection,
}

/// One entry in the reference pattern table.
struct ReferencePattern {
    id: &'static str,
    kind: ReferenceKind,
    regex: Regex,
    resolution: Resolution,
}

/// Compiled pattern table. Each pattern is independently testable by id.
static REFERENCE_PATTERNS: LazyLock<Vec<ReferencePattern>> = LazyLock::new(|| {
    vec![
        ReferencePattern {
            id: "see_section",
            kind: ReferenceKind::ExplicitReference,
            regex: Regex::new(
                r#"(?i)\b(?:see|refer to|as (?:described|shown|defined) in)\s+(?:the\s+)?(?:section\s+)?["'`]?([A-Za-z0-9][A-Za-z0-9 ._:-]{0,60}?)["'`]?\s*(?:\bsection\b|[.,;)\n]|$)"#,
            )
            .expect("see_section pattern"),
            resolution: Resolution::NamedTarget,
        },
        ReferencePattern {
            id: "section_name",
            kind: ReferenceKind::ExplicitReference,
            regex: Regex::new(r#"(?i)\bsection\s+["'`]?([A-Za-z0-9][A-Za-z0-9 ._:-]{0,60}?)["'`]?(?:[.,;)\n]|$)"#)
                .expect("section_name pattern"),
            resolution: Resolution::NamedTarget,
        },
        ReferencePattern {
            id: "previously_mentioned",
            kind: ReferenceKind::ImplicitReference,
            regex: Regex::new(r"(?i)\b(?:above|previously|earlier)\s+(?:mentioned|described|defined)\b")
                .expect("previously_mentioned pattern"),
            resolution: Resolution::PreviousSection,
        },
        ReferencePattern {
            id: "following_section",
            kind: ReferenceKind::ImplicitReference,
            regex: Regex::new(r"(?i)\b(?:the\s+)?(?:following|next|subsequent)\s+section\b")
                .expect("following_section pattern"),
            resolution: Resolution::NextSection,
        },
    ]
});

/// Builds the dependency graph for one document.
pub struct CrossReferenceAnalyzer;

impl CrossReferenceAnalyzer {
    /// Analyze all sections, producing edges plus derived cycle/orphan facts.
    pub fn analyze(sections: &[Section]) -> ReferenceAnalysis {
        let lookup = header_lookup(sections);

        let mut edges = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen: HashSet<(String, String, ReferenceKind)> = HashSet::new();

        for (idx, section) in sections.iter().enumerate() {
            for pattern in REFERENCE_PATTERNS.iter() {
                for caps in pattern.regex.captures_iter(&section.content) {
                    let target = match pattern.resolution {
                        Resolution::NamedTarget => {
                            let text = caps
                                .get(1)
                                .map(|m| m.as_str().trim())
                                .unwrap_or_default();
                            match resolve_named(text, &lookup) {
                                Some(id) => Some(id),
                                None => {
                                    unresolved.push(UnresolvedReference {
                                        section_id: section.id.clone(),
                                        reference_text: text.to_string(),
                                        pattern_id: pattern.id,
                                    });
                                    None
                                }
                            }
                        }
                        Resolution::PreviousSection => {
                            idx.checked_sub(1).map(|i| sections[i].id.clone())
                        }
                        Resolution::NextSection => sections.get(idx + 1).map(|s| s.id.clone()),
                    };

                    if let Some(to) = target {
                        if to == section.id {
                            continue;
                        }
                        let key = (section.id.clone(), to.clone(), pattern.kind);
                        if seen.insert(key) {
                            edges.push(DependencyEdge {
                                from: section.id.clone(),
                                to,
                                kind: pattern.kind,
                            });
                        }
                    }
                }
            }
        }

        // Sort for call-order independence before deriving graph facts.
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        let cycles = detect_cycles(sections, &edges);
        let orphans = detect_orphans(sections, &edges);

        debug!(
            edges = edges.len(),
            cycles = cycles.len(),
            orphans = orphans.len(),
            unresolved = unresolved.len(),
            "Cross-reference analysis complete"
        );

        ReferenceAnalysis {
            edges,
            cycles,
            orphans,
            unresolved,
        }
    }
}

/// Normalized header → section id. Both the raw lowercased header and its
/// slug resolve, so "Setup", "setup" and "step-1-setup" all hit.
fn header_lookup(sections: &[Section]) -> HashMap<String, String> {
    let mut lookup = HashMap::new();
    for section in sections {
        lookup.insert(section.header.trim().to_lowercase(), section.id.clone());
        lookup.insert(slugify(&section.header), section.id.clone());
        lookup.insert(section.id.clone(), section.id.clone());
    }
    lookup
}

/// Resolve a captured reference phrase to a section id.
///
/// Captures often trail into surrounding prose ("Setup before running"),
/// so resolution tries the full phrase first, then drops trailing words
/// until a known header matches.
fn resolve_named(text: &str, lookup: &HashMap<String, String>) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    for end in (1..=words.len()).rev() {
        let candidate = words[..end].join(" ");
        if let Some(id) = lookup
            .get(&candidate.to_lowercase())
            .or_else(|| lookup.get(&slugify(&candidate)))
        {
            return Some(id.clone());
        }
    }
    None
}

/// Strongly connected components of size > 1, or single nodes with a
/// self-referencing edge pair, are cycles.
fn detect_cycles(sections: &[Section], edges: &[DependencyEdge]) -> Vec<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for section in sections {
        let idx = graph.add_node(section.id.as_str());
        nodes.insert(section.id.as_str(), idx);
    }
    for edge in edges {
        if let (Some(&from), Some(&to)) = (nodes.get(edge.from.as_str()), nodes.get(edge.to.as_str()))
        {
            graph.add_edge(from, to, ());
        }
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .map(|scc| {
            let mut ids: Vec<String> = scc.iter().map(|&n| graph[n].to_string()).collect();
            ids.sort();
            ids
        })
        .collect()
}

fn detect_orphans(sections: &[Section], edges: &[DependencyEdge]) -> Vec<String> {
    sections
        .iter()
        .filter(|s| !edges.iter().any(|e| e.from == s.id || e.to == s.id))
        .map(|s| s.id.clone())
        .collect()
}
