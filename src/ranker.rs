//! Lexical relevance ranking: token overlap between a query and each tool's
//! indexed name/doc/metadata tokens, with a couple of keyword boosts.

use crate::tools::ToolRegistry;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"[a-z0-9]+").unwrap();
    static ref TREND_QUERY_TOKENS: HashSet<&'static str> =
        ["trend", "monthly", "mo", "month"].into_iter().collect();
    static ref TREND_TOOL_TOKENS: HashSet<&'static str> =
        ["trend", "month"].into_iter().collect();
}

const BOOST: f64 = 0.5;

/// Lowercase alphanumeric token runs. Empty input yields an empty set.
pub fn tokenize(text: &str) -> HashSet<String> {
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Read-only token index over the registry, built once at construction.
/// Staleness across dynamic tool changes is accepted; the registry is
/// immutable anyway.
pub struct RelevanceRanker {
    index: Vec<(String, HashSet<String>)>,
}

impl RelevanceRanker {
    pub fn new(registry: &ToolRegistry) -> Self {
        let index = registry
            .iter()
            .map(|tool| {
                let text = std::iter::once(tool.name.as_str())
                    .chain(std::iter::once(tool.doc.as_str()))
                    .chain(tool.metadata.intent.iter().map(String::as_str))
                    .chain(std::iter::once(tool.metadata.returns.as_str()))
                    .chain(tool.metadata.requires.iter().map(String::as_str))
                    .join(" ");
                (tool.name.clone(), tokenize(&text))
            })
            .collect();
        Self { index }
    }

    /// Score every tool against the query, descending. Tools with zero score
    /// are dropped; ties keep registration order.
    pub fn rank(&self, query: &str) -> Vec<(String, f64)> {
        let query_tokens = tokenize(query);

        let mut scores: Vec<(String, f64)> = Vec::new();
        for (name, tool_tokens) in &self.index {
            let mut score = query_tokens.intersection(tool_tokens).count() as f64;

            if query_tokens.contains("by")
                && (tool_tokens.contains("region") || tool_tokens.contains("regions"))
            {
                score += BOOST;
            }
            if query_tokens
                .iter()
                .any(|t| TREND_QUERY_TOKENS.contains(t.as_str()))
                && tool_tokens
                    .iter()
                    .any(|t| TREND_TOOL_TOKENS.contains(t.as_str()))
            {
                score += BOOST;
            }

            if score > 0.0 {
                scores.push((name.clone(), score));
            }
        }

        // Stable sort keeps registration order on ties.
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }
}
