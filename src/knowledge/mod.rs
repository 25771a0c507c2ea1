//! Keyword lookup over a user's synced documents, producing context for tutoring prompts.

pub mod sync;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::KnowledgeConfig;
use crate::db::{acquire, service::DbService, DbPool, KnowledgeEntry};
use crate::error::AppResult;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was", "one",
    "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "old", "see", "two", "who",
    "did", "does", "get", "got", "let", "put", "say", "she", "too", "use", "what", "when", "where",
    "which", "while", "with", "would", "could", "should", "this", "that", "these", "those", "there",
    "their", "them", "then", "than", "they", "from", "have", "into", "just", "like", "make", "more",
    "most", "much", "must", "some", "such", "very", "will", "your", "about", "after", "again", "also",
    "been", "being", "both", "each", "here", "only", "other", "over", "same", "so", "want", "need",
    "help", "please", "explain", "tell", "show", "why", "is", "it", "of", "to", "in", "on", "at",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub snippet: String,
}

/// Lowercased keywords worth searching for, in query order, without duplicates.
pub fn extract_search_terms(query: &str, max_terms: usize) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    let mut terms: Vec<String> = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.chars().count() <= 2 || STOPWORDS.contains(&word) {
            continue;
        }
        if terms.iter().any(|t| t == word) {
            continue;
        }
        terms.push(word.to_string());
        if terms.len() == max_terms {
            break;
        }
    }
    terms
}

/// The term used when the all-terms search finds nothing: the longest, earliest on ties.
pub fn priority_term(terms: &[String]) -> Option<&String> {
    terms
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.chars().count().cmp(&b.chars().count()).then(ib.cmp(ia)))
        .map(|(_, term)| term)
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

/// Picks the `window`-character slice of `content` containing the most term
/// occurrences, scanning in `step`-character increments. Truncated edges are
/// marked with `...`.
pub fn extract_snippet(content: &str, terms: &[String], window: usize, step: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= window {
        return content.trim().to_string();
    }

    let lowered: Vec<char> = chars.iter().flat_map(|c| c.to_lowercase()).collect();
    // Lowercasing can change the length of some characters; fall back to the
    // original positions if it did.
    let haystack = if lowered.len() == chars.len() { &lowered } else { &chars };

    let step = step.max(1);
    let mut best_start = 0;
    let mut best_score = 0;
    let mut start = 0;
    loop {
        let end = (start + window).min(chars.len());
        let slice: String = haystack[start..end].iter().collect();
        let score: usize = terms.iter().map(|term| count_occurrences(&slice, term)).sum();
        if score > best_score {
            best_score = score;
            best_start = start;
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    let end = (best_start + window).min(chars.len());
    let mut snippet: String = chars[best_start..end].iter().collect();
    snippet = snippet.trim().to_string();
    if best_start > 0 {
        snippet.insert_str(0, "...");
    }
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Renders snippets as a block that can be pasted into a system prompt.
pub fn format_context(snippets: &[KnowledgeSnippet]) -> Option<String> {
    if snippets.is_empty() {
        return None;
    }
    let blocks: Vec<String> = snippets
        .iter()
        .map(|s| format!("--- {} ({}) ---\n{}", s.title, s.source, s.snippet))
        .collect();
    Some(blocks.join("\n\n"))
}

pub struct KnowledgeSearch {
    db: DbPool,
    config: KnowledgeConfig,
}

impl KnowledgeSearch {
    pub fn new(db: DbPool, config: KnowledgeConfig) -> Self {
        Self { db, config }
    }

    pub fn search(&self, user_id: &str, query: &str) -> AppResult<Vec<KnowledgeSnippet>> {
        let terms = extract_search_terms(query, self.config.max_terms);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let conn = acquire(&self.db)?;
        let limit = self.config.max_results;

        let primary = DbService::search_knowledge_all_terms(&conn, user_id, &terms, limit);
        let rows: Vec<KnowledgeEntry> = match primary {
            Ok(rows) if !rows.is_empty() => rows,
            other => {
                if let Err(e) = other {
                    warn!(user_id, "all-terms knowledge search failed, falling back: {}", e);
                }
                match priority_term(&terms) {
                    Some(term) => DbService::search_knowledge_single_term(&conn, user_id, term, limit)?,
                    None => Vec::new(),
                }
            }
        };
        debug!(user_id, ?terms, hits = rows.len(), "knowledge search");

        Ok(rows
            .into_iter()
            .map(|row| KnowledgeSnippet {
                snippet: extract_snippet(&row.content, &terms, self.config.snippet_window, self.config.snippet_step),
                source: row.source,
                source_id: row.source_id,
                title: row.title,
            })
            .collect())
    }

    /// Search formatted for prompt injection; lookup failures are logged and yield no context.
    pub fn context_for(&self, user_id: &str, query: &str) -> Option<String> {
        match self.search(user_id, query) {
            Ok(snippets) => format_context(&snippets),
            Err(e) => {
                warn!(user_id, "knowledge lookup failed: {}", e);
                None
            }
        }
    }
}
