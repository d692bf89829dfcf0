//! Static question/answer lookup.
//!
//! The knowledge base is loaded once at startup and never written afterwards,
//! so a single instance can be shared across conversations behind an `Arc`.
//!
//! Matching is token overlap: the query and each entry's question are
//! lowercased, split on non-alphanumeric characters, stripped of stopwords and
//! deduplicated. The entry sharing the most tokens with the query wins when it
//! reaches the configured minimum score; ties go to the entry that appears
//! first in the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "can", "do", "does", "for", "how", "i", "in", "is", "it",
    "me", "my", "of", "on", "or", "please", "s", "tell", "the", "there", "to", "what", "whats",
    "with", "you", "your",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub topic: String,
    pub question: String,
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEntry {
    pub index: usize,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnowledgeMatch<'a> {
    pub entry: &'a KnowledgeEntry,
    pub score: usize,
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("could not read knowledge base `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse knowledge base `{path}`: {source}")]
    ParseFile { path: PathBuf, source: serde_json::Error },
    #[error("knowledge base `{path}` must be a JSON array or an object with an `entries` array")]
    InvalidShape { path: PathBuf },
}

#[derive(Clone, Debug)]
struct IndexedEntry {
    entry: KnowledgeEntry,
    tokens: BTreeSet<String>,
}

#[derive(Clone, Debug)]
pub struct KnowledgeBase {
    entries: Vec<IndexedEntry>,
    min_score: usize,
}

/// Result of loading a knowledge file: the usable base plus the entries that
/// were dropped for being malformed.
#[derive(Clone, Debug)]
pub struct KnowledgeLoad {
    pub base: KnowledgeBase,
    pub skipped: Vec<SkippedEntry>,
}

impl KnowledgeBase {
    pub fn new(entries: Vec<KnowledgeEntry>, min_score: usize) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| IndexedEntry { tokens: tokenize(&entry.question), entry })
            .collect();
        Self { entries, min_score: min_score.max(1) }
    }

    pub fn load(path: &Path, min_score: usize) -> Result<KnowledgeLoad, KnowledgeError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| KnowledgeError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw, min_score).map_err(|error| match error {
            ParseFailure::Json(source) => {
                KnowledgeError::ParseFile { path: path.to_path_buf(), source }
            }
            ParseFailure::Shape => KnowledgeError::InvalidShape { path: path.to_path_buf() },
        })
    }

    fn from_json_str(raw: &str, min_score: usize) -> Result<KnowledgeLoad, ParseFailure> {
        let document: Value = serde_json::from_str(raw).map_err(ParseFailure::Json)?;
        let items = match document {
            Value::Array(items) => items,
            Value::Object(mut object) => match object.remove("entries") {
                Some(Value::Array(items)) => items,
                _ => return Err(ParseFailure::Shape),
            },
            _ => return Err(ParseFailure::Shape),
        };

        let mut entries = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            match parse_entry(item) {
                Ok(entry) => entries.push(entry),
                Err(reason) => skipped.push(SkippedEntry { index, reason }),
            }
        }

        Ok(KnowledgeLoad { base: Self::new(entries, min_score), skipped })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_score(&self) -> usize {
        self.min_score
    }

    pub fn topics(&self) -> Vec<&str> {
        self.entries.iter().map(|indexed| indexed.entry.topic.as_str()).collect()
    }

    pub fn best_match(&self, query: &str) -> Option<KnowledgeMatch<'_>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return None;
        }

        let mut best: Option<KnowledgeMatch<'_>> = None;
        for indexed in &self.entries {
            let score = indexed.tokens.intersection(&query_tokens).count();
            let better = best.as_ref().map(|current| score > current.score).unwrap_or(true);
            if better {
                best = Some(KnowledgeMatch { entry: &indexed.entry, score });
            }
        }

        best.filter(|candidate| candidate.score >= self.min_score)
    }

    pub fn lookup(&self, query: &str) -> Option<&str> {
        self.best_match(query).map(|found| found.entry.answer.as_str())
    }
}

enum ParseFailure {
    Json(serde_json::Error),
    Shape,
}

fn parse_entry(item: Value) -> Result<KnowledgeEntry, String> {
    if !item.is_object() {
        return Err("entry is not an object".to_string());
    }
    let entry: KnowledgeEntry =
        serde_json::from_value(item).map_err(|error| format!("malformed entry: {error}"))?;

    for (field, value) in
        [("topic", &entry.topic), ("question", &entry.question), ("answer", &entry.answer)]
    {
        if value.trim().is_empty() {
            return Err(format!("field `{field}` is empty"));
        }
    }
    Ok(entry)
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}
