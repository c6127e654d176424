//! Per-parser caches
//!
//! Each [`crate::CParser`] owns one [`ParserCache`]: the compiled lexeme
//! patterns and an LRU cache of file models keyed by path and content hash.
//! Nothing is shared between parser instances.

use cmodel_core::FileModel;
use regex::Regex;
use std::collections::{HashMap, VecDeque};

/// Compiled patterns for lexeme-level extraction
#[derive(Debug, Clone)]
pub struct Patterns {
    /// Header name in the text after `#include`
    pub include: Regex,
    /// Macro name and optional parameter list after `#define`
    pub define: Regex,
    /// A `struct {` / `union Tag {` body inside type text
    pub aggregate_body: Regex,
}

impl Patterns {
    pub fn compile() -> Self {
        Self {
            include: Regex::new(r#"^[<"]([^>"]+)[>"]"#).expect("valid include pattern"),
            define: Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\([^)]*\))?")
                .expect("valid define pattern"),
            aggregate_body: Regex::new(r"\b(struct|union)\b\s*([A-Za-z_][A-Za-z0-9_]*)?\s*\{")
                .expect("valid aggregate pattern"),
        }
    }

    /// Header name of an `#include` argument, without delimiters
    pub fn include_target<'t>(&self, rest: &'t str) -> Option<&'t str> {
        self.include
            .captures(rest)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
    }

    /// `NAME` or `NAME(params)` of a `#define` argument
    pub fn macro_signature(&self, rest: &str) -> Option<String> {
        let caps = self.define.captures(rest)?;
        let name = caps.get(1)?.as_str();
        Some(match caps.get(2) {
            Some(params) => format!("{}{}", name, params.as_str()),
            None => name.to_string(),
        })
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self::compile()
    }
}

/// Cache entry with change detection
#[derive(Debug, Clone)]
struct CacheEntry {
    content_hash: u64,
    model: FileModel,
}

/// Patterns plus an LRU cache of parsed files
#[derive(Debug)]
pub struct ParserCache {
    patterns: Patterns,
    /// Maximum number of cached files, 0 disables caching
    capacity: usize,
    entries: HashMap<String, CacheEntry>,
    /// Access order for LRU eviction, oldest first
    access_order: VecDeque<String>,
    hits: usize,
    misses: usize,
}

impl ParserCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            patterns: Patterns::compile(),
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    /// Cached model for `path` if its content is unchanged
    pub fn get(&mut self, path: &str, content_hash: u64) -> Option<FileModel> {
        let model = self
            .entries
            .get(path)
            .filter(|e| e.content_hash == content_hash)
            .map(|e| e.model.clone());
        match model {
            Some(model) => {
                self.hits += 1;
                self.touch(path);
                Some(model)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or update an entry, evicting the least recently used one
    pub fn insert(&mut self, path: &str, content_hash: u64, model: FileModel) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(path) {
            if let Some(oldest) = self.access_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                content_hash,
                model,
            },
        );
        self.touch(path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn touch(&mut self, path: &str) {
        self.access_order.retain(|p| p != path);
        self.access_order.push_back(path.to_string());
    }
}

impl Default for ParserCache {
    fn default() -> Self {
        Self::new(crate::pipeline::DEFAULT_CACHE_CAPACITY)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Simple hash function for file content
pub fn hash_content(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
