//! Output classification against progress and error patterns.
//!
//! Compiled pattern sets are cached process-wide, keyed by a SHA-256 hash of
//! the ordered pattern lists. Two configurations with the same patterns share
//! one compiled entry even when they are distinct values.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::RegexSet;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Directive returned for one chunk of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternActionKind {
    /// An error pattern matched; stop the command.
    Terminate,
    /// A progress pattern matched; restore the full window.
    Reset,
    /// Ordinary activity; the stage decides what it is worth.
    Extend,
    /// Nothing to classify (empty chunk).
    Ignore,
}

impl PatternActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternActionKind::Terminate => "terminate",
            PatternActionKind::Reset => "reset",
            PatternActionKind::Extend => "extend",
            PatternActionKind::Ignore => "ignore",
        }
    }
}

/// Classification result with the pattern responsible for it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternAction {
    pub kind: PatternActionKind,
    pub pattern: Option<String>,
}

impl PatternAction {
    fn plain(kind: PatternActionKind) -> Self {
        Self {
            kind,
            pattern: None,
        }
    }
}

type CacheKey = [u8; 32];

static PATTERN_CACHE: Lazy<Mutex<HashMap<CacheKey, Arc<CompiledPatterns>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

struct CompiledPatterns {
    progress: RegexSet,
    progress_sources: Vec<String>,
    error: RegexSet,
    error_sources: Vec<String>,
}

/// Classifies output chunks for one pattern configuration.
#[derive(Clone)]
pub struct PatternMatcher {
    compiled: Arc<CompiledPatterns>,
}

impl std::fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatcher")
            .field("progress", &self.compiled.progress_sources)
            .field("error", &self.compiled.error_sources)
            .finish()
    }
}

impl PatternMatcher {
    /// Build a matcher, reusing a cached compilation when one exists.
    pub fn new(progress: &[String], error: &[String]) -> Result<Self, regex::Error> {
        let key = cache_key(progress, error);

        if let Some(compiled) = PATTERN_CACHE.lock().get(&key) {
            return Ok(Self {
                compiled: Arc::clone(compiled),
            });
        }

        // Compile outside the lock; a racing thread may insert first, in
        // which case its entry wins and ours is dropped.
        let compiled = Arc::new(CompiledPatterns {
            progress: RegexSet::new(progress)?,
            progress_sources: progress.to_vec(),
            error: RegexSet::new(error)?,
            error_sources: error.to_vec(),
        });

        let compiled = Arc::clone(PATTERN_CACHE.lock().entry(key).or_insert(compiled));
        Ok(Self { compiled })
    }

    /// Classify one chunk. Error patterns take precedence over progress patterns.
    pub fn classify(&self, chunk: &str) -> PatternAction {
        if chunk.is_empty() {
            return PatternAction::plain(PatternActionKind::Ignore);
        }

        if let Some(index) = self.compiled.error.matches(chunk).iter().next() {
            return PatternAction {
                kind: PatternActionKind::Terminate,
                pattern: Some(self.compiled.error_sources[index].clone()),
            };
        }

        if let Some(index) = self.compiled.progress.matches(chunk).iter().next() {
            return PatternAction {
                kind: PatternActionKind::Reset,
                pattern: Some(self.compiled.progress_sources[index].clone()),
            };
        }

        PatternAction::plain(PatternActionKind::Extend)
    }

    pub fn progress_patterns(&self) -> &[String] {
        &self.compiled.progress_sources
    }

    pub fn error_patterns(&self) -> &[String] {
        &self.compiled.error_sources
    }
}

/// Drop every cached compilation.
pub fn clear_pattern_cache() {
    PATTERN_CACHE.lock().clear();
}

/// Number of distinct pattern sets currently compiled.
pub fn pattern_cache_len() -> usize {
    PATTERN_CACHE.lock().len()
}

fn cache_key(progress: &[String], error: &[String]) -> CacheKey {
    let mut hasher = Sha256::new();
    for (tag, patterns) in [(b'p', progress), (b'e', error)] {
        hasher.update([tag]);
        hasher.update((patterns.len() as u64).to_le_bytes());
        for pattern in patterns {
            hasher.update((pattern.len() as u64).to_le_bytes());
            hasher.update(pattern.as_bytes());
        }
    }
    hasher.finalize().into()
}
