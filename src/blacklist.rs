//! Regex based URL filter for tracking and advertising assets.

use regex::Regex;

use crate::app::Result;

const DEFAULT_PATTERNS: &[&str] = &[
    r"(?i)vgwort[.]",
    r"(?i)ioam[.]",
    r"(?i)google-analytics[.]",
    r"(?i)newrelic[.]",
    r"(?i)doubleclick[.]",
    r"(?i)google-?syndication[.]",
    r"(?i)sensic[.]net",
    r"(?i)xiti[.]com",
    r"(?i)tracker",
    r"(?i:facebook|twitter|linkedin|instagram|youtube)[.]",
    r"(?i)[.]amp$",
];

#[derive(Debug, Clone)]
struct Entry {
    pattern: Regex,
    hits: u64,
}

/// An ordered list of patterns. Patterns that match often move to the front
/// so that common trackers are found with fewer comparisons.
#[derive(Debug, Clone)]
pub struct Blacklist {
    entries: Vec<Entry>,
}

impl Blacklist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let entries = patterns
            .iter()
            .map(|p| {
                Ok(Entry {
                    pattern: Regex::new(p.as_ref())?,
                    hits: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Returns true if any pattern matches `href`.
    pub fn matches(&mut self, href: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.pattern.is_match(href)) else {
            return false;
        };
        self.entries[idx].hits += 1;
        // Stable, so equally hit patterns keep their relative order.
        self.entries.sort_by(|a, b| b.hits.cmp(&a.hits));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patterns in their current order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.pattern.as_str())
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        let entries = DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .map(|pattern| Entry { pattern, hits: 0 })
            .collect();
        Self { entries }
    }
}
