//! Multinomial naive Bayes text model with JSON persistence.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app::Result;

static NONWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("nonword pattern is valid"));

const MIN_TOKEN_LEN: usize = 3;

/// A text model that learns labelled documents and scores new ones.
pub trait Model {
    fn learn(&mut self, class: &str, text: &str);

    /// Undoes one earlier call to `learn` with the same arguments.
    fn forget(&mut self, class: &str, text: &str);

    /// The most probable class and its posterior, `None` if nothing has
    /// been learned.
    fn classify(&self, text: &str) -> Option<(String, f64)>;

    /// Posterior probability of each known class, best first.
    fn score(&self, text: &str) -> Vec<(String, f64)>;

    fn reset(&mut self);
}

pub fn tokenize(text: &str) -> Vec<String> {
    NONWORD
        .split(&text.to_lowercase())
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ClassStats {
    documents: u64,
    tokens: u64,
    words: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayes {
    classes: BTreeMap<String, ClassStats>,
    /// Occurrences of each word over all classes.
    vocabulary: HashMap<String, u64>,
}

impl NaiveBayes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn documents(&self) -> u64 {
        self.classes.values().map(|c| c.documents).sum()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Loads a model saved by [`NaiveBayes::save`]. A missing file yields an
    /// empty model.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn log_posteriors(&self, text: &str) -> Vec<(String, f64)> {
        let tokens = tokenize(text);
        let total_docs = self.documents() as f64;
        let vocab = self.vocabulary.len().max(1) as f64;

        self.classes
            .iter()
            .map(|(name, stats)| {
                let prior = (stats.documents as f64 / total_docs).ln();
                let denom = stats.tokens as f64 + vocab;
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| {
                        let cnt = stats.words.get(t).copied().unwrap_or(0) as f64;
                        ((cnt + 1.0) / denom).ln()
                    })
                    .sum();
                (name.clone(), prior + likelihood)
            })
            .collect()
    }
}

impl Model for NaiveBayes {
    fn learn(&mut self, class: &str, text: &str) {
        let stats = self.classes.entry(class.to_string()).or_default();
        stats.documents += 1;
        for token in tokenize(text) {
            stats.tokens += 1;
            *stats.words.entry(token.clone()).or_default() += 1;
            *self.vocabulary.entry(token).or_default() += 1;
        }
    }

    fn forget(&mut self, class: &str, text: &str) {
        let Some(stats) = self.classes.get_mut(class) else {
            return;
        };
        stats.documents = stats.documents.saturating_sub(1);
        for token in tokenize(text) {
            let Some(cnt) = stats.words.get_mut(&token) else {
                continue;
            };
            *cnt -= 1;
            if *cnt == 0 {
                stats.words.remove(&token);
            }
            stats.tokens = stats.tokens.saturating_sub(1);
            if let Some(v) = self.vocabulary.get_mut(&token) {
                *v = v.saturating_sub(1);
                if *v == 0 {
                    self.vocabulary.remove(&token);
                }
            }
        }
        if stats.documents == 0 {
            self.classes.remove(class);
        }
    }

    fn classify(&self, text: &str) -> Option<(String, f64)> {
        self.score(text).into_iter().next()
    }

    fn score(&self, text: &str) -> Vec<(String, f64)> {
        if self.is_empty() {
            return Vec::new();
        }
        let logs = self.log_posteriors(text);
        // Normalize in log space to avoid underflow on long texts.
        let max = logs.iter().map(|(_, l)| *l).fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = logs.iter().map(|(_, l)| (l - max).exp()).sum();
        let mut scores: Vec<(String, f64)> = logs
            .into_iter()
            .map(|(c, l)| (c, (l - max).exp() / sum))
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores
    }

    fn reset(&mut self) {
        self.classes.clear();
        self.vocabulary.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained() -> NaiveBayes {
        let mut m = NaiveBayes::new();
        m.learn("rust", "cargo borrow checker lifetimes traits crates");
        m.learn("rust", "async tokio runtime traits borrow");
        m.learn("cooking", "recipe garlic onion butter pasta");
        m.learn("cooking", "bake bread flour butter oven");
        m
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Hello, World! a to Über-cool"),
            vec!["hello", "world", "über", "cool"]
        );
    }

    #[test]
    fn test_empty_model() {
        let m = NaiveBayes::new();
        assert!(m.classify("anything").is_none());
        assert!(m.score("anything").is_empty());
    }

    #[test]
    fn test_classify() {
        let m = trained();
        let (class, p) = m.classify("the borrow checker hates my traits").unwrap();
        assert_eq!(class, "rust");
        assert!(p > 0.5 && p <= 1.0);

        let scores = m.score("garlic butter pasta");
        assert_eq!(scores[0].0, "cooking");
        let total: f64 = scores.iter().map(|(_, s)| s).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forget_undoes_learn() {
        let mut m = trained();
        let before = m.clone();
        m.learn("cooking", "soup carrots leek");
        m.forget("cooking", "soup carrots leek");
        assert_eq!(m, before);

        m.forget("nonsense", "whatever");
        assert_eq!(m, before);
    }

    #[test]
    fn test_reset() {
        let mut m = trained();
        m.reset();
        assert!(m.is_empty());
        assert_eq!(m.documents(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("en").join("model.json");
        assert!(NaiveBayes::load(&path).unwrap().is_empty());

        let m = trained();
        m.save(&path).unwrap();
        let loaded = NaiveBayes::load(&path).unwrap();
        assert_eq!(loaded, m);
    }
}
