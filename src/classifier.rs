//! Binary good/bad rating of items, one model per language.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::app::Result;
use crate::bayes::{Model, NaiveBayes};
use crate::domain::Item;
use crate::language::LanguageDetector;
use crate::store::SqliteStore;

const MODEL_FILE: &str = "model.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Good,
    Bad,
}

impl Verdict {
    pub const THRESHOLD: f64 = 0.5;

    pub fn from_rating(rating: f64) -> Self {
        if rating >= Self::THRESHOLD {
            Verdict::Good
        } else {
            Verdict::Bad
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
        }
    }

    fn from_class(class: &str) -> Option<Self> {
        match class {
            "good" => Some(Verdict::Good),
            "bad" => Some(Verdict::Bad),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Classifier {
    dir: PathBuf,
    detector: Arc<LanguageDetector>,
    models: HashMap<String, NaiveBayes>,
}

impl Classifier {
    /// Loads the persisted models below `dir`, one subdirectory per language.
    pub fn open(dir: impl Into<PathBuf>, detector: Arc<LanguageDetector>) -> Result<Self> {
        let dir = dir.into();
        let mut models = HashMap::new();
        for lang in detector.languages() {
            let model = NaiveBayes::load(&model_path(&dir, lang))?;
            models.insert(lang.to_string(), model);
        }
        Ok(Self {
            dir,
            detector,
            models,
        })
    }

    /// Rebuilds all models from the rated items in `db`.
    pub fn train(&mut self, db: &SqliteStore) -> Result<()> {
        let items = db.item_get_rated()?;
        self.train_items(&items);
        info!("Classifier trained on {} rated items", items.len());
        Ok(())
    }

    pub fn train_items(&mut self, items: &[Item]) {
        self.models.values_mut().for_each(Model::reset);
        for item in items {
            if let Some(rating) = item.rating {
                self.learn(item, Verdict::from_rating(rating));
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        for (lang, model) in &self.models {
            model.save(&model_path(&self.dir, lang))?;
        }
        Ok(())
    }

    pub fn learn(&mut self, item: &Item, verdict: Verdict) {
        let (lang, text) = self.detector.detect_item(item);
        if let Some(model) = self.model_mut(&lang) {
            model.learn(verdict.as_str(), &text);
        }
    }

    pub fn unlearn(&mut self, item: &Item, verdict: Verdict) {
        let (lang, text) = self.detector.detect_item(item);
        if let Some(model) = self.model_mut(&lang) {
            model.forget(verdict.as_str(), &text);
        }
    }

    /// Rates `item`. `None` if the model for its language is untrained.
    pub fn classify(&self, item: &Item) -> Option<(Verdict, f64)> {
        let (lang, text) = self.detector.detect_item(item);
        let model = self
            .models
            .get(&lang)
            .filter(|m| !m.is_empty())
            .or_else(|| self.models.get(self.detector.default_language()))?;
        let (class, p) = model.classify(&text)?;
        debug!("Item {} ({}) is {} ({:.2})", item.id, lang, class, p);
        Verdict::from_class(&class).map(|v| (v, p))
    }

    fn model_mut(&mut self, lang: &str) -> Option<&mut NaiveBayes> {
        let key = if self.models.contains_key(lang) {
            lang.to_string()
        } else {
            self.detector.default_language().to_string()
        };
        self.models.get_mut(&key)
    }
}

fn model_path(dir: &Path, lang: &str) -> PathBuf {
    dir.join(lang).join(MODEL_FILE)
}
