//! Tag suggestions learned from the tags users attached to items.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::app::Result;
use crate::bayes::{Model, NaiveBayes};
use crate::domain::{Item, Tag};
use crate::language::LanguageDetector;
use crate::store::SqliteStore;

const MODEL_FILE: &str = "model.json";

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedTag {
    pub tag: Tag,
    /// Posterior probability in percent.
    pub score: f64,
}

pub struct Advisor {
    dir: PathBuf,
    detector: Arc<LanguageDetector>,
    models: HashMap<String, NaiveBayes>,
    tags: HashMap<String, Tag>,
}

impl Advisor {
    pub fn open(dir: impl Into<PathBuf>, detector: Arc<LanguageDetector>, db: &SqliteStore) -> Result<Self> {
        let dir = dir.into();
        let mut models = HashMap::new();
        for lang in detector.languages() {
            models.insert(lang.to_string(), NaiveBayes::load(&model_path(&dir, lang))?);
        }
        let mut adv = Self {
            dir,
            detector,
            models,
            tags: HashMap::new(),
        };
        adv.load_tags(db)?;
        Ok(adv)
    }

    fn load_tags(&mut self, db: &SqliteStore) -> Result<()> {
        self.tags = db
            .tag_get_all()?
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Ok(())
    }

    /// Reloads the tag catalog and rebuilds the models from all tagged items.
    pub fn train(&mut self, db: &SqliteStore) -> Result<()> {
        self.load_tags(db)?;
        let items = db.item_get_tagged()?;
        self.train_items(&items);
        info!("Advisor trained on {} tagged items", items.len());
        Ok(())
    }

    pub fn train_items(&mut self, items: &[Item]) {
        self.models.values_mut().for_each(Model::reset);
        for item in items {
            if item.tags.is_empty() {
                continue;
            }
            let (lang, text) = self.detector.detect_item(item);
            let Some(model) = route_mut(&mut self.models, &lang, self.detector.default_language()) else {
                continue;
            };
            for tag in &item.tags {
                model.learn(&tag.name, &text);
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        for (lang, model) in &self.models {
            model.save(&model_path(&self.dir, lang))?;
        }
        Ok(())
    }

    pub fn learn(&mut self, item: &Item, tag: &Tag) {
        let (lang, text) = self.detector.detect_item(item);
        if let Some(model) = route_mut(&mut self.models, &lang, self.detector.default_language()) {
            model.learn(&tag.name, &text);
        }
    }

    pub fn unlearn(&mut self, item: &Item, tag: &Tag) {
        let (lang, text) = self.detector.detect_item(item);
        if let Some(model) = route_mut(&mut self.models, &lang, self.detector.default_language()) {
            model.forget(&tag.name, &text);
        }
    }

    /// Up to `n` tags for `item`, best first.
    pub fn suggest(&self, item: &Item, n: usize) -> Vec<SuggestedTag> {
        let (lang, text) = self.detector.detect_item(item);
        let Some(model) = self
            .models
            .get(&lang)
            .filter(|m| !m.is_empty())
            .or_else(|| self.models.get(self.detector.default_language()))
        else {
            return Vec::new();
        };

        let mut suggestions: Vec<SuggestedTag> = model
            .score(&text)
            .into_iter()
            .filter_map(|(class, p)| match self.tags.get(&class) {
                Some(tag) => Some(SuggestedTag {
                    tag: tag.clone(),
                    score: p * 100.0,
                }),
                None => {
                    error!("Advisor suggests unknown tag {:?} for item {}", class, item.id);
                    None
                }
            })
            .collect();
        suggestions.truncate(n.min(suggestions.len()));
        suggestions
    }
}

fn route_mut<'a>(
    models: &'a mut HashMap<String, NaiveBayes>,
    lang: &str,
    default: &str,
) -> Option<&'a mut NaiveBayes> {
    if models.contains_key(lang) {
        models.get_mut(lang)
    } else {
        models.get_mut(default)
    }
}

fn model_path(dir: &Path, lang: &str) -> PathBuf {
    dir.join(lang).join(MODEL_FILE)
}
