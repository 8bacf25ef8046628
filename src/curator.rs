use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::advisor::{Advisor, SuggestedTag};
use crate::app::Result;
use crate::classifier::{Classifier, Verdict};
use crate::domain::{Item, Tag};
use crate::language::LanguageDetector;
use crate::store::SqliteStore;

struct Models {
    classifier: Classifier,
    advisor: Advisor,
}

/// Shared access to the rating classifier and the tag advisor.
///
/// Readers never wait for training: new models are built and saved on the
/// side and swapped in at the end.
pub struct Curator {
    classifier_dir: PathBuf,
    advisor_dir: PathBuf,
    detector: Arc<LanguageDetector>,
    models: RwLock<Models>,
}

impl Curator {
    pub fn open(
        classifier_dir: impl Into<PathBuf>,
        advisor_dir: impl Into<PathBuf>,
        detector: Arc<LanguageDetector>,
        db: &SqliteStore,
    ) -> Result<Self> {
        let classifier_dir = classifier_dir.into();
        let advisor_dir = advisor_dir.into();
        let models = Models {
            classifier: Classifier::open(classifier_dir.clone(), detector.clone())?,
            advisor: Advisor::open(advisor_dir.clone(), detector.clone(), db)?,
        };
        Ok(Self {
            classifier_dir,
            advisor_dir,
            detector,
            models: RwLock::new(models),
        })
    }

    pub fn rate(&self, item: &Item) -> Option<(Verdict, f64)> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models.classifier.classify(item)
    }

    pub fn suggest(&self, item: &Item, n: usize) -> Vec<SuggestedTag> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        models.advisor.suggest(item, n)
    }

    pub fn learn_rating(&self, item: &Item, verdict: Verdict) {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        models.classifier.learn(item, verdict);
    }

    pub fn learn_tag(&self, item: &Item, tag: &Tag) {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        models.advisor.learn(item, tag);
    }

    /// Trains both models from `db`, saves them and replaces the current
    /// ones.
    pub fn retrain(&self, db: &SqliteStore) -> Result<()> {
        let mut classifier = Classifier::open(self.classifier_dir.clone(), self.detector.clone())?;
        classifier.train(db)?;
        classifier.save()?;

        let mut advisor = Advisor::open(self.advisor_dir.clone(), self.detector.clone(), db)?;
        advisor.train(db)?;
        advisor.save()?;

        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        *models = Models {
            classifier,
            advisor,
        };
        info!("Swapped in retrained models");
        Ok(())
    }
}
