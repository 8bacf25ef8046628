use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Tag;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub link: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub rating: Option<f64>,
    pub prefetch: bool,
    pub tags: Vec<Tag>,
}

impl Item {
    pub fn new(feed_id: i64, link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            feed_id,
            link: link.into(),
            title: title.into(),
            description: String::new(),
            timestamp: Utc::now(),
            read: false,
            rating: None,
            prefetch: false,
            tags: Vec::new(),
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }

    pub fn is_rated(&self) -> bool {
        self.rating.is_some()
    }

    pub fn has_tag(&self, tag_id: i64) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }
}
