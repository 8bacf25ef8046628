use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub homepage: String,
    pub interval: Duration,
    pub last_update: DateTime<Utc>,
    pub active: bool,
}

impl Feed {
    pub fn new(name: impl Into<String>, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            id: 0,
            name: name.into(),
            url: url.into(),
            homepage: String::new(),
            interval,
            last_update: DateTime::<Utc>::default(),
            active: true,
        }
    }

    pub fn display_title(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }

    /// Point in time at which the feed should be refreshed next.
    pub fn next(&self) -> DateTime<Utc> {
        let interval = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX);
        self.last_update
            .checked_add_signed(interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_due(&self) -> bool {
        self.is_due_at(Utc::now())
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.next() <= now
    }
}
