use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reminder to read a particular item at a later time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadLater {
    pub id: i64,
    pub item_id: i64,
    pub note: String,
    pub timestamp: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub read: bool,
}

impl ReadLater {
    /// True if the reminder is unread and its deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.read && self.deadline.is_some_and(|d| d < now)
    }
}
