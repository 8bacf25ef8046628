use serde::{Deserialize, Serialize};

/// A label that can be attached to items. Tags may have a parent, so they
/// form a tree; `level` and `full_name` are derived from that tree when a
/// tag is loaded from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub parent: Option<i64>,
    pub level: i64,
    pub full_name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: 0,
            full_name: name.clone(),
            name,
            description: String::new(),
            parent: None,
            level: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
