//! Folders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Folder tree node. Only the parent reference is authoritative; `path` is
/// the materialized ancestor chain, recomputed for the whole subtree by the
/// catalog's single writer whenever a folder moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Materialized path, e.g. `/projects/2026/reports`
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    /// Root-level folder for a user
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: super::new_id(),
            user_id: user_id.into(),
            path: format!("/{}", name),
            name,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    /// Child of `parent`; inherits and extends its materialized path
    pub fn child_of(parent: &Folder, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: super::new_id(),
            user_id: parent.user_id.clone(),
            path: format!("{}/{}", parent.path, name),
            name,
            parent_id: Some(parent.id.clone()),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_extends_parent() {
        let root = Folder::new("u1", "projects");
        let child = Folder::child_of(&root, "2026");
        assert_eq!(root.path, "/projects");
        assert_eq!(child.path, "/projects/2026");
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
    }
}
