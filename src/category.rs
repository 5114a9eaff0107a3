// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replicated entity.
//!
//! A [`Category`] is hydrated from the lookup gateway and written to the
//! persistence gateway as a whole. Validation collects every problem before
//! reporting, so a rejected save lists all of them at once.

use crate::error::{ReplicatorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Category {
    /// Build a category from all of its fields.
    pub fn with(
        id: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        active: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description,
            active,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    /// An active category stamped with the current time.
    pub fn active_now(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::with(id, name, None, true, now, now, None)
    }

    /// Validate the invariants that must hold before any write.
    ///
    /// Whitespace-only identifiers and names count as empty.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() {
            errors.push("'id' should not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("'name' should not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReplicatorError::Validation { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movies() -> Category {
        Category::with(
            "0b1c2d",
            "Movies",
            Some("Some description".to_string()),
            true,
            Utc::now(),
            Utc::now(),
            None,
        )
    }

    #[test]
    fn test_valid_category_passes() {
        assert!(movies().validate().is_ok());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let mut category = movies();
        category.name = " ".to_string();

        match category.validate() {
            Err(ReplicatorError::Validation { errors }) => {
                assert_eq!(errors, vec!["'name' should not be empty".to_string()]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_id_is_rejected() {
        let mut category = movies();
        category.id = String::new();

        match category.validate() {
            Err(ReplicatorError::Validation { errors }) => {
                assert_eq!(errors, vec!["'id' should not be empty".to_string()]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_all_errors_are_collected() {
        let category = Category::active_now("", "");
        match category.validate() {
            Err(ReplicatorError::Validation { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_json_shape() {
        let category = Category::active_now("abc", "Movies");
        let json = serde_json::to_value(&category).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["name"], "Movies");
        assert!(json.get("description").is_none());
        assert!(json.get("deleted_at").is_none());

        let parsed: Category = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, category);
    }
}
