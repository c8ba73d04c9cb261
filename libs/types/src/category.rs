//! Taxonomic category, the pub/sub routing key
//!
//! Categories are the lower-cased iconic taxon names reported by the source.
//! Any such name routes; only the fixed enumeration in [`KNOWN_CATEGORIES`]
//! can be selected as a viewer filter.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CategoryError;

/// Categories a viewer may filter on
pub const KNOWN_CATEGORIES: [&str; 4] = ["aves", "mammalia", "insecta", "plantae"];

/// Routing key for records the source did not classify
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Prefix shared by every observation subject on the bus
pub const SUBJECT_PREFIX: &str = "observation.";

/// Lower-cased taxonomic group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Category(String);

impl Category {
    /// Normalize an upstream iconic taxon name, defaulting to `unknown`
    pub fn from_taxon(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            Some(n) if !n.is_empty() => Self(n.to_lowercase()),
            _ => Self::unknown(),
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CATEGORY.to_string())
    }

    /// Parse a client-supplied filter category
    ///
    /// Case-insensitive; rejects anything outside [`KNOWN_CATEGORIES`].
    pub fn known(name: &str) -> Result<Self, CategoryError> {
        let lowered = name.trim().to_lowercase();
        if KNOWN_CATEGORIES.contains(&lowered.as_str()) {
            Ok(Self(lowered))
        } else {
            Err(CategoryError::Unknown {
                name: name.to_string(),
            })
        }
    }

    /// Every filterable category, in enumeration order
    pub fn all_known() -> impl Iterator<Item = Category> {
        KNOWN_CATEGORIES.iter().map(|c| Category(c.to_string()))
    }

    pub fn is_known(&self) -> bool {
        KNOWN_CATEGORIES.contains(&self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bus subject for this category: `observation.<category>`
    pub fn subject(&self) -> String {
        format!("{}{}", SUBJECT_PREFIX, self.0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Self::from_taxon(Some(&value))
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}
