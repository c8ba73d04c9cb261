//! Per-viewer filter selection
//!
//! A [`FilterSet`] holds the enabled known categories. The empty set means
//! "all categories": turning the last filter off switches the viewer back to
//! receiving everything rather than nothing.
//!
//! On the wire a filter set is a map of every known category to a boolean,
//! matching the toggle buttons of the viewer page.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::errors::CategoryError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, bool>",
    into = "BTreeMap<String, bool>"
)]
pub struct FilterSet(BTreeSet<Category>);

impl FilterSet {
    /// No filters: every category is delivered
    pub fn all() -> Self {
        Self(BTreeSet::new())
    }

    /// Build from category names, rejecting any outside the known set
    pub fn from_names<I, S>(names: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|n| Category::known(n.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    /// Build from a `{category: enabled}` map
    ///
    /// Every key must be a known category, enabled or not.
    pub fn from_toggles(toggles: &BTreeMap<String, bool>) -> Result<Self, CategoryError> {
        let mut enabled = BTreeSet::new();
        for (name, on) in toggles {
            let category = Category::known(name)?;
            if *on {
                enabled.insert(category);
            }
        }
        Ok(Self(enabled))
    }

    /// Map every known category to whether it is enabled
    pub fn to_toggles(&self) -> BTreeMap<String, bool> {
        Category::all_known()
            .map(|c| {
                let on = self.0.contains(&c);
                (String::from(c), on)
            })
            .collect()
    }

    /// Copy of this set with `category` flipped
    pub fn toggled(&self, category: &Category) -> Self {
        let mut next = self.0.clone();
        if !next.remove(category) {
            next.insert(category.clone());
        }
        Self(next)
    }

    /// Whether this set selects everything (no explicit filter)
    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains(category)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.0.iter()
    }
}

impl TryFrom<BTreeMap<String, bool>> for FilterSet {
    type Error = CategoryError;

    fn try_from(value: BTreeMap<String, bool>) -> Result<Self, Self::Error> {
        Self::from_toggles(&value)
    }
}

impl From<FilterSet> for BTreeMap<String, bool> {
    fn from(set: FilterSet) -> Self {
        set.to_toggles()
    }
}
