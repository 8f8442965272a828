//! Location slots: the fixed, ordered catalog of places an officer can be
//! posted to on the dispatch grid.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a location slot (e.g. `"North Gate"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotName(String);

impl SlotName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlotName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Ordered, duplicate-free list of slot names known ahead of time.
///
/// Catalog order is display order. It is also the search order used by
/// [`match_address`](SlotCatalog::match_address).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotCatalog {
    names: Vec<SlotName>,
}

impl SlotCatalog {
    /// Build a catalog, keeping the first occurrence of any repeated name.
    /// Empty names are dropped: they would match every address.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SlotName>,
    {
        let mut catalog = Self::default();
        for name in names {
            let name = name.into();
            if name.as_str().is_empty() || catalog.names.contains(&name) {
                continue;
            }
            catalog.names.push(name);
        }
        catalog
    }

    pub fn contains(&self, name: &SlotName) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotName> {
        self.names.iter()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// First slot (in catalog order) whose name occurs in `address`.
    ///
    /// Plain case-sensitive substring test, no geocoding: `"123 North Gate Rd"`
    /// matches `"North Gate"`.
    pub fn match_address(&self, address: &str) -> Option<&SlotName> {
        self.names.iter().find(|name| address.contains(name.as_str()))
    }
}

impl From<String> for SlotName {
    fn from(name: String) -> Self {
        Self(name)
    }
}
