//! Suite name to bundled test folder lookup

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Maps a suite's display name to the top-level folder holding its tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderTable {
    entries: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct FolderFile {
    #[serde(default = "FolderTable::bundled")]
    folders: FolderTable,
}

impl FolderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folders shipped in the bundled tests directory.
    pub fn bundled() -> Self {
        Self::new()
            .with("Furniture Store", "the-furniture-store")
            .with("Ecommerce Store", "ecommerce-store")
    }

    /// Read the `[folders]` table of a TOML file. Other keys are ignored, so
    /// the dashboard config file can be passed as is. A file without the
    /// table gets the bundled folders, as the dashboard does.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: FolderFile = toml::from_str(&content)?;
        Ok(file.folders)
    }

    pub fn insert(&mut self, name: impl Into<String>, folder: impl Into<String>) {
        self.entries.insert(name.into(), folder.into());
    }

    pub fn with(mut self, name: impl Into<String>, folder: impl Into<String>) -> Self {
        self.insert(name, folder);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Case-insensitive exact match first, then the longest key that contains
    /// or is contained in the name.
    pub fn lookup(&self, suite_name: &str) -> Option<&str> {
        let needle = suite_name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        if let Some(folder) = self
            .entries
            .iter()
            .find(|(key, _)| key.to_lowercase() == needle)
            .map(|(_, folder)| folder.as_str())
        {
            return Some(folder);
        }

        self.entries
            .iter()
            .filter(|(key, _)| {
                let key = key.to_lowercase();
                !key.is_empty() && (key.contains(&needle) || needle.contains(&key))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(_, folder)| folder.as_str())
    }
}
