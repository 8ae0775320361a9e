//! Category registry and bitmask classification.
//!
//! The registry maps single-bit masks to category names. Classification
//! decomposes each target's bitfield against the registry and renders the
//! matching names as a space-delimited label, preserving registry order.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading the category registry.
///
/// Registry failures are fatal for a run: without it no target can be
/// classified.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("registry is empty")]
    Empty,

    #[error("category '{name}' has invalid bit value {bit:#x}: must be a nonzero power of two")]
    InvalidBit { name: String, bit: u64 },

    #[error("duplicate category name: {0}")]
    DuplicateName(String),
}

/// One registry entry as stored in a YAML registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CategoryEntry {
    name: String,
    bit: u64,
}

/// Immutable mapping between category names and their single-bit masks,
/// kept as two aligned arrays. Loaded once per run.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    names: Vec<String>,
    bits: Vec<u64>,
}

/// Built-in survey target categories: (name, bit position).
const SURVEY_CATEGORIES: [(&str, u32); 14] = [
    ("LRG", 0),
    ("ELG", 1),
    ("QSO", 2),
    ("LRG_NORTH", 8),
    ("ELG_NORTH", 9),
    ("QSO_NORTH", 10),
    ("LRG_SOUTH", 16),
    ("ELG_SOUTH", 17),
    ("QSO_SOUTH", 18),
    ("SKY", 32),
    ("STD_FAINT", 33),
    ("STD_BRIGHT", 35),
    ("BGS_ANY", 60),
    ("MWS_ANY", 61),
];

impl CategoryRegistry {
    /// The compiled-in survey registry.
    pub fn survey_default() -> Self {
        let entries = SURVEY_CATEGORIES
            .iter()
            .map(|&(name, pos)| (name.to_string(), 1u64 << pos))
            .collect();
        // The built-in table is validated by construction.
        Self::from_entries(entries).unwrap()
    }

    /// Build a registry from (name, bit) pairs, validating each entry.
    pub fn from_entries(entries: Vec<(String, u64)>) -> Result<Self, RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut names = Vec::with_capacity(entries.len());
        let mut bits = Vec::with_capacity(entries.len());

        for (name, bit) in entries {
            if bit == 0 || !bit.is_power_of_two() {
                return Err(RegistryError::InvalidBit { name, bit });
            }
            if names.contains(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            names.push(name);
            bits.push(bit);
        }

        Ok(Self { names, bits })
    }

    /// Load a registry from a YAML file: a list of `{name, bit}` entries.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<CategoryEntry> = serde_yaml::from_str(&content)?;
        Self::from_entries(entries.into_iter().map(|e| (e.name, e.bit)).collect())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn bits(&self) -> &[u64] {
        &self.bits
    }

    /// Iterate (name, bit) pairs in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.bits.iter().copied())
    }

    /// Decode one bitfield into its space-delimited category label.
    ///
    /// Names appear in registry order. A bitfield matching no entry yields
    /// the empty string.
    pub fn label(&self, bits: u64) -> String {
        let matched: Vec<&str> = self
            .iter()
            .filter_map(|(name, bit)| (bits & bit != 0).then_some(name))
            .collect();
        matched.join(" ")
    }

    /// Decode a batch of bitfields.
    pub fn label_all(&self, ids: &[u64]) -> Vec<String> {
        ids.iter().map(|&bits| self.label(bits)).collect()
    }
}
