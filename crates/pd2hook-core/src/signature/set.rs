use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{Pattern, SignatureRegistry};
use crate::error::Result;
use crate::symbol::AddressSlot;

/// A named signature as stored in a definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDef {
    pub name: String,
    /// IDA-style pattern, e.g. `"55 8B EC ?? ?? 83"`
    pub pattern: String,
    #[serde(default)]
    pub offset: isize,
}

impl SignatureDef {
    pub fn parse(&self) -> Result<Pattern> {
        self.pattern.parse()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureSet {
    #[serde(default)]
    pub version: String,
    pub entries: Vec<SignatureDef>,
}

impl SignatureSet {
    pub fn entry(&self, name: &str) -> Option<&SignatureDef> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Register every entry with `registry` using untyped address slots.
    ///
    /// Slots are returned in entry order. Stops at the first malformed pattern.
    pub fn register_all(&self, registry: &SignatureRegistry) -> Result<Vec<Arc<AddressSlot>>> {
        let mut slots = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let slot = Arc::new(AddressSlot::new(entry.name.clone()));
            registry.register(
                entry.name.clone(),
                Arc::clone(&slot),
                entry.parse()?,
                entry.offset,
            )?;
            slots.push(slot);
        }
        Ok(slots)
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(signatures)?;
    fs::write(path, content)?;
    Ok(())
}
