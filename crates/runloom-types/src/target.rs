//! Function catalog: version metadata for step targets.
//!
//! Step targets are identified by a base name plus a numeric version
//! (`tasks.create@2`). The catalog records each function's known versions
//! and schema hashes so the engine can stamp unqualified names at
//! definition time and detect contract drift across replay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Separator between a target's base name and its version.
pub const VERSION_SEPARATOR: char = '@';

/// Split a target name into base name and version, if qualified.
pub fn split_versioned(target: &str) -> (&str, Option<u32>) {
    match target.rsplit_once(VERSION_SEPARATOR) {
        Some((base, v)) => match v.parse() {
            Ok(version) => (base, Some(version)),
            Err(_) => (target, None),
        },
        None => (target, None),
    }
}

// ---------------------------------------------------------------------------
// FunctionMetadata
// ---------------------------------------------------------------------------

/// Metadata for one version of a target function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    /// Base name, without version qualifier.
    pub name: String,
    /// Numeric version.
    pub version: u32,
    /// Content hash of the function's input schema.
    #[serde(default)]
    pub input_schema_hash: String,
    /// Content hash of the function's output schema.
    #[serde(default)]
    pub output_schema_hash: String,
}

impl FunctionMetadata {
    pub fn versioned_name(&self) -> String {
        format!("{}{}{}", self.name, VERSION_SEPARATOR, self.version)
    }
}

// ---------------------------------------------------------------------------
// FunctionCatalog
// ---------------------------------------------------------------------------

/// All known target functions, keyed by base name with ordered versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCatalog {
    functions: BTreeMap<String, BTreeMap<u32, FunctionMetadata>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metadata for one function version (replaces any existing
    /// entry for the same name and version).
    pub fn insert(&mut self, meta: FunctionMetadata) {
        self.functions
            .entry(meta.name.clone())
            .or_default()
            .insert(meta.version, meta);
    }

    /// Metadata for an exact version of a base name.
    pub fn get(&self, name: &str, version: u32) -> Option<&FunctionMetadata> {
        self.functions.get(name)?.get(&version)
    }

    /// Metadata for the highest known version of a base name.
    pub fn latest(&self, name: &str) -> Option<&FunctionMetadata> {
        self.functions.get(name)?.values().next_back()
    }

    /// Resolve metadata for a possibly version-qualified target name.
    pub fn resolve(&self, target: &str) -> Option<&FunctionMetadata> {
        let (base, version) = split_versioned(target);
        match version {
            Some(v) => self.get(base, v),
            None => self.latest(base),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, version: u32) -> FunctionMetadata {
        FunctionMetadata {
            name: name.to_string(),
            version,
            input_schema_hash: format!("in-{version}"),
            output_schema_hash: format!("out-{version}"),
        }
    }

    #[test]
    fn split_versioned_forms() {
        assert_eq!(split_versioned("tasks.create@2"), ("tasks.create", Some(2)));
        assert_eq!(split_versioned("tasks.create"), ("tasks.create", None));
        // Non-numeric suffix is not a version qualifier.
        assert_eq!(split_versioned("user@example"), ("user@example", None));
    }

    #[test]
    fn latest_picks_highest_version() {
        let mut catalog = FunctionCatalog::new();
        catalog.insert(meta("tasks.create", 1));
        catalog.insert(meta("tasks.create", 3));
        catalog.insert(meta("tasks.create", 2));

        assert_eq!(catalog.latest("tasks.create").unwrap().version, 3);
        assert!(catalog.latest("missing").is_none());
    }

    #[test]
    fn resolve_qualified_and_bare() {
        let mut catalog = FunctionCatalog::new();
        catalog.insert(meta("tasks.create", 1));
        catalog.insert(meta("tasks.create", 2));

        assert_eq!(catalog.resolve("tasks.create@1").unwrap().version, 1);
        assert_eq!(catalog.resolve("tasks.create").unwrap().version, 2);
        assert!(catalog.resolve("tasks.create@9").is_none());
    }

    #[test]
    fn versioned_name_format() {
        assert_eq!(meta("notify.email", 4).versioned_name(), "notify.email@4");
    }
}
