//! Dependencies introduced by injected code.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a newly referenced package must be made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// Resolvable at link time only; not imported in source.
    RelocationTarget,
    /// Must appear in the file's import declarations.
    ImportStatement,
}

/// Import path to reference kind, plus the aliases injected code uses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceMap {
    entries: BTreeMap<String, ReferenceKind>,
    /// Aliases requested per import path; `_` for side-effect imports.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    aliases: BTreeMap<String, BTreeSet<String>>,
    /// `pkg.Name` expressions that must stay referenced after a call was retargeted.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    keep_alive: BTreeSet<String>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an import of `path` under `alias`. Upgrades a link-time reference.
    pub fn add_import(&mut self, path: &str, alias: &str) {
        self.entries
            .insert(path.to_string(), ReferenceKind::ImportStatement);
        self.aliases
            .entry(path.to_string())
            .or_default()
            .insert(alias.to_string());
    }

    pub fn add_relocation(&mut self, path: &str) {
        self.entries
            .entry(path.to_string())
            .or_insert(ReferenceKind::RelocationTarget);
    }

    pub fn keep_alive(&mut self, expression: String) {
        self.keep_alive.insert(expression);
    }

    pub fn get(&self, path: &str) -> Option<ReferenceKind> {
        self.entries.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ReferenceKind)> {
        self.entries.iter().map(|(path, kind)| (path.as_str(), *kind))
    }

    /// `(path, alias)` pairs that must be imported, sorted.
    pub fn imports(&self) -> Vec<(&str, &str)> {
        self.aliases
            .iter()
            .flat_map(|(path, aliases)| {
                aliases
                    .iter()
                    .map(move |alias| (path.as_str(), alias.as_str()))
            })
            .collect()
    }

    pub fn keep_alive_expressions(&self) -> impl Iterator<Item = &str> {
        self.keep_alive.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.keep_alive.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Union with another file's map; an import requirement wins over a link-time one.
    pub fn merge(&mut self, other: &ReferenceMap) {
        for (path, kind) in &other.entries {
            let entry = self.entries.entry(path.clone()).or_insert(*kind);
            *entry = (*entry).max(*kind);
        }
        for (path, aliases) in &other.aliases {
            self.aliases
                .entry(path.clone())
                .or_default()
                .extend(aliases.iter().cloned());
        }
        self.keep_alive.extend(other.keep_alive.iter().cloned());
    }
}
