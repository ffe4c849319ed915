// Configuration loading
//
// A document lists metadata, the documents it extends and its own aspects. Extends
// entries are either file references (resolved against the extending document's
// directory) or package import paths handed to a `PackageLocator`. Each document is
// read once per loader session; the merged aspect list is built-ins first, then every
// extended document in declaration order, then the document's own aspects.

use anyhow::{bail, Context};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::graph::ExtendsGraph;
use crate::aspect::{builtin_aspects, Aspect};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Meta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    pub meta: Meta,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub aspects: Vec<Aspect>,
}

/// Resolves a package import path to the configuration document it ships.
pub trait PackageLocator: Send + Sync {
    fn locate(&self, import_path: &str) -> anyhow::Result<PathBuf>;
}

impl<F> PackageLocator for F
where
    F: Fn(&str) -> anyhow::Result<PathBuf> + Send + Sync,
{
    fn locate(&self, import_path: &str) -> anyhow::Result<PathBuf> {
        self(import_path)
    }
}

/// Locator for sessions where package extends are not available.
pub struct NoPackages;

impl PackageLocator for NoPackages {
    fn locate(&self, import_path: &str) -> anyhow::Result<PathBuf> {
        bail!("cannot resolve configuration package {import_path:?}: no package locator")
    }
}

/// The result of loading one root document.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Every document read, in merge order.
    pub documents: Vec<(PathBuf, Meta)>,
    pub aspects: Vec<Aspect>,
}

/// Parse one document; `name` is used in error messages.
pub fn parse_document(text: &str, name: &str) -> Result<ConfigDocument> {
    let document: ConfigDocument =
        serde_json::from_str(text).with_context(|| format!("parsing {name}"))?;
    let mut seen = FxHashSet::default();
    for aspect in &document.aspects {
        if !seen.insert(aspect.id.as_str()) {
            return Err(anyhow::anyhow!("{name}: duplicate aspect id {:?}", aspect.id).into());
        }
    }
    Ok(document)
}

fn is_file_reference(entry: &str) -> bool {
    entry.ends_with(".json")
        || entry.starts_with("./")
        || entry.starts_with("../")
        || entry.starts_with('/')
}

/// One configuration-loading session. Documents shared by several `extends` lists are
/// read once.
pub struct ConfigLoader<'a> {
    locator: &'a dyn PackageLocator,
    graph: ExtendsGraph,
    loaded: FxHashSet<String>,
    include_builtins: bool,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(locator: &'a dyn PackageLocator) -> Self {
        Self {
            locator,
            graph: ExtendsGraph::new(),
            loaded: FxHashSet::default(),
            include_builtins: true,
        }
    }

    /// Leave the built-in aspects out of the merged list.
    pub fn without_builtins(mut self) -> Self {
        self.include_builtins = false;
        self
    }

    pub fn load(&mut self, root: &Path) -> Result<LoadedConfig> {
        let mut config = LoadedConfig::default();
        if self.include_builtins {
            config.aspects = builtin_aspects();
        }
        let path = canonical(root);
        self.load_document(&path, &mut config)?;
        info!(
            "loaded {} aspect(s) from {} document(s)",
            config.aspects.len(),
            config.documents.len()
        );
        Ok(config)
    }

    fn load_document(&mut self, path: &Path, config: &mut LoadedConfig) -> Result<()> {
        let id = node_id(path);
        if !self.loaded.insert(id.clone()) {
            debug!("{id} already loaded");
            return Ok(());
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {id}"))?;
        let document = parse_document(&text, &id)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        for entry in &document.extends {
            let target = if is_file_reference(entry) {
                canonical(&base.join(entry))
            } else {
                let located = self
                    .locator
                    .locate(entry)
                    .with_context(|| format!("{id}: extends {entry:?}"))?;
                canonical(&located)
            };
            self.graph.add_edge(&id, &node_id(&target))?;
            self.load_document(&target, config)?;
        }

        debug!("{id}: {} aspect(s)", document.aspects.len());
        config.documents.push((path.to_path_buf(), document.meta));
        config.aspects.extend(document.aspects);
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn node_id(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WeaverError;
    use tempfile::TempDir;

    fn document(name: &str, extends: &[&str], ids: &[&str]) -> String {
        let aspects: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id": "{id}", "join-point": {{"package-name": "main"}},
                        "advice": [{{"add-blank-import": {{"path": "example.com/{id}"}}}}]}}"#
                )
            })
            .collect();
        let extends: Vec<String> = extends.iter().map(|e| format!("{e:?}")).collect();
        format!(
            r#"{{"meta": {{"name": "{name}"}}, "extends": [{}], "aspects": [{}]}}"#,
            extends.join(", "),
            aspects.join(", ")
        )
    }

    fn ids(config: &LoadedConfig) -> Vec<&str> {
        config.aspects.iter().map(|a| a.id.as_str()).collect()
    }

    #[test]
    fn test_merge_order_follows_extends() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base.json"), document("base", &[], &["b1"])).unwrap();
        fs::write(dir.path().join("other.json"), document("other", &["./base.json"], &["o1"])).unwrap();
        fs::write(
            dir.path().join("root.json"),
            document("root", &["base.json", "other.json"], &["r1", "r2"]),
        )
        .unwrap();

        let mut loader = ConfigLoader::new(&NoPackages).without_builtins();
        let config = loader.load(&dir.path().join("root.json")).unwrap();
        // base is shared by root and other but contributes once
        assert_eq!(ids(&config), vec!["b1", "o1", "r1", "r2"]);
        assert_eq!(config.documents.len(), 3);
        assert_eq!(config.documents[2].1.name, "root");
    }

    #[test]
    fn test_builtins_come_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root.json");
        fs::write(&root, document("root", &[], &["mine"])).unwrap();

        let config = ConfigLoader::new(&NoPackages).load(&root).unwrap();
        let builtins = builtin_aspects();
        assert_eq!(config.aspects.len(), builtins.len() + 1);
        assert_eq!(config.aspects[0].id, builtins[0].id);
        assert_eq!(config.aspects.last().unwrap().id, "mine");
    }

    #[test]
    fn test_package_extends_use_the_locator() {
        let dir = TempDir::new().unwrap();
        let shipped = dir.path().join("shipped.json");
        fs::write(&shipped, document("shipped", &[], &["pkg"])).unwrap();
        let root = dir.path().join("root.json");
        fs::write(&root, document("root", &["example.com/contrib"], &[])).unwrap();

        let shipped_path = shipped.clone();
        let locator = move |import_path: &str| -> anyhow::Result<PathBuf> {
            assert_eq!(import_path, "example.com/contrib");
            Ok(shipped_path.clone())
        };
        let config = ConfigLoader::new(&locator).without_builtins().load(&root).unwrap();
        assert_eq!(ids(&config), vec!["pkg"]);

        let err = ConfigLoader::new(&NoPackages).load(&root).unwrap_err();
        assert!(matches!(err, WeaverError::Config(_)));
    }

    #[test]
    fn test_cycles_are_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), document("a", &["b.json"], &[])).unwrap();
        fs::write(dir.path().join("b.json"), document("b", &["a.json"], &[])).unwrap();

        let err = ConfigLoader::new(&NoPackages)
            .load(&dir.path().join("a.json"))
            .unwrap_err();
        let WeaverError::ConfigCycle { cycle } = err else {
            panic!("expected a cycle, got {err}");
        };
        assert_eq!(cycle.len(), 3);
        assert!(cycle[0].ends_with("a.json"));
        assert!(cycle[1].ends_with("b.json"));
        assert!(cycle[2].ends_with("a.json"));
    }

    #[test]
    fn test_document_errors() {
        let missing_meta = r#"{"aspects": []}"#;
        let err = parse_document(missing_meta, "x.json").unwrap_err().to_string();
        assert!(err.contains("parsing x.json"), "{err}");
        assert!(err.contains("line 1"), "{err}");

        let unknown = r#"{"meta": {"name": "x"}, "plugins": []}"#;
        assert!(parse_document(unknown, "x.json").is_err());

        let duplicate = document("dup", &[], &["same", "same"]);
        let err = parse_document(&duplicate, "dup.json").unwrap_err().to_string();
        assert!(err.contains("duplicate aspect id \"same\""), "{err}");
    }
}
