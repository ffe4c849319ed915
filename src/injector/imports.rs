//! Import reconciliation.
//!
//! Runs once per file after all advice: collapses duplicate import specs, then adds the
//! imports injected code needs in a single instrument block after the last import
//! declaration (or the package clause). Existing specs are never rewritten in place.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use tree_sitter::Node;

use super::references::ReferenceMap;
use super::rewrite::{Bias, Rewriter};
use crate::ast::decorations::Marker;
use crate::ast::tree_methods::{
    find_child_by_kind, find_children_by_kind, import_specs, is_first_on_line, line_end,
    line_start, quote, rest_of_line_is_trivia, unquote,
};
use crate::ast::ParsedFile;
use crate::typing::Importer;

/// An import spec present in the source.
#[derive(Debug, Clone)]
pub(crate) struct ExistingImport<'t> {
    pub node: Node<'t>,
    pub declaration: Node<'t>,
    pub path: String,
    pub alias: Option<String>,
    pub local_name: String,
}

/// Import specs of `file` in document order, with their local names.
pub(crate) fn existing_imports<'t>(
    file: &'t ParsedFile,
    importer: &Importer,
) -> crate::error::Result<Vec<ExistingImport<'t>>> {
    let mut imports = Vec::new();
    for declaration in find_children_by_kind(&file.root(), "import_declaration") {
        for spec in import_specs(&declaration) {
            let Some(path_node) = spec.child_by_field_name("path") else {
                continue;
            };
            let path = unquote(file.text(&path_node)).to_string();
            let alias = spec
                .child_by_field_name("name")
                .map(|n| file.text(&n).to_string());
            let local_name = match &alias {
                Some(alias) => alias.clone(),
                None => importer.package_name(&path)?,
            };
            imports.push(ExistingImport {
                node: spec,
                declaration,
                path,
                alias,
                local_name,
            });
        }
    }
    Ok(imports)
}

/// Reconcile the imports of one file. Errors are plain messages; the caller attaches
/// the file name.
pub(crate) fn reconcile<'t>(
    file: &'t ParsedFile,
    references: &ReferenceMap,
    importer: &Importer,
    rewriter: &mut Rewriter<'t>,
) -> crate::error::Result<Result<usize, String>> {
    let existing = existing_imports(file, importer)?;
    collapse_duplicates(file, &existing, rewriter);

    let requests = effective_requests(references);
    let mut specs = Vec::new();
    for (path, alias) in requests {
        if is_satisfied(&existing, path, alias) {
            continue;
        }
        if let Some(clash) = existing
            .iter()
            .find(|e| alias != "_" && e.local_name == alias && e.path != path)
        {
            return Ok(Err(format!(
                "injected import {path:?} needs the name {alias}, which already refers to {:?}",
                clash.path
            )));
        }
        let declared = importer
            .import(path)?
            .and_then(|info| info.package_name.clone());
        let spec = if declared.as_deref() == Some(alias) {
            quote(path)
        } else {
            format!("{alias} {}", quote(path))
        };
        specs.push(spec);
    }
    let keep_alive: Vec<&str> = references.keep_alive_expressions().collect();
    if specs.is_empty() && keep_alive.is_empty() {
        return Ok(Ok(0));
    }

    let mut block = format!("{}\n", Marker::StartInstrument.comment());
    if !specs.is_empty() {
        block.push_str("import (\n");
        for spec in &specs {
            block.push_str(&format!("\t{spec}\n"));
        }
        block.push_str(")\n");
    }
    for expression in &keep_alive {
        block.push_str(&format!("var _ = {expression}\n"));
    }
    block.push_str(&format!("{}\n", Marker::EndInstrument.comment()));

    let source = file.source.as_str();
    let root = file.root();
    let anchor = find_children_by_kind(&root, "import_declaration")
        .last()
        .copied()
        .or_else(|| find_child_by_kind(&root, "package_clause"));
    let Some(anchor) = anchor else {
        return Ok(Err("file has no package clause".to_string()));
    };
    let end = line_end(source, anchor.end_byte());
    if end >= source.len() {
        rewriter.insert(source.len(), format!("\n{block}"), Bias::Left);
    } else {
        rewriter.insert(end + 1, block, Bias::Left);
    }
    debug!(
        "{}: added {} import(s), {} keep-alive reference(s)",
        file.name(),
        specs.len(),
        keep_alive.len()
    );
    Ok(Ok(specs.len()))
}

/// Requested `(path, alias)` pairs; a blank request is dropped when the same path is
/// also requested under a name.
fn effective_requests(references: &ReferenceMap) -> Vec<(&str, &str)> {
    let requests = references.imports();
    let named: BTreeSet<&str> = requests
        .iter()
        .filter(|(_, alias)| *alias != "_")
        .map(|(path, _)| *path)
        .collect();
    requests
        .into_iter()
        .filter(|(path, alias)| *alias != "_" || !named.contains(path))
        .collect()
}

fn is_satisfied(existing: &[ExistingImport], path: &str, alias: &str) -> bool {
    existing
        .iter()
        .any(|e| e.path == path && (alias == "_" || e.local_name == alias))
}

/// Delete exact duplicates of `(path, local name)`, keeping the first spec that names its
/// alias explicitly. Declarations left empty are removed whole.
fn collapse_duplicates<'t>(file: &'t ParsedFile, existing: &[ExistingImport<'t>], rewriter: &mut Rewriter<'t>) {
    let mut groups: BTreeMap<(&str, &str), Vec<&ExistingImport>> = BTreeMap::new();
    for import in existing {
        groups
            .entry((import.path.as_str(), import.local_name.as_str()))
            .or_default()
            .push(import);
    }

    let mut removed: Vec<&ExistingImport> = Vec::new();
    for specs in groups.values().filter(|specs| specs.len() > 1) {
        let keep = specs
            .iter()
            .position(|s| s.alias.is_some())
            .unwrap_or(0);
        removed.extend(
            specs
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != keep)
                .map(|(_, s)| *s),
        );
    }

    let source = file.source.as_str();
    for declaration in find_children_by_kind(&file.root(), "import_declaration") {
        let specs = import_specs(&declaration);
        let doomed: Vec<&&ExistingImport> = removed
            .iter()
            .filter(|r| r.declaration.id() == declaration.id())
            .collect();
        if specs.len() == doomed.len() {
            delete_lines(source, &declaration, rewriter);
            continue;
        }
        for import in doomed {
            delete_lines(source, &import.node, rewriter);
        }
    }
    if !removed.is_empty() {
        debug!("{}: collapsed {} duplicate import(s)", file.name(), removed.len());
    }
}

/// Delete `node`, taking its whole line when nothing else shares it.
fn delete_lines(source: &str, node: &Node, rewriter: &mut Rewriter) {
    let start = node.start_byte();
    let end = node.end_byte();
    if is_first_on_line(source, start) && rest_of_line_is_trivia(source, end) {
        let line_end = line_end(source, end);
        rewriter.delete(line_start(source, start)..(line_end + 1).min(source.len()));
    } else {
        rewriter.delete(start..end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_file;
    use crate::cancel::Cancellation;
    use crate::typing::NoArchives;
    use dashmap::DashMap;
    use std::path::Path;

    fn reconcile_text(source: &str, references: &ReferenceMap) -> Result<String, String> {
        let file = parse_file(Path::new("a.go"), source.as_bytes()).unwrap();
        let cache = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&NoArchives, &cache, &cancel);
        let mut rewriter = Rewriter::new(&file.source);
        reconcile(&file, references, &importer, &mut rewriter).unwrap()?;
        Ok(rewriter.render().unwrap().text)
    }

    #[test]
    fn test_adds_missing_imports_in_one_block() {
        let mut references = ReferenceMap::new();
        references.add_import("github.com/weaver-go/tool", "tool");
        references.add_import("net/http", "http");
        references.add_import("net/http/pprof", "_");
        let out = reconcile_text(
            "package main\n\nimport \"net/http\"\n\nfunc main() {}\n",
            &references,
        )
        .unwrap();
        assert_eq!(
            out,
            "package main\n\nimport \"net/http\"\n//tool:startinstrument\nimport (\n\
             \ttool \"github.com/weaver-go/tool\"\n\t_ \"net/http/pprof\"\n)\n\
             //tool:endinstrument\n\nfunc main() {}\n"
        );
    }

    #[test]
    fn test_no_imports_anchor_on_package_clause() {
        let mut references = ReferenceMap::new();
        references.add_import("context", "context");
        references.keep_alive("sql.Open".to_string());
        let out = reconcile_text("package app\n\nvar x = 1\n", &references).unwrap();
        assert_eq!(
            out,
            "package app\n//tool:startinstrument\nimport (\n\tcontext \"context\"\n)\n\
             var _ = sql.Open\n//tool:endinstrument\n\nvar x = 1\n"
        );
    }

    #[test]
    fn test_blank_request_dropped_next_to_named_one() {
        let mut references = ReferenceMap::new();
        references.add_import("example.com/x", "_");
        references.add_import("example.com/x", "x");
        assert_eq!(effective_requests(&references), vec![("example.com/x", "x")]);
    }

    #[test]
    fn test_alias_conflict_is_reported() {
        let mut references = ReferenceMap::new();
        references.add_import("github.com/weaver-go/tool", "tool");
        let err = reconcile_text(
            "package app\n\nimport tool \"example.com/other/tool\"\n",
            &references,
        )
        .unwrap_err();
        assert!(err.contains("example.com/other/tool"));
    }

    #[test]
    fn test_duplicates_collapse_to_aliased_spec() {
        let source = "package app\n\nimport (\n\t\"fmt\"\n\tfmt \"fmt\"\n\t\"os\"\n)\n\nimport \"os\"\n";
        let out = reconcile_text(source, &ReferenceMap::new()).unwrap();
        assert_eq!(out, "package app\n\nimport (\n\tfmt \"fmt\"\n\t\"os\"\n)\n\n");
    }
}
