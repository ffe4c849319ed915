//! Removing woven code.
//!
//! Markers are paired in one forward scan. Instrument blocks are deleted whole and wrap
//! markers are deleted in the layout they were inserted with. Inside a wrap-marker pair,
//! each advice is undone where it was applied: one template layer is peeled off each
//! call argument or value it matches, retargeted calls get their original package back,
//! and injected initializers are dropped. Anything else between the markers is the
//! user's and is left as written.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};
use tree_sitter::Node;

use super::rewrite::apply_back_to_front;
use crate::aspect::join_point::single_value;
use crate::aspect::template::{requalify, Template, WrapPattern};
use crate::aspect::{Aspect, Revert, WrapSite};
use crate::ast::decorations::{Marker, Trivia};
use crate::ast::tree_methods::{
    find_child_by_kind, find_children_by_kind, find_nodes_by_kind, import_specs, line_end,
    line_of, line_start, literal_inner, significant_children, skip_blanks, unquote,
};
use crate::ast::{parse_file, ParsedFile};
use crate::error::Result;
use crate::typing::guess_package_name;

const MAX_PASSES: usize = 16;

/// Remove everything weaving added to `source`.
pub fn uninstrument_text(path: &Path, source: &str, aspects: &[Aspect]) -> Result<String> {
    let mut reverts: Vec<Revert> = Vec::new();
    for revert in aspects
        .iter()
        .flat_map(|aspect| aspect.advice.iter())
        .filter_map(|advice| advice.revert())
    {
        if !reverts.contains(&revert) {
            reverts.push(revert);
        }
    }

    // local names of injected imports, read from the first pass's instrument blocks
    let mut injected = BTreeMap::new();
    let mut current = source.to_string();
    for pass in 0..MAX_PASSES {
        match uninstrument_pass(path, &current, &reverts, &mut injected)? {
            Some(next) => current = next,
            None => {
                debug!("{}: uninstrumented in {pass} pass(es)", path.display());
                break;
            }
        }
    }
    Ok(current)
}

/// One pass; `None` when nothing was left to remove.
fn uninstrument_pass(
    path: &Path,
    text: &str,
    reverts: &[Revert],
    injected: &mut BTreeMap<String, String>,
) -> Result<Option<String>> {
    let file = parse_file(path, text.as_bytes())?;
    // a leading //line directive is not part of the parsed source
    let prefix = &text[..text.len() - file.source.len()];
    let source = file.source.as_str();

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    let mut blocks = Vec::new();
    for (start, end) in pair_markers(&file, Marker::StartInstrument) {
        let block = instrument_block_range(source, start, end);
        blocks.push(block.clone());
        edits.push((block, String::new()));
    }
    for (path, local) in injected_imports(&file, &blocks) {
        injected.entry(path).or_insert(local);
    }

    let mut statements = Vec::new();
    for (start, end) in pair_markers(&file, Marker::StartWrap) {
        let opening = wrap_start_range(source, start);
        let closing = wrap_end_range(source, end);
        if opening.end <= closing.start {
            statements.push(opening.end..closing.start);
        }
        edits.push((opening, String::new()));
        edits.push((closing, String::new()));
    }
    edits.extend(revert_statements(&file, &statements, reverts, injected));

    if edits.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("{prefix}{}", apply_back_to_front(source, edits))))
}

/// Start/end pairs of one marker kind, matched innermost first.
fn pair_markers(file: &ParsedFile, opening: Marker) -> Vec<(&Trivia, &Trivia)> {
    let Some(closing) = opening.partner() else {
        return Vec::new();
    };
    let mut open: Vec<&Trivia> = Vec::new();
    let mut pairs = Vec::new();
    for trivia in file.decorations.markers() {
        match trivia.marker {
            Some(m) if m == opening => open.push(trivia),
            Some(m) if m == closing => match open.pop() {
                Some(start) => pairs.push((start, trivia)),
                None => warn!(
                    "{}:{}: {} without a start marker",
                    file.name(),
                    line_of(&file.source, trivia.start) + 1,
                    closing.comment()
                ),
            },
            _ => {}
        }
    }
    for start in open {
        warn!(
            "{}:{}: {} is never closed",
            file.name(),
            line_of(&file.source, start.start) + 1,
            opening.comment()
        );
    }
    pairs
}

fn after_newline(source: &str, offset: usize) -> usize {
    (line_end(source, offset) + 1).min(source.len())
}

fn instrument_block_range(source: &str, start: &Trivia, end: &Trivia) -> Range<usize> {
    let to = after_newline(source, end.end);
    if start.own_line {
        line_start(source, start.start)..to
    } else if source[..start.start].ends_with(' ') {
        start.start - 1..to
    } else {
        start.start..to
    }
}

fn wrap_start_range(source: &str, start: &Trivia) -> Range<usize> {
    if start.own_line {
        line_start(source, start.start)..after_newline(source, start.end)
    } else {
        start.start..skip_blanks(source, after_newline(source, start.end))
    }
}

fn wrap_end_range(source: &str, end: &Trivia) -> Range<usize> {
    if end.own_line {
        return line_start(source, end.start).saturating_sub(1)..end.end;
    }
    let from = if source[..end.start].ends_with(' ') {
        end.start - 1
    } else {
        end.start
    };
    if source[end.end..].starts_with('\n') {
        from..end.end + 1
    } else {
        from..end.end
    }
}

/// Import path to local name for the named import specs inside instrument blocks.
fn injected_imports(file: &ParsedFile, blocks: &[Range<usize>]) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for declaration in find_children_by_kind(&file.root(), "import_declaration") {
        if !blocks.iter().any(|block| block.contains(&declaration.start_byte())) {
            continue;
        }
        for spec in import_specs(&declaration) {
            let (Some(path), Some(name)) = (
                spec.child_by_field_name("path"),
                spec.child_by_field_name("name"),
            ) else {
                continue;
            };
            names.insert(
                unquote(file.text(&path)).to_string(),
                file.text(&name).to_string(),
            );
        }
    }
    names
}

/// The template's qualifiers renamed to what weaving bound them to in this file.
struct Localized<'a> {
    injected: &'a BTreeMap<String, String>,
}

impl Localized<'_> {
    fn name<'n>(&'n self, path: &str, alias: &'n str) -> &'n str {
        self.injected.get(path).map_or(alias, String::as_str)
    }

    fn pattern(&self, template: &Template) -> Option<WrapPattern> {
        let mut pattern = template.wrap_pattern()?;
        for (alias, path) in &template.imports {
            pattern = pattern.requalify(alias, self.name(path, alias));
        }
        Some(pattern)
    }

    fn literal(&self, template: &Template) -> Option<String> {
        let mut text = template.literal()?.to_string();
        for (alias, path) in &template.imports {
            if let Some(renamed) = requalify(&text, alias, self.name(path, alias)) {
                text = renamed;
            }
        }
        Some(text)
    }
}

/// Edits undoing every applicable advice inside the wrapped `statements`.
fn revert_statements(
    file: &ParsedFile,
    statements: &[Range<usize>],
    reverts: &[Revert],
    injected: &BTreeMap<String, String>,
) -> Vec<(Range<usize>, String)> {
    if statements.is_empty() {
        return Vec::new();
    }
    let localized = Localized { injected };
    let root = file.root();
    let calls: Vec<Node> = find_nodes_by_kind(&root, "call_expression")
        .into_iter()
        .filter(|call| inside(statements, call))
        .collect();

    let mut patterns: Vec<(WrapSite, WrapPattern)> = Vec::new();
    for revert in reverts {
        if let Revert::Unwrap { site, template } = revert {
            if let Some(pattern) = localized.pattern(template) {
                patterns.push((*site, pattern));
            }
        }
    }
    let mut deleted = unwrap_sites(file, &wrap_sites(&root, &calls, statements), &patterns);
    deleted.retain(|range| !range.is_empty());
    let mut edits: Vec<(Range<usize>, String)> = deleted
        .iter()
        .map(|range| (range.clone(), String::new()))
        .collect();

    for revert in reverts {
        match *revert {
            Revert::Unwrap { .. } => {}
            Revert::Retarget { alias, from, to } => {
                let bound = localized.name(to, alias);
                let Some(original) = local_name_of(file, from) else {
                    continue;
                };
                if original == bound {
                    continue;
                }
                for call in &calls {
                    let operand = call
                        .child_by_field_name("function")
                        .filter(|f| f.kind() == "selector_expression")
                        .and_then(|f| f.child_by_field_name("operand"));
                    let Some(operand) = operand else {
                        continue;
                    };
                    let range = operand.start_byte()..operand.end_byte();
                    let taken = overlaps(&deleted, &range) || edits.iter().any(|(edit, _)| *edit == range);
                    if file.text(&operand) == bound && !taken {
                        edits.push((range, original.clone()));
                    }
                }
            }
            Revert::Unassign { template } => {
                let Some(value) = localized.literal(template) else {
                    continue;
                };
                for spec in find_nodes_by_kind(&root, "var_spec") {
                    if !inside(statements, &spec) {
                        continue;
                    }
                    let Some(initializer) = spec.child_by_field_name("value") else {
                        continue;
                    };
                    if file.text(&initializer) != value {
                        continue;
                    }
                    let declared_end = find_child_by_kind(&spec, "=")
                        .and_then(|eq| eq.prev_sibling())
                        .map(|before| before.end_byte());
                    if let Some(from) = declared_end {
                        edits.push((from..initializer.end_byte(), String::new()));
                    }
                }
            }
        }
    }
    edits
}

/// Expressions a wrapping advice may have wrapped, outermost first.
fn wrap_sites<'t>(
    root: &Node<'t>,
    calls: &[Node<'t>],
    statements: &[Range<usize>],
) -> Vec<(Node<'t>, WrapSite)> {
    let mut sites = Vec::new();
    for call in calls {
        let arguments = call
            .child_by_field_name("arguments")
            .map(|list| significant_children(&list))
            .unwrap_or_default();
        for (index, argument) in arguments.into_iter().enumerate() {
            sites.push((argument, WrapSite::CallArgument(index)));
        }
    }
    for element in find_nodes_by_kind(root, "keyed_element") {
        if let Some(value) = significant_children(&element).get(1) {
            sites.push((literal_inner(*value), WrapSite::Value));
        }
    }
    for kind in ["var_spec", "short_var_declaration"] {
        for declaration in find_nodes_by_kind(root, kind) {
            if let Some(value) = single_value(&declaration) {
                sites.push((value, WrapSite::Value));
            }
        }
    }
    sites.retain(|(node, _)| inside(statements, node));
    sites.sort_by_key(|(node, _)| (node.start_byte(), std::cmp::Reverse(node.end_byte())));
    sites
}

/// Peel template layers off each site, each template at most once per site. Returns the
/// byte ranges to delete.
fn unwrap_sites(
    file: &ParsedFile,
    sites: &[(Node, WrapSite)],
    patterns: &[(WrapSite, WrapPattern)],
) -> Vec<Range<usize>> {
    let source = file.source.as_str();
    let mut deleted: Vec<Range<usize>> = Vec::new();
    for (node, site) in sites {
        let range = node.start_byte()..node.end_byte();
        if overlaps(&deleted, &range) {
            continue;
        }
        let mut window = range.clone();
        let mut used = vec![false; patterns.len()];
        loop {
            let text = &source[window.clone()];
            let next = patterns.iter().enumerate().find_map(|(i, (applies_at, pattern))| {
                if used[i] || applies_at != site {
                    return None;
                }
                pattern.match_hole(text).map(|hole| (i, hole))
            });
            let Some((i, hole)) = next else {
                break;
            };
            used[i] = true;
            window = window.start + hole.start..window.start + hole.end;
        }
        if window != range {
            deleted.push(range.start..window.start);
            deleted.push(window.end..range.end);
        }
    }
    deleted
}

fn inside(statements: &[Range<usize>], node: &Node) -> bool {
    statements
        .iter()
        .any(|range| range.start <= node.start_byte() && node.end_byte() <= range.end)
}

fn overlaps(ranges: &[Range<usize>], range: &Range<usize>) -> bool {
    ranges
        .iter()
        .any(|other| other.start < range.end && range.start < other.end)
}

/// The name `import_path` is imported under in `file`, if it is imported.
fn local_name_of(file: &ParsedFile, import_path: &str) -> Option<String> {
    find_children_by_kind(&file.root(), "import_declaration")
        .iter()
        .flat_map(import_specs)
        .find_map(|spec| {
            let path = spec.child_by_field_name("path")?;
            if unquote(file.text(&path)) != import_path {
                return None;
            }
            Some(match spec.child_by_field_name("name") {
                Some(name) => file.text(&name).to_string(),
                None => guess_package_name(import_path),
            })
        })
}
