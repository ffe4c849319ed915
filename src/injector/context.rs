//! Node chain and per-file matching state.
//!
//! `MatchContext` is the read-only view join points evaluate; `AdviceContext` adds the
//! per-file accumulators advice writes to. Both are created fresh for each file.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tracing::debug;
use tree_sitter::Node;

use super::references::ReferenceMap;
use super::rewrite::{Bias, Rewriter};
use crate::aspect::template::{requalify, Template};
use crate::ast::decorations::Marker;
use crate::ast::tree_methods::{
    find_child_by_kind, is_first_on_line, line_end, line_indent, line_start,
    rest_of_line_is_trivia,
};
use crate::ast::ParsedFile;
use crate::language::is_statement_level;
use crate::typing::{FileTypes, PackageTypes};
use crate::version::GoVersion;

/// Facts about the package being woven, shared by all of its files.
#[derive(Debug, Clone, Default)]
pub struct PackageInfo {
    pub import_path: String,
    pub package_name: String,
    pub test_main: bool,
    /// Per-root configuration, e.g. `httpmode = wrap`.
    pub settings: BTreeMap<String, String>,
}

#[derive(Clone, Copy)]
pub struct MatchContext<'a, 't> {
    pub node: Node<'t>,
    /// Ancestors of `node`, root first.
    pub chain: &'a [Node<'t>],
    pub file: &'t ParsedFile,
    pub file_index: usize,
    pub types: &'a PackageTypes,
    pub package: &'a PackageInfo,
}

impl<'a, 't> MatchContext<'a, 't> {
    pub fn text(&self, node: &Node) -> &'t str {
        self.file.text(node)
    }

    pub fn file_types(&self) -> Option<&'a FileTypes> {
        self.types.file(self.file_index)
    }

    pub fn parent(&self) -> Option<Node<'t>> {
        self.chain.last().copied()
    }

    /// Nearest statement or top-level declaration containing `node` (itself included).
    pub fn enclosing_statement(&self) -> Option<Node<'t>> {
        if is_statement_level(&self.node) {
            return Some(self.node);
        }
        self.chain
            .iter()
            .rev()
            .find(|ancestor| is_statement_level(ancestor))
            .copied()
    }

    /// Nearest enclosing function declaration, method or literal.
    pub fn enclosing_function(&self) -> Option<Node<'t>> {
        self.chain
            .iter()
            .rev()
            .find(|ancestor| {
                matches!(
                    ancestor.kind(),
                    "function_declaration" | "method_declaration" | "func_literal"
                )
            })
            .copied()
    }
}

pub struct AdviceContext<'a, 't> {
    pub matched: MatchContext<'a, 't>,
    pub rewriter: &'a mut Rewriter<'t>,
    pub references: &'a mut ReferenceMap,
    pub min_go_version: &'a mut Option<GoVersion>,
    /// Statements given wrap markers during this pass (by start byte).
    pub wrapped: &'a mut FxHashSet<usize>,
    /// Import path to the local name injected code in this file uses for it.
    pub aliases: &'a mut BTreeMap<String, String>,
}

impl<'a, 't> AdviceContext<'a, 't> {
    pub fn source(&self) -> &'t str {
        &self.matched.file.source
    }

    /// The statement already carries a start/end wrap marker pair from an earlier run.
    pub fn statement_was_wrapped(&self, statement: &Node) -> bool {
        let decorations = &self.matched.file.decorations;
        decorations.has_leading_marker(statement, Marker::StartWrap)
            && decorations.has_trailing_marker(statement, Marker::EndWrap)
    }

    /// Bracket `statement` with wrap markers, once per pass.
    pub fn wrap_statement(&mut self, statement: &Node) {
        if !self.wrapped.insert(statement.start_byte()) {
            return;
        }
        let source = self.source();
        let start = statement.start_byte();
        let end = statement.end_byte();
        let indent = line_indent(source, start).to_string();

        if is_first_on_line(source, start) {
            self.rewriter.insert(
                line_start(source, start),
                format!("{indent}{}\n", Marker::StartWrap.comment()),
                Bias::Right,
            );
        } else {
            self.rewriter.insert(
                start,
                format!("{}\n{indent}", Marker::StartWrap.comment()),
                Bias::Right,
            );
        }

        if rest_of_line_is_trivia(source, end) {
            self.rewriter.insert(
                line_end(source, end),
                format!("\n{indent}{}", Marker::EndWrap.comment()),
                Bias::Left,
            );
        } else {
            self.rewriter
                .insert(end, format!(" {}\n", Marker::EndWrap.comment()), Bias::Left);
        }
    }

    /// Insert `statements` at the top of a function body, between instrument markers.
    pub fn prepend_to_body(&mut self, body: &Node, statements: &str) -> Result<(), String> {
        let source = self.source();
        let brace = find_child_by_kind(body, "{")
            .ok_or_else(|| "function body has no opening brace".to_string())?;
        let after_brace = brace.end_byte();
        let indent = format!("{}\t", line_indent(source, body.start_byte()));

        let mut block = String::new();
        for line in statements.lines() {
            if line.trim().is_empty() {
                block.push('\n');
            } else {
                block.push_str(&format!("{indent}{line}\n"));
            }
        }
        let closing = format!("{indent}{}\n", Marker::EndInstrument.comment());

        if rest_of_line_is_trivia(source, after_brace) && line_end(source, after_brace) < source.len() {
            let at = line_end(source, after_brace) + 1;
            self.rewriter.insert(
                at,
                format!("{indent}{}\n{block}{closing}", Marker::StartInstrument.comment()),
                Bias::Left,
            );
        } else {
            self.rewriter.insert(
                after_brace,
                format!(" {}\n{block}{closing}", Marker::StartInstrument.comment()),
                Bias::Left,
            );
        }
        Ok(())
    }

    /// First statement of a function body already sits below a start-instrument marker.
    pub fn body_was_instrumented(&self, body: &Node) -> bool {
        let decorations = &self.matched.file.decorations;
        crate::ast::tree_methods::block_statements(body)
            .first()
            .is_some_and(|first| decorations.has_leading_marker(first, Marker::StartInstrument))
    }

    /// Local name for package `path` in injected code: `alias`, unless the file already
    /// uses that name for something else, then `__alias`, `__alias2` and so on.
    pub fn bind_import(&mut self, path: &str, alias: &str) -> String {
        if matches!(alias, "_" | ".") {
            return alias.to_string();
        }
        if let Some(bound) = self.aliases.get(path) {
            return bound.clone();
        }
        let mut name = alias.to_string();
        let mut attempt = 1;
        while self.name_is_taken(&name, path) {
            name = if attempt == 1 {
                format!("__{alias}")
            } else {
                format!("__{alias}{attempt}")
            };
            attempt += 1;
        }
        if name != alias {
            debug!(
                "{}: {alias} is already bound, importing {path} as {name}",
                self.matched.file.name()
            );
        }
        self.aliases.insert(path.to_string(), name.clone());
        name
    }

    fn name_is_taken(&self, name: &str, path: &str) -> bool {
        self.matched.types.binds(self.matched.file_index, name, path)
            || self
                .aliases
                .iter()
                .any(|(other, bound)| bound == name && other != path)
    }

    /// Rewrite the template's package qualifiers in `text` to their bound local names.
    pub fn localize(&mut self, template: &Template, text: &str) -> String {
        let mut text = text.to_string();
        for (alias, path) in &template.imports {
            let bound = self.bind_import(path, alias);
            if let Some(renamed) = requalify(&text, alias, &bound) {
                text = renamed;
            }
        }
        text
    }

    /// Record the imports and language version an applied template needs.
    pub fn use_template(&mut self, template: &Template) {
        for (alias, path) in &template.imports {
            let bound = self.bind_import(path, alias);
            self.references.add_import(path, &bound);
        }
        self.raise_go_version(template.go_version);
    }

    pub fn raise_go_version(&mut self, version: Option<GoVersion>) {
        if let Some(version) = version {
            GoVersion::raise(self.min_go_version, version);
        }
    }
}
