//! Source parser
//!
//! Turns raw file bytes into a [`ParsedFile`]: the tree-sitter tree (the plain tree
//! used for position queries) plus its [`Decorations`] (comments re-homed onto the
//! nodes they decorate).
//!
//! - `decorations.rs`: markers, directives and trivia attachment
//! - `tree_methods.rs`: node and line-layout helpers

pub mod decorations;
pub mod tree_methods;

pub use decorations::{Decorations, Directive, LineDirective, Marker, Trivia};

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Tree};

use crate::error::{Result, WeaverError};
use crate::language::new_parser;
use tree_methods::node_text;

/// A parsed Go file with its decorations.
#[derive(Debug)]
pub struct ParsedFile {
    /// Where the file lives on disk (or the name it was given).
    pub path: PathBuf,
    /// File name positions are reported against; differs from `path` when the file
    /// started with a `//line` directive.
    pub origin: String,
    /// Line number the first line of `source` has in `origin`.
    pub origin_line_base: usize,
    /// Source text, with any leading `//line` directive removed.
    pub source: String,
    pub tree: Tree,
    pub decorations: Decorations,
    pub package_name: String,
}

impl ParsedFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: &Node) -> &str {
        node_text(node, &self.source)
    }

    /// Display name used in diagnostics.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse one file. A syntax error aborts this file only.
pub fn parse_file(path: &Path, bytes: &[u8]) -> Result<ParsedFile> {
    let text = std::str::from_utf8(bytes).map_err(|e| WeaverError::Parse {
        file: path.display().to_string(),
        line: 1 + bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count(),
        column: 1,
    })?;

    let (origin, origin_line_base, source) = match strip_leading_line_directive(text) {
        Some((directive, rest)) => {
            debug!(
                "{} carries a leading //line directive for {}",
                path.display(),
                directive.file
            );
            (directive.file, directive.line.unwrap_or(1), rest.to_string())
        }
        None => (path.display().to_string(), 1, text.to_string()),
    };

    let mut parser = new_parser().map_err(|e| WeaverError::Validation(e.to_string()))?;
    let tree = parser
        .parse(&source, None)
        .ok_or_else(|| WeaverError::Parse {
            file: path.display().to_string(),
            line: 1,
            column: 1,
        })?;

    let root = tree.root_node();
    if root.has_error() {
        let (line, column) = first_error_position(root);
        return Err(WeaverError::Parse {
            file: path.display().to_string(),
            line,
            column,
        });
    }

    let package_name = root
        .named_child(0)
        .filter(|n| n.kind() == "package_clause")
        .or_else(|| tree_methods::find_child_by_kind(&root, "package_clause"))
        .and_then(|clause| clause.named_child(0))
        .map(|ident| node_text(&ident, &source).to_string())
        .unwrap_or_default();

    let decorations = Decorations::build(&tree, &source);

    Ok(ParsedFile {
        path: path.to_path_buf(),
        origin,
        origin_line_base,
        source,
        tree,
        decorations,
        package_name,
    })
}

/// Parse a batch of files in parallel; each result is independent of the others.
pub fn parse_files(files: &[(PathBuf, Vec<u8>)]) -> Vec<Result<ParsedFile>> {
    files
        .par_iter()
        .map(|(path, bytes)| parse_file(path, bytes))
        .collect()
}

/// A `//line` directive anchored at line 1, column 1, and the text after it.
fn strip_leading_line_directive(text: &str) -> Option<(LineDirective, &str)> {
    if !text.starts_with("//line ") {
        return None;
    }
    let end = text.find('\n').unwrap_or(text.len());
    let directive = LineDirective::parse(&text[..end])?;
    let rest = text.get(end + 1..).unwrap_or("");
    Some((directive, rest))
}

fn first_error_position(node: Node) -> (usize, usize) {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        return (pos.row + 1, pos.column + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            return first_error_position(child);
        }
    }
    let pos = node.start_position();
    (pos.row + 1, pos.column + 1)
}

/// Declared package name of a file, found without parsing it.
///
/// Skips comments and blank lines up to the `package` clause; returns `None` when the
/// clause cannot be found cheaply.
pub fn scan_package_name(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut in_block_comment = false;
    for line in text.lines() {
        let mut rest = line.trim();
        loop {
            if in_block_comment {
                match rest.find("*/") {
                    Some(end) => {
                        in_block_comment = false;
                        rest = rest[end + 2..].trim_start();
                    }
                    None => break,
                }
            } else if let Some(after) = rest.strip_prefix("/*") {
                in_block_comment = true;
                rest = after;
            } else {
                break;
            }
        }
        if in_block_comment || rest.is_empty() || rest.starts_with("//") {
            continue;
        }
        let name = rest.strip_prefix("package")?;
        if !name.starts_with(|c: char| c.is_whitespace()) {
            return None;
        }
        let ident: String = name
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        return (!ident.is_empty()).then_some(ident);
    }
    None
}
