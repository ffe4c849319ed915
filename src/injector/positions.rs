//! Position annotation.
//!
//! After weaving, original statements may sit on different lines and generated code has
//! no position of its own. This pass renders the edits, re-parses the result and inserts
//! `//line` directives so the compiler reports original positions for original code and
//! `<generated>` for injected code.

use tracing::debug;
use tree_sitter::Node;

use super::rewrite::{Bias, Rendered, Rewriter};
use crate::ast::decorations::LineDirective;
use crate::ast::tree_methods::{is_first_on_line, line_end, line_indent, line_start};
use crate::ast::ParsedFile;
use crate::language::{is_statement_level, new_parser};

/// File name reported for injected code.
pub const GENERATED_FILE: &str = "<generated>";

/// Line-start offsets of a text, for offset to line lookups.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// Zero-based line of `offset`.
    fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|start| *start <= offset) - 1
    }
}

/// What the compiler believes about positions at some output line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reported {
    file: String,
    /// Line reported for output line `since`.
    line: usize,
    since: usize,
}

impl Reported {
    fn line_at(&self, output_line: usize) -> usize {
        self.line + output_line.saturating_sub(self.since)
    }
}

/// Put statements that share a line with injected text on a line of their own.
fn canonicalize<'t>(file: &'t ParsedFile, rewriter: &mut Rewriter<'t>) {
    let source = file.source.as_str();
    let mut anchors = Vec::new();
    collect_anchors(file.root(), &mut anchors);

    for anchor in anchors {
        let start = anchor.start_byte();
        if is_first_on_line(source, start) {
            continue;
        }
        let line = line_start(source, start)..line_end(source, start);
        if !rewriter.touches(line) {
            continue;
        }
        let inserted = rewriter.inserted_at(start);
        let breaks_line = inserted
            .trim_end_matches([' ', '\t'])
            .ends_with('\n');
        if !breaks_line {
            let indent = line_indent(source, start).to_string();
            rewriter.insert(start, format!("\n{indent}"), Bias::Left);
        }
    }
}

/// Package clause, top-level declarations and statements, in document order.
fn collect_anchors<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    if node.kind() == "package_clause" || is_statement_level(&node) {
        out.push(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_anchors(child, out);
    }
}

/// Render the edits of `file` with `//line` directives. Errors are plain messages.
pub fn annotate<'t>(file: &'t ParsedFile, rewriter: &mut Rewriter<'t>) -> Result<String, String> {
    canonicalize(file, rewriter);
    let rendered = rewriter.render()?;
    let directives = directives_for(file, &rendered)?;
    debug!("{}: {} line directive(s)", file.name(), directives.len());

    let mut out = String::with_capacity(rendered.text.len() + directives.len() * 32);
    let mut cursor = 0;
    for (offset, directive) in directives {
        out.push_str(&rendered.text[cursor..offset]);
        out.push_str(&directive);
        out.push('\n');
        cursor = offset;
    }
    out.push_str(&rendered.text[cursor..]);
    Ok(out)
}

/// `(output offset, directive)` pairs, ascending. Each directive goes at a line start.
fn directives_for(file: &ParsedFile, rendered: &Rendered) -> Result<Vec<(usize, String)>, String> {
    let mut parser = new_parser().map_err(|e| e.to_string())?;
    let tree = parser
        .parse(&rendered.text, None)
        .ok_or_else(|| "re-parsing the woven file failed".to_string())?;
    if tree.root_node().has_error() {
        return Err("woven file is not valid Go".to_string());
    }

    let output = rendered.text.as_str();
    let output_lines = LineIndex::new(output);
    let source_lines = LineIndex::new(&file.source);
    let base = file.origin_line_base;

    let first = LineDirective {
        file: file.origin.clone(),
        line: Some(base),
        column: Some(1),
    };
    let mut directives = vec![(0, first.render())];
    let mut reported = Reported {
        file: file.origin.clone(),
        line: base,
        since: 0,
    };

    let mut anchors = Vec::new();
    collect_anchors(tree.root_node(), &mut anchors);
    let mut last_line_start = None;
    for anchor in anchors {
        let start = anchor.start_byte();
        if !is_first_on_line(output, start) {
            continue;
        }
        let at = line_start(output, start);
        if last_line_start == Some(at) {
            continue;
        }
        last_line_start = Some(at);
        let output_line = output_lines.line(start);

        let wanted = match rendered.original_offset(start) {
            Some(original) => Reported {
                file: file.origin.clone(),
                line: source_lines.line(original) + base,
                since: output_line,
            },
            None if reported.file == GENERATED_FILE => continue,
            None => Reported {
                file: GENERATED_FILE.to_string(),
                line: 1,
                since: output_line,
            },
        };
        if reported.file == wanted.file && reported.line_at(output_line) == wanted.line {
            continue;
        }
        let directive = LineDirective {
            file: wanted.file.clone(),
            line: Some(wanted.line),
            column: None,
        };
        if at == 0 {
            // the file anchor already covers line one
            directives[0].1 = LineDirective {
                column: Some(1),
                ..directive
            }
            .render();
        } else {
            directives.push((at, directive.render()));
        }
        reported = wanted;
    }
    Ok(directives)
}
