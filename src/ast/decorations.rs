//! Comment trivia attached to syntax nodes.
//!
//! tree-sitter keeps comments as sibling "extra" nodes. `Decorations` re-homes each of
//! them onto the node they decorate: leading trivia keyed by the decorated node's start
//! byte, trailing trivia keyed by its end byte. Keying by byte means every node that
//! starts where a statement starts (its call expression, its statement list) sees the
//! same decorations.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use tree_sitter::{Node, Tree};

use super::tree_methods::{is_first_on_line, newlines_between};

/// Marker comments the weaver writes into (and recognises in) source files.
///
/// The literal texts are persisted in user trees and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    StartInstrument,
    EndInstrument,
    StartWrap,
    EndWrap,
    /// Hand-placed sentinel: the declaration is already instrumented.
    Instrumented,
    /// Hand-placed opt-out for a node and everything below it.
    Ignore,
}

impl Marker {
    pub const NAMESPACE: &'static str = "tool";

    pub fn comment(self) -> &'static str {
        match self {
            Marker::StartInstrument => "//tool:startinstrument",
            Marker::EndInstrument => "//tool:endinstrument",
            Marker::StartWrap => "//tool:startwrap",
            Marker::EndWrap => "//tool:endwrap",
            Marker::Instrumented => "//tool:instrumented",
            Marker::Ignore => "//tool:ignore",
        }
    }

    /// Recognise a marker comment. Trailing text after whitespace is tolerated
    /// (`//tool:ignore reason`), glued text is not (`//tool:ignored`).
    pub fn parse(text: &str) -> Option<Marker> {
        let rest = text.trim_end().strip_prefix("//tool:")?;
        let word = rest.split(|c: char| c.is_whitespace()).next()?;
        match word {
            "startinstrument" => Some(Marker::StartInstrument),
            "endinstrument" => Some(Marker::EndInstrument),
            "startwrap" => Some(Marker::StartWrap),
            "endwrap" => Some(Marker::EndWrap),
            "instrumented" => Some(Marker::Instrumented),
            "ignore" => Some(Marker::Ignore),
            _ => None,
        }
    }

    pub fn is_start(self) -> bool {
        matches!(self, Marker::StartInstrument | Marker::StartWrap)
    }

    pub fn is_end(self) -> bool {
        matches!(self, Marker::EndInstrument | Marker::EndWrap)
    }

    /// The closing marker for a start marker.
    pub fn partner(self) -> Option<Marker> {
        match self {
            Marker::StartInstrument => Some(Marker::EndInstrument),
            Marker::StartWrap => Some(Marker::EndWrap),
            _ => None,
        }
    }
}

static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^//([a-z0-9]+:[a-z0-9_\-]+)(?:\s+(.*))?$").expect("directive regex is valid")
});

/// A `//ns:name args...` directive comment (`//tool:span key:value`, `//go:noinline`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
}

impl Directive {
    pub fn parse(text: &str) -> Option<Directive> {
        let caps = DIRECTIVE_RE.captures(text.trim_end())?;
        let name = caps.get(1)?.as_str().to_string();
        let args = caps
            .get(2)
            .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Some(Directive { name, args })
    }

    /// `key:value` arguments as ordered pairs; arguments without a colon are skipped.
    pub fn key_values(&self) -> Vec<(String, String)> {
        self.args
            .iter()
            .filter_map(|arg| {
                let (key, value) = arg.split_once(':')?;
                Some((key.to_string(), value.to_string()))
            })
            .collect()
    }
}

/// A `//line file:line[:col]` position directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDirective {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl LineDirective {
    pub fn parse(text: &str) -> Option<LineDirective> {
        let body = text.trim_end().strip_prefix("//line ")?;
        // file names may contain ':' (Windows drives), so peel numbers off the right
        let mut file = body;
        let mut numbers = Vec::new();
        while numbers.len() < 2 {
            match file.rsplit_once(':') {
                Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
                    numbers.push(tail.parse::<usize>().ok()?);
                    file = head;
                }
                _ => break,
            }
        }
        if file.is_empty() {
            return None;
        }
        numbers.reverse();
        Some(LineDirective {
            file: file.to_string(),
            line: numbers.first().copied(),
            column: numbers.get(1).copied(),
        })
    }

    pub fn render(&self) -> String {
        match (self.line, self.column) {
            (Some(line), Some(col)) => format!("//line {}:{}:{}", self.file, line, col),
            (Some(line), None) => format!("//line {}:{}", self.file, line),
            _ => format!("//line {}", self.file),
        }
    }
}

/// One comment, re-homed onto the node it decorates.
#[derive(Debug, Clone)]
pub struct Trivia {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Nothing but whitespace precedes the comment on its line.
    pub own_line: bool,
    pub marker: Option<Marker>,
    pub directive: Option<Directive>,
}

#[derive(Debug, Default)]
pub struct Decorations {
    leading: FxHashMap<usize, Vec<Trivia>>,
    trailing: FxHashMap<usize, Vec<Trivia>>,
    markers: Vec<Trivia>,
}

impl Decorations {
    pub fn build(tree: &Tree, source: &str) -> Self {
        let mut decorations = Decorations::default();
        let mut comments = Vec::new();
        collect_comments(tree.root_node(), &mut comments);

        for comment in comments {
            let text = &source[comment.start_byte()..comment.end_byte()];
            let trivia = Trivia {
                text: text.to_string(),
                start: comment.start_byte(),
                end: comment.end_byte(),
                own_line: is_first_on_line(source, comment.start_byte()),
                marker: Marker::parse(text),
                directive: Directive::parse(text),
            };
            if trivia.marker.is_some() {
                decorations.markers.push(trivia.clone());
            }

            let attach_backward = match trivia.marker {
                Some(marker) if marker.is_end() => true,
                Some(marker) if marker.is_start() => false,
                _ => !trivia.own_line,
            };

            if attach_backward {
                if let Some(target) = previous_decorated(comment) {
                    decorations
                        .trailing
                        .entry(target.end_byte())
                        .or_default()
                        .push(trivia);
                }
            } else if let Some(target) = next_decorated(comment, source) {
                decorations
                    .leading
                    .entry(target.start_byte())
                    .or_default()
                    .push(trivia);
            }
        }

        decorations
    }

    /// Trivia decorating the start of `node`.
    pub fn leading(&self, node: &Node) -> &[Trivia] {
        self.leading
            .get(&node.start_byte())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Trivia decorating the end of `node`.
    pub fn trailing(&self, node: &Node) -> &[Trivia] {
        self.trailing
            .get(&node.end_byte())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_leading_marker(&self, node: &Node, marker: Marker) -> bool {
        self.leading(node).iter().any(|t| t.marker == Some(marker))
    }

    pub fn has_trailing_marker(&self, node: &Node, marker: Marker) -> bool {
        self.trailing(node).iter().any(|t| t.marker == Some(marker))
    }

    /// Leading directive with the given name (`tool:span`), if any.
    pub fn leading_directive(&self, node: &Node, name: &str) -> Option<&Directive> {
        self.leading(node)
            .iter()
            .filter(|t| t.own_line)
            .filter_map(|t| t.directive.as_ref())
            .find(|d| d.name == name)
    }

    /// Every marker comment in the file, in document order.
    pub fn markers(&self) -> &[Trivia] {
        &self.markers
    }
}

fn collect_comments<'a>(node: Node<'a>, out: &mut Vec<Node<'a>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "comment" {
            out.push(child);
        } else if child.child_count() > 0 {
            collect_comments(child, out);
        }
    }
}

/// The nearest preceding non-comment sibling, looking through statement lists.
fn previous_decorated(comment: Node) -> Option<Node> {
    let mut current = comment.prev_named_sibling();
    while let Some(node) = current {
        if node.kind() != "comment" {
            return Some(node);
        }
        current = node.prev_named_sibling();
    }
    None
}

/// The next non-comment sibling, provided the comment group reaches it without a blank line.
fn next_decorated<'a>(comment: Node<'a>, source: &str) -> Option<Node<'a>> {
    let mut last_end = comment.end_byte();
    let mut current = comment.next_named_sibling();
    while let Some(node) = current {
        if newlines_between(source, last_end, node.start_byte()) > 1 {
            return None;
        }
        if node.kind() != "comment" {
            return Some(node);
        }
        last_end = node.end_byte();
        current = node.next_named_sibling();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::new_parser;

    #[test]
    fn test_marker_parse_is_exact() {
        assert_eq!(Marker::parse("//tool:startwrap"), Some(Marker::StartWrap));
        assert_eq!(Marker::parse("//tool:ignore because"), Some(Marker::Ignore));
        assert_eq!(Marker::parse("//tool:ignored"), None);
        assert_eq!(Marker::parse("// tool:ignore"), None);
        assert_eq!(Marker::StartInstrument.partner(), Some(Marker::EndInstrument));
        for marker in [
            Marker::StartInstrument,
            Marker::EndInstrument,
            Marker::StartWrap,
            Marker::EndWrap,
            Marker::Instrumented,
            Marker::Ignore,
        ] {
            assert_eq!(Marker::parse(marker.comment()), Some(marker));
        }
    }

    #[test]
    fn test_directive_arguments() {
        let directive = Directive::parse("//tool:span foo:bar team:core").unwrap();
        assert_eq!(directive.name, "tool:span");
        assert_eq!(
            directive.key_values(),
            vec![
                ("foo".to_string(), "bar".to_string()),
                ("team".to_string(), "core".to_string())
            ]
        );
        assert!(Directive::parse("// tool:span").is_none());
        assert!(Directive::parse("//line main.go:1").is_none());
    }

    #[test]
    fn test_line_directive_forms() {
        let full = LineDirective::parse("//line C:/src/main.go:12:3").unwrap();
        assert_eq!(full.file, "C:/src/main.go");
        assert_eq!(full.line, Some(12));
        assert_eq!(full.column, Some(3));
        assert_eq!(full.render(), "//line C:/src/main.go:12:3");

        let short = LineDirective::parse("//line main.go:4").unwrap();
        assert_eq!((short.line, short.column), (Some(4), None));
        assert!(LineDirective::parse("//linemain.go:4").is_none());
    }

    #[test]
    fn test_decorations_attach_markers_by_direction() {
        let src = "package p\n\nfunc f() {\n\t//tool:startwrap\n\tg()\n\t//tool:endwrap\n\th() // trailing\n}\n";
        let tree = new_parser().unwrap().parse(src, None).unwrap();
        let decorations = Decorations::build(&tree, src);

        let g_start = src.find("g()").unwrap();
        let g_end = g_start + 3;
        assert!(decorations
            .leading
            .get(&g_start)
            .is_some_and(|t| t[0].marker == Some(Marker::StartWrap)));
        assert!(decorations
            .trailing
            .get(&g_end)
            .is_some_and(|t| t.iter().any(|t| t.marker == Some(Marker::EndWrap))));

        let h_end = src.find("h()").unwrap() + 3;
        assert!(decorations
            .trailing
            .get(&h_end)
            .is_some_and(|t| t[0].text == "// trailing"));
        assert_eq!(decorations.markers().len(), 2);
    }

    #[test]
    fn test_blank_line_detaches_comment() {
        let src = "package p\n\n// floating\n\nfunc f() {}\n\n//tool:span a:b\nfunc g() {}\n";
        let tree = new_parser().unwrap().parse(src, None).unwrap();
        let decorations = Decorations::build(&tree, src);
        let root = tree.root_node();
        let f = root.named_child(2).unwrap();
        let g = root.named_child(4).unwrap();
        assert_eq!(f.kind(), "function_declaration");
        assert!(decorations.leading(&f).is_empty());
        assert_eq!(
            decorations.leading_directive(&g, "tool:span").unwrap().args,
            vec!["a:b".to_string()]
        );
    }
}
