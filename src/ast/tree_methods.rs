// Tree navigation and source-layout helpers
//
// Free functions over tree-sitter nodes and the source text they index into.

use tree_sitter::Node;

/// Get text from a tree-sitter node
pub fn node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Byte offset of the start of the line containing `offset`.
pub fn line_start(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())]
        .rfind('\n')
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// Byte offset of the `\n` ending the line containing `offset` (or the end of input).
pub fn line_end(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    source[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(source.len())
}

/// Leading whitespace of the line containing `offset`.
pub fn line_indent(source: &str, offset: usize) -> &str {
    let start = line_start(source, offset);
    let rest = &source[start..];
    let width = rest
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &rest[..width]
}

/// Only spaces and tabs precede `offset` on its line.
pub fn is_first_on_line(source: &str, offset: usize) -> bool {
    let start = line_start(source, offset);
    source[start..offset]
        .bytes()
        .all(|b| b == b' ' || b == b'\t')
}

/// From `offset` to the end of its line there is only whitespace or a line comment.
pub fn rest_of_line_is_trivia(source: &str, offset: usize) -> bool {
    let end = line_end(source, offset);
    let rest = source[offset..end].trim_start_matches([' ', '\t', '\r']);
    rest.is_empty() || rest.starts_with("//")
}

/// Offset of the first byte after `offset` that is not a space or tab.
pub fn skip_blanks(source: &str, offset: usize) -> usize {
    offset
        + source[offset..]
            .bytes()
            .take_while(|b| *b == b' ' || *b == b'\t')
            .count()
}

pub fn newlines_between(source: &str, start: usize, end: usize) -> usize {
    source
        .get(start..end)
        .map(|gap| gap.bytes().filter(|b| *b == b'\n').count())
        .unwrap_or(0)
}

/// Zero-based line number of `offset`.
pub fn line_of(source: &str, offset: usize) -> usize {
    newlines_between(source, 0, offset.min(source.len()))
}

/// Find first child by kind
pub fn find_child_by_kind<'a>(node: &Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|c| c.kind() == kind);
    found
}

/// Find children by kind
pub fn find_children_by_kind<'a>(node: &Node<'a>, kind: &str) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'a>> = node
        .children(&mut cursor)
        .filter(|c| c.kind() == kind)
        .collect();
    children
}

/// Find all descendants by kind, in document order
pub fn find_nodes_by_kind<'a>(node: &Node<'a>, kind: &str) -> Vec<Node<'a>> {
    let mut nodes = Vec::new();
    find_nodes_by_kind_recursive(node, kind, &mut nodes);
    nodes
}

fn find_nodes_by_kind_recursive<'a>(node: &Node<'a>, kind: &str, nodes: &mut Vec<Node<'a>>) {
    if node.kind() == kind {
        nodes.push(*node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        find_nodes_by_kind_recursive(&child, kind, nodes);
    }
}

/// Named, non-comment children.
pub fn significant_children<'a>(node: &Node<'a>) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'a>> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect();
    children
}

/// Statements of a block, whether or not the grammar wraps them in a `statement_list`.
pub fn block_statements<'a>(block: &Node<'a>) -> Vec<Node<'a>> {
    match find_child_by_kind(block, "statement_list") {
        Some(list) => significant_children(&list),
        None => significant_children(block),
    }
}

/// `var_spec` nodes of a var declaration, flattening `var ( ... )` groups.
pub fn var_specs<'a>(declaration: &Node<'a>) -> Vec<Node<'a>> {
    let mut specs = find_children_by_kind(declaration, "var_spec");
    for list in find_children_by_kind(declaration, "var_spec_list") {
        specs.extend(find_children_by_kind(&list, "var_spec"));
    }
    specs
}

/// `import_spec` nodes of an import declaration, flattening `import ( ... )` groups.
pub fn import_specs<'a>(declaration: &Node<'a>) -> Vec<Node<'a>> {
    let mut specs = find_children_by_kind(declaration, "import_spec");
    for list in find_children_by_kind(declaration, "import_spec_list") {
        specs.extend(find_children_by_kind(&list, "import_spec"));
    }
    specs
}

/// Unwrap `literal_element` wrappers around composite-literal keys and values.
pub fn literal_inner<'a>(node: Node<'a>) -> Node<'a> {
    if node.kind() == "literal_element" {
        if let Some(inner) = node.named_child(0) {
            return inner;
        }
    }
    node
}

/// Unquote a Go interpreted or raw string literal (escapes are kept verbatim).
pub fn unquote(literal: &str) -> &str {
    literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .unwrap_or(literal)
}

/// Quote `value` as a Go interpreted string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::new_parser;

    #[test]
    fn test_line_helpers() {
        let src = "a\n\tbb // c\n\tdd";
        let bb = src.find("bb").unwrap();
        assert_eq!(line_start(src, bb), 2);
        assert_eq!(line_end(src, bb), src.find(" // c").unwrap() + 5);
        assert_eq!(line_indent(src, bb), "\t");
        assert!(is_first_on_line(src, bb));
        assert!(!is_first_on_line(src, bb + 1));
        assert!(rest_of_line_is_trivia(src, bb + 2));
        assert!(!rest_of_line_is_trivia(src, bb));
        assert_eq!(line_end(src, src.find("dd").unwrap()), src.len());
        assert_eq!(line_of(src, src.find("dd").unwrap()), 2);
    }

    #[test]
    fn test_block_statements_skip_comments() {
        let src = "package p\n\nfunc f() {\n\t// note\n\ta()\n\tb()\n}\n";
        let tree = new_parser().unwrap().parse(src, None).unwrap();
        let block = find_nodes_by_kind(&tree.root_node(), "block")[0];
        let statements = block_statements(&block);
        assert_eq!(statements.len(), 2);
        assert_eq!(node_text(&statements[0], src), "a()");
    }

    #[test]
    fn test_quote_round_trips_through_unquote() {
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(unquote("\"net/http\""), "net/http");
        assert_eq!(unquote("`raw`"), "raw");
    }
}
