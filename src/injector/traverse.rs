// Depth-first walk with pre and post hooks
//
// The walk itself knows nothing about node kinds; pruning and matching decisions live
// in the hooks. Ancestors are passed root first.

use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Skip the children and the post hook of this node.
    Prune,
}

pub fn walk<'t, E>(
    root: Node<'t>,
    mut pre: impl FnMut(&Node<'t>, &[Node<'t>]) -> Visit,
    mut post: impl FnMut(&Node<'t>, &[Node<'t>]) -> Result<(), E>,
) -> Result<(), E> {
    let mut cursor = root.walk();
    let mut chain: Vec<Node<'t>> = Vec::new();

    loop {
        let node = cursor.node();
        let descend = pre(&node, &chain) == Visit::Continue;
        if descend {
            if cursor.goto_first_child() {
                chain.push(node);
                continue;
            }
            post(&node, &chain)?;
        }

        // climb until a sibling is found, finishing each parent on the way up
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return Ok(());
            }
            if let Some(parent) = chain.pop() {
                post(&parent, &chain)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::new_parser;

    #[test]
    fn test_post_order_and_pruning() {
        let mut parser = new_parser().unwrap();
        let source = "package p\n\nfunc a() { x() }\n\nfunc b() { y() }\n";
        let tree = parser.parse(source, None).unwrap();

        let mut seen = Vec::new();
        walk::<()>(
            tree.root_node(),
            |node, _| {
                let pruned = node.kind() == "function_declaration"
                    && node.child_by_field_name("name").map(|n| &source[n.byte_range()]) == Some("b");
                if pruned {
                    Visit::Prune
                } else {
                    Visit::Continue
                }
            },
            |node, chain| {
                if node.kind() == "call_expression" {
                    seen.push((source[node.byte_range()].to_string(), chain.len()));
                }
                if node.kind() == "source_file" {
                    assert!(chain.is_empty());
                    seen.push(("root".to_string(), 0));
                }
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "x()");
        assert!(seen[0].1 >= 3);
        assert_eq!(seen[1].0, "root");
    }
}
