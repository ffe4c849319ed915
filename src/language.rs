//! Language Support - Go grammar configuration
//!
//! ALL grammar-specific node-kind strings should go here to avoid duplication.
//! The traversal engine only ever sees [`NodeKind`]; per-kind behaviour lives in the
//! join-point and advice layers.

use anyhow::{anyhow, Result};
use tree_sitter::{Node, Parser};

/// Get the tree-sitter language for Go
pub fn go_language() -> tree_sitter::Language {
    tree_sitter_go::LANGUAGE.into()
}

/// Create a parser configured for Go
pub fn new_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&go_language())
        .map_err(|e| anyhow!("Failed to set parser language for go: {}", e))?;
    Ok(parser)
}

/// Node kinds the weaver distinguishes. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    SourceFile,
    PackageClause,
    ImportDeclaration,
    ImportSpec,
    FunctionDeclaration,
    MethodDeclaration,
    FunctionLiteral,
    CallExpression,
    SelectorExpression,
    CompositeLiteral,
    KeyedElement,
    VarDeclaration,
    VarSpec,
    ShortVarDeclaration,
    TypeDeclaration,
    ConstDeclaration,
    Block,
    StatementList,
    Comment,
    /// Any other statement that can carry wrap markers.
    Statement,
    Other,
}

impl NodeKind {
    pub fn of(node: &Node) -> Self {
        match node.kind() {
            "source_file" => NodeKind::SourceFile,
            "package_clause" => NodeKind::PackageClause,
            "import_declaration" => NodeKind::ImportDeclaration,
            "import_spec" => NodeKind::ImportSpec,
            "function_declaration" => NodeKind::FunctionDeclaration,
            "method_declaration" => NodeKind::MethodDeclaration,
            "func_literal" => NodeKind::FunctionLiteral,
            "call_expression" => NodeKind::CallExpression,
            "selector_expression" => NodeKind::SelectorExpression,
            "composite_literal" => NodeKind::CompositeLiteral,
            "keyed_element" => NodeKind::KeyedElement,
            "var_declaration" => NodeKind::VarDeclaration,
            "var_spec" => NodeKind::VarSpec,
            "short_var_declaration" => NodeKind::ShortVarDeclaration,
            "type_declaration" => NodeKind::TypeDeclaration,
            "const_declaration" => NodeKind::ConstDeclaration,
            "block" => NodeKind::Block,
            "statement_list" => NodeKind::StatementList,
            "comment" => NodeKind::Comment,
            kind if STATEMENT_KINDS.contains(&kind) => NodeKind::Statement,
            _ => NodeKind::Other,
        }
    }

    pub fn is_function(self) -> bool {
        matches!(
            self,
            NodeKind::FunctionDeclaration | NodeKind::MethodDeclaration | NodeKind::FunctionLiteral
        )
    }
}

/// Statement node kinds (besides declarations, which have their own `NodeKind`).
pub const STATEMENT_KINDS: &[&str] = &[
    "expression_statement",
    "send_statement",
    "inc_statement",
    "dec_statement",
    "assignment_statement",
    "return_statement",
    "go_statement",
    "defer_statement",
    "if_statement",
    "for_statement",
    "expression_switch_statement",
    "type_switch_statement",
    "select_statement",
    "labeled_statement",
    "fallthrough_statement",
    "break_statement",
    "continue_statement",
    "goto_statement",
    "empty_statement",
];

/// Nodes whose direct children are statements.
pub const STATEMENT_CONTAINERS: &[&str] = &[
    "source_file",
    "block",
    "statement_list",
    "expression_case",
    "default_case",
    "type_case",
    "communication_case",
];

/// Top-level declaration kinds in a source file.
pub const TOP_LEVEL_DECLARATIONS: &[&str] = &[
    "function_declaration",
    "method_declaration",
    "type_declaration",
    "var_declaration",
    "const_declaration",
    "import_declaration",
];

/// Builtin type names of the universe scope.
pub const BUILTIN_TYPES: &[&str] = &[
    "bool",
    "byte",
    "complex64",
    "complex128",
    "error",
    "float32",
    "float64",
    "int",
    "int8",
    "int16",
    "int32",
    "int64",
    "rune",
    "string",
    "uint",
    "uint8",
    "uint16",
    "uint32",
    "uint64",
    "uintptr",
    "comparable",
];

/// Builtin functions of the universe scope.
pub const BUILTIN_FUNCTIONS: &[&str] = &[
    "append", "cap", "close", "complex", "copy", "delete", "imag", "len", "make", "new", "panic",
    "print", "println", "real", "recover",
];

/// Is `node` a statement sitting directly in a statement list (or a top-level declaration)?
pub fn is_statement_level(node: &Node) -> bool {
    !matches!(node.kind(), "comment" | "statement_list")
        && node
            .parent()
            .is_some_and(|parent| STATEMENT_CONTAINERS.contains(&parent.kind()))
        && (node.parent().is_some_and(|p| p.kind() != "source_file")
            || TOP_LEVEL_DECLARATIONS.contains(&node.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_classifies_go_nodes() {
        let mut parser = new_parser().unwrap();
        let tree = parser
            .parse("package main\n\nfunc main() {\n\tprintln(1)\n}\n", None)
            .unwrap();
        let root = tree.root_node();
        assert_eq!(NodeKind::of(&root), NodeKind::SourceFile);

        let func = root.named_child(1).unwrap();
        assert_eq!(NodeKind::of(&func), NodeKind::FunctionDeclaration);
        assert!(NodeKind::of(&func).is_function());
        assert!(is_statement_level(&func));

        let package = root.named_child(0).unwrap();
        assert_eq!(NodeKind::of(&package), NodeKind::PackageClause);
        assert!(!is_statement_level(&package));
    }
}
