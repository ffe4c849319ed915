//! Join points: declarative predicates over syntax nodes.
//!
//! Every join point can be evaluated three ways:
//! - [`JoinPoint::matches`] against one node of a parsed, type-checked file;
//! - [`JoinPoint::package_may_match`] from package facts alone;
//! - [`JoinPoint::file_may_match`] from a file's raw bytes.
//!
//! The two pre-filters are conservative: `CantMatch` is only returned when no node of
//! the package (or file) can satisfy the predicate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tree_sitter::Node;

use crate::ast::tree_methods::literal_inner;
use crate::injector::context::MatchContext;
use crate::typing::{ImportMap, Object, TypeRef};

/// A (possibly pointer) reference to a named type: `*net/http.Request`, `error`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeMatch {
    pub pointer: bool,
    /// Empty for universe types.
    pub path: String,
    pub name: String,
}

impl TypeMatch {
    pub fn new(path: &str, name: &str) -> Self {
        Self {
            pointer: false,
            path: path.to_string(),
            name: name.to_string(),
        }
    }

    pub fn pointer(path: &str, name: &str) -> Self {
        Self {
            pointer: true,
            ..Self::new(path, name)
        }
    }

    /// Value form of this type (`*T` becomes `T`).
    pub fn value(&self) -> TypeMatch {
        TypeMatch {
            pointer: false,
            ..self.clone()
        }
    }

    pub fn matches(&self, ty: &TypeRef) -> bool {
        match (self.pointer, ty) {
            (true, TypeRef::Pointer(inner)) => self.value().matches(inner),
            (false, TypeRef::Named { path, name }) => *path == self.path && *name == self.name,
            (false, TypeRef::Builtin(name)) => self.path.is_empty() && *name == self.name,
            _ => false,
        }
    }

    /// Could a package importing only `imports` refer to this type?
    fn reachable(&self, facts: &PackageFacts) -> bool {
        self.path.is_empty()
            || self.path == facts.import_path
            || facts.import_map.is_empty()
            || facts.import_map.contains(&self.path)
    }
}

impl fmt::Display for TypeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer {
            f.write_str("*")?;
        }
        if self.path.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.path, self.name)
        }
    }
}

impl FromStr for TypeMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (pointer, rest) = match trimmed.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        // the type name follows the last '.' after the last '/'
        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (path, name) = match rest[last_slash..].rfind('.') {
            Some(dot) => (&rest[..last_slash + dot], &rest[last_slash + dot + 1..]),
            None => ("", rest),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(format!("invalid type reference: {s:?}"));
        }
        Ok(TypeMatch {
            pointer,
            path: path.to_string(),
            name: name.to_string(),
        })
    }
}

impl Serialize for TypeMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TypeMatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signature {
    #[serde(default)]
    pub args: Vec<TypeMatch>,
    #[serde(default)]
    pub returns: Vec<TypeMatch>,
}

/// Constraints on a function declaration, method or literal. Empty matches any function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<TypeMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    /// Some parameter has this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<TypeMatch>,
}

impl FunctionMatcher {
    fn type_matches(&self) -> impl Iterator<Item = &TypeMatch> {
        let signature = self
            .signature
            .iter()
            .flat_map(|s| s.args.iter().chain(s.returns.iter()));
        self.receiver
            .iter()
            .chain(self.parameter.iter())
            .chain(signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPoint {
    AllOf(Vec<JoinPoint>),
    OneOf(Vec<JoinPoint>),
    Not(Box<JoinPoint>),
    /// The package being woven has this import path.
    ImportPath(String),
    /// The file declares this package name.
    PackageName(String),
    /// The package is (or is not) a synthesized test main.
    TestMain(bool),
    /// Every listed setting has the given value.
    Configuration(BTreeMap<String, String>),
    /// The root node of each file.
    SourceFile,
    FunctionDeclaration(FunctionMatcher),
    FunctionCall {
        path: String,
        name: String,
    },
    StructLiteralField {
        #[serde(rename = "type")]
        ty: TypeMatch,
        field: String,
    },
    ValueDeclaration(TypeMatch),
    DeclarationOf {
        path: String,
        name: String,
    },
    /// Own-line leading directive comment, e.g. `tool:span`.
    Directive(String),
}

/// Three-valued pre-filter verdict.
///
/// `Match` holds at every node, `CantMatch` at none; `Unknown` needs the full matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MayMatch {
    CantMatch,
    Unknown,
    Match,
}

impl MayMatch {
    fn from_bool(value: bool) -> Self {
        if value {
            MayMatch::Match
        } else {
            MayMatch::CantMatch
        }
    }

    /// `Unknown` unless the evidence rules the predicate out.
    fn possible(value: bool) -> Self {
        if value {
            MayMatch::Unknown
        } else {
            MayMatch::CantMatch
        }
    }

    pub fn and(self, other: MayMatch) -> MayMatch {
        match (self, other) {
            (MayMatch::CantMatch, _) | (_, MayMatch::CantMatch) => MayMatch::CantMatch,
            (MayMatch::Match, MayMatch::Match) => MayMatch::Match,
            _ => MayMatch::Unknown,
        }
    }

    pub fn or(self, other: MayMatch) -> MayMatch {
        match (self, other) {
            (MayMatch::Match, _) | (_, MayMatch::Match) => MayMatch::Match,
            (MayMatch::CantMatch, MayMatch::CantMatch) => MayMatch::CantMatch,
            _ => MayMatch::Unknown,
        }
    }

    pub fn negate(self) -> MayMatch {
        match self {
            MayMatch::CantMatch => MayMatch::Match,
            MayMatch::Match => MayMatch::CantMatch,
            MayMatch::Unknown => MayMatch::Unknown,
        }
    }
}

/// What is known about a package before any of its files is read.
#[derive(Debug, Clone, Copy)]
pub struct PackageFacts<'a> {
    pub import_path: &'a str,
    /// An empty map carries no information.
    pub import_map: &'a ImportMap,
    pub test_main: bool,
    pub settings: &'a BTreeMap<String, String>,
}

/// What is known about a file before it is parsed.
#[derive(Debug, Clone, Copy)]
pub struct FileFacts<'a> {
    pub bytes: &'a [u8],
    pub package_name: Option<&'a str>,
    pub import_path: &'a str,
}

impl FileFacts<'_> {
    fn contains(&self, needle: &str) -> bool {
        needle.is_empty()
            || self
                .bytes
                .windows(needle.len())
                .any(|window| window == needle.as_bytes())
    }
}

impl JoinPoint {
    pub fn all_of(points: impl IntoIterator<Item = JoinPoint>) -> Self {
        JoinPoint::AllOf(points.into_iter().collect())
    }

    pub fn one_of(points: impl IntoIterator<Item = JoinPoint>) -> Self {
        JoinPoint::OneOf(points.into_iter().collect())
    }

    pub fn function_call(path: &str, name: &str) -> Self {
        JoinPoint::FunctionCall {
            path: path.to_string(),
            name: name.to_string(),
        }
    }

    pub fn setting(key: &str, value: &str) -> Self {
        JoinPoint::Configuration(BTreeMap::from([(key.to_string(), value.to_string())]))
    }

    pub fn matches(&self, ctx: &MatchContext) -> bool {
        match self {
            JoinPoint::AllOf(points) => points.iter().all(|p| p.matches(ctx)),
            JoinPoint::OneOf(points) => points.iter().any(|p| p.matches(ctx)),
            JoinPoint::Not(point) => !point.matches(ctx),
            JoinPoint::ImportPath(path) => ctx.package.import_path == *path,
            JoinPoint::PackageName(name) => ctx.file.package_name == *name,
            JoinPoint::TestMain(flag) => ctx.package.test_main == *flag,
            JoinPoint::Configuration(expected) => expected
                .iter()
                .all(|(key, value)| ctx.package.settings.get(key) == Some(value)),
            JoinPoint::SourceFile => ctx.node.kind() == "source_file",
            JoinPoint::FunctionDeclaration(matcher) => function_matches(matcher, ctx),
            JoinPoint::FunctionCall { path, name } => call_matches(path, name, ctx),
            JoinPoint::StructLiteralField { ty, field } => field_matches(ty, field, ctx),
            JoinPoint::ValueDeclaration(ty) => value_declaration_matches(ty, ctx),
            JoinPoint::DeclarationOf { path, name } => declaration_matches(path, name, ctx),
            JoinPoint::Directive(name) => {
                ctx.node.is_named()
                    && !matches!(ctx.node.kind(), "source_file" | "statement_list" | "block")
                    && ctx
                        .file
                        .decorations
                        .leading_directive(&ctx.node, name)
                        .is_some()
            }
        }
    }

    pub fn package_may_match(&self, facts: &PackageFacts) -> MayMatch {
        match self {
            JoinPoint::AllOf(points) => points
                .iter()
                .fold(MayMatch::Match, |acc, p| acc.and(p.package_may_match(facts))),
            JoinPoint::OneOf(points) => points
                .iter()
                .fold(MayMatch::CantMatch, |acc, p| acc.or(p.package_may_match(facts))),
            JoinPoint::Not(point) => point.package_may_match(facts).negate(),
            JoinPoint::ImportPath(path) => MayMatch::from_bool(facts.import_path == path),
            // main packages are compiled as "main"; other names are not derivable from paths
            JoinPoint::PackageName(name) if name == "main" && facts.import_path == "main" => {
                MayMatch::Match
            }
            JoinPoint::PackageName(_) => MayMatch::Unknown,
            JoinPoint::TestMain(flag) => MayMatch::from_bool(facts.test_main == *flag),
            JoinPoint::Configuration(expected) => MayMatch::from_bool(
                expected
                    .iter()
                    .all(|(key, value)| facts.settings.get(key) == Some(value)),
            ),
            JoinPoint::SourceFile | JoinPoint::Directive(_) => MayMatch::Unknown,
            JoinPoint::FunctionDeclaration(matcher) => {
                MayMatch::possible(matcher.type_matches().all(|ty| ty.reachable(facts)))
            }
            JoinPoint::FunctionCall { path, .. } => MayMatch::possible(
                path == facts.import_path
                    || facts.import_map.is_empty()
                    || facts.import_map.contains(path),
            ),
            JoinPoint::StructLiteralField { ty, .. } | JoinPoint::ValueDeclaration(ty) => {
                MayMatch::possible(ty.reachable(facts))
            }
            JoinPoint::DeclarationOf { path, .. } => MayMatch::possible(path == facts.import_path),
        }
    }

    pub fn file_may_match(&self, facts: &FileFacts) -> MayMatch {
        match self {
            JoinPoint::AllOf(points) => points
                .iter()
                .fold(MayMatch::Match, |acc, p| acc.and(p.file_may_match(facts))),
            JoinPoint::OneOf(points) => points
                .iter()
                .fold(MayMatch::CantMatch, |acc, p| acc.or(p.file_may_match(facts))),
            JoinPoint::Not(point) => point.file_may_match(facts).negate(),
            JoinPoint::PackageName(name) => match facts.package_name {
                Some(declared) => MayMatch::from_bool(declared == name),
                None => MayMatch::Unknown,
            },
            JoinPoint::ImportPath(_)
            | JoinPoint::TestMain(_)
            | JoinPoint::Configuration(_)
            | JoinPoint::SourceFile
            | JoinPoint::ValueDeclaration(_) => MayMatch::Unknown,
            // type names may be spelled through aliases declared in sibling files
            JoinPoint::FunctionDeclaration(matcher) => match &matcher.name {
                Some(name) => MayMatch::possible(facts.contains(name)),
                None => MayMatch::Unknown,
            },
            JoinPoint::FunctionCall { path, name } => MayMatch::possible(
                facts.contains(name) && (path == facts.import_path || facts.contains(path)),
            ),
            JoinPoint::StructLiteralField { field, .. } => MayMatch::possible(facts.contains(field)),
            JoinPoint::DeclarationOf { path, name } => {
                MayMatch::possible(path == facts.import_path && facts.contains(name))
            }
            JoinPoint::Directive(name) => MayMatch::possible(facts.contains(&format!("//{name}"))),
        }
    }
}

fn function_matches(matcher: &FunctionMatcher, ctx: &MatchContext) -> bool {
    let node = ctx.node;
    let is_literal = match node.kind() {
        "function_declaration" | "method_declaration" => false,
        "func_literal" => true,
        _ => return false,
    };
    if is_literal && (matcher.name.is_some() || matcher.receiver.is_some()) {
        return false;
    }

    if let Some(name) = &matcher.name {
        let declared = node.child_by_field_name("name").map(|n| ctx.text(&n));
        if declared != Some(name.as_str()) {
            return false;
        }
    }

    if let Some(receiver) = &matcher.receiver {
        let receiver_type = node
            .child_by_field_name("receiver")
            .map(|list| parameter_types(&list, ctx))
            .and_then(|types| types.into_iter().next());
        if !receiver_type.is_some_and(|ty| receiver.matches(&ty)) {
            return false;
        }
    }

    let parameters = node
        .child_by_field_name("parameters")
        .map(|list| parameter_types(&list, ctx))
        .unwrap_or_default();

    if let Some(wanted) = &matcher.parameter {
        if !parameters.iter().any(|ty| wanted.matches(ty)) {
            return false;
        }
    }

    if let Some(signature) = &matcher.signature {
        let results = match node.child_by_field_name("result") {
            Some(result) if result.kind() == "parameter_list" => parameter_types(&result, ctx),
            Some(result) => vec![ctx.types.resolve_type(ctx.file_index, &result, &ctx.file.source)],
            None => Vec::new(),
        };
        if !types_match(&signature.args, &parameters) || !types_match(&signature.returns, &results) {
            return false;
        }
    }
    true
}

fn types_match(expected: &[TypeMatch], actual: &[TypeRef]) -> bool {
    expected.len() == actual.len() && expected.iter().zip(actual).all(|(e, a)| e.matches(a))
}

/// Parameter types of a list, one entry per declared name.
pub(crate) fn parameter_types(list: &Node, ctx: &MatchContext) -> Vec<TypeRef> {
    let mut types = Vec::new();
    let mut cursor = list.walk();
    let declarations: Vec<Node> = list.named_children(&mut cursor).collect();
    for declaration in declarations {
        let Some(type_node) = declaration.child_by_field_name("type") else {
            continue;
        };
        let mut ty = ctx
            .types
            .resolve_type(ctx.file_index, &type_node, &ctx.file.source);
        if declaration.kind() == "variadic_parameter_declaration" {
            ty = TypeRef::Other(format!("...{ty}"));
        }
        let names = {
            let mut names_cursor = declaration.walk();
            let count = declaration
                .children_by_field_name("name", &mut names_cursor)
                .count();
            count
        };
        for _ in 0..names.max(1) {
            types.push(ty.clone());
        }
    }
    types
}

fn call_matches(path: &str, name: &str, ctx: &MatchContext) -> bool {
    if ctx.node.kind() != "call_expression" {
        return false;
    }
    let Some(function) = ctx.node.child_by_field_name("function") else {
        return false;
    };
    let Some(file_types) = ctx.file_types() else {
        return false;
    };
    match function.kind() {
        "selector_expression" => {
            let operand = function.child_by_field_name("operand");
            let field = function.child_by_field_name("field");
            match (operand, field) {
                (Some(operand), Some(field)) => {
                    ctx.text(&field) == name
                        && matches!(
                            file_types.object_at(&operand),
                            Some(Object::PkgName { path: p }) if p == path
                        )
                }
                _ => false,
            }
        }
        "identifier" => {
            ctx.text(&function) == name
                && matches!(
                    file_types.object_at(&function),
                    Some(Object::Func { path: p, .. }) if p == path
                )
        }
        _ => false,
    }
}

fn field_matches(ty: &TypeMatch, field: &str, ctx: &MatchContext) -> bool {
    let node = ctx.node;
    if node.kind() != "keyed_element" {
        return false;
    }
    let key = {
        let mut cursor = node.walk();
        let first = node.named_children(&mut cursor).next();
        first
    };
    if !key.is_some_and(|k| ctx.text(&literal_inner(k)) == field) {
        return false;
    }

    // keyed_element <- literal_value <- composite_literal [<- unary_expression &]
    let mut ancestors = ctx.chain.iter().rev();
    let (Some(literal_value), Some(composite)) = (ancestors.next(), ancestors.next()) else {
        return false;
    };
    if literal_value.kind() != "literal_value" || composite.kind() != "composite_literal" {
        return false;
    }
    let Some(type_node) = composite.child_by_field_name("type") else {
        return false;
    };
    let literal_type = ctx
        .types
        .resolve_type(ctx.file_index, &type_node, &ctx.file.source);
    let addressed = ancestors.next().is_some_and(|parent| {
        parent.kind() == "unary_expression"
            && parent
                .child_by_field_name("operator")
                .is_some_and(|op| ctx.text(&op) == "&")
    });
    addressed == ty.pointer && ty.value().matches(&literal_type)
}

fn value_declaration_matches(ty: &TypeMatch, ctx: &MatchContext) -> bool {
    let node = ctx.node;
    match node.kind() {
        "var_spec" => {
            if let Some(type_node) = node.child_by_field_name("type") {
                let declared = ctx
                    .types
                    .resolve_type(ctx.file_index, &type_node, &ctx.file.source);
                return ty.matches(&declared);
            }
            single_value(&node).is_some_and(|value| {
                expression_type(&value, ctx).is_some_and(|inferred| ty.matches(&inferred))
            })
        }
        "short_var_declaration" => single_value(&node).is_some_and(|value| {
            expression_type(&value, ctx).is_some_and(|inferred| ty.matches(&inferred))
        }),
        _ => false,
    }
}

/// The only value of a declaration's initializer list.
pub(crate) fn single_value<'t>(declaration: &Node<'t>) -> Option<Node<'t>> {
    let field = if declaration.kind() == "short_var_declaration" {
        "right"
    } else {
        "value"
    };
    let list = declaration.child_by_field_name(field)?;
    let mut cursor = list.walk();
    let values: Vec<Node<'t>> = list
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect();
    match values.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Static type of an expression when it is spelled out: `T{}`, `&T{}`, or a typed variable.
fn expression_type(expression: &Node, ctx: &MatchContext) -> Option<TypeRef> {
    match expression.kind() {
        "composite_literal" => expression
            .child_by_field_name("type")
            .map(|t| ctx.types.resolve_type(ctx.file_index, &t, &ctx.file.source)),
        "unary_expression" => {
            let operator = expression.child_by_field_name("operator")?;
            let operand = expression.child_by_field_name("operand")?;
            if ctx.text(&operator) != "&" {
                return None;
            }
            expression_type(&operand, ctx).map(TypeRef::pointer_to)
        }
        "identifier" => match ctx.file_types()?.object_at(expression)? {
            Object::Var { ty } => ty.clone(),
            _ => None,
        },
        _ => None,
    }
}

fn declaration_matches(path: &str, name: &str, ctx: &MatchContext) -> bool {
    if ctx.package.import_path != path {
        return false;
    }
    let node = ctx.node;
    let top_level = |declaration: Option<&Node>| {
        declaration.is_some_and(|d| d.parent().is_some_and(|p| p.kind() == "source_file"))
    };
    match node.kind() {
        "function_declaration" => {
            top_level(Some(&node))
                && node
                    .child_by_field_name("name")
                    .is_some_and(|n| ctx.text(&n) == name)
        }
        "type_spec" | "type_alias" | "var_spec" | "const_spec" => {
            // spec <- [spec list <-] declaration <- source_file
            let declaration = ctx
                .chain
                .iter()
                .rev()
                .find(|a| a.kind().ends_with("_declaration"));
            if !top_level(declaration) {
                return false;
            }
            let mut cursor = node.walk();
            let declared: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
            declared.iter().any(|n| ctx.text(n) == name)
        }
        _ => false,
    }
}
