// Package checker
//
// Three passes over the parsed files of one package:
// 1. import bindings per file (local names come from dependency metadata)
// 2. package-level declarations, shared by every file
// 3. a scoped walk per file recording what each identifier refers to

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use tree_sitter::Node;

use super::{Importer, Object, TypeRef};
use crate::ast::tree_methods::{find_children_by_kind, import_specs, node_text, unquote, var_specs};
use crate::ast::ParsedFile;
use crate::error::{Result, WeaverError};
use crate::language::{BUILTIN_FUNCTIONS, BUILTIN_TYPES};
use crate::version::{GoVersion, SUPPORTED_GO_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Func,
    Type,
    Var,
    Const,
}

/// A package-level declaration.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub kind: DeclKind,
    /// Index of the declaring file.
    pub file: usize,
    /// Start byte of the declared name.
    pub start: usize,
    /// Declared type of a variable.
    pub ty: Option<TypeRef>,
    /// Target of a `type X = Y` alias.
    pub alias_of: Option<TypeRef>,
}

/// One import spec of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPackage {
    pub path: String,
    /// Explicit name, including `_` and `.`.
    pub alias: Option<String>,
    /// Name the package is referred to by in this file.
    pub local_name: String,
}

#[derive(Debug, Default)]
pub struct FileTypes {
    pub imports: Vec<ImportedPackage>,
    uses: FxHashMap<usize, Object>,
    /// Names declared inside function scopes anywhere in the file.
    locals: FxHashSet<String>,
}

impl FileTypes {
    /// What the identifier at `node` refers to.
    pub fn object_at(&self, node: &Node) -> Option<&Object> {
        self.uses.get(&node.start_byte())
    }

    pub fn import_named(&self, local_name: &str) -> Option<&ImportedPackage> {
        self.imports
            .iter()
            .find(|import| import.local_name == local_name)
    }
}

/// Symbol-use table of one package.
#[derive(Debug)]
pub struct PackageTypes {
    pub import_path: String,
    pub package_name: String,
    pub go_version: GoVersion,
    declarations: BTreeMap<String, Declaration>,
    files: Vec<FileTypes>,
}

impl PackageTypes {
    pub fn file(&self, index: usize) -> Option<&FileTypes> {
        self.files.get(index)
    }

    pub fn declaration(&self, name: &str) -> Option<&Declaration> {
        self.declarations.get(name)
    }

    /// `name` already means something in file `file` other than package `path`: a
    /// package-level declaration, a local of any function, or another import.
    pub fn binds(&self, file: usize, name: &str, path: &str) -> bool {
        if self.declarations.contains_key(name) {
            return true;
        }
        self.file(file).is_some_and(|types| {
            types.locals.contains(name)
                || types
                    .imports
                    .iter()
                    .any(|import| import.local_name == name && import.path != path)
        })
    }

    /// Resolve a type expression of file `file`.
    pub fn resolve_type(&self, file: usize, node: &Node, source: &str) -> TypeRef {
        let raw = self.resolve_type_syntax(file, node, source);
        self.follow_aliases(raw)
    }

    fn resolve_type_syntax(&self, file: usize, node: &Node, source: &str) -> TypeRef {
        match node.kind() {
            "pointer_type" => match node.named_child(0) {
                Some(inner) => TypeRef::pointer_to(self.resolve_type(file, &inner, source)),
                None => TypeRef::Other(node_text(node, source).to_string()),
            },
            "parenthesized_type" => match node.named_child(0) {
                Some(inner) => self.resolve_type(file, &inner, source),
                None => TypeRef::Other(node_text(node, source).to_string()),
            },
            "generic_type" => match node.child_by_field_name("type") {
                Some(base) => self.resolve_type(file, &base, source),
                None => TypeRef::Other(node_text(node, source).to_string()),
            },
            "qualified_type" => {
                let package = node
                    .child_by_field_name("package")
                    .map(|n| node_text(&n, source));
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(&n, source));
                let import = package.and_then(|p| self.file(file)?.import_named(p));
                match (import, name) {
                    (Some(import), Some(name)) => TypeRef::named(import.path.clone(), name),
                    _ => TypeRef::Other(node_text(node, source).to_string()),
                }
            }
            "type_identifier" => {
                let name = node_text(node, source);
                match self.declarations.get(name) {
                    Some(decl) if decl.kind == DeclKind::Type => {
                        TypeRef::named(self.import_path.clone(), name)
                    }
                    _ if BUILTIN_TYPES.contains(&name) || name == "any" => {
                        TypeRef::Builtin(name.to_string())
                    }
                    _ => TypeRef::Other(name.to_string()),
                }
            }
            _ => TypeRef::Other(node_text(node, source).to_string()),
        }
    }

    fn follow_aliases(&self, ty: TypeRef) -> TypeRef {
        let mut current = ty;
        // alias chains are short; the bound only guards against `type A = B; type B = A`
        for _ in 0..8 {
            let next = match &current {
                TypeRef::Named { path, name } if *path == self.import_path => self
                    .declarations
                    .get(name)
                    .and_then(|decl| decl.alias_of.clone()),
                TypeRef::Pointer(inner) => {
                    let followed = self.follow_aliases((**inner).clone());
                    return TypeRef::pointer_to(followed);
                }
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }
}

/// Type-check one package.
///
/// A `TypeCheck` error means the package itself is broken; `ToolchainVersion` means a
/// dependency is newer than this resolver.
pub fn check_package(
    import_path: &str,
    go_version: Option<GoVersion>,
    files: &[ParsedFile],
    importer: &Importer,
) -> Result<PackageTypes> {
    let type_error = |message: String| WeaverError::TypeCheck {
        import_path: import_path.to_string(),
        message,
    };

    let package_name = files
        .first()
        .map(|f| f.package_name.clone())
        .unwrap_or_default();
    if let Some(other) = files.iter().find(|f| f.package_name != package_name) {
        return Err(type_error(format!(
            "found packages {} and {} in {}",
            package_name,
            other.package_name,
            other.name()
        )));
    }

    let mut package = PackageTypes {
        import_path: import_path.to_string(),
        package_name,
        go_version: go_version.unwrap_or(SUPPORTED_GO_VERSION),
        declarations: BTreeMap::new(),
        files: Vec::with_capacity(files.len()),
    };

    for file in files {
        package.files.push(FileTypes {
            imports: collect_imports(file, importer)?,
            ..FileTypes::default()
        });
    }

    for (index, file) in files.iter().enumerate() {
        collect_declarations(&mut package.declarations, index, file).map_err(type_error)?;
    }
    for (index, file) in files.iter().enumerate() {
        resolve_declared_types(&mut package, index, file);
    }

    for (index, file) in files.iter().enumerate() {
        for import in &package.files[index].imports {
            let binds_name = !matches!(import.alias.as_deref(), Some("_") | Some("."));
            if binds_name && package.declarations.contains_key(&import.local_name) {
                return Err(type_error(format!(
                    "{}: {} already declared through import of package {}",
                    file.name(),
                    import.local_name,
                    import.path
                )));
            }
        }
    }

    for (index, file) in files.iter().enumerate() {
        let (uses, locals) = {
            let mut walker = ScopeWalker::new(&package, index, file);
            walker.walk(file.root());
            (walker.uses, walker.locals)
        };
        debug!(
            "{}: resolved {} identifier uses",
            file.name(),
            uses.len()
        );
        package.files[index].uses = uses;
        package.files[index].locals = locals;
    }

    Ok(package)
}

fn collect_imports(file: &ParsedFile, importer: &Importer) -> Result<Vec<ImportedPackage>> {
    let root = file.root();
    let mut imports = Vec::new();
    for declaration in find_children_by_kind(&root, "import_declaration") {
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
            if alias.is_some() {
                // still validate the dependency's toolchain
                importer.import(&path)?;
            }
            imports.push(ImportedPackage {
                path,
                alias,
                local_name,
            });
        }
    }
    Ok(imports)
}

fn collect_declarations(
    declarations: &mut BTreeMap<String, Declaration>,
    index: usize,
    file: &ParsedFile,
) -> std::result::Result<(), String> {
    let root = file.root();
    let mut declare = |name: Node, kind: DeclKind| -> std::result::Result<(), String> {
        let text = file.text(&name);
        if text == "_" || (kind == DeclKind::Func && text == "init") {
            return Ok(());
        }
        if declarations.contains_key(text) {
            let line = name.start_position().row + 1;
            return Err(format!("{}:{}: {} redeclared in this block", file.name(), line, text));
        }
        declarations.insert(
            text.to_string(),
            Declaration {
                kind,
                file: index,
                start: name.start_byte(),
                ty: None,
                alias_of: None,
            },
        );
        Ok(())
    };

    let mut cursor = root.walk();
    let top_level: Vec<Node> = root.named_children(&mut cursor).collect();
    for declaration in top_level {
        match declaration.kind() {
            "function_declaration" => {
                if let Some(name) = declaration.child_by_field_name("name") {
                    declare(name, DeclKind::Func)?;
                }
            }
            "type_declaration" => {
                for spec in type_specs(&declaration) {
                    if let Some(name) = spec.child_by_field_name("name") {
                        declare(name, DeclKind::Type)?;
                    }
                }
            }
            "var_declaration" => {
                for spec in var_specs(&declaration) {
                    for name in field_children(&spec, "name") {
                        declare(name, DeclKind::Var)?;
                    }
                }
            }
            "const_declaration" => {
                for spec in find_children_by_kind(&declaration, "const_spec") {
                    for name in field_children(&spec, "name") {
                        declare(name, DeclKind::Const)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Fill in variable types and alias targets once every name is known.
fn resolve_declared_types(package: &mut PackageTypes, index: usize, file: &ParsedFile) {
    let root = file.root();
    let mut updates: Vec<(String, Option<TypeRef>, Option<TypeRef>)> = Vec::new();

    for declaration in find_children_by_kind(&root, "type_declaration") {
        for alias in find_children_by_kind(&declaration, "type_alias") {
            let name = alias.child_by_field_name("name");
            let target = alias.child_by_field_name("type");
            if let (Some(name), Some(target)) = (name, target) {
                let ty = package.resolve_type_syntax(index, &target, &file.source);
                updates.push((file.text(&name).to_string(), None, Some(ty)));
            }
        }
    }
    for declaration in find_children_by_kind(&root, "var_declaration") {
        for spec in var_specs(&declaration) {
            let Some(ty_node) = spec.child_by_field_name("type") else {
                continue;
            };
            let ty = package.resolve_type_syntax(index, &ty_node, &file.source);
            for name in field_children(&spec, "name") {
                updates.push((file.text(&name).to_string(), Some(ty.clone()), None));
            }
        }
    }

    for (name, ty, alias_of) in updates {
        if let Some(decl) = package.declarations.get_mut(&name) {
            if ty.is_some() {
                decl.ty = ty;
            }
            if alias_of.is_some() {
                decl.alias_of = alias_of;
            }
        }
    }
}

fn type_specs<'a>(declaration: &Node<'a>) -> Vec<Node<'a>> {
    let mut specs = find_children_by_kind(declaration, "type_spec");
    specs.extend(find_children_by_kind(declaration, "type_alias"));
    specs
}

fn field_children<'a>(node: &Node<'a>, field: &str) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'a>> = node.children_by_field_name(field, &mut cursor).collect();
    children
}

/// Lexical scope walk of one file.
struct ScopeWalker<'p, 'f> {
    package: &'p PackageTypes,
    file_index: usize,
    file: &'f ParsedFile,
    scopes: Vec<FxHashMap<String, Object>>,
    uses: FxHashMap<usize, Object>,
    locals: FxHashSet<String>,
}

impl<'p, 'f> ScopeWalker<'p, 'f> {
    fn new(package: &'p PackageTypes, file_index: usize, file: &'f ParsedFile) -> Self {
        Self {
            package,
            file_index,
            file,
            scopes: Vec::new(),
            uses: FxHashMap::default(),
            locals: FxHashSet::default(),
        }
    }

    fn walk(&mut self, node: Node) {
        match node.kind() {
            "function_declaration" | "method_declaration" | "func_literal" => {
                self.scopes.push(FxHashMap::default());
                if let Some(receiver) = node.child_by_field_name("receiver") {
                    self.declare_parameters(&receiver);
                }
                if let Some(parameters) = node.child_by_field_name("parameters") {
                    self.declare_parameters(&parameters);
                }
                if let Some(result) = node.child_by_field_name("result") {
                    if result.kind() == "parameter_list" {
                        self.declare_parameters(&result);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.walk_children(body);
                }
                self.scopes.pop();
            }
            "block" | "if_statement" | "for_statement" | "expression_switch_statement"
            | "select_statement" | "expression_case" | "default_case" | "type_case"
            | "communication_case" => {
                self.scopes.push(FxHashMap::default());
                self.walk_children(node);
                self.scopes.pop();
            }
            "type_switch_statement" => {
                self.scopes.push(FxHashMap::default());
                if let Some(initializer) = node.child_by_field_name("initializer") {
                    self.walk(initializer);
                }
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value);
                }
                for alias in field_children(&node, "alias") {
                    let mut cursor = alias.walk();
                    let names: Vec<Node> = alias.named_children(&mut cursor).collect();
                    let names = if names.is_empty() { vec![alias] } else { names };
                    for name in names {
                        self.declare(&name, Object::Var { ty: None });
                    }
                }
                let mut cursor = node.walk();
                let cases: Vec<Node> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "type_case" || c.kind() == "default_case")
                    .collect();
                for case in cases {
                    self.walk(case);
                }
                self.scopes.pop();
            }
            "short_var_declaration" => {
                let left = node.child_by_field_name("left");
                let right = node.child_by_field_name("right");
                if let Some(right) = right {
                    self.walk(right);
                }
                let values: Vec<Node> = right
                    .map(|r| {
                        let mut cursor = r.walk();
                        let values: Vec<Node> = r.named_children(&mut cursor).collect();
                        values
                    })
                    .unwrap_or_default();
                if let Some(left) = left {
                    let mut cursor = left.walk();
                    let names: Vec<Node> = left.named_children(&mut cursor).collect();
                    for (i, name) in names.iter().enumerate() {
                        let ty = if names.len() == values.len() {
                            self.infer_type(&values[i])
                        } else {
                            None
                        };
                        self.declare(name, Object::Var { ty });
                    }
                }
            }
            "var_spec" | "const_spec" if !self.scopes.is_empty() => {
                let declared = node
                    .child_by_field_name("type")
                    .map(|t| self.package.resolve_type(self.file_index, &t, &self.file.source));
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value);
                }
                let object = if node.kind() == "const_spec" {
                    Object::Const
                } else {
                    Object::Var { ty: declared }
                };
                for name in field_children(&node, "name") {
                    self.declare(&name, object.clone());
                }
            }
            "range_clause" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.walk(right);
                }
                let defines = {
                    let mut cursor = node.walk();
                    let found = node.children(&mut cursor).any(|c| c.kind() == ":=");
                    found
                };
                if let Some(left) = node.child_by_field_name("left") {
                    if defines {
                        let mut cursor = left.walk();
                        let names: Vec<Node> = left.named_children(&mut cursor).collect();
                        for name in names {
                            self.declare(&name, Object::Var { ty: None });
                        }
                    } else {
                        self.walk(left);
                    }
                }
            }
            "type_spec" | "type_alias" if !self.scopes.is_empty() => {
                if let Some(name) = node.child_by_field_name("name") {
                    let object = Object::TypeName {
                        path: self.package.import_path.clone(),
                        name: self.file.text(&name).to_string(),
                    };
                    self.declare(&name, object);
                }
            }
            "selector_expression" => {
                if let Some(operand) = node.child_by_field_name("operand") {
                    self.walk(operand);
                }
            }
            "keyed_element" => {
                // struct literal keys are field names, not references
                let mut cursor = node.walk();
                let parts: Vec<Node> = node.named_children(&mut cursor).collect();
                for (i, part) in parts.iter().enumerate() {
                    let inner = crate::ast::tree_methods::literal_inner(*part);
                    if i == 0 && inner.kind() == "identifier" {
                        continue;
                    }
                    self.walk(*part);
                }
            }
            "identifier" => {
                let name = self.file.text(&node);
                if let Some(object) = self.lookup(name) {
                    self.uses.insert(node.start_byte(), object);
                }
            }
            "package_identifier" => {
                let name = self.file.text(&node);
                let path = self
                    .imports()
                    .iter()
                    .find(|i| i.local_name == name)
                    .map(|i| i.path.clone());
                if let Some(path) = path {
                    self.uses.insert(node.start_byte(), Object::PkgName { path });
                }
            }
            "comment" | "import_declaration" | "package_clause" => {}
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.walk(child);
        }
    }

    fn imports(&self) -> &[ImportedPackage] {
        self.package
            .files
            .get(self.file_index)
            .map(|f| f.imports.as_slice())
            .unwrap_or(&[])
    }

    fn declare_parameters(&mut self, list: &Node) {
        let mut cursor = list.walk();
        let declarations: Vec<Node> = list.named_children(&mut cursor).collect();
        for declaration in declarations {
            let ty = declaration
                .child_by_field_name("type")
                .map(|t| self.package.resolve_type(self.file_index, &t, &self.file.source));
            for name in field_children(&declaration, "name") {
                self.declare(&name, Object::Var { ty: ty.clone() });
            }
        }
    }

    fn declare(&mut self, name: &Node, object: Object) {
        let text = self.file.text(name);
        if text == "_" {
            return;
        }
        self.uses.insert(name.start_byte(), object.clone());
        if let Some(scope) = self.scopes.last_mut() {
            self.locals.insert(text.to_string());
            scope.insert(text.to_string(), object);
        }
    }

    fn lookup(&self, name: &str) -> Option<Object> {
        for scope in self.scopes.iter().rev() {
            if let Some(object) = scope.get(name) {
                return Some(object.clone());
            }
        }
        if let Some(decl) = self.package.declarations.get(name) {
            let path = self.package.import_path.clone();
            return Some(match decl.kind {
                DeclKind::Func => Object::Func {
                    path,
                    name: name.to_string(),
                },
                DeclKind::Type => Object::TypeName {
                    path,
                    name: name.to_string(),
                },
                DeclKind::Var => Object::Var {
                    ty: decl.ty.clone(),
                },
                DeclKind::Const => Object::Const,
            });
        }
        if let Some(import) = self
            .imports()
            .iter()
            .find(|i| i.local_name == name && i.alias.as_deref() != Some("_"))
        {
            return Some(Object::PkgName {
                path: import.path.clone(),
            });
        }
        in_universe(name, self.package.go_version).then(|| Object::Builtin(name.to_string()))
    }

    /// Static type of an initializer, when it is spelled out in the expression.
    fn infer_type(&self, value: &Node) -> Option<TypeRef> {
        match value.kind() {
            "composite_literal" => value
                .child_by_field_name("type")
                .map(|t| self.package.resolve_type(self.file_index, &t, &self.file.source)),
            "unary_expression" => {
                let operator = value.child_by_field_name("operator")?;
                let operand = value.child_by_field_name("operand")?;
                if self.file.text(&operator) != "&" {
                    return None;
                }
                self.infer_type(&operand).map(TypeRef::pointer_to)
            }
            "identifier" => match self.lookup(self.file.text(value))? {
                Object::Var { ty } => ty,
                _ => None,
            },
            _ => None,
        }
    }
}

/// Universe-scope names available at `version`.
pub fn in_universe(name: &str, version: GoVersion) -> bool {
    match name {
        "any" | "comparable" => version >= GoVersion::new(1, 18),
        "min" | "max" | "clear" => version >= GoVersion::new(1, 21),
        "true" | "false" | "nil" | "iota" => true,
        _ => BUILTIN_TYPES.contains(&name) || BUILTIN_FUNCTIONS.contains(&name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_file;
    use crate::cancel::Cancellation;
    use crate::typing::archive::{build_archive, textual_pkgdef};
    use crate::typing::ArchiveInfo;
    use crate::ast::tree_methods::find_nodes_by_kind;
    use dashmap::DashMap;
    use std::path::Path;
    use std::sync::Arc;

    fn check(sources: &[&str]) -> Result<(Vec<ParsedFile>, PackageTypes)> {
        let files: Vec<ParsedFile> = sources
            .iter()
            .enumerate()
            .map(|(i, src)| parse_file(Path::new(&format!("f{i}.go")), src.as_bytes()).unwrap())
            .collect();
        let lookup = |path: &str| -> Result<Option<Vec<u8>>> {
            let name = match path {
                "net/http" => "http",
                "gopkg.in/yaml.v3" => "yaml",
                _ => return Ok(None),
            };
            Ok(Some(build_archive(&textual_pkgdef("go1.22", name, &[]))))
        };
        let cache: DashMap<String, Option<Arc<ArchiveInfo>>> = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&lookup, &cache, &cancel);
        let types = check_package("example.com/app", Some(GoVersion::new(1, 22)), &files, &importer)?;
        Ok((files, types))
    }

    #[test]
    fn test_selector_operand_resolves_to_package() {
        let src = "package app\n\nimport \"net/http\"\n\nfunc f() {\n\thttp.Handle(\"/\", nil)\n}\n";
        let (files, types) = check(&[src]).unwrap();
        let selector = find_nodes_by_kind(&files[0].root(), "selector_expression")[0];
        let operand = selector.child_by_field_name("operand").unwrap();
        assert_eq!(
            types.file(0).unwrap().object_at(&operand),
            Some(&Object::PkgName {
                path: "net/http".into()
            })
        );
    }

    #[test]
    fn test_local_variable_shadows_import() {
        let src = "package app\n\nimport \"net/http\"\n\nvar _ = http.StatusOK\n\nfunc f() {\n\thttp := struct{ Handle func(string, any) }{}\n\thttp.Handle(\"/\", nil)\n}\n";
        let (files, types) = check(&[src]).unwrap();
        let selectors = find_nodes_by_kind(&files[0].root(), "selector_expression");
        let shadowed = selectors
            .iter()
            .find(|s| files[0].text(s) == "http.Handle")
            .unwrap();
        let operand = shadowed.child_by_field_name("operand").unwrap();
        assert!(matches!(
            types.file(0).unwrap().object_at(&operand),
            Some(Object::Var { .. })
        ));
    }

    #[test]
    fn test_parameter_types_are_resolved() {
        let src = "package app\n\nimport (\n\t\"context\"\n\tnh \"net/http\"\n)\n\ntype Req = nh.Request\n\nfunc f(ctx context.Context, r *Req) {\n\t_ = ctx\n\t_ = r\n}\n";
        let (files, types) = check(&[src]).unwrap();
        let file = types.file(0).unwrap();
        let idents = find_nodes_by_kind(&files[0].root(), "identifier");
        let r_use = idents
            .iter()
            .filter(|i| files[0].text(i) == "r")
            .last()
            .unwrap();
        assert_eq!(
            file.object_at(r_use),
            Some(&Object::Var {
                ty: Some(TypeRef::pointer_to(TypeRef::named("net/http", "Request")))
            })
        );
        let ctx_use = idents
            .iter()
            .filter(|i| files[0].text(i) == "ctx")
            .last()
            .unwrap();
        assert_eq!(
            file.object_at(ctx_use),
            Some(&Object::Var {
                ty: Some(TypeRef::named("context", "Context"))
            })
        );
    }

    #[test]
    fn test_declarations_span_files() {
        let a = "package app\n\nfunc helper() {}\n";
        let b = "package app\n\nfunc run() { helper() }\n";
        let (files, types) = check(&[a, b]).unwrap();
        let call = find_nodes_by_kind(&files[1].root(), "call_expression")[0];
        let function = call.child_by_field_name("function").unwrap();
        assert_eq!(
            types.file(1).unwrap().object_at(&function),
            Some(&Object::Func {
                path: "example.com/app".into(),
                name: "helper".into()
            })
        );
        assert_eq!(types.declaration("helper").unwrap().file, 0);
    }

    #[test]
    fn test_broken_packages_are_type_errors() {
        let dup = check(&["package app\n\nfunc a() {}\n", "package app\n\nfunc a() {}\n"]);
        assert!(matches!(dup, Err(WeaverError::TypeCheck { .. })));

        let mixed = check(&["package app\n", "package other\n"]);
        assert!(mixed.unwrap_err().is_user_source_error());

        let clash = check(&["package app\n\nimport \"gopkg.in/yaml.v3\"\n\nvar yaml = 1\n"]);
        assert!(matches!(clash, Err(WeaverError::TypeCheck { .. })));
    }

    #[test]
    fn test_binds_sees_locals_declarations_and_other_imports() {
        let src = "package app\n\nimport \"net/http\"\n\nvar client = 1\n\nfunc serve(tool http.Handler) {\n\tfor i := range 3 {\n\t\t_ = i\n\t}\n}\n";
        let (_, types) = check(&[src]).unwrap();
        assert!(types.binds(0, "tool", "github.com/weaver-go/tool"));
        assert!(types.binds(0, "i", "github.com/weaver-go/tool"));
        assert!(types.binds(0, "client", "github.com/weaver-go/tool"));
        assert!(types.binds(0, "http", "github.com/weaver-go/tool"));
        assert!(!types.binds(0, "http", "net/http"));
        assert!(!types.binds(0, "sqltrace", "github.com/weaver-go/tool/sqltrace"));
    }

    #[test]
    fn test_undefined_identifiers_stay_unresolved() {
        let src = "package app\n\nfunc f() {\n\tmissing()\n}\n";
        let (files, types) = check(&[src]).unwrap();
        let call = find_nodes_by_kind(&files[0].root(), "call_expression")[0];
        let function = call.child_by_field_name("function").unwrap();
        assert_eq!(types.file(0).unwrap().object_at(&function), None);
    }

    #[test]
    fn test_universe_depends_on_version() {
        assert!(in_universe("any", GoVersion::new(1, 18)));
        assert!(!in_universe("any", GoVersion::new(1, 17)));
        assert!(in_universe("min", GoVersion::new(1, 21)));
        assert!(!in_universe("clear", GoVersion::new(1, 20)));
        assert!(in_universe("len", GoVersion::new(1, 0)));
    }
}
