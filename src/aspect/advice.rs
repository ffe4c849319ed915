//! Advice: the mutations applied at a matched node.
//!
//! Advice records edits in the file's [`Rewriter`](crate::injector::rewrite::Rewriter)
//! and dependencies in its reference map. It never edits a statement that already carries
//! wrap markers, and never prepends to a body that already starts with an instrument block,
//! so weaving an instrumented file is a no-op.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tree_sitter::Node;

use super::join_point::single_value;
use super::template::{Template, TemplateVars};
use crate::ast::decorations::Marker;
use crate::ast::tree_methods::{literal_inner, quote, significant_children};
use crate::injector::context::{AdviceContext, MatchContext};
use crate::injector::rewrite::Bias;
use crate::typing::{Object, TypeRef};

/// Import path of the instrumentation runtime.
pub const TOOL_PATH: &str = "github.com/weaver-go/tool";
pub const TOOL_ALIAS: &str = "tool";

/// Directive carrying span tags: `//tool:span key:value ...`.
pub const SPAN_DIRECTIVE: &str = "tool:span";

const HOLE_SENTINEL: &str = "\u{1}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Advice {
    /// Wrap argument `index` of a call in the template's hole.
    WrapCallArgument { index: usize, template: Template },
    /// Wrap the value of a keyed struct field or of a single-value declaration.
    WrapExpression { template: Template },
    /// Wrap a declared value (template with a hole) or give an uninitialized
    /// variable one (template without).
    AssignValue { template: Template },
    /// Prepend statements to a function body.
    PrependStatements { template: Template },
    /// Report the function's execution as a span, tagged from a `//tool:span` directive.
    ReportSpan {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        tags: BTreeMap<String, String>,
    },
    AddBlankImport { path: String },
    /// Call `alias.Name` from package `to` instead of `Name` from package `from`.
    ReplaceCallTarget {
        from: String,
        to: String,
        alias: String,
    },
    /// Append declarations to the file. `links` are packages needed at link time only.
    InjectDeclarations {
        template: Template,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        links: Vec<String>,
    },
}

/// Where a wrapping advice puts its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapSite {
    /// Argument `n` of a call.
    CallArgument(usize),
    /// Value of a keyed struct field or of a single-value declaration.
    Value,
}

/// How uninstrumenting undoes one advice inside a wrap-marker pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revert<'a> {
    /// Peel one application of `template` off an expression at `site`.
    Unwrap { site: WrapSite, template: &'a Template },
    /// Drop the initializer `template` gave a variable.
    Unassign { template: &'a Template },
    /// Call through package `from` again instead of `alias` from package `to`.
    Retarget { alias: &'a str, from: &'a str, to: &'a str },
}

impl Advice {
    pub fn name(&self) -> &'static str {
        match self {
            Advice::WrapCallArgument { .. } => "wrap-call-argument",
            Advice::WrapExpression { .. } => "wrap-expression",
            Advice::AssignValue { .. } => "assign-value",
            Advice::PrependStatements { .. } => "prepend-statements",
            Advice::ReportSpan { .. } => "report-span",
            Advice::AddBlankImport { .. } => "add-blank-import",
            Advice::ReplaceCallTarget { .. } => "replace-call-target",
            Advice::InjectDeclarations { .. } => "inject-declarations",
        }
    }

    /// Apply at `ctx.matched.node`. `Ok(false)` when there was nothing to do.
    pub fn apply(&self, ctx: &mut AdviceContext) -> Result<bool, String> {
        match self {
            Advice::WrapCallArgument { index, template } => wrap_call_argument(ctx, *index, template),
            Advice::WrapExpression { template } => wrap_expression(ctx, template),
            Advice::AssignValue { template } => assign_value(ctx, template),
            Advice::PrependStatements { template } => prepend_statements(ctx, template),
            Advice::ReportSpan { tags } => report_span(ctx, tags),
            Advice::AddBlankImport { path } => {
                ctx.references.add_import(path, "_");
                Ok(true)
            }
            Advice::ReplaceCallTarget { from, to, alias } => replace_call_target(ctx, from, to, alias),
            Advice::InjectDeclarations { template, links } => inject_declarations(ctx, template, links),
        }
    }

    pub fn revert(&self) -> Option<Revert<'_>> {
        match self {
            Advice::WrapCallArgument { index, template } => Some(Revert::Unwrap {
                site: WrapSite::CallArgument(*index),
                template,
            }),
            Advice::WrapExpression { template } => Some(Revert::Unwrap {
                site: WrapSite::Value,
                template,
            }),
            Advice::AssignValue { template } if template.has_hole() => Some(Revert::Unwrap {
                site: WrapSite::Value,
                template,
            }),
            Advice::AssignValue { template } => Some(Revert::Unassign { template }),
            Advice::ReplaceCallTarget { from, to, alias } => Some(Revert::Retarget { alias, from, to }),
            _ => None,
        }
    }
}

fn wrong_node(advice: &str, node: &Node) -> String {
    format!("{advice} cannot apply to a {} node", node.kind())
}

fn template_vars<'h>(matched: &MatchContext, hole: Option<&'h str>) -> TemplateVars<'h> {
    TemplateVars {
        hole,
        values: BTreeMap::new(),
    }
    .set("FuncName", function_name(matched))
    .set("PackageName", matched.file.package_name.clone())
    .set("ImportPath", matched.package.import_path.clone())
}

/// Name of the declared function at or around the matched node; literals take the name
/// of the declaration they appear in.
fn function_name(matched: &MatchContext) -> String {
    std::iter::once(&matched.node)
        .chain(matched.chain.iter().rev())
        .find(|n| matches!(n.kind(), "function_declaration" | "method_declaration"))
        .and_then(|n| n.child_by_field_name("name"))
        .map(|n| matched.text(&n).to_string())
        .unwrap_or_else(|| "func".to_string())
}

/// Surround `target` with the rendered template, leaving the target text in place.
fn wrap_node(ctx: &mut AdviceContext, target: &Node, template: &Template) -> Result<(), String> {
    if !template.has_hole() {
        return Err(format!("template {:?} has no {{{{.}}}} hole to wrap with", template.text));
    }
    let rendered = template.render(&template_vars(&ctx.matched, Some(HOLE_SENTINEL)))?;
    let (prefix, suffix) = rendered
        .split_once(HOLE_SENTINEL)
        .ok_or_else(|| "template hole was not rendered".to_string())?;
    if suffix.contains(HOLE_SENTINEL) {
        return Err("template uses its hole more than once".to_string());
    }
    let prefix = ctx.localize(template, prefix);
    let suffix = ctx.localize(template, suffix);
    ctx.rewriter.insert(target.start_byte(), prefix, Bias::Right);
    ctx.rewriter.insert(target.end_byte(), suffix, Bias::Left);
    Ok(())
}

fn enclosing_statement<'t>(ctx: &AdviceContext<'_, 't>) -> Result<Node<'t>, String> {
    ctx.matched
        .enclosing_statement()
        .ok_or_else(|| format!("no statement encloses the {} node", ctx.matched.node.kind()))
}

fn wrap_call_argument(ctx: &mut AdviceContext, index: usize, template: &Template) -> Result<bool, String> {
    let node = ctx.matched.node;
    if node.kind() != "call_expression" {
        return Err(wrong_node("wrap-call-argument", &node));
    }
    let statement = enclosing_statement(ctx)?;
    if ctx.statement_was_wrapped(&statement) {
        return Ok(false);
    }
    let arguments = node
        .child_by_field_name("arguments")
        .map(|list| significant_children(&list))
        .unwrap_or_default();
    let argument = arguments
        .get(index)
        .ok_or_else(|| format!("call has {} arguments, none at index {index}", arguments.len()))?;

    wrap_node(ctx, argument, template)?;
    ctx.use_template(template);
    ctx.wrap_statement(&statement);
    Ok(true)
}

fn wrap_expression(ctx: &mut AdviceContext, template: &Template) -> Result<bool, String> {
    let node = ctx.matched.node;
    let target = match node.kind() {
        "keyed_element" => {
            let elements = significant_children(&node);
            elements.get(1).map(|value| literal_inner(*value))
        }
        "var_spec" | "short_var_declaration" => single_value(&node),
        _ => return Err(wrong_node("wrap-expression", &node)),
    };
    let Some(target) = target else {
        return Err(format!("{} node has no single value to wrap", node.kind()));
    };
    let statement = enclosing_statement(ctx)?;
    if ctx.statement_was_wrapped(&statement) {
        return Ok(false);
    }
    wrap_node(ctx, &target, template)?;
    ctx.use_template(template);
    ctx.wrap_statement(&statement);
    Ok(true)
}

fn assign_value(ctx: &mut AdviceContext, template: &Template) -> Result<bool, String> {
    let node = ctx.matched.node;
    if template.has_hole() {
        return wrap_expression(ctx, template);
    }
    if node.kind() != "var_spec" {
        return Err(wrong_node("assign-value", &node));
    }
    let statement = enclosing_statement(ctx)?;
    if ctx.statement_was_wrapped(&statement) {
        return Ok(false);
    }
    if node.child_by_field_name("value").is_some() {
        return Err(format!(
            "variable {} already has an initializer",
            ctx.matched.text(&node)
        ));
    }
    let value = template.render(&template_vars(&ctx.matched, None))?;
    let value = ctx.localize(template, &value);
    ctx.rewriter
        .insert(node.end_byte(), format!(" = {value}"), Bias::Left);
    ctx.use_template(template);
    ctx.wrap_statement(&statement);
    Ok(true)
}

fn function_body<'t>(node: &Node<'t>, advice: &str) -> Result<Option<Node<'t>>, String> {
    match node.kind() {
        "function_declaration" | "method_declaration" | "func_literal" => {
            Ok(node.child_by_field_name("body"))
        }
        _ => Err(wrong_node(advice, node)),
    }
}

fn prepend_statements(ctx: &mut AdviceContext, template: &Template) -> Result<bool, String> {
    let node = ctx.matched.node;
    let Some(body) = function_body(&node, "prepend-statements")? else {
        return Ok(false);
    };
    if ctx.body_was_instrumented(&body) {
        return Ok(false);
    }
    let statements = template.render(&template_vars(&ctx.matched, None))?;
    let statements = ctx.localize(template, &statements);
    ctx.prepend_to_body(&body, &statements)?;
    ctx.use_template(template);
    Ok(true)
}

/// Named parameters of a function with their resolved types.
fn named_parameters<'t>(function: &Node<'t>, matched: &MatchContext<'_, 't>) -> Vec<(&'t str, TypeRef)> {
    let Some(list) = function.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut parameters = Vec::new();
    for declaration in significant_children(&list) {
        let Some(type_node) = declaration.child_by_field_name("type") else {
            continue;
        };
        if declaration.kind() != "parameter_declaration" {
            continue;
        }
        let ty = matched
            .types
            .resolve_type(matched.file_index, &type_node, &matched.file.source);
        let mut cursor = declaration.walk();
        let names: Vec<Node<'t>> = declaration
            .children_by_field_name("name", &mut cursor)
            .collect();
        for name in names {
            let text = matched.text(&name);
            if text != "_" {
                parameters.push((text, ty.clone()));
            }
        }
    }
    parameters
}

fn report_span(ctx: &mut AdviceContext, extra_tags: &BTreeMap<String, String>) -> Result<bool, String> {
    let node = ctx.matched.node;
    let Some(body) = function_body(&node, "report-span")? else {
        return Ok(false);
    };
    if ctx.body_was_instrumented(&body) {
        return Ok(false);
    }

    let mut arguments = vec![quote("function-name"), quote(&function_name(&ctx.matched))];
    let directive_tags = ctx
        .matched
        .file
        .decorations
        .leading_directive(&node, SPAN_DIRECTIVE)
        .map(|directive| directive.key_values())
        .unwrap_or_default();
    let extra = extra_tags.iter().map(|(k, v)| (k.clone(), v.clone()));
    for (key, value) in directive_tags.into_iter().chain(extra) {
        arguments.push(quote(&key));
        arguments.push(quote(&value));
    }
    let tags = arguments.join(", ");

    let context_type = TypeRef::named("context", "Context");
    let request_type = TypeRef::pointer_to(TypeRef::named("net/http", "Request"));
    let parameters = named_parameters(&node, &ctx.matched);
    let tool = ctx.bind_import(TOOL_PATH, TOOL_ALIAS);
    let statements = if let Some((name, _)) = parameters.iter().find(|(_, ty)| *ty == context_type) {
        format!(
            "{name} = {tool}.Report({name}, {tool}.EventStart, {tags})\n\
             defer {tool}.Report({name}, {tool}.EventEnd, {tags})"
        )
    } else if let Some((name, _)) = parameters.iter().find(|(_, ty)| *ty == request_type) {
        format!(
            "{name} = {name}.WithContext({tool}.Report({name}.Context(), {tool}.EventStart, {tags}))\n\
             defer {tool}.Report({name}.Context(), {tool}.EventEnd, {tags})"
        )
    } else {
        let context = ctx.bind_import("context", "context");
        ctx.references.add_import("context", &context);
        format!(
            "__toolCtx := {tool}.Report({context}.Background(), {tool}.EventStart, {tags})\n\
             defer {tool}.Report(__toolCtx, {tool}.EventEnd, {tags})"
        )
    };

    ctx.prepend_to_body(&body, &statements)?;
    ctx.references.add_import(TOOL_PATH, &tool);
    Ok(true)
}

fn replace_call_target(ctx: &mut AdviceContext, from: &str, to: &str, alias: &str) -> Result<bool, String> {
    let node = ctx.matched.node;
    if node.kind() != "call_expression" {
        return Err(wrong_node("replace-call-target", &node));
    }
    let function = node
        .child_by_field_name("function")
        .filter(|f| f.kind() == "selector_expression")
        .ok_or_else(|| "replace-call-target needs a qualified call".to_string())?;
    let (Some(operand), Some(field)) = (
        function.child_by_field_name("operand"),
        function.child_by_field_name("field"),
    ) else {
        return Err("malformed selector expression".to_string());
    };
    let refers_to_from = matches!(
        ctx.matched.file_types().and_then(|types| types.object_at(&operand)),
        Some(Object::PkgName { path }) if path == from
    );
    if !refers_to_from {
        return Err(format!(
            "{} does not refer to package {from}",
            ctx.matched.text(&operand)
        ));
    }
    let statement = enclosing_statement(ctx)?;
    if ctx.statement_was_wrapped(&statement) {
        return Ok(false);
    }

    let local = ctx.matched.text(&operand);
    let name = ctx.matched.text(&field);
    let bound = ctx.bind_import(to, alias);
    ctx.rewriter
        .replace(operand.start_byte()..operand.end_byte(), bound.as_str());
    ctx.references.add_import(to, &bound);
    // the original import must stay referenced
    ctx.references.keep_alive(format!("{local}.{name}"));
    ctx.wrap_statement(&statement);
    Ok(true)
}

fn inject_declarations(ctx: &mut AdviceContext, template: &Template, links: &[String]) -> Result<bool, String> {
    let node = ctx.matched.node;
    if node.kind() != "source_file" {
        return Err(wrong_node("inject-declarations", &node));
    }
    let rendered = template.render(&template_vars(&ctx.matched, None))?;
    let rendered = ctx.localize(template, &rendered);
    let source = ctx.source();
    if source.contains(rendered.trim()) {
        return Ok(false);
    }
    let separator = if source.is_empty() || source.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    ctx.rewriter.insert(
        source.len(),
        format!(
            "{separator}{}\n{}\n{}\n",
            Marker::StartInstrument.comment(),
            rendered.trim_end(),
            Marker::EndInstrument.comment()
        ),
        Bias::Left,
    );
    for link in links {
        ctx.references.add_relocation(link);
    }
    ctx.use_template(template);
    Ok(true)
}
