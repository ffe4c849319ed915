//! Aspects shipped with the weaver. They run before any configured aspect.

use std::collections::BTreeMap;

use super::advice::{Advice, SPAN_DIRECTIVE, TOOL_ALIAS, TOOL_PATH};
use super::join_point::{FunctionMatcher, JoinPoint, Signature, TypeMatch};
use super::template::Template;
use super::Aspect;

/// Wrapped `database/sql` replacement.
pub const SQLTRACE_PATH: &str = "github.com/weaver-go/tool/sqltrace";
pub const SQLTRACE_ALIAS: &str = "sqltrace";

/// Setting choosing between wrapping handlers and reporting from inside them.
pub const HTTP_MODE: &str = "httpmode";

/// Settings used when the caller provides none.
pub fn default_settings() -> BTreeMap<String, String> {
    BTreeMap::from([(HTTP_MODE.to_string(), "wrap".to_string())])
}

/// Import prefixes of the runtime itself; only tracer-internal aspects apply there.
pub fn default_internal_prefixes() -> Vec<String> {
    vec![TOOL_PATH.to_string()]
}

fn tool_template(text: &str) -> Template {
    Template::new(text).import(TOOL_ALIAS, TOOL_PATH)
}

fn aspect(id: &str, join_point: JoinPoint, advice: Vec<Advice>) -> Aspect {
    Aspect {
        id: id.to_string(),
        tracer_internal: false,
        join_point,
        advice,
    }
}

fn handler_field(pointer: bool) -> JoinPoint {
    let server = if pointer {
        TypeMatch::pointer("net/http", "Server")
    } else {
        TypeMatch::new("net/http", "Server")
    };
    JoinPoint::StructLiteralField {
        ty: server,
        field: "Handler".to_string(),
    }
}

pub fn builtin_aspects() -> Vec<Aspect> {
    vec![
        aspect(
            "http-handle-wrap",
            JoinPoint::all_of([
                JoinPoint::setting(HTTP_MODE, "wrap"),
                JoinPoint::function_call("net/http", "Handle"),
            ]),
            vec![Advice::WrapCallArgument {
                index: 1,
                template: tool_template("tool.WrapHandler({{.}})"),
            }],
        ),
        aspect(
            "http-handlefunc-wrap",
            JoinPoint::all_of([
                JoinPoint::setting(HTTP_MODE, "wrap"),
                JoinPoint::function_call("net/http", "HandleFunc"),
            ]),
            vec![Advice::WrapCallArgument {
                index: 1,
                template: tool_template("tool.WrapHandlerFunc({{.}})"),
            }],
        ),
        aspect(
            "http-server-handler-wrap",
            JoinPoint::all_of([
                JoinPoint::setting(HTTP_MODE, "wrap"),
                JoinPoint::one_of([handler_field(true), handler_field(false)]),
            ]),
            vec![Advice::WrapExpression {
                template: tool_template("tool.WrapHandler({{.}})"),
            }],
        ),
        aspect(
            "http-handler-report",
            JoinPoint::all_of([
                JoinPoint::setting(HTTP_MODE, "report"),
                JoinPoint::FunctionDeclaration(FunctionMatcher {
                    signature: Some(Signature {
                        args: vec![
                            TypeMatch::new("net/http", "ResponseWriter"),
                            TypeMatch::pointer("net/http", "Request"),
                        ],
                        returns: Vec::new(),
                    }),
                    ..Default::default()
                }),
            ]),
            vec![Advice::ReportSpan {
                tags: BTreeMap::new(),
            }],
        ),
        aspect(
            "span-directive",
            JoinPoint::all_of([
                JoinPoint::Directive(SPAN_DIRECTIVE.to_string()),
                JoinPoint::FunctionDeclaration(FunctionMatcher::default()),
            ]),
            vec![Advice::ReportSpan {
                tags: BTreeMap::new(),
            }],
        ),
        aspect(
            "main-init",
            JoinPoint::all_of([
                JoinPoint::PackageName("main".to_string()),
                JoinPoint::FunctionDeclaration(FunctionMatcher {
                    name: Some("main".to_string()),
                    receiver: None,
                    signature: Some(Signature::default()),
                    parameter: None,
                }),
            ]),
            vec![Advice::PrependStatements {
                template: tool_template("defer tool.Init()()"),
            }],
        ),
        aspect(
            "database-sql-open",
            JoinPoint::one_of([
                JoinPoint::function_call("database/sql", "Open"),
                JoinPoint::function_call("database/sql", "OpenDB"),
            ]),
            vec![Advice::ReplaceCallTarget {
                from: "database/sql".to_string(),
                to: SQLTRACE_PATH.to_string(),
                alias: SQLTRACE_ALIAS.to_string(),
            }],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_builtin_ids_are_unique_and_stable() {
        let aspects = builtin_aspects();
        let ids: BTreeSet<&str> = aspects.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), aspects.len());
        assert_eq!(aspects[0].fingerprint(), builtin_aspects()[0].fingerprint());
    }

    #[test]
    fn test_builtins_survive_serde() {
        for aspect in builtin_aspects() {
            let json = serde_json::to_string(&aspect).unwrap();
            let back: Aspect = serde_json::from_str(&json).unwrap();
            assert_eq!(back, aspect);
        }
    }
}
