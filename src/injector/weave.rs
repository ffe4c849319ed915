//! Weaving one file: traverse, match, apply advice, reconcile imports, render.

use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use tracing::debug;

use super::context::{AdviceContext, MatchContext, PackageInfo};
use super::imports::reconcile;
use super::positions::annotate;
use super::printer::strip_directive_indentation;
use super::references::ReferenceMap;
use super::rewrite::Rewriter;
use super::traverse::{walk, Visit};
use crate::aspect::Aspect;
use crate::ast::decorations::Marker;
use crate::ast::ParsedFile;
use crate::error::{Result, WeaverError};
use crate::typing::{Importer, PackageTypes};
use crate::version::GoVersion;

/// Aspect id reported for import reconciliation failures.
const RECONCILER: &str = "import-reconciler";
const ANNOTATOR: &str = "position-annotator";

/// Outcome of weaving one file.
#[derive(Debug, Default)]
pub struct WovenFile {
    /// New file text; `None` when nothing changed.
    pub text: Option<String>,
    pub references: ReferenceMap,
    pub go_version: Option<GoVersion>,
}

#[allow(clippy::too_many_arguments)]
pub fn weave_file(
    file: &ParsedFile,
    file_index: usize,
    types: &PackageTypes,
    package: &PackageInfo,
    aspects: &[&Aspect],
    importer: &Importer,
    emit_line_directives: bool,
) -> Result<WovenFile> {
    let mut rewriter = Rewriter::new(&file.source);
    let mut references = ReferenceMap::new();
    let mut go_version: Option<GoVersion> = None;
    let mut wrapped: FxHashSet<usize> = FxHashSet::default();
    let mut aliases: BTreeMap<String, String> = BTreeMap::new();
    let mut applied = 0usize;
    let decorations = &file.decorations;

    walk::<WeaverError>(
        file.root(),
        |node, _| {
            // containers share their start byte with their first child
            let container = matches!(node.kind(), "source_file" | "statement_list");
            if !container && decorations.has_leading_marker(node, Marker::Ignore) {
                debug!("{}: ignoring {} node", file.name(), node.kind());
                Visit::Prune
            } else {
                Visit::Continue
            }
        },
        |node, chain| {
            if !node.is_named() {
                return Ok(());
            }
            let matched = MatchContext {
                node: *node,
                chain,
                file,
                file_index,
                types,
                package,
            };
            let already_instrumented = matched
                .enclosing_statement()
                .is_some_and(|statement| decorations.has_leading_marker(&statement, Marker::Instrumented));
            if already_instrumented {
                return Ok(());
            }

            for aspect in aspects {
                if !aspect.join_point.matches(&matched) {
                    continue;
                }
                for (index, advice) in aspect.advice.iter().enumerate() {
                    let mut ctx = AdviceContext {
                        matched,
                        rewriter: &mut rewriter,
                        references: &mut references,
                        min_go_version: &mut go_version,
                        wrapped: &mut wrapped,
                        aliases: &mut aliases,
                    };
                    match advice.apply(&mut ctx) {
                        Ok(true) => applied += 1,
                        Ok(false) => {}
                        Err(message) => {
                            return Err(WeaverError::Advice {
                                file: file.name(),
                                aspect: aspect.id.clone(),
                                index,
                                message,
                            })
                        }
                    }
                }
            }
            Ok(())
        },
    )?;

    if applied > 0 || !references.is_empty() {
        reconcile(file, &references, importer, &mut rewriter)?.map_err(|message| {
            WeaverError::Advice {
                file: file.name(),
                aspect: RECONCILER.to_string(),
                index: 0,
                message,
            }
        })?;
    }
    debug!("{}: {applied} advice application(s)", file.name());

    if rewriter.is_empty() {
        return Ok(WovenFile {
            text: None,
            references,
            go_version,
        });
    }

    let rendered = if emit_line_directives {
        annotate(file, &mut rewriter)
    } else {
        rewriter.render().map(|rendered| rendered.text)
    };
    let text = rendered.map_err(|message| WeaverError::Advice {
        file: file.name(),
        aspect: ANNOTATOR.to_string(),
        index: 0,
        message,
    })?;

    Ok(WovenFile {
        text: Some(strip_directive_indentation(&text).into_owned()),
        references,
        go_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::{builtin_aspects, Advice, JoinPoint, Template};
    use crate::aspect::builtin::default_settings;
    use crate::ast::parse_file;
    use crate::cancel::Cancellation;
    use crate::typing::{check_package, NoArchives};
    use dashmap::DashMap;
    use std::path::Path;

    fn weave(source: &str, aspects: &[Aspect], emit: bool) -> Result<WovenFile> {
        let file = parse_file(Path::new("main.go"), source.as_bytes()).unwrap();
        let cache = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&NoArchives, &cache, &cancel);
        let files = vec![file];
        let types = check_package("main", None, &files, &importer).unwrap();
        let package = PackageInfo {
            import_path: "main".to_string(),
            package_name: "main".to_string(),
            test_main: false,
            settings: default_settings(),
        };
        let refs: Vec<&Aspect> = aspects.iter().collect();
        weave_file(&files[0], 0, &types, &package, &refs, &importer, emit)
    }

    #[test]
    fn test_untouched_file_has_no_text() {
        let woven = weave("package main\n\nfunc helper() {}\n", &builtin_aspects(), false).unwrap();
        assert!(woven.text.is_none());
        assert!(woven.references.is_empty());
    }

    #[test]
    fn test_ignored_declarations_are_skipped() {
        let source = "package main\n\n//tool:ignore\nfunc main() {\n\trun()\n}\n\nfunc run() {}\n";
        let woven = weave(source, &builtin_aspects(), false).unwrap();
        assert!(woven.text.is_none());
    }

    #[test]
    fn test_directives_are_emitted_on_request() {
        let source = "package main\n\nfunc main() {\n\trun()\n}\n\nfunc run() {}\n";
        let woven = weave(source, &builtin_aspects(), true).unwrap();
        let text = woven.text.unwrap();
        assert!(text.starts_with("//line main.go:1:1\n"), "{text}");
        assert!(text.contains("//line <generated>:1\n"), "{text}");
        assert!(text.contains("//line main.go:4\n\trun()"), "{text}");
    }

    #[test]
    fn test_advice_errors_name_the_aspect() {
        let broken = Aspect {
            id: "broken".to_string(),
            tracer_internal: false,
            join_point: JoinPoint::SourceFile,
            advice: vec![
                Advice::AddBlankImport {
                    path: "net/http/pprof".to_string(),
                },
                Advice::WrapCallArgument {
                    index: 0,
                    template: Template::new("f({{.}})"),
                },
            ],
        };
        let err = weave("package main\n", &[broken], false).unwrap_err();
        match err {
            WeaverError::Advice { aspect, index, .. } => {
                assert_eq!(aspect, "broken");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
