//! Aspect injector
//!
//! Entry point for weaving one package: pre-filter aspects, parse and type-check the
//! package once, then weave every file on its own worker.
//!
//! - `weave.rs`: the per-file pipeline
//! - `traverse.rs`: depth-first walk with pre/post hooks
//! - `context.rs`: node chain and advice accumulators
//! - `rewrite.rs`: edit buffer over the original bytes
//! - `references.rs`: dependencies introduced by injected code
//! - `imports.rs`: import reconciliation
//! - `positions.rs`: `//line` annotation
//! - `printer.rs`: output fix-ups and writing
//! - `uninstrument.rs`: removing woven code

pub mod context;
pub mod imports;
pub mod positions;
pub mod printer;
pub mod references;
pub mod rewrite;
pub mod traverse;
pub mod uninstrument;
pub mod weave;

pub use context::PackageInfo;
pub use references::{ReferenceKind, ReferenceMap};
pub use weave::{weave_file, WovenFile};

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::aspect::builtin::{default_internal_prefixes, default_settings};
use crate::aspect::{Aspect, FileFacts, MayMatch, PackageFacts};
use crate::ast::{parse_file, parse_files, scan_package_name, ParsedFile};
use crate::cache::{CacheEntry, CacheKey, CacheStore, CachedFile, TOOL_VERSION};
use crate::cancel::Cancellation;
use crate::error::{Result, WeaverError};
use crate::typing::{check_package, ArchiveInfo, ArchiveLookup, ImportMap, Importer, NoArchives};
use crate::utils::hashing::hash_contents_batch;
use crate::version::GoVersion;

/// Aggregate bytes the file pre-filter scans before giving up and parsing everything.
pub const DEFAULT_PREFILTER_CEILING: usize = 512 * 1024;

/// Settings of one injector instance. `import_path` and `lookup` are mandatory.
pub struct InjectorConfig {
    pub import_path: String,
    /// Language version declared for the package.
    pub go_version: Option<GoVersion>,
    /// The package is the synthesized test main.
    pub test_main: bool,
    pub import_map: ImportMap,
    /// Write woven files here instead of over the originals.
    pub output_dir: Option<PathBuf>,
    pub emit_line_directives: bool,
    pub prefilter_ceiling: usize,
    /// Packages under these prefixes only receive tracer-internal aspects.
    pub internal_prefixes: Vec<String>,
    pub settings: BTreeMap<String, String>,
    pub lookup: Option<Arc<dyn ArchiveLookup>>,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            import_path: String::new(),
            go_version: None,
            test_main: false,
            import_map: ImportMap::new(),
            output_dir: None,
            emit_line_directives: true,
            prefilter_ceiling: DEFAULT_PREFILTER_CEILING,
            internal_prefixes: default_internal_prefixes(),
            settings: default_settings(),
            lookup: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedFile {
    /// Where the woven file was written.
    pub modified_path: PathBuf,
    pub references: ReferenceMap,
    pub contents: String,
}

/// Result of injecting one package. Files that needed no change are absent.
#[derive(Debug, Default)]
pub struct InjectionOutcome {
    /// Keyed by original path.
    pub files: BTreeMap<PathBuf, InjectedFile>,
    pub go_version: Option<GoVersion>,
    /// Per-file failures; any of them should block the package.
    pub errors: Vec<WeaverError>,
}

impl InjectionOutcome {
    /// Fail when any file failed.
    pub fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(WeaverError::Files(self.errors))
        }
    }

    /// References of all files, merged.
    pub fn references(&self) -> ReferenceMap {
        let mut merged = ReferenceMap::new();
        for file in self.files.values() {
            merged.merge(&file.references);
        }
        merged
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bytes in front of the parsed source, i.e. a leading `//line` directive.
fn leading_prefix<'b>(bytes: &'b [u8], file: &ParsedFile) -> &'b str {
    let end = bytes.len().saturating_sub(file.source.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

pub struct Injector {
    config: InjectorConfig,
    lookup: Arc<dyn ArchiveLookup>,
    /// Dependency metadata, shared by every package this injector handles.
    metadata: DashMap<String, Option<Arc<ArchiveInfo>>>,
}

impl Injector {
    pub fn new(config: InjectorConfig) -> Result<Self> {
        if config.import_path.is_empty() {
            return Err(WeaverError::Validation(
                "the injector needs the import path of the package".to_string(),
            ));
        }
        let lookup = config.lookup.clone().ok_or_else(|| {
            WeaverError::Validation("the injector needs a dependency lookup".to_string())
        })?;
        Ok(Self {
            config,
            lookup,
            metadata: DashMap::new(),
        })
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    fn is_internal(&self) -> bool {
        let path = self.config.import_path.as_str();
        self.config.internal_prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Aspects that may match this package, in their original order.
    fn package_aspects<'s>(&self, aspects: &'s [Aspect]) -> Vec<&'s Aspect> {
        let internal = self.is_internal();
        let facts = PackageFacts {
            import_path: &self.config.import_path,
            import_map: &self.config.import_map,
            test_main: self.config.test_main,
            settings: &self.config.settings,
        };
        aspects
            .iter()
            .filter(|aspect| !internal || aspect.tracer_internal)
            .filter(|aspect| aspect.package_may_match(&facts) != MayMatch::CantMatch)
            .collect()
    }

    fn read_sources(
        &self,
        cancel: &Cancellation,
        paths: &[PathBuf],
    ) -> Result<std::result::Result<Vec<(PathBuf, Vec<u8>)>, Vec<WeaverError>>> {
        let mut sources = Vec::with_capacity(paths.len());
        let mut errors = Vec::new();
        for path in paths {
            cancel.check()?;
            match fs::read(path) {
                Ok(bytes) => sources.push((path.clone(), bytes)),
                Err(e) => errors.push(WeaverError::io(path, e)),
            }
        }
        Ok(if errors.is_empty() {
            Ok(sources)
        } else {
            Err(errors)
        })
    }

    /// Weave the files of this injector's package.
    ///
    /// Per-file failures are collected in the outcome; configuration, toolchain and
    /// cancellation errors are returned directly. A package that does not parse or
    /// type-check is left alone for the compiler to report.
    pub fn inject_files(
        &self,
        cancel: &Cancellation,
        paths: &[PathBuf],
        aspects: &[Aspect],
    ) -> Result<InjectionOutcome> {
        let aspects = self.package_aspects(aspects);
        if aspects.is_empty() {
            debug!("{}: no aspect applies", self.config.import_path);
            return Ok(InjectionOutcome::default());
        }
        match self.read_sources(cancel, paths)? {
            Ok(sources) => self.inject_sources(cancel, &sources, &aspects),
            Err(errors) => Ok(InjectionOutcome {
                errors,
                ..Default::default()
            }),
        }
    }

    /// Like [`Injector::inject_files`], serving and filling `store`.
    pub fn inject_files_cached(
        &self,
        cancel: &Cancellation,
        paths: &[PathBuf],
        aspects: &[Aspect],
        store: &dyn CacheStore,
    ) -> Result<InjectionOutcome> {
        let sources = match self.read_sources(cancel, paths)? {
            Ok(sources) => sources,
            Err(errors) => {
                return Ok(InjectionOutcome {
                    errors,
                    ..Default::default()
                })
            }
        };
        let contents: Vec<&[u8]> = sources.iter().map(|(_, bytes)| bytes.as_slice()).collect();
        let fingerprints: Vec<String> = aspects.iter().map(Aspect::fingerprint).collect();
        let import_paths: Vec<String> = self
            .config
            .import_map
            .import_paths()
            .map(str::to_string)
            .collect();
        let key = CacheKey::compute(
            TOOL_VERSION,
            &self.config.import_path,
            self.config.go_version,
            self.config.test_main,
            &hash_contents_batch(&contents),
            &fingerprints,
            &import_paths,
        );

        if let Some(bytes) = store.get(&key) {
            match CacheEntry::from_bytes(&bytes) {
                Ok(entry) => return self.restore(&key, entry),
                Err(e) => warn!("discarding unreadable cache entry {key}: {e}"),
            }
        }

        let aspects = self.package_aspects(aspects);
        let outcome = if aspects.is_empty() {
            InjectionOutcome::default()
        } else {
            self.inject_sources(cancel, &sources, &aspects)?
        };
        if outcome.errors.is_empty() {
            let entry = CacheEntry {
                files: outcome
                    .files
                    .iter()
                    .map(|(path, file)| {
                        (
                            path.display().to_string(),
                            CachedFile {
                                contents: file.contents.clone(),
                                references: file.references.clone(),
                            },
                        )
                    })
                    .collect(),
                go_version: outcome.go_version,
            };
            match entry.to_bytes() {
                Ok(bytes) => store.put(&key, bytes),
                Err(e) => warn!("could not encode cache entry {key}: {e}"),
            }
        }
        Ok(outcome)
    }

    /// Write the files of a cache hit.
    fn restore(&self, key: &CacheKey, entry: CacheEntry) -> Result<InjectionOutcome> {
        debug!("{}: cache hit {key}", self.config.import_path);
        let mut outcome = InjectionOutcome {
            go_version: entry.go_version,
            ..Default::default()
        };
        for (original, cached) in entry.files {
            let original = PathBuf::from(original);
            match printer::write_file(&original, self.config.output_dir.as_deref(), &cached.contents) {
                Ok(modified_path) => {
                    outcome.files.insert(
                        original,
                        InjectedFile {
                            modified_path,
                            references: cached.references,
                            contents: cached.contents,
                        },
                    );
                }
                Err(e) => outcome.errors.push(e),
            }
        }
        Ok(outcome)
    }

    /// Per-file aspect lists, or `None` when no file can match anything.
    fn prefilter<'s>(
        &self,
        sources: &[(PathBuf, Vec<u8>)],
        aspects: &[&'s Aspect],
    ) -> Option<Vec<Vec<&'s Aspect>>> {
        let total: usize = sources.iter().map(|(_, bytes)| bytes.len()).sum();
        if total > self.config.prefilter_ceiling {
            debug!(
                "{}: {total} bytes exceed the pre-filter ceiling, parsing everything",
                self.config.import_path
            );
            return Some(vec![aspects.to_vec(); sources.len()]);
        }

        let per_file: Vec<Vec<&Aspect>> = sources
            .iter()
            .map(|(_, bytes)| {
                let package_name = scan_package_name(bytes);
                let facts = FileFacts {
                    bytes: bytes.as_slice(),
                    package_name: package_name.as_deref(),
                    import_path: &self.config.import_path,
                };
                aspects
                    .iter()
                    .copied()
                    .filter(|aspect| aspect.file_may_match(&facts) != MayMatch::CantMatch)
                    .collect()
            })
            .collect();
        per_file
            .iter()
            .any(|list| !list.is_empty())
            .then_some(per_file)
    }

    fn inject_sources(
        &self,
        cancel: &Cancellation,
        sources: &[(PathBuf, Vec<u8>)],
        aspects: &[&Aspect],
    ) -> Result<InjectionOutcome> {
        let import_path = self.config.import_path.as_str();
        let Some(per_file) = self.prefilter(sources, aspects) else {
            debug!("{import_path}: no file can match, skipping the parse");
            return Ok(InjectionOutcome::default());
        };

        let mut files = Vec::with_capacity(sources.len());
        for parsed in parse_files(sources) {
            match parsed {
                Ok(file) => files.push(file),
                Err(e) if e.is_user_source_error() => {
                    warn!("{import_path}: not instrumenting, the compiler will report: {e}");
                    return Ok(InjectionOutcome::default());
                }
                Err(e) => return Err(e),
            }
        }

        let importer = Importer::new(self.lookup.as_ref(), &self.metadata, cancel);
        let types = match check_package(import_path, self.config.go_version, &files, &importer) {
            Ok(types) => types,
            Err(e) if e.is_user_source_error() => {
                warn!("{import_path}: not instrumenting, the compiler will report: {e}");
                return Ok(InjectionOutcome::default());
            }
            Err(e) => return Err(e),
        };
        let package = PackageInfo {
            import_path: import_path.to_string(),
            package_name: types.package_name.clone(),
            test_main: self.config.test_main,
            settings: self.config.settings.clone(),
        };

        let results: Mutex<BTreeMap<PathBuf, InjectedFile>> = Mutex::new(BTreeMap::new());
        let errors: Mutex<Vec<WeaverError>> = Mutex::new(Vec::new());
        let go_version: Mutex<Option<GoVersion>> = Mutex::new(None);

        rayon::scope(|scope| {
            for (index, file) in files.iter().enumerate() {
                let (results, errors, go_version) = (&results, &errors, &go_version);
                let (importer, types, package) = (&importer, &types, &package);
                let file_aspects = per_file[index].as_slice();
                let prefix = leading_prefix(&sources[index].1, file);
                scope.spawn(move |_| {
                    if file_aspects.is_empty() {
                        return;
                    }
                    let woven = cancel.check().and_then(|()| {
                        weave_file(
                            file,
                            index,
                            types,
                            package,
                            file_aspects,
                            importer,
                            self.config.emit_line_directives,
                        )
                    });
                    let written = woven.and_then(|woven| {
                        let Some(text) = woven.text else {
                            return Ok(None);
                        };
                        let contents = if self.config.emit_line_directives {
                            text
                        } else {
                            format!("{prefix}{text}")
                        };
                        let modified_path = printer::write_file(
                            &file.path,
                            self.config.output_dir.as_deref(),
                            &contents,
                        )?;
                        Ok(Some((
                            InjectedFile {
                                modified_path,
                                references: woven.references,
                                contents,
                            },
                            woven.go_version,
                        )))
                    });
                    match written {
                        Ok(Some((injected, version))) => {
                            if let Some(version) = version {
                                GoVersion::raise(&mut lock(go_version), version);
                            }
                            lock(results).insert(file.path.clone(), injected);
                        }
                        Ok(None) => {}
                        Err(e) => lock(errors).push(e),
                    }
                });
            }
        });

        let mut errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(fatal) = errors
            .iter()
            .position(|e| matches!(e, WeaverError::Cancelled | WeaverError::ToolchainVersion { .. }))
        {
            return Err(errors.swap_remove(fatal));
        }
        let files = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let go_version = go_version.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            "{import_path}: woven {} file(s), {} error(s)",
            files.len(),
            errors.len()
        );
        Ok(InjectionOutcome {
            files,
            go_version,
            errors,
        })
    }
}

/// Package facts for [`instrument_source`].
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub import_path: String,
    pub test_main: bool,
    pub settings: BTreeMap<String, String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            import_path: "main".to_string(),
            test_main: false,
            settings: default_settings(),
        }
    }
}

/// Weave a single source text in memory, without `//line` directives or dependency
/// metadata. Returns `source` unchanged when nothing applies.
pub fn instrument_source(
    path: &Path,
    source: &str,
    aspects: &[Aspect],
    options: &SourceOptions,
) -> Result<String> {
    let file = parse_file(path, source.as_bytes())?;
    let prefix = leading_prefix(source.as_bytes(), &file);
    let cache = DashMap::new();
    let cancel = Cancellation::new();
    let importer = Importer::new(&NoArchives, &cache, &cancel);
    let files = vec![file];
    let types = check_package(&options.import_path, None, &files, &importer)?;
    let package = PackageInfo {
        import_path: options.import_path.clone(),
        package_name: types.package_name.clone(),
        test_main: options.test_main,
        settings: options.settings.clone(),
    };
    let aspects: Vec<&Aspect> = aspects.iter().collect();
    let woven = weave_file(&files[0], 0, &types, &package, &aspects, &importer, false)?;
    Ok(match woven.text {
        Some(text) => format!("{prefix}{text}"),
        None => source.to_string(),
    })
}

/// Remove everything weaving added to `source`.
pub fn uninstrument_source(source: &str, aspects: &[Aspect]) -> Result<String> {
    uninstrument::uninstrument_text(Path::new("<source>"), source, aspects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::advice::TOOL_PATH;
    use crate::aspect::builtin::HTTP_MODE;
    use crate::aspect::join_point::JoinPoint;
    use crate::aspect::template::Template;
    use crate::aspect::{builtin_aspects, Advice};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn instrument(source: &str) -> String {
        instrument_source(
            Path::new("main.go"),
            source,
            &builtin_aspects(),
            &SourceOptions::default(),
        )
        .unwrap()
    }

    fn uninstrument(source: &str) -> String {
        uninstrument_source(source, &builtin_aspects()).unwrap()
    }

    /// Woven output must survive removal and a second weave unchanged.
    fn assert_round_trip(source: &str) -> String {
        let woven = instrument(source);
        assert_ne!(woven, source, "nothing was woven");
        assert_eq!(uninstrument(&woven), source, "round trip of:\n{woven}");
        assert_eq!(instrument(&woven), woven, "second weave changed:\n{woven}");
        woven
    }

    /// Every start marker is closed later, in the same block.
    fn assert_markers_paired(woven: &str) {
        let file = parse_file(Path::new("woven.go"), woven.as_bytes()).unwrap();
        let mut open = Vec::new();
        for trivia in file.decorations.markers() {
            let Some(marker) = trivia.marker else { continue };
            if marker.is_start() {
                open.push(marker);
            } else if marker.is_end() {
                let start = open.pop().expect("end marker without start");
                assert_eq!(start.partner(), Some(marker));
            }
        }
        assert!(open.is_empty(), "unclosed markers in:\n{woven}");
    }

    const HANDLE: &str = "package main\n\nimport \"net/http\"\n\nfunc serve(myHandler http.Handler) {\n\thttp.Handle(\"/h\", myHandler)\n}\n";

    #[test]
    fn test_handle_argument_is_wrapped() {
        let woven = assert_round_trip(HANDLE);
        assert_eq!(
            woven,
            "package main\n\nimport \"net/http\"\n\
             //tool:startinstrument\nimport (\n\ttool \"github.com/weaver-go/tool\"\n)\n//tool:endinstrument\n\n\
             func serve(myHandler http.Handler) {\n\
             \t//tool:startwrap\n\
             \thttp.Handle(\"/h\", tool.WrapHandler(myHandler))\n\
             \t//tool:endwrap\n\
             }\n"
        );
        assert_markers_paired(&woven);
    }

    #[test]
    fn test_multibyte_identifiers_round_trip() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc serve(hé http.Handler) {\n\thttp.Handle(\"/ü\", hé)\n}\n";
        let woven = assert_round_trip(source);
        assert!(woven.contains("http.Handle(\"/ü\", tool.WrapHandler(hé))"), "{woven}");
    }

    #[test]
    fn test_wrapped_handler_keeps_the_users_own_wrapper() {
        let source = "package main\n\nimport (\n\t\"net/http\"\n\n\t\"github.com/weaver-go/tool\"\n)\n\nfunc serve(h http.Handler) {\n\thttp.Handle(\"/h\", tool.WrapHandler(h))\n}\n";
        let woven = assert_round_trip(source);
        assert!(woven.contains("tool.WrapHandler(tool.WrapHandler(h))"), "{woven}");
        assert!(!woven.contains("//tool:startinstrument"), "{woven}");
        assert_eq!(uninstrument(source), source);
    }

    #[test]
    fn test_injected_alias_avoids_names_in_use() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc serve(tool http.Handler) {\n\thttp.Handle(\"/a\", tool)\n}\n";
        let woven = assert_round_trip(source);
        assert!(woven.contains("\t__tool \"github.com/weaver-go/tool\"\n"), "{woven}");
        assert!(woven.contains("http.Handle(\"/a\", __tool.WrapHandler(tool))"), "{woven}");

        let declared = "package main\n\nimport \"net/http\"\n\nvar tool = 1\n\nfunc serve(h http.Handler) {\n\thttp.Handle(\"/a\", h)\n}\n";
        let woven = assert_round_trip(declared);
        assert!(woven.contains("__tool.WrapHandler(h)"), "{woven}");
    }

    #[test]
    fn test_named_placeholders_in_wrappers_round_trip() {
        let aspects = vec![Aspect {
            id: "trace-lib-do".to_string(),
            tracer_internal: false,
            join_point: JoinPoint::function_call("example.com/lib", "Do"),
            advice: vec![Advice::WrapCallArgument {
                index: 0,
                template: Template::new("tool.Trace({{.}}, \"{{FuncName}}\")").import("tool", TOOL_PATH),
            }],
        }];
        let source = "package main\n\nimport \"example.com/lib\"\n\nfunc run() {\n\tlib.Do(1)\n}\n";
        let woven =
            instrument_source(Path::new("main.go"), source, &aspects, &SourceOptions::default()).unwrap();
        assert!(woven.contains("\tlib.Do(tool.Trace(1, \"run\"))\n"), "{woven}");
        assert_eq!(uninstrument_source(&woven, &aspects).unwrap(), source);
    }

    #[test]
    fn test_hole_less_wrap_template_is_an_error() {
        let aspects = vec![Aspect {
            id: "replace-handler".to_string(),
            tracer_internal: false,
            join_point: JoinPoint::function_call("net/http", "Handle"),
            advice: vec![Advice::WrapCallArgument {
                index: 1,
                template: Template::new("nil"),
            }],
        }];
        let result = instrument_source(Path::new("main.go"), HANDLE, &aspects, &SourceOptions::default());
        assert!(matches!(result, Err(WeaverError::Advice { .. })), "{result:?}");
    }

    #[test]
    fn test_statements_sharing_a_line_round_trip() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc serve(a, b http.Handler) {\n\thttp.Handle(\"/a\", a); http.Handle(\"/b\", b)\n}\n";
        let woven = assert_round_trip(source);
        assert!(woven.contains("tool.WrapHandler(a)) //tool:endwrap\n"), "{woven}");
        assert!(!woven.contains(")//tool:endwrap"), "{woven}");
        assert_markers_paired(&woven);
    }

    #[test]
    fn test_span_directive_reports_function() {
        let source = "package main\n\nimport \"context\"\n\n//tool:span foo:bar\nfunc MyFunc(ctx context.Context) {\n\twork(ctx)\n}\n\nfunc work(ctx context.Context) {}\n";
        let woven = assert_round_trip(source);
        let tags = "\"function-name\", \"MyFunc\", \"foo\", \"bar\"";
        let expected_body = format!(
            "func MyFunc(ctx context.Context) {{\n\
             \t//tool:startinstrument\n\
             \tctx = tool.Report(ctx, tool.EventStart, {tags})\n\
             \tdefer tool.Report(ctx, tool.EventEnd, {tags})\n\
             \t//tool:endinstrument\n\
             \twork(ctx)\n}}\n"
        );
        assert!(woven.contains(&expected_body), "{woven}");
        // work has no directive
        assert!(woven.ends_with("func work(ctx context.Context) {}\n"));
        assert_markers_paired(&woven);
    }

    #[test]
    fn test_main_gets_initialised() {
        let woven = assert_round_trip("package main\n\nfunc main() {\n\tprintln(\"hi\")\n}\n");
        assert!(
            woven.contains("func main() {\n\t//tool:startinstrument\n\tdefer tool.Init()()\n\t//tool:endinstrument\n\tprintln(\"hi\")\n}\n"),
            "{woven}"
        );

        let empty = assert_round_trip("package main\n\nfunc main() {}\n");
        assert!(empty.contains("func main() { //tool:startinstrument\n\tdefer tool.Init()()\n\t//tool:endinstrument\n}"), "{empty}");
        assert_markers_paired(&empty);
    }

    #[test]
    fn test_each_statement_gets_its_own_markers() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc serve(a, b http.Handler) {\n\thttp.Handle(\"/a\", a)\n\thttp.Handle(\"/b\", b)\n}\n";
        let woven = assert_round_trip(source);
        assert_eq!(woven.matches("//tool:startwrap").count(), 2);
        assert_eq!(woven.matches("//tool:endwrap").count(), 2);
        assert!(woven.contains(
            "\t//tool:startwrap\n\thttp.Handle(\"/a\", tool.WrapHandler(a))\n\t//tool:endwrap\n\
             \t//tool:startwrap\n\thttp.Handle(\"/b\", tool.WrapHandler(b))\n\t//tool:endwrap\n"
        ));
        assert_markers_paired(&woven);
    }

    #[test]
    fn test_sql_open_is_retargeted_and_restored() {
        let source = "package main\n\nimport \"database/sql\"\n\nfunc open() {\n\tdb, err := sql.Open(\"driver\", \"dsn\")\n\t_, _ = db, err\n}\n";
        let woven = assert_round_trip(source);
        assert_eq!(
            woven,
            "package main\n\nimport \"database/sql\"\n\
             //tool:startinstrument\nimport (\n\tsqltrace \"github.com/weaver-go/tool/sqltrace\"\n)\nvar _ = sql.Open\n//tool:endinstrument\n\n\
             func open() {\n\
             \t//tool:startwrap\n\
             \tdb, err := sqltrace.Open(\"driver\", \"dsn\")\n\
             \t//tool:endwrap\n\
             \t_, _ = db, err\n}\n"
        );
    }

    #[test]
    fn test_server_handler_field_round_trips() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc serve(h http.Handler) {\n\tsrv := &http.Server{Handler: h}\n\t_ = srv\n}\n";
        let woven = assert_round_trip(source);
        assert!(woven.contains("&http.Server{Handler: tool.WrapHandler(h)}"), "{woven}");
        assert_markers_paired(&woven);
    }

    #[test]
    fn test_report_mode_switches_handler_aspects() {
        let source = "package main\n\nimport \"net/http\"\n\nfunc handle(w http.ResponseWriter, r *http.Request) {\n\tw.WriteHeader(200)\n}\n";
        let mut options = SourceOptions::default();
        options
            .settings
            .insert(HTTP_MODE.to_string(), "report".to_string());
        let woven =
            instrument_source(Path::new("main.go"), source, &builtin_aspects(), &options).unwrap();
        assert!(
            woven.contains("\tr = r.WithContext(tool.Report(r.Context(), tool.EventStart, \"function-name\", \"handle\"))\n"),
            "{woven}"
        );
        assert_eq!(uninstrument(&woven), source);

        // the default mode leaves handlers alone
        assert_eq!(instrument(source), source);
    }

    #[test]
    fn test_ignored_and_instrumented_code_is_left_alone() {
        let ignored = "package main\n\nimport \"net/http\"\n\nfunc serve(h http.Handler) {\n\t//tool:ignore\n\thttp.Handle(\"/h\", h)\n}\n";
        assert_eq!(instrument(ignored), ignored);

        let marked = "package main\n\nimport \"net/http\"\n\nfunc serve(h http.Handler) {\n\t//tool:instrumented\n\thttp.Handle(\"/h\", h)\n}\n";
        assert_eq!(instrument(marked), marked);
    }

    #[test]
    fn test_leading_line_directive_is_preserved() {
        let source = "//line original.go:1:1\npackage main\n\nfunc main() {}\n";
        let woven = instrument(source);
        assert!(woven.starts_with("//line original.go:1:1\npackage main\n"), "{woven}");
        assert_eq!(uninstrument(&woven), source);
    }

    fn write_package(dir: &TempDir, files: &[(&str, &str)]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|(name, contents)| {
                let path = dir.path().join(name);
                fs::write(&path, contents).unwrap();
                path
            })
            .collect()
    }

    fn counting_lookup(calls: Arc<AtomicUsize>) -> Arc<dyn ArchiveLookup> {
        Arc::new(move |_path: &str| -> Result<Option<Vec<u8>>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
    }

    #[test]
    fn test_injector_requires_import_path_and_lookup() {
        let missing_path = Injector::new(InjectorConfig {
            lookup: Some(Arc::new(NoArchives)),
            ..Default::default()
        });
        assert!(matches!(missing_path, Err(WeaverError::Validation(_))));

        let missing_lookup = Injector::new(InjectorConfig {
            import_path: "example.com/app".to_string(),
            ..Default::default()
        });
        assert!(matches!(missing_lookup, Err(WeaverError::Validation(_))));
    }

    #[test]
    fn test_unmatched_package_never_reaches_the_resolver() {
        let dir = TempDir::new().unwrap();
        let paths = write_package(&dir, &[("lib.go", "package lib\n\nfunc helper() {}\n")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new(InjectorConfig {
            import_path: "example.com/lib".to_string(),
            lookup: Some(counting_lookup(calls.clone())),
            ..Default::default()
        })
        .unwrap();

        let outcome = injector
            .inject_files(&Cancellation::new(), &paths, &builtin_aspects())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prefilter_ceiling_parses_every_package() {
        let dir = TempDir::new().unwrap();
        let paths = write_package(
            &dir,
            &[("lib.go", "package lib\n\nimport \"fmt\"\n\nfunc helper() {\n\tfmt.Println()\n}\n")],
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new(InjectorConfig {
            import_path: "example.com/lib".to_string(),
            output_dir: Some(dir.path().join("out")),
            prefilter_ceiling: 0,
            lookup: Some(counting_lookup(calls.clone())),
            ..Default::default()
        })
        .unwrap();

        let outcome = injector
            .inject_files(&Cancellation::new(), &paths, &builtin_aspects())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
        assert!(calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_outcome_carries_the_highest_template_version() {
        let declare = |id: &str, text: &str, version: GoVersion| Aspect {
            id: id.to_string(),
            tracer_internal: false,
            join_point: JoinPoint::SourceFile,
            advice: vec![Advice::InjectDeclarations {
                template: Template {
                    go_version: Some(version),
                    ..Template::new(text)
                },
                links: Vec::new(),
            }],
        };
        let aspects = vec![
            declare("older", "var injectedA = 1", GoVersion::new(1, 18)),
            declare("newer", "var injectedB = 2", GoVersion::new(1, 21)),
        ];
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let paths = write_package(&dir, &[("app.go", "package app\n\nfunc f() {}\n")]);
        let injector = Injector::new(InjectorConfig {
            import_path: "example.com/app".to_string(),
            output_dir: Some(out.clone()),
            lookup: Some(Arc::new(NoArchives)),
            ..Default::default()
        })
        .unwrap();

        let outcome = injector
            .inject_files(&Cancellation::new(), &paths, &aspects)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(outcome.go_version, Some(GoVersion::new(1, 21)));
        let written = fs::read_to_string(out.join("app.go")).unwrap();
        assert!(written.contains("var injectedA = 1"), "{written}");
        assert!(written.contains("var injectedB = 2"), "{written}");
    }

    #[test]
    fn test_inject_files_writes_woven_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let paths = write_package(
            &dir,
            &[
                ("main.go", "package main\n\nfunc main() {\n\trun()\n}\n"),
                ("run.go", "package main\n\nfunc run() {}\n"),
            ],
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new(InjectorConfig {
            import_path: "main".to_string(),
            output_dir: Some(out.clone()),
            lookup: Some(counting_lookup(calls.clone())),
            ..Default::default()
        })
        .unwrap();

        let outcome = injector
            .inject_files(&Cancellation::new(), &paths, &builtin_aspects())
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(outcome.files.len(), 1);
        let injected = &outcome.files[&paths[0]];
        assert_eq!(injected.modified_path, out.join("main.go"));
        let written = fs::read_to_string(&injected.modified_path).unwrap();
        assert!(written.starts_with("//line "), "{written}");
        assert!(written.contains("defer tool.Init()()"));
        assert!(!out.join("run.go").exists());
        assert_eq!(
            outcome.references().get(crate::aspect::advice::TOOL_PATH),
            Some(ReferenceKind::ImportStatement)
        );
        // the originals are untouched
        assert_eq!(
            fs::read_to_string(&paths[0]).unwrap(),
            "package main\n\nfunc main() {\n\trun()\n}\n"
        );
    }

    #[test]
    fn test_broken_packages_are_skipped() {
        let dir = TempDir::new().unwrap();
        let paths = write_package(&dir, &[("main.go", "package main\n\nfunc main() {\n")]);
        let injector = Injector::new(InjectorConfig {
            import_path: "main".to_string(),
            lookup: Some(Arc::new(NoArchives)),
            ..Default::default()
        })
        .unwrap();
        let outcome = injector
            .inject_files(&Cancellation::new(), &paths, &builtin_aspects())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "package main\n\nfunc main() {\n");
    }

    #[test]
    fn test_missing_files_and_cancellation() {
        let dir = TempDir::new().unwrap();
        let injector = Injector::new(InjectorConfig {
            import_path: "main".to_string(),
            lookup: Some(Arc::new(NoArchives)),
            ..Default::default()
        })
        .unwrap();
        let missing = vec![dir.path().join("absent.go")];
        let outcome = injector
            .inject_files(&Cancellation::new(), &missing, &builtin_aspects())
            .unwrap();
        assert!(matches!(outcome.errors.as_slice(), [WeaverError::Io { .. }]));
        assert!(matches!(outcome.into_result(), Err(WeaverError::Files(_))));

        let cancel = Cancellation::new();
        cancel.cancel();
        let paths = write_package(&dir, &[("main.go", "package main\n\nfunc main() {}\n")]);
        assert!(matches!(
            injector.inject_files(&cancel, &paths, &builtin_aspects()),
            Err(WeaverError::Cancelled)
        ));
    }

    #[test]
    fn test_cached_injection_skips_the_second_parse() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let paths = write_package(&dir, &[("main.go", "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println()\n}\n")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let injector = Injector::new(InjectorConfig {
            import_path: "main".to_string(),
            output_dir: Some(out.clone()),
            lookup: Some(counting_lookup(calls.clone())),
            ..Default::default()
        })
        .unwrap();
        let store = crate::cache::MemoryCache::new();
        let cancel = Cancellation::new();

        let first = injector
            .inject_files_cached(&cancel, &paths, &builtin_aspects(), &store)
            .unwrap();
        assert_eq!(store.len(), 1);
        let lookups = calls.load(Ordering::SeqCst);
        assert!(lookups > 0);
        fs::remove_dir_all(&out).unwrap();

        let second = injector
            .inject_files_cached(&cancel, &paths, &builtin_aspects(), &store)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), lookups);
        assert_eq!(second.files, first.files);
        assert!(out.join("main.go").exists());
    }
}
