//! Type Resolver
//!
//! A deliberately small type checker: it knows package-level declarations, import
//! bindings, lexical scopes and the declared types of parameters and variables. That is
//! enough to answer the questions join points ask ("is this `http` the `net/http`
//! package?", "is this parameter a `*net/http.Request`?") without the sources of any
//! dependency.

pub mod archive;
pub mod resolver;

pub use archive::{
    guess_package_name, ArchiveInfo, ArchiveLookup, ExportKind, FileLookup, ImportMap, NoArchives,
};
pub use resolver::{check_package, DeclKind, Declaration, FileTypes, ImportedPackage, PackageTypes};

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::error::{Result, WeaverError};
use crate::version::SUPPORTED_GO_VERSION;

/// A resolved type, as far as the resolver can tell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A defined type: `net/http.Request`.
    Named { path: String, name: String },
    /// A universe type: `string`, `error`.
    Builtin(String),
    Pointer(Box<TypeRef>),
    /// Anything else, kept as source text (`[]byte`, `func()`, `map[string]int`).
    Other(String),
}

impl TypeRef {
    pub fn named(path: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef::Named {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn pointer_to(inner: TypeRef) -> Self {
        TypeRef::Pointer(Box::new(inner))
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named { path, name } if path.is_empty() => write!(f, "{name}"),
            TypeRef::Named { path, name } => write!(f, "{path}.{name}"),
            TypeRef::Builtin(name) => write!(f, "{name}"),
            TypeRef::Pointer(inner) => write!(f, "*{inner}"),
            TypeRef::Other(text) => write!(f, "{text}"),
        }
    }
}

/// What an identifier occurrence refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// An imported package's local name.
    PkgName { path: String },
    TypeName { path: String, name: String },
    Func { path: String, name: String },
    Var { ty: Option<TypeRef> },
    Const,
    /// A universe-scope function, type or constant.
    Builtin(String),
}

/// Cached, version-checked access to dependency metadata.
pub struct Importer<'a> {
    lookup: &'a dyn ArchiveLookup,
    cache: &'a DashMap<String, Option<Arc<ArchiveInfo>>>,
    cancel: &'a Cancellation,
}

impl<'a> Importer<'a> {
    pub fn new(
        lookup: &'a dyn ArchiveLookup,
        cache: &'a DashMap<String, Option<Arc<ArchiveInfo>>>,
        cancel: &'a Cancellation,
    ) -> Self {
        Self {
            lookup,
            cache,
            cancel,
        }
    }

    /// Metadata for `import_path`, or `None` when only heuristics are available.
    pub fn import(&self, import_path: &str) -> Result<Option<Arc<ArchiveInfo>>> {
        if matches!(import_path, "C" | "unsafe") {
            return Ok(None);
        }

        let cached = self.cache.get(import_path).map(|entry| entry.value().clone());
        let info = match cached {
            Some(info) => info,
            None => {
                self.cancel.check()?;
                let info = match self.lookup.lookup(import_path) {
                    Ok(Some(bytes)) => match ArchiveInfo::parse(&bytes) {
                        Ok(info) => Some(Arc::new(info)),
                        Err(e) => {
                            debug!("unreadable archive for {import_path}: {e:#}");
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(e @ (WeaverError::Cancelled | WeaverError::ToolchainVersion { .. })) => {
                        return Err(e)
                    }
                    Err(e) => {
                        return Err(WeaverError::TypeCheck {
                            import_path: import_path.to_string(),
                            message: format!("could not import {import_path}: {e}"),
                        })
                    }
                };
                self.cache.insert(import_path.to_string(), info.clone());
                info
            }
        };

        if let Some(found) = info.as_ref().and_then(|i| i.go_version) {
            if found > SUPPORTED_GO_VERSION {
                return Err(WeaverError::ToolchainVersion {
                    import_path: import_path.to_string(),
                    found,
                    supported: SUPPORTED_GO_VERSION,
                });
            }
        }
        Ok(info)
    }

    /// The identifier `import_path` declares.
    pub fn package_name(&self, import_path: &str) -> Result<String> {
        Ok(self
            .import(import_path)?
            .and_then(|info| info.package_name.clone())
            .unwrap_or_else(|| guess_package_name(import_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::archive::{build_archive, textual_pkgdef};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_importer_caches_lookups() {
        let calls = AtomicUsize::new(0);
        let lookup = |path: &str| -> Result<Option<Vec<u8>>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(build_archive(&textual_pkgdef("go1.22", "yaml", &[]))).filter(|_| path == "gopkg.in/yaml.v3"))
        };
        let cache = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&lookup, &cache, &cancel);

        assert_eq!(importer.package_name("gopkg.in/yaml.v3").unwrap(), "yaml");
        assert_eq!(importer.package_name("gopkg.in/yaml.v3").unwrap(), "yaml");
        assert_eq!(importer.package_name("example.com/mux").unwrap(), "mux");
        assert_eq!(importer.package_name("unsafe").unwrap(), "unsafe");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_newer_toolchain_is_fatal() {
        let lookup = |_: &str| -> Result<Option<Vec<u8>>> {
            Ok(Some(build_archive(&textual_pkgdef("go1.99", "fmt", &[]))))
        };
        let cache = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&lookup, &cache, &cancel);
        let err = importer.import("fmt").unwrap_err();
        assert!(matches!(err, WeaverError::ToolchainVersion { .. }));
        assert!(!err.is_user_source_error());
        // still fatal when served from the cache
        assert!(importer.import("fmt").is_err());
    }

    #[test]
    fn test_failed_lookup_is_a_type_error() {
        let lookup = |path: &str| -> Result<Option<Vec<u8>>> {
            Err(WeaverError::Validation(format!("no archive for {path}")))
        };
        let cache = DashMap::new();
        let cancel = Cancellation::new();
        let importer = Importer::new(&lookup, &cache, &cancel);
        assert!(importer.import("missing/pkg").unwrap_err().is_user_source_error());
    }

    #[test]
    fn test_type_ref_display() {
        let ty = TypeRef::pointer_to(TypeRef::named("net/http", "Request"));
        assert_eq!(ty.to_string(), "*net/http.Request");
    }
}
