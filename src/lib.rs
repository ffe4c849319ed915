// Weaver Core - aspect weaving for Go sources
//
// Parses the files of one Go package with tree-sitter, matches declarative join points
// against the tree, applies advice as byte-level edits and writes line-accurate output.
// Every edit is bracketed by marker comments so woven code can be removed again.

pub mod aspect;
pub mod ast;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod injector;
pub mod language;
pub mod typing;
pub mod utils;
pub mod version;

pub use aspect::{builtin_aspects, Advice, Aspect, JoinPoint};
pub use cancel::Cancellation;
pub use config::{ConfigLoader, PackageLocator};
pub use error::{Result, WeaverError};
pub use injector::{
    instrument_source, uninstrument_source, InjectedFile, InjectionOutcome, Injector,
    InjectorConfig, SourceOptions,
};
pub use typing::{ArchiveLookup, FileLookup, ImportMap};
pub use version::GoVersion;
