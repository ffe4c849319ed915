//! Aspect configuration documents.
//!
//! - `loader.rs`: JSON documents, `extends` resolution and merge order
//! - `graph.rs`: cycle detection over `extends`

pub mod graph;
pub mod loader;

pub use graph::ExtendsGraph;
pub use loader::{
    parse_document, ConfigDocument, ConfigLoader, LoadedConfig, Meta, NoPackages, PackageLocator,
};
