//! Error taxonomy for the weaver.
//!
//! User-source problems (`Parse`, `TypeCheck`) are deliberately distinguishable from
//! the conditions that must stop a build (`ToolchainVersion`, `Validation`, `Config`),
//! so the injector can defer the former to the real compiler.

use std::path::PathBuf;
use thiserror::Error;

use crate::version::GoVersion;

pub type Result<T, E = WeaverError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum WeaverError {
    /// Injector or aspect configuration is unusable; nothing has been touched yet.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The source file is not valid Go.
    #[error("{file}: syntax error at {line}:{column}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
    },

    /// The target package does not type-check; the real compiler will report why.
    #[error("type-checking {import_path} failed: {message}")]
    TypeCheck {
        import_path: String,
        message: String,
    },

    /// A dependency was compiled by a toolchain newer than the one this weaver understands.
    #[error(
        "{import_path} was compiled with {found}, but this weaver only understands up to {supported}; \
         reinstall the weaver with a newer toolchain"
    )]
    ToolchainVersion {
        import_path: String,
        found: GoVersion,
        supported: GoVersion,
    },

    #[error("{file}: aspect {aspect:?}, advice #{index}: {message}")]
    Advice {
        file: String,
        aspect: String,
        index: usize,
        message: String,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cyclic extends: {}", cycle.join(" -> "))]
    ConfigCycle { cycle: Vec<String> },

    #[error("operation cancelled")]
    Cancelled,

    /// Per-file failures collected while injecting one package.
    #[error("{} file(s) failed: {}", .0.len(), join_messages(.0))]
    Files(Vec<WeaverError>),
}

impl WeaverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WeaverError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the user's program rather than by the weaver.
    pub fn is_user_source_error(&self) -> bool {
        matches!(self, WeaverError::Parse { .. } | WeaverError::TypeCheck { .. })
    }
}

fn join_messages(errors: &[WeaverError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<anyhow::Error> for WeaverError {
    fn from(err: anyhow::Error) -> Self {
        WeaverError::Config(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_file_errors_mention_every_file() {
        let err = WeaverError::Files(vec![
            WeaverError::Parse {
                file: "a.go".into(),
                line: 3,
                column: 1,
            },
            WeaverError::Advice {
                file: "b.go".into(),
                aspect: "wrap".into(),
                index: 0,
                message: "boom".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 file(s) failed"));
        assert!(text.contains("a.go: syntax error at 3:1"));
        assert!(text.contains("b.go: aspect \"wrap\", advice #0: boom"));
    }

    #[test]
    fn test_user_source_errors_are_classified() {
        let parse = WeaverError::Parse {
            file: "x.go".into(),
            line: 1,
            column: 1,
        };
        assert!(parse.is_user_source_error());
        assert!(!WeaverError::Cancelled.is_user_source_error());
        let cycle = WeaverError::ConfigCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(cycle.to_string(), "cyclic extends: a -> b -> a");
    }
}
