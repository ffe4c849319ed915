//! Final output: directive fix-up and writing.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::rewrite::apply_back_to_front;
use crate::error::{Result, WeaverError};
use crate::language::new_parser;
use crate::utils::paths::{display_relative, shadow_path};

static INDENTED_LINE_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]+(//line )").expect("line directive regex is valid"));

/// `//line` directives only count at column 1; drop any indentation in front of them.
///
/// Only real comments are touched; the same bytes inside a string literal stay as written.
pub fn strip_directive_indentation(text: &str) -> Cow<'_, str> {
    if !INDENTED_LINE_DIRECTIVE.is_match(text) {
        return Cow::Borrowed(text);
    }
    let Some(tree) = new_parser().ok().and_then(|mut parser| parser.parse(text, None)) else {
        debug!("output did not parse, leaving //line indentation as is");
        return Cow::Borrowed(text);
    };
    let root = tree.root_node();
    let mut edits = Vec::new();
    for found in INDENTED_LINE_DIRECTIVE.captures_iter(text) {
        let (Some(line), Some(directive)) = (found.get(0), found.get(1)) else {
            continue;
        };
        let is_comment = root
            .descendant_for_byte_range(directive.start(), directive.start() + 2)
            .is_some_and(|node| node.kind() == "comment" && node.start_byte() == directive.start());
        if is_comment {
            edits.push((line.start()..directive.start(), String::new()));
        }
    }
    if edits.is_empty() {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(apply_back_to_front(text, edits))
    }
}

/// Write `text` to the original path or its shadow under `output_dir`.
pub fn write_file(original: &Path, output_dir: Option<&Path>, text: &str) -> Result<PathBuf> {
    let target = shadow_path(original, output_dir)
        .map_err(|e| WeaverError::Validation(format!("{e:#}")))?;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| WeaverError::io(parent, e))?;
    }
    fs::write(&target, text).map_err(|e| WeaverError::io(&target, e))?;
    debug!(
        "wrote {} ({} bytes)",
        display_relative(&target, output_dir.unwrap_or_else(|| Path::new("."))),
        text.len()
    );
    Ok(target)
}
