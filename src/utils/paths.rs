// Output path helpers
//
// Woven files are written either over the original or into a shadow directory that the
// build substitutes for the package directory. Paths shown in logs are relative and
// Unix-style.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Where the woven version of `original` is written.
///
/// Without an output directory the original file is overwritten; with one, the file
/// keeps its name inside that directory.
pub fn shadow_path(original: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let Some(dir) = output_dir else {
        return Ok(original.to_path_buf());
    };
    let name = original
        .file_name()
        .with_context(|| format!("'{}' has no file name", original.display()))?;
    Ok(dir.join(name))
}

/// Convert a path under `root` to a relative Unix-style path (with `/` separators).
///
/// Both paths are canonicalized when they exist so symlinked roots still match
/// (e.g. `/var` -> `/private/var` on macOS).
pub fn to_relative_unix_style(absolute: &Path, root: &Path) -> Result<String> {
    let (path_to_use, root_to_use) = match (absolute.canonicalize(), root.canonicalize()) {
        (Ok(canonical_abs), Ok(canonical_root)) => (canonical_abs, canonical_root),
        _ => (absolute.to_path_buf(), root.to_path_buf()),
    };

    // Canonicalized Windows paths carry a \\?\ prefix that plain paths lack
    #[cfg(windows)]
    fn strip_unc_prefix(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        match path_str.strip_prefix(r"\\?\") {
            Some(rest) => PathBuf::from(rest),
            None => path.to_path_buf(),
        }
    }

    #[cfg(not(windows))]
    fn strip_unc_prefix(path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    let normalized_path = strip_unc_prefix(&path_to_use);
    let normalized_root = strip_unc_prefix(&root_to_use);

    let relative = normalized_path
        .strip_prefix(&normalized_root)
        .with_context(|| {
            format!(
                "'{}' is not under '{}'",
                normalized_path.display(),
                normalized_root.display()
            )
        })?;
    let path_str = relative.to_str().context("Path contains invalid UTF-8")?;

    Ok(if MAIN_SEPARATOR == '\\' {
        path_str.replace('\\', "/")
    } else {
        path_str.to_string()
    })
}

/// Short display form of a written file: relative to `root` when possible.
pub fn display_relative(path: &Path, root: &Path) -> String {
    to_relative_unix_style(path, root).unwrap_or_else(|_| path.display().to_string())
}
