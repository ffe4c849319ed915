//! Compiled-dependency metadata
//!
//! Dependencies are never read as source. Their compiled archives (`ar` files with a
//! `__.PKGDEF` member) are fetched through an [`ArchiveLookup`] and reduced to the
//! little the resolver needs: the toolchain that built them, the package name and the
//! exported objects.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::error::{Result, WeaverError};
use crate::version::GoVersion;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;
const PKGDEF_MEMBER: &str = "__.PKGDEF";

/// Resolves an import path to the bytes of its compiled archive.
///
/// `Ok(None)` means "no metadata available"; callers fall back to import-path
/// heuristics. `Err` means the dependency cannot be imported at all.
pub trait ArchiveLookup: Send + Sync {
    fn lookup(&self, import_path: &str) -> Result<Option<Vec<u8>>>;
}

impl<F> ArchiveLookup for F
where
    F: Fn(&str) -> Result<Option<Vec<u8>>> + Send + Sync,
{
    fn lookup(&self, import_path: &str) -> Result<Option<Vec<u8>>> {
        self(import_path)
    }
}

/// Lookup for source-level tooling where no compiled dependencies exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArchives;

impl ArchiveLookup for NoArchives {
    fn lookup(&self, _import_path: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Dependency import path to archive file, as declared to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMap {
    packages: BTreeMap<String, PathBuf>,
    /// Source import path to the path it was vendored or replaced under.
    remaps: BTreeMap<String, String>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, import_path: impl Into<String>, archive: impl Into<PathBuf>) {
        self.packages.insert(import_path.into(), archive.into());
    }

    pub fn remap(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.remaps.insert(from.into(), to.into());
    }

    /// Parse an `importcfg` file body (`packagefile path=file`, `importmap from=to`).
    pub fn parse_importcfg(text: &str) -> anyhow::Result<Self> {
        let mut map = ImportMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (verb, args) = line.split_once(' ').unwrap_or((line, ""));
            match verb {
                "packagefile" | "importmap" => {
                    let (key, value) = args
                        .split_once('=')
                        .with_context(|| format!("importcfg line {}: missing '='", index + 1))?;
                    if verb == "packagefile" {
                        map.insert(key.trim(), value.trim());
                    } else {
                        map.remap(key.trim(), value.trim());
                    }
                }
                // modinfo, packageshlib and friends carry nothing we need
                _ => debug!("ignoring importcfg directive {verb:?}"),
            }
        }
        Ok(map)
    }

    pub fn resolve<'a>(&'a self, import_path: &'a str) -> &'a str {
        self.remaps
            .get(import_path)
            .map(String::as_str)
            .unwrap_or(import_path)
    }

    pub fn archive(&self, import_path: &str) -> Option<&Path> {
        self.packages
            .get(self.resolve(import_path))
            .map(PathBuf::as_path)
    }

    pub fn contains(&self, import_path: &str) -> bool {
        self.packages.contains_key(self.resolve(import_path))
    }

    /// Every import path the package may depend on, sorted.
    pub fn import_paths(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Lookup that reads archives named by an [`ImportMap`].
#[derive(Debug, Clone)]
pub struct FileLookup {
    imports: ImportMap,
}

impl FileLookup {
    pub fn new(imports: ImportMap) -> Self {
        Self { imports }
    }
}

impl ArchiveLookup for FileLookup {
    fn lookup(&self, import_path: &str) -> Result<Option<Vec<u8>>> {
        match self.imports.archive(import_path) {
            Some(path) => std::fs::read(path)
                .map(Some)
                .map_err(|e| WeaverError::io(path, e)),
            None => Err(WeaverError::TypeCheck {
                import_path: import_path.to_string(),
                message: "package is not in the import map".to_string(),
            }),
        }
    }
}

/// Kind of an exported package-level object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Type,
    Var,
    Const,
}

/// What the resolver keeps from a dependency archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub go_version: Option<GoVersion>,
    pub package_name: Option<String>,
    pub exports: BTreeMap<String, ExportKind>,
}

impl ArchiveInfo {
    /// Read an archive. Unknown export encodings yield an info without a package name.
    pub fn parse(bytes: &[u8]) -> anyhow::Result<ArchiveInfo> {
        let pkgdef = find_member(bytes, PKGDEF_MEMBER)?
            .with_context(|| format!("archive has no {PKGDEF_MEMBER} member"))?;
        Ok(parse_pkgdef(pkgdef))
    }
}

/// Body of the named `ar` member.
fn find_member<'a>(bytes: &'a [u8], wanted: &str) -> anyhow::Result<Option<&'a [u8]>> {
    anyhow::ensure!(bytes.starts_with(AR_MAGIC), "not an ar archive");
    let mut offset = AR_MAGIC.len();
    while offset + AR_HEADER_LEN <= bytes.len() {
        let header = &bytes[offset..offset + AR_HEADER_LEN];
        anyhow::ensure!(&header[58..60] == b"`\n", "corrupt ar header at byte {offset}");
        let name = String::from_utf8_lossy(&header[..16]);
        let name = name.trim_end().trim_end_matches('/');
        let size: usize = String::from_utf8_lossy(&header[48..58])
            .trim()
            .parse()
            .with_context(|| format!("corrupt member size at byte {offset}"))?;
        let body_start = offset + AR_HEADER_LEN;
        let body_end = body_start + size;
        anyhow::ensure!(body_end <= bytes.len(), "truncated ar member {name:?}");
        if name == wanted {
            return Ok(Some(&bytes[body_start..body_end]));
        }
        offset = body_end + (size % 2);
    }
    Ok(None)
}

fn parse_pkgdef(body: &[u8]) -> ArchiveInfo {
    let text = String::from_utf8_lossy(body);
    let mut info = ArchiveInfo::default();
    let mut lines = text.lines();

    if let Some(header) = lines.next() {
        // go object <goos> <goarch> <version> [X:experiments]
        info.go_version = header
            .strip_prefix("go object ")
            .and_then(|rest| rest.split_whitespace().nth(2))
            .and_then(|v| v.parse().ok());
    }

    let mut in_exports = false;
    for line in lines {
        let line = line.trim_end();
        if !in_exports {
            if line == "$$" {
                in_exports = true;
            } else if line.starts_with("$$B") {
                // binary export data; only the header is usable
                break;
            }
            continue;
        }
        if line == "$$" {
            break;
        }
        let mut words = line.split_whitespace();
        let (Some(keyword), Some(name)) = (words.next(), words.next()) else {
            continue;
        };
        let kind = match keyword {
            "package" => {
                info.package_name = Some(name.to_string());
                continue;
            }
            "func" => ExportKind::Func,
            "type" => ExportKind::Type,
            "var" => ExportKind::Var,
            "const" => ExportKind::Const,
            _ => continue,
        };
        info.exports.insert(name.to_string(), kind);
    }
    info
}

/// Package name a dependency most likely declares, from its import path alone.
///
/// `gopkg.in/yaml.v3` is `yaml`, `github.com/x/go-redis/v9` is `redis`.
pub fn guess_package_name(import_path: &str) -> String {
    let mut elements = import_path.rsplit('/');
    let mut last = elements.next().unwrap_or(import_path);
    if is_major_version(last) {
        if let Some(previous) = elements.next() {
            last = previous;
        }
    }
    let last = last.split('.').next().unwrap_or(last);
    let last = last.strip_prefix("go-").unwrap_or(last);
    let last = last.strip_suffix("-go").unwrap_or(last);
    last.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn is_major_version(element: &str) -> bool {
    element
        .strip_prefix('v')
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Build an archive around a `__.PKGDEF` body. Used by tests and fixtures.
pub fn build_archive(pkgdef: &str) -> Vec<u8> {
    let mut out = AR_MAGIC.to_vec();
    let header = format!(
        "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
        format!("{PKGDEF_MEMBER}/"),
        0,
        0,
        0,
        644,
        pkgdef.len()
    );
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(pkgdef.as_bytes());
    if pkgdef.len() % 2 == 1 {
        out.push(b'\n');
    }
    out
}

/// A textual `__.PKGDEF` body for `package_name`, built with `version`.
pub fn textual_pkgdef(version: &str, package_name: &str, exports: &[(&str, &str)]) -> String {
    let mut body = format!("go object linux amd64 {version}\n\n$$\npackage {package_name}\n");
    for (kind, name) in exports {
        body.push_str(&format!("{kind} {name}\n"));
    }
    body.push_str("$$\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_textual_pkgdef() {
        let bytes = build_archive(&textual_pkgdef(
            "go1.22.4",
            "http",
            &[("func", "Handle"), ("type", "Handler")],
        ));
        let info = ArchiveInfo::parse(&bytes).unwrap();
        assert_eq!(info.go_version, Some(GoVersion::new(1, 22)));
        assert_eq!(info.package_name.as_deref(), Some("http"));
        assert_eq!(info.exports.get("Handle"), Some(&ExportKind::Func));
        assert_eq!(info.exports.get("Handler"), Some(&ExportKind::Type));
    }

    #[test]
    fn test_binary_export_data_keeps_header_only() {
        let bytes = build_archive("go object linux amd64 go1.26 X:none\nbuild id \"x\"\n$$B\n\u{1}\u{2}\n");
        let info = ArchiveInfo::parse(&bytes).unwrap();
        assert_eq!(info.go_version, Some(GoVersion::new(1, 26)));
        assert!(info.package_name.is_none());
    }

    #[test]
    fn test_rejects_non_archives() {
        assert!(ArchiveInfo::parse(b"package main").is_err());
        assert!(ArchiveInfo::parse(AR_MAGIC).is_err());
    }

    #[test]
    fn test_importcfg_round_trip() {
        let cfg = "# import config\npackagefile net/http=/cache/http.a\nimportmap old/x=new/x\npackagefile new/x=/cache/x.a\nmodinfo \"abc\"\n";
        let map = ImportMap::parse_importcfg(cfg).unwrap();
        assert_eq!(map.archive("net/http"), Some(Path::new("/cache/http.a")));
        assert!(map.contains("old/x"));
        assert!(!map.contains("database/sql"));
        assert_eq!(map.import_paths().collect::<Vec<_>>(), vec!["net/http", "new/x"]);
        assert!(ImportMap::parse_importcfg("packagefile broken").is_err());
    }

    #[test]
    fn test_file_lookup_reads_mapped_archives() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("http.a");
        std::fs::write(&archive, build_archive(&textual_pkgdef("go1.22", "http", &[]))).unwrap();
        let mut map = ImportMap::new();
        map.insert("net/http", &archive);
        let lookup = FileLookup::new(map);
        assert!(lookup.lookup("net/http").unwrap().is_some());
        assert!(matches!(
            lookup.lookup("net/url"),
            Err(WeaverError::TypeCheck { .. })
        ));
    }

    #[test]
    fn test_guess_package_name() {
        assert_eq!(guess_package_name("net/http"), "http");
        assert_eq!(guess_package_name("gopkg.in/yaml.v3"), "yaml");
        assert_eq!(guess_package_name("github.com/redis/go-redis/v9"), "redis");
        assert_eq!(guess_package_name("github.com/x/mux-go"), "mux");
        assert_eq!(guess_package_name("example.com/tool"), "tool");
    }
}
