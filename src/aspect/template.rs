//! Code templates carried by advice.
//!
//! A template is Go source text with `{{Name}}` placeholders. `{{.}}` is the hole: the
//! text of the expression being wrapped. The imports map names the aliases the text
//! refers to, so the reconciler can add the matching import specs.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::version::GoVersion;

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*(\.|[A-Za-z][A-Za-z0-9]*)\s*\}\}").expect("placeholder regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Template {
    pub text: String,
    /// Alias used in `text` to import path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<String, String>,
    /// Language version the generated code needs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_version: Option<GoVersion>,
}

/// Values substituted into a template.
#[derive(Debug, Default, Clone)]
pub struct TemplateVars<'a> {
    pub hole: Option<&'a str>,
    pub values: BTreeMap<&'static str, String>,
}

impl<'a> TemplateVars<'a> {
    pub fn with_hole(hole: &'a str) -> Self {
        Self {
            hole: Some(hole),
            values: BTreeMap::new(),
        }
    }

    pub fn set(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl Template {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            imports: BTreeMap::new(),
            go_version: None,
        }
    }

    pub fn import(mut self, alias: impl Into<String>, path: impl Into<String>) -> Self {
        self.imports.insert(alias.into(), path.into());
        self
    }

    pub fn has_hole(&self) -> bool {
        PLACEHOLDER_RE
            .captures_iter(&self.text)
            .any(|caps| &caps[1] == ".")
    }

    /// Substitute every placeholder; an unknown name is an error.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, String> {
        let mut missing = None;
        let rendered = PLACEHOLDER_RE.replace_all(&self.text, |caps: &Captures| {
            let key = &caps[1];
            let value = if key == "." {
                vars.hole.map(str::to_string)
            } else {
                vars.values.get(key).cloned()
            };
            value.unwrap_or_else(|| {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            })
        });
        match missing {
            Some(key) => Err(format!("template placeholder {{{{{key}}}}} has no value")),
            None => Ok(rendered.into_owned()),
        }
    }

    /// Template text without placeholders, if it has none.
    pub fn literal(&self) -> Option<&str> {
        (!PLACEHOLDER_RE.is_match(&self.text)).then_some(self.text.as_str())
    }

    /// The shape one application of this template leaves around a wrapped expression.
    ///
    /// Only templates with exactly one hole wrap; other placeholders match any text.
    pub fn wrap_pattern(&self) -> Option<WrapPattern> {
        let mut pieces = Vec::new();
        let mut holes = 0;
        let mut last = 0;
        for caps in PLACEHOLDER_RE.captures_iter(&self.text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                pieces.push(Piece::Literal(self.text[last..whole.start()].to_string()));
            }
            if &caps[1] == "." {
                holes += 1;
                pieces.push(Piece::Hole);
            } else {
                pieces.push(Piece::Any);
            }
            last = whole.end();
        }
        if last < self.text.len() {
            pieces.push(Piece::Literal(self.text[last..].to_string()));
        }
        (holes == 1).then_some(WrapPattern { pieces })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Hole,
    Any,
}

/// Matches text produced by rendering a wrapping template around some expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapPattern {
    pieces: Vec<Piece>,
}

impl WrapPattern {
    /// The same pattern with `from.` qualifiers in its literal text renamed to `to.`.
    pub fn requalify(&self, from: &str, to: &str) -> WrapPattern {
        let pieces = self
            .pieces
            .iter()
            .map(|piece| match piece {
                Piece::Literal(text) => {
                    Piece::Literal(requalify(text, from, to).unwrap_or_else(|| text.clone()))
                }
                other => other.clone(),
            })
            .collect();
        WrapPattern { pieces }
    }

    /// Byte range of the wrapped expression when all of `text` is one application of
    /// the pattern. The expression must be non-empty and bracket-balanced.
    pub fn match_hole(&self, text: &str) -> Option<Range<usize>> {
        self.match_from(0, text, 0).flatten()
    }

    fn match_from(&self, index: usize, text: &str, at: usize) -> Option<Option<Range<usize>>> {
        let Some(piece) = self.pieces.get(index) else {
            return (at == text.len()).then_some(None);
        };
        match piece {
            Piece::Literal(literal) => {
                if text[at..].starts_with(literal.as_str()) {
                    self.match_from(index + 1, text, at + literal.len())
                } else {
                    None
                }
            }
            Piece::Hole => balanced_ends(text, at)
                .into_iter()
                .find_map(|end| self.match_from(index + 1, text, end).map(|_| Some(at..end))),
            Piece::Any => (at..=text.len())
                .filter(|end| text.is_char_boundary(*end))
                .find_map(|end| self.match_from(index + 1, text, end)),
        }
    }
}

/// Every end offset after `from` at which the text since `from` is non-empty and
/// balanced, stopping at the first unmatched closing bracket.
fn balanced_ends(text: &str, from: usize) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut ends = Vec::new();
    let mut depth = 0usize;
    let mut i = from;
    while i < bytes.len() {
        if depth == 0 && i > from && text.is_char_boundary(i) {
            ends.push(i);
        }
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                if depth == 0 {
                    return ends;
                }
                depth -= 1;
            }
            quote @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' && quote != b'`' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if depth == 0 && i > from {
        ends.push(bytes.len());
    }
    ends
}

/// Rename `from.` qualifiers to `to.` where `from` starts an identifier.
///
/// Returns `None` when nothing changed.
pub fn requalify(text: &str, from: &str, to: &str) -> Option<String> {
    if from == to {
        return None;
    }
    let qualifier = format!("{from}.");
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut changed = false;
    while let Some(at) = rest.find(&qualifier) {
        let boundary = rest[..at]
            .chars()
            .next_back()
            .or_else(|| out.chars().next_back())
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '.'));
        out.push_str(&rest[..at]);
        if boundary {
            out.push_str(to);
            out.push('.');
            changed = true;
        } else {
            out.push_str(&qualifier);
        }
        rest = &rest[at + qualifier.len()..];
    }
    out.push_str(rest);
    changed.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_hole_and_names() {
        let template = Template::new("tool.Wrap({{.}}, {{ FuncName }})");
        let vars = TemplateVars::with_hole("h").set("FuncName", "\"serve\"");
        assert_eq!(template.render(&vars).unwrap(), "tool.Wrap(h, \"serve\")");
        assert!(template.has_hole());
        assert!(Template::new("x({{Nope}})")
            .render(&TemplateVars::default())
            .unwrap_err()
            .contains("{{Nope}}"));
    }

    #[test]
    fn test_wrap_pattern_requires_single_hole() {
        assert!(Template::new("tool.WrapHandler({{.}})").wrap_pattern().is_some());
        assert!(Template::new("tool.Trace({{.}}, {{FuncName}})").wrap_pattern().is_some());
        assert_eq!(Template::new("f({{.}}, {{.}})").wrap_pattern(), None);
        assert_eq!(Template::new("f({{Name}})").wrap_pattern(), None);
        assert_eq!(Template::new("nil").literal(), Some("nil"));
    }

    #[test]
    fn test_match_hole_takes_one_layer() {
        let pattern = Template::new("tool.WrapHandler({{.}})").wrap_pattern().unwrap();
        let text = "tool.WrapHandler(tool.WrapHandler(mux(\")\")))";
        let hole = pattern.match_hole(text).unwrap();
        assert_eq!(&text[hole], "tool.WrapHandler(mux(\")\"))");
        assert_eq!(pattern.match_hole("xtool.WrapHandler(a)"), None);
        assert_eq!(pattern.match_hole("tool.WrapHandler(a).Serve()"), None);
        assert_eq!(pattern.match_hole("tool.WrapHandler()"), None);
    }

    #[test]
    fn test_match_hole_handles_multibyte_text() {
        let pattern = Template::new("tool.WrapHandler({{.}})").wrap_pattern().unwrap();
        let text = "tool.WrapHandler(hé)";
        assert_eq!(&text[pattern.match_hole(text).unwrap()], "hé");
        assert_eq!(pattern.match_hole("tool.WrapHandler(é"), None);
        let named = Template::new("t.Trace({{.}}, \"{{FuncName}}\")").wrap_pattern().unwrap();
        let text = "t.Trace(f(\"ü\"), \"ruń\")";
        assert_eq!(&text[named.match_hole(text).unwrap()], "f(\"ü\")");
    }

    #[test]
    fn test_named_placeholders_match_rendered_values() {
        let template = Template::new("tool.Trace({{.}}, \"{{FuncName}}\")");
        let pattern = template.wrap_pattern().unwrap();
        let vars = TemplateVars::with_hole("lib.Do(1, 2)").set("FuncName", "run");
        let rendered = template.render(&vars).unwrap();
        assert_eq!(&rendered[pattern.match_hole(&rendered).unwrap()], "lib.Do(1, 2)");
    }

    #[test]
    fn test_requalify_respects_identifier_boundaries() {
        assert_eq!(
            requalify("a := sqltrace.Open(mysqltrace.X)", "sqltrace", "sql"),
            Some("a := sql.Open(mysqltrace.X)".to_string())
        );
        assert_eq!(requalify("x.sqltrace.Y", "sqltrace", "sql"), None);
        let pattern = Template::new("tool.WrapHandler({{.}})")
            .wrap_pattern()
            .unwrap()
            .requalify("tool", "__tool");
        assert_eq!(pattern.match_hole("__tool.WrapHandler(h)"), Some(19..20));
        assert_eq!(pattern.match_hole("tool.WrapHandler(h)"), None);
    }
}
