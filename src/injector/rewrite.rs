//! Edit buffer over the original source text.
//!
//! Advice never mutates the tree it matched against. It records insertions and
//! replacements against original byte offsets; rendering applies them in one pass and
//! keeps a map from output ranges back to the original text for the position annotator.

use std::ops::Range;

/// Which neighbour an insertion sticks to when several land on the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bias {
    /// Belongs to the text before the offset; rendered first.
    Left,
    /// Belongs to the text after the offset.
    Right,
}

#[derive(Debug, Clone)]
struct Edit {
    range: Range<usize>,
    text: String,
    bias: Bias,
    seq: usize,
}

impl Edit {
    fn is_insertion(&self) -> bool {
        self.range.is_empty()
    }

    fn sort_key(&self) -> (usize, u8, usize) {
        let class = match (self.is_insertion(), self.bias) {
            (true, Bias::Left) => 0,
            (true, Bias::Right) => 1,
            (false, _) => 2,
        };
        (self.range.start, class, self.seq)
    }
}

/// Where a piece of rendered output came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub output: Range<usize>,
    /// Offset of `output.start` in the original text; `None` for generated text.
    pub original: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub segments: Vec<Segment>,
}

impl Rendered {
    /// Original offset of output offset `at`, if it lies in copied text.
    pub fn original_offset(&self, at: usize) -> Option<usize> {
        let index = self
            .segments
            .partition_point(|segment| segment.output.end <= at);
        let segment = self.segments.get(index)?;
        if !segment.output.contains(&at) {
            return None;
        }
        segment
            .original
            .map(|origin| origin + (at - segment.output.start))
    }
}

#[derive(Debug)]
pub struct Rewriter<'s> {
    source: &'s str,
    edits: Vec<Edit>,
    next_seq: usize,
}

impl<'s> Rewriter<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source,
            edits: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn source(&self) -> &'s str {
        self.source
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn insert(&mut self, offset: usize, text: impl Into<String>, bias: Bias) {
        self.push(offset..offset, text.into(), bias);
    }

    pub fn replace(&mut self, range: Range<usize>, text: impl Into<String>) {
        self.push(range, text.into(), Bias::Right);
    }

    pub fn delete(&mut self, range: Range<usize>) {
        self.push(range, String::new(), Bias::Right);
    }

    fn push(&mut self, range: Range<usize>, text: String, bias: Bias) {
        self.edits.push(Edit {
            range,
            text,
            bias,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Any edit starting or ending within `range` (inclusive of both ends).
    pub fn touches(&self, range: Range<usize>) -> bool {
        self.edits.iter().any(|edit| {
            edit.range.start <= range.end && edit.range.end >= range.start
        })
    }

    /// Concatenated text inserted at `offset`, in render order.
    pub fn inserted_at(&self, offset: usize) -> String {
        let mut inserts: Vec<&Edit> = self
            .edits
            .iter()
            .filter(|edit| edit.is_insertion() && edit.range.start == offset)
            .collect();
        inserts.sort_by_key(|edit| edit.sort_key());
        inserts.iter().map(|edit| edit.text.as_str()).collect()
    }

    /// Apply every edit. Overlapping replacements are an error.
    pub fn render(&self) -> Result<Rendered, String> {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|edit| edit.sort_key());

        let mut text = String::with_capacity(self.source.len() + 256);
        let mut segments = Vec::new();
        let mut cursor = 0;

        for edit in edits {
            if edit.range.start < cursor {
                return Err(format!(
                    "overlapping edits at bytes {}..{} (already rewritten up to {})",
                    edit.range.start, edit.range.end, cursor
                ));
            }
            if edit.range.end > self.source.len() {
                return Err(format!(
                    "edit {}..{} is past the end of the file",
                    edit.range.start, edit.range.end
                ));
            }
            copy_original(&mut text, &mut segments, self.source, cursor..edit.range.start);
            if !edit.text.is_empty() {
                let start = text.len();
                text.push_str(&edit.text);
                segments.push(Segment {
                    output: start..text.len(),
                    original: None,
                });
            }
            cursor = edit.range.end.max(edit.range.start);
        }
        copy_original(&mut text, &mut segments, self.source, cursor..self.source.len());

        Ok(Rendered { text, segments })
    }
}

fn copy_original(text: &mut String, segments: &mut Vec<Segment>, source: &str, range: Range<usize>) {
    if range.is_empty() {
        return;
    }
    let start = text.len();
    text.push_str(&source[range.clone()]);
    segments.push(Segment {
        output: start..text.len(),
        original: Some(range.start),
    });
}

/// Apply plain `(range, replacement)` edits back to front.
///
/// A range nested inside a wider one is dropped; the wider range already covers it.
pub fn apply_back_to_front(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by(|a, b| a.0.start.cmp(&b.0.start).then(b.0.end.cmp(&a.0.end)));

    // drop anything nested inside (or overlapping) an earlier, wider range
    let mut kept: Vec<(Range<usize>, String)> = Vec::with_capacity(edits.len());
    let mut reach = 0;
    for (range, replacement) in edits {
        if range.start < reach || range.end > source.len() {
            continue;
        }
        reach = range.end.max(range.start);
        kept.push((range, replacement));
    }

    let mut out = source.to_string();
    for (range, replacement) in kept.into_iter().rev() {
        out.replace_range(range, &replacement);
    }
    out
}
