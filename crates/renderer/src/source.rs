use std::fmt;

use crate::error::ParseError;

/// Sentinel that opens the vertex section of a generated source blob.
pub const VERTEX_MARKER: &str = "// VERTEX SHADER";
/// Sentinel that opens the fragment section of a generated source blob.
pub const FRAGMENT_MARKER: &str = "// FRAGMENT SHADER";

/// Which half of a program a piece of source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Vertex => f.pad("vertex"),
            StageKind::Fragment => f.pad("fragment"),
        }
    }
}

/// Vertex and fragment sources extracted from one generated blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePair {
    pub vertex: String,
    pub fragment: String,
}

impl StagePair {
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn stage(&self, kind: StageKind) -> &str {
        match kind {
            StageKind::Vertex => &self.vertex,
            StageKind::Fragment => &self.fragment,
        }
    }
}

/// Splits generated text into its vertex and fragment stages.
///
/// The vertex stage is everything between the vertex marker and the first
/// fragment marker that follows it; the fragment stage runs to the end of the
/// text. Markers match regardless of case and of the amount of horizontal
/// whitespace between their words, so `//vertex   shader` is accepted too.
pub fn split_stages(source: &str) -> Result<StagePair, ParseError> {
    let vertex = find_marker(source, 0, "vertex").ok_or(ParseError::MissingMarker {
        marker: VERTEX_MARKER,
    })?;
    let fragment = match find_marker(source, vertex.end, "fragment") {
        Some(found) => found,
        None if find_marker(source, 0, "fragment").is_some() => {
            return Err(ParseError::MarkersOutOfOrder)
        }
        None => {
            return Err(ParseError::MissingMarker {
                marker: FRAGMENT_MARKER,
            })
        }
    };

    let vertex_source = source[vertex.end..fragment.start].trim();
    let fragment_source = source[fragment.end..].trim();
    if vertex_source.is_empty() {
        return Err(ParseError::EmptyStage {
            stage: StageKind::Vertex,
        });
    }
    if fragment_source.is_empty() {
        return Err(ParseError::EmptyStage {
            stage: StageKind::Fragment,
        });
    }

    Ok(StagePair::new(vertex_source, fragment_source))
}

#[derive(Debug, Clone, Copy)]
struct MarkerSpan {
    start: usize,
    end: usize,
}

fn find_marker(source: &str, from: usize, stage_word: &str) -> Option<MarkerSpan> {
    let bytes = source.as_bytes();
    let mut cursor = from;
    while let Some(offset) = source[cursor..].find("//") {
        let start = cursor + offset;
        if let Some(end) = match_marker_at(bytes, start + 2, stage_word) {
            return Some(MarkerSpan { start, end });
        }
        cursor = start + 2;
    }
    None
}

/// Matches `<ws>* <stage_word> <ws>+ shader` at `pos`, returning the end offset.
fn match_marker_at(bytes: &[u8], pos: usize, stage_word: &str) -> Option<usize> {
    let mut pos = skip_inline_whitespace(bytes, pos);
    pos = match_word(bytes, pos, stage_word)?;
    let after_gap = skip_inline_whitespace(bytes, pos);
    if after_gap == pos {
        return None;
    }
    let end = match_word(bytes, after_gap, "shader")?;
    Some(end)
}

fn skip_inline_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
        pos += 1;
    }
    pos
}

fn match_word(bytes: &[u8], pos: usize, word: &str) -> Option<usize> {
    let end = pos + word.len();
    let candidate = bytes.get(pos..end)?;
    if !candidate.eq_ignore_ascii_case(word.as_bytes()) {
        return None;
    }
    let continues_identifier = bytes
        .get(end)
        .is_some_and(|next| next.is_ascii_alphanumeric() || *next == b'_');
    (!continues_identifier).then_some(end)
}
