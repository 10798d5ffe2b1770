use std::ops::Range;

use crate::error::RewriteError;

/// Half-open byte range into the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn at(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    /// True when `other` lies inside `self` and touches neither boundary.
    pub fn strictly_contains(&self, other: &TextRange) -> bool {
        other.start > self.start && other.end < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub range: TextRange,
    pub value: String,
    pub cancelled: bool,
}

/// Edits collected during one walk, applied once against the original text.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<Replacement>,
}

impl Ledger {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Replacement] {
        &self.entries
    }

    pub fn replace(&mut self, range: TextRange, value: impl Into<String>) {
        self.entries.push(Replacement {
            range,
            value: value.into(),
            cancelled: false,
        });
    }

    pub fn insert(&mut self, offset: usize, value: impl Into<String>) {
        self.replace(TextRange::at(offset), value);
    }

    pub fn remove(&mut self, range: TextRange) {
        self.replace(range, String::new());
    }

    /// Cancel every entry recorded in `indices`.
    pub fn cancel(&mut self, indices: Range<usize>) {
        for entry in &mut self.entries[indices] {
            entry.cancelled = true;
        }
    }

    /// Apply the live edits to `source`.
    ///
    /// Edits are ordered by end offset; ties keep recording order, so two
    /// insertions at one offset come out in the order they were made.
    pub fn apply(&self, source: &str) -> Result<String, RewriteError> {
        let mut live: Vec<&Replacement> = self.entries.iter().filter(|r| !r.cancelled).collect();
        live.sort_by_key(|r| r.range.end);

        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for r in live {
            let TextRange { start, end } = r.range;
            if start < cursor || end < start || end > source.len() {
                return Err(RewriteError::OverlappingEdits { start, end, cursor });
            }
            out.push_str(&source[cursor..start]);
            out.push_str(&r.value);
            cursor = end;
        }
        out.push_str(&source[cursor..]);
        Ok(out)
    }
}
