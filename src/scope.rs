use std::ops::Range;

use crate::ledger::TextRange;

/// A module id referenced by a plain `require('...')` call, waiting for the
/// `define` that encloses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub range: TextRange,
    pub value: String,
}

/// A finished `define` call and the ledger entries it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclarationRecord {
    pub range: TextRange,
    pub replacements: Range<usize>,
}

/// Pending dependencies and finalized declarations of the file being walked.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    pending: Vec<DependencyRecord>,
    declarations: Vec<DeclarationRecord>,
}

impl ScopeTracker {
    pub fn push_dependency(&mut self, range: TextRange, value: impl Into<String>) {
        self.pending.push(DependencyRecord {
            range,
            value: value.into(),
        });
    }

    pub fn push_declaration(&mut self, range: TextRange, replacements: Range<usize>) {
        self.declarations.push(DeclarationRecord {
            range,
            replacements,
        });
    }

    /// Remove and return the pending dependencies inside `range`, in the
    /// order they were found.
    pub fn claim_dependencies(&mut self, range: TextRange) -> Vec<DependencyRecord> {
        let (inside, outside): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|d| range.strictly_contains(&d.range));
        self.pending = outside;
        inside
    }

    /// Remove and return the finalized declarations nested inside `range`.
    pub fn take_nested(&mut self, range: TextRange) -> Vec<DeclarationRecord> {
        let (inside, outside): (Vec<_>, Vec<_>) = std::mem::take(&mut self.declarations)
            .into_iter()
            .partition(|d| range.strictly_contains(&d.range));
        self.declarations = outside;
        inside
    }

    pub fn pending(&self) -> &[DependencyRecord] {
        &self.pending
    }
}
