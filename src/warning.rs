//! Recoverable conditions reported on the diagnostic channel.

use crate::model::RevisionId;

/// A condition that was recovered from but which the operator should know about.
///
/// Every warning is logged through `tracing` when it is recorded and is also
/// returned in the run report so callers can inspect it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Warning {
    #[error(
        "{path}: revisions {first} and {second} fall into one changeset window; splitting"
    )]
    AmbiguousChangeset {
        path: String,
        first: RevisionId,
        second: RevisionId,
    },

    #[error("symbol '{symbol}': {detail}")]
    SymbolConflict { symbol: String, detail: String },

    #[error("branch '{branch}' has no discoverable fork point; rooting it without a parent")]
    OrphanBranch { branch: String },

    #[error("no author mapping for '{username}'; using a placeholder address")]
    UnmappedAuthor { username: String },
}

/// Collects warnings in the order they were raised.
#[derive(Debug, Default)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `warning` and keep it.
    pub fn push(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.0.push(warning);
    }

    pub fn as_slice(&self) -> &[Warning] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
