//! Core data types shared by every stage of the conversion.
//!
//! Records are created once by the normalizer and never mutated afterwards;
//! later stages share them through `Arc`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// A tag or branch label as written in the RCS file.
pub type SymbolName = String;

/// A dotted RCS revision number such as `1.4` or `1.2.2.1`.
///
/// Ordering is numeric per component, so `1.9 < 1.10` and a branch revision
/// sorts between its fork revision and the next trunk revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId(Vec<u32>);

impl RevisionId {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Trunk revisions have exactly two components.
    pub fn is_trunk(&self) -> bool {
        self.0.len() == 2
    }

    /// The branch number this revision lives on (`1.2.2.3` → `1.2.2`).
    ///
    /// Returns `None` for trunk revisions.
    pub fn branch_number(&self) -> Option<RevisionId> {
        if self.0.len() < 4 || self.0.len() % 2 != 0 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The revision a branch revision's branch sprouted from (`1.2.2.3` → `1.2`).
    pub fn fork_revision(&self) -> Option<RevisionId> {
        if self.0.len() < 4 || self.0.len() % 2 != 0 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 2].to_vec()))
    }

    /// Interpret this number as a symbol target and return the branch number
    /// it designates, if it designates a branch.
    ///
    /// CVS writes branch symbols with a "magic" zero (`1.2.0.2` → `1.2.2`);
    /// RCS vendor branches use an odd-length number directly (`1.1.1`).
    pub fn as_branch_symbol(&self) -> Option<RevisionId> {
        let n = self.0.len();
        if n % 2 == 1 && n >= 3 {
            return Some(self.clone());
        }
        if n >= 4 && self.0[n - 2] == 0 {
            let mut parts = self.0.clone();
            parts.remove(n - 2);
            return Some(Self(parts));
        }
        None
    }

    /// The revision a branch number forks from (`1.2.2` → `1.2`).
    pub fn branch_base(&self) -> Option<RevisionId> {
        if self.0.len() % 2 == 1 && self.0.len() >= 3 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

/// Error returned when a revision number does not parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid revision number '{0}'")]
pub struct ParseRevisionError(pub String);

impl FromStr for RevisionId {
    type Err = ParseRevisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseRevisionError(s.to_string()))?;
        if parts.len() < 2 {
            return Err(ParseRevisionError(s.to_string()));
        }
        Ok(Self(parts))
    }
}

/// Whether a revision holds content or marks the file as removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionState {
    Normal,
    Dead,
}

/// Where to fetch a revision's content from, deferred until emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentRef {
    /// Location understood by the content source (the `,v` file for RCS).
    pub origin: PathBuf,
    pub revision: RevisionId,
}

/// One normalized revision of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    /// Path of the file in the converted repository.
    pub path: String,
    pub id: RevisionId,
    pub parent: Option<RevisionId>,
    pub author: String,
    pub committer: Option<String>,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    /// Seconds east of UTC.
    pub tz_offset: i32,
    pub log: String,
    pub content: ContentRef,
    /// Fork revisions from the trunk outward; empty for trunk revisions.
    pub branch_path: Vec<RevisionId>,
    /// First revisions of the branches that sprout from this revision.
    pub branches: Vec<RevisionId>,
    /// Stable (non-branch) symbols naming this revision.
    pub symbols: BTreeSet<SymbolName>,
    pub state: RevisionState,
    pub executable: bool,
    /// Set on branch revisions of a file that did not exist where the branch
    /// forked, i.e. whose fork revision is a dead placeholder.
    pub added_on_branch: bool,
}

impl RevisionRecord {
    /// The committer, falling back to the author.
    pub fn committer(&self) -> &str {
        self.committer.as_deref().unwrap_or(&self.author)
    }

    pub fn is_dead(&self) -> bool {
        self.state == RevisionState::Dead
    }

    /// The dead first revision RCS front-ends create on the trunk when a
    /// file is added directly on a branch. It records no change of its own.
    pub fn is_branch_placeholder(&self) -> bool {
        self.is_dead() && self.parent.is_none() && !self.branches.is_empty()
    }
}

/// The normalized history of a single file, oldest revision first.
#[derive(Debug, Clone)]
pub struct FileHistory {
    pub path: String,
    pub revisions: Vec<Arc<RevisionRecord>>,
}

/// Index of a logical branch in the branch arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub usize);

impl BranchId {
    pub const TRUNK: BranchId = BranchId(0);

    pub fn is_trunk(self) -> bool {
        self == Self::TRUNK
    }
}

/// A reconstructed atomic commit spanning one or more files.
#[derive(Debug, Clone)]
pub struct Changeset {
    /// Creation order; the final tie-break wherever timestamps are equal.
    pub seq: usize,
    pub author: String,
    pub committer: String,
    pub earliest: i64,
    pub latest: i64,
    pub log: String,
    /// Members ordered by path.
    pub members: Vec<Arc<RevisionRecord>>,
    pub branch: BranchId,
    pub symbols: BTreeSet<SymbolName>,
}

impl Changeset {
    pub fn contains_file(&self, path: &str) -> bool {
        self.members.iter().any(|m| m.path == path)
    }

    pub fn contains(&self, path: &str, id: &RevisionId) -> bool {
        self.members.iter().any(|m| m.path == path && &m.id == id)
    }

    /// Timezone of the changeset, taken from its first member.
    pub fn tz_offset(&self) -> i32 {
        self.members.first().map_or(0, |m| m.tz_offset)
    }
}
