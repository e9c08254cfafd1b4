//! Turn raw per-file revision listings into ordered `RevisionRecord`s.
//!
//! RCS numbers revisions so that the chain structure can be read off the
//! numbers themselves: trunk revisions have two components and follow each
//! other numerically, while `1.2.2.k` lives on branch `1.2.2` forking from
//! `1.2`. This module derives the parent of every revision from that
//! numbering and checks it against the `branches:` pointers recorded in the
//! file.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::model::{
    ContentRef, FileHistory, RevisionId, RevisionRecord, RevisionState, SymbolName,
};

/// Revision metadata as delivered by a legacy source, before normalization.
#[derive(Debug, Clone)]
pub struct RawHistory {
    /// Path of the file in the converted repository.
    pub path: String,
    /// Location handed back to the content source when fetching revisions.
    pub origin: PathBuf,
    pub executable: bool,
    /// Symbol name and the revision number it is attached to, in file order.
    pub symbols: Vec<(SymbolName, String)>,
    pub revisions: Vec<RawRevision>,
}

/// One revision entry of a [`RawHistory`].
#[derive(Debug, Clone)]
pub struct RawRevision {
    pub id: String,
    pub author: String,
    pub committer: Option<String>,
    pub timestamp: i64,
    pub tz_offset: i32,
    pub log: String,
    pub state: RevisionState,
    /// Branch origin pointers: first revisions of branches sprouting here.
    pub branches: Vec<String>,
}

/// A normalized file: records oldest first plus its parsed symbol table.
#[derive(Debug, Clone)]
pub struct NormalizedFile {
    pub history: FileHistory,
    /// Every symbol of the file with its parsed target number.
    pub symbols: Vec<(SymbolName, RevisionId)>,
    /// Symbols whose target is not a revision number, with the raw target.
    pub dropped_symbols: Vec<(SymbolName, String)>,
}

/// Normalize a single file's history.
pub fn normalize(raw: RawHistory) -> Result<NormalizedFile, Error> {
    let malformed = |reason: String| Error::MalformedHistory {
        path: raw.path.clone(),
        reason,
    };

    // Parse ids and reject duplicates.
    let mut by_id: BTreeMap<RevisionId, &RawRevision> = BTreeMap::new();
    for rev in &raw.revisions {
        let id: RevisionId = rev.id.parse().map_err(|e| malformed(format!("{e}")))?;
        if !id.is_trunk() && id.branch_number().is_none() {
            return Err(malformed(format!("'{id}' is a branch number, not a revision")));
        }
        if by_id.insert(id.clone(), rev).is_some() {
            return Err(malformed(format!("revision {id} appears twice")));
        }
    }

    let mut parents: BTreeMap<RevisionId, Option<RevisionId>> = BTreeMap::new();
    for id in by_id.keys() {
        parents.insert(id.clone(), derive_parent(&by_id, id).map_err(&malformed)?);
    }
    check_acyclic(&parents).map_err(&malformed)?;

    // Branch origin pointers must name existing first revisions of branches
    // that fork from the revision carrying them.
    let mut branch_starts: BTreeMap<RevisionId, Vec<RevisionId>> = BTreeMap::new();
    for (id, rev) in &by_id {
        let mut starts = Vec::new();
        for pointer in &rev.branches {
            let mut start: RevisionId = pointer.parse().map_err(|e| malformed(format!("{e}")))?;
            // rlog lists branch numbers; resolve them to the branch's first revision.
            if start.components().len() % 2 == 1 {
                let number = start.clone();
                start = by_id
                    .keys()
                    .find(|r| r.branch_number().as_ref() == Some(&number))
                    .cloned()
                    .ok_or_else(|| {
                        malformed(format!("revision {id} lists branch {number}, which is empty"))
                    })?;
            }
            if !by_id.contains_key(&start) {
                return Err(malformed(format!(
                    "revision {id} lists branch {start}, which does not exist"
                )));
            }
            if start.fork_revision().as_ref() != Some(id) {
                return Err(malformed(format!(
                    "revision {id} lists branch {start}, which forks elsewhere"
                )));
            }
            starts.push(start);
        }
        starts.sort();
        branch_starts.insert(id.clone(), starts);
    }

    let mut symbols = Vec::with_capacity(raw.symbols.len());
    let mut dropped_symbols = Vec::new();
    let mut tags: BTreeMap<RevisionId, BTreeSet<SymbolName>> = BTreeMap::new();
    for (name, target) in &raw.symbols {
        let Ok(target) = target.parse::<RevisionId>() else {
            dropped_symbols.push((name.clone(), target.clone()));
            continue;
        };
        if target.as_branch_symbol().is_none() {
            tags.entry(target.clone()).or_default().insert(name.clone());
        }
        symbols.push((name.clone(), target));
    }

    let placeholders: HashSet<&RevisionId> = by_id
        .iter()
        .filter(|(id, rev)| {
            rev.state == RevisionState::Dead
                && parents.get(*id).is_some_and(Option::is_none)
                && branch_starts.get(*id).is_some_and(|starts| !starts.is_empty())
        })
        .map(|(id, _)| id)
        .collect();

    let mut revisions: Vec<Arc<RevisionRecord>> = by_id
        .iter()
        .map(|(id, rev)| {
            let fork_path = branch_path(id);
            let added_on_branch = fork_path
                .first()
                .is_some_and(|fork| placeholders.contains(fork));
            Arc::new(RevisionRecord {
                path: raw.path.clone(),
                id: id.clone(),
                parent: parents.get(id).cloned().flatten(),
                author: rev.author.clone(),
                committer: rev.committer.clone(),
                timestamp: rev.timestamp,
                tz_offset: rev.tz_offset,
                log: normalize_line_endings(&rev.log),
                content: ContentRef {
                    origin: raw.origin.clone(),
                    revision: id.clone(),
                },
                branch_path: fork_path,
                branches: branch_starts.remove(id).unwrap_or_default(),
                symbols: tags.remove(id).unwrap_or_default(),
                state: rev.state,
                executable: raw.executable,
                added_on_branch,
            })
        })
        .collect();
    revisions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

    tracing::debug!("{}: normalized {} revisions", raw.path, revisions.len());

    Ok(NormalizedFile {
        history: FileHistory {
            path: raw.path,
            revisions,
        },
        symbols,
        dropped_symbols,
    })
}

/// Find the revision `id` was derived from.
fn derive_parent(
    revisions: &BTreeMap<RevisionId, &RawRevision>,
    id: &RevisionId,
) -> Result<Option<RevisionId>, String> {
    if id.is_trunk() {
        return Ok(revisions
            .range(..id.clone())
            .map(|(prev, _)| prev)
            .filter(|prev| prev.is_trunk())
            .next_back()
            .cloned());
    }

    let branch = id.branch_number();
    let previous = revisions
        .range(..id.clone())
        .map(|(prev, _)| prev)
        .filter(|prev| prev.branch_number() == branch)
        .next_back();
    if let Some(previous) = previous {
        return Ok(Some(previous.clone()));
    }

    let fork = id
        .fork_revision()
        .ok_or_else(|| format!("revision {id} has no fork revision"))?;
    if revisions.contains_key(&fork) {
        Ok(Some(fork))
    } else {
        Err(format!("revision {id} forks from {fork}, which does not exist"))
    }
}

/// Walk every parent chain to its root, failing on a revisit.
fn check_acyclic(parents: &BTreeMap<RevisionId, Option<RevisionId>>) -> Result<(), String> {
    let mut grounded: HashSet<&RevisionId> = HashSet::new();
    for start in parents.keys() {
        let mut seen: HashSet<&RevisionId> = HashSet::new();
        let mut current = start;
        loop {
            if grounded.contains(current) {
                break;
            }
            if !seen.insert(current) {
                return Err(format!("parent chain of {start} loops back to {current}"));
            }
            match parents.get(current) {
                Some(Some(parent)) => current = parent,
                Some(None) => break,
                None => return Err(format!("revision {current} is missing")),
            }
        }
        grounded.extend(seen);
    }
    Ok(())
}

/// Fork revisions from the trunk outward (`1.2.2.1.4.1` → `[1.2, 1.2.2.1]`).
fn branch_path(id: &RevisionId) -> Vec<RevisionId> {
    let parts = id.components();
    (2..parts.len())
        .step_by(2)
        .map(|len| RevisionId::new(parts[..len].to_vec()))
        .collect()
}

fn normalize_line_endings(log: &str) -> String {
    log.replace("\r\n", "\n").replace('\r', "\n")
}

/// Errors from normalization.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: malformed history: {reason}")]
    MalformedHistory { path: String, reason: String },
}
