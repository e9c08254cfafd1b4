//! Cluster per-file revisions into changesets.
//!
//! All revisions are merged into one list ordered by timestamp, path and
//! revision number, then scanned once. Each revision either joins an open
//! changeset it is compatible with or opens a new one. A changeset closes for
//! good once the scan moves more than the fuzz window past its latest member.
//!
//! Dead trunk placeholders left behind by files added on a branch are not
//! grouped at all; they record no change.
//!
//! The scan is greedy and never revisits a decision, so the same input
//! always produces the same grouping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::model::{BranchId, Changeset, FileHistory, RevisionId, RevisionRecord};
use crate::symbols::{BranchArena, Resolution, SymbolTable};
use crate::warning::{Warning, Warnings};

/// Group every revision of `files` into changesets, returned in creation order.
pub fn group(
    files: &[FileHistory],
    resolution: &Resolution,
    config: &Config,
    warnings: &mut Warnings,
) -> Vec<Changeset> {
    let mut candidates: Vec<Arc<RevisionRecord>> = files
        .iter()
        .flat_map(|f| f.revisions.iter())
        .filter(|r| !r.is_branch_placeholder())
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut grouper = Grouper {
        table: &resolution.table,
        arena: &resolution.branches,
        config,
        fuzz: i64::from(config.fuzz_seconds),
        open: Vec::new(),
        closed: Vec::new(),
        next_seq: 0,
        placed: HashMap::new(),
    };
    for record in candidates {
        grouper.place(record, warnings);
    }
    let changesets = grouper.finish();

    tracing::info!("grouped revisions into {} changesets", changesets.len());
    changesets
}

struct Grouper<'a> {
    table: &'a SymbolTable,
    arena: &'a BranchArena,
    config: &'a Config,
    fuzz: i64,
    open: Vec<Changeset>,
    closed: Vec<Changeset>,
    next_seq: usize,
    /// (path, revision) → `(earliest, seq)` of the changeset holding it.
    placed: HashMap<(String, RevisionId), (i64, usize)>,
}

impl Grouper<'_> {
    fn place(&mut self, record: Arc<RevisionRecord>, warnings: &mut Warnings) {
        self.close_before(record.timestamp);

        let branch = self.arena.branch_of(&record);
        let Some(index) = self
            .open
            .iter()
            .position(|c| self.compatible(c, &record, branch))
        else {
            self.start(record, branch);
            return;
        };

        let candidate = &self.open[index];
        if let Some(existing) = candidate.members.iter().find(|m| m.path == record.path) {
            warnings.push(Warning::AmbiguousChangeset {
                path: record.path.clone(),
                first: existing.id.clone(),
                second: record.id.clone(),
            });
            self.start(record, branch);
            return;
        }
        if self.config.symbol_check {
            if let Some(conflict) = symbol_conflict(self.table, candidate, &record) {
                warnings.push(conflict);
                self.start(record, branch);
                return;
            }
        }

        let table = self.table;
        let changeset = &mut self.open[index];
        changeset.latest = changeset.latest.max(record.timestamp);
        changeset.earliest = changeset.earliest.min(record.timestamp);
        changeset
            .symbols
            .extend(record.symbols.iter().filter(|s| table.is_tag(s)).cloned());
        let key = (changeset.earliest, changeset.seq);
        self.placed.insert((record.path.clone(), record.id.clone()), key);
        changeset.members.push(record);
    }

    /// Close every open changeset the scan has moved past.
    fn close_before(&mut self, timestamp: i64) {
        let fuzz = self.fuzz;
        let (done, still_open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|c| timestamp > c.latest + fuzz);
        self.closed.extend(done);
        self.open = still_open;
    }

    /// Same identity, same log, same branch and within the window.
    fn compatible(&self, changeset: &Changeset, record: &RevisionRecord, branch: BranchId) -> bool {
        if changeset.author != record.author || changeset.committer != record.committer() {
            return false;
        }
        if self.config.match_log_messages && changeset.log != record.log {
            return false;
        }
        if (record.timestamp - changeset.latest).abs() > self.fuzz {
            return false;
        }
        // The file's previous revision must not end up in a later commit.
        if let Some(parent) = &record.parent {
            let placed = self.placed.get(&(record.path.clone(), parent.clone()));
            if placed.is_some_and(|&key| key > (changeset.earliest, changeset.seq)) {
                return false;
            }
        }
        changeset.branch == branch
    }

    fn start(&mut self, record: Arc<RevisionRecord>, branch: BranchId) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.placed
            .insert((record.path.clone(), record.id.clone()), (record.timestamp, seq));
        self.open.push(Changeset {
            seq,
            author: record.author.clone(),
            committer: record.committer().to_string(),
            earliest: record.timestamp,
            latest: record.timestamp,
            log: record.log.clone(),
            branch,
            symbols: record
                .symbols
                .iter()
                .filter(|s| self.table.is_tag(s))
                .cloned()
                .collect(),
            members: vec![record],
        });
    }

    fn finish(mut self) -> Vec<Changeset> {
        self.closed.append(&mut self.open);
        self.closed.sort_by_key(|c| c.seq);
        for changeset in &mut self.closed {
            changeset
                .members
                .sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        }
        self.closed
    }
}

/// Would adding `record` make some tag point at the wrong revision?
///
/// A tag carried by any member ends up on the changeset. That is only sound
/// if, for every file in the changeset that the tag names, it names exactly
/// the member revision of that file.
fn symbol_conflict(
    table: &SymbolTable,
    changeset: &Changeset,
    record: &RevisionRecord,
) -> Option<Warning> {
    for tag in record.symbols.iter().filter(|s| table.is_tag(s)) {
        for member in &changeset.members {
            if let Some(target) = table.tag_target(tag, &member.path) {
                if target != &member.id {
                    return Some(Warning::SymbolConflict {
                        symbol: tag.clone(),
                        detail: format!(
                            "names {}:{} but {}:{} would share a changeset with {}:{}; keeping them apart",
                            member.path, target, member.path, member.id, record.path, record.id
                        ),
                    });
                }
            }
        }
    }
    for tag in &changeset.symbols {
        if let Some(target) = table.tag_target(tag, &record.path) {
            if target != &record.id {
                return Some(Warning::SymbolConflict {
                    symbol: tag.clone(),
                    detail: format!(
                        "names {}:{} but {}:{} would join a changeset carrying it; keeping them apart",
                        record.path, target, record.path, record.id
                    ),
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FileBuilder, prepare};

    const T: i64 = 1_000_000_000;

    fn run(files: Vec<crate::normalize::RawHistory>, config: &Config) -> (Vec<Changeset>, Warnings) {
        let (histories, resolution, mut warnings) = prepare(files);
        let changesets = group(&histories, &resolution, config, &mut warnings);
        (changesets, warnings)
    }

    fn paths(changeset: &Changeset) -> Vec<&str> {
        changeset.members.iter().map(|m| m.path.as_str()).collect()
    }

    #[test]
    fn test_two_files_one_commit() {
        let (changesets, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + 5, "alice", "init").build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 1);
        assert_eq!(paths(&changesets[0]), ["a.txt", "b.txt"]);
        assert_eq!(changesets[0].earliest, T);
        assert_eq!(changesets[0].latest, T + 5);
    }

    #[test]
    fn test_fuzz_boundary() {
        let config = Config::default();
        let at = |dt: i64| {
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + dt, "alice", "init").build(),
            ]
        };
        assert_eq!(run(at(300), &config).0.len(), 1);
        assert_eq!(run(at(301), &config).0.len(), 2);
    }

    #[test]
    fn test_zero_fuzz_only_groups_identical_times() {
        let config = Config {
            fuzz_seconds: 0,
            ..Config::default()
        };
        let (same, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T, "alice", "init").build(),
            ],
            &config,
        );
        assert_eq!(same.len(), 1);
    }

    #[test]
    fn test_window_extends_from_latest_member() {
        let (changesets, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + 250, "alice", "init").build(),
                FileBuilder::new("c.txt").rev("1.1", T + 500, "alice", "init").build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].members.len(), 3);
    }

    #[test]
    fn test_author_and_log_must_match() {
        let (changesets, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + 1, "bob", "init").build(),
                FileBuilder::new("c.txt").rev("1.1", T + 2, "alice", "other").build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 3);
    }

    #[test]
    fn test_log_matching_can_be_disabled() {
        let config = Config {
            match_log_messages: false,
            ..Config::default()
        };
        let (changesets, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + 2, "alice", "other").build(),
            ],
            &config,
        );
        assert_eq!(changesets.len(), 1);
        assert_eq!(changesets[0].log, "init");
    }

    #[test]
    fn test_same_file_twice_is_split_with_warning() {
        let (changesets, warnings) = run(
            vec![
                FileBuilder::new("a.txt")
                    .rev("1.1", T, "alice", "fix")
                    .rev("1.2", T + 10, "alice", "fix")
                    .build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 2);
        assert!(matches!(
            warnings.as_slice(),
            [Warning::AmbiguousChangeset { path, .. }] if path == "a.txt"
        ));
        for changeset in &changesets {
            assert_eq!(changeset.members.len(), 1);
        }
    }

    #[test]
    fn test_closed_changesets_never_reopen() {
        let (changesets, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "init").build(),
                FileBuilder::new("b.txt").rev("1.1", T + 200, "bob", "other").build(),
                FileBuilder::new("c.txt").rev("1.1", T + 400, "alice", "init").build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 3);
        assert_eq!(changesets.iter().map(|c| c.seq).collect::<Vec<_>>(), [0, 1, 2]);
    }

    fn conflicting_tag() -> Vec<crate::normalize::RawHistory> {
        vec![
            FileBuilder::new("a.txt")
                .rev("1.1", T, "alice", "init")
                .symbol("REL", "1.1")
                .build(),
            FileBuilder::new("b.txt")
                .rev("1.1", T + 5, "alice", "init")
                .rev("1.2", T + 5000, "alice", "later")
                .symbol("REL", "1.2")
                .build(),
        ]
    }

    #[test]
    fn test_symbol_check_keeps_conflicting_revisions_apart() {
        let (changesets, warnings) = run(conflicting_tag(), &Config::default());
        assert_eq!(changesets.len(), 3);
        assert!(
            warnings
                .as_slice()
                .iter()
                .any(|w| matches!(w, Warning::SymbolConflict { symbol, .. } if symbol == "REL"))
        );
    }

    #[test]
    fn test_symbol_check_disabled_merges_anyway() {
        let config = Config {
            symbol_check: false,
            ..Config::default()
        };
        let (changesets, warnings) = run(conflicting_tag(), &config);
        assert_eq!(changesets.len(), 2);
        assert_eq!(paths(&changesets[0]), ["a.txt", "b.txt"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_consistent_tag_does_not_block_grouping() {
        let (changesets, warnings) = run(
            vec![
                FileBuilder::new("a.txt")
                    .rev("1.1", T, "alice", "init")
                    .symbol("REL", "1.1")
                    .build(),
                FileBuilder::new("b.txt")
                    .rev("1.1", T + 5, "alice", "init")
                    .symbol("REL", "1.1")
                    .build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 1);
        assert!(changesets[0].symbols.contains("REL"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_branch_revision_gets_its_own_changeset() {
        let (changesets, warnings) = run(
            vec![
                FileBuilder::new("a.txt")
                    .rev("1.1", T, "alice", "work")
                    .rev("1.1.2.1", T + 10, "alice", "work")
                    .sprouts("1.1", &["1.1.2.1"])
                    .symbol("BR", "1.1.0.2")
                    .build(),
            ],
            &Config::default(),
        );
        assert_eq!(changesets.len(), 2);
        assert_ne!(changesets[0].branch, changesets[1].branch);
        assert!(changesets[0].branch.is_trunk());
        assert!(warnings.is_empty());
    }

    fn added_on_branch() -> Vec<crate::normalize::RawHistory> {
        vec![
            FileBuilder::new("new.txt")
                .dead("1.1", T, "alice", "file new.txt was initially added on branch BR.")
                .rev("1.1.2.1", T + 1, "alice", "add new.txt")
                .sprouts("1.1", &["1.1.2.1"])
                .symbol("BR", "1.1.0.2")
                .build(),
            FileBuilder::new("old.txt")
                .rev("1.1", T - 1000, "alice", "base")
                .rev("1.1.2.1", T + 2, "alice", "add new.txt")
                .sprouts("1.1", &["1.1.2.1"])
                .symbol("BR", "1.1.0.2")
                .build(),
        ]
    }

    #[test]
    fn test_branch_placeholder_is_not_grouped() {
        let (changesets, warnings) = run(added_on_branch(), &Config::default());
        assert_eq!(changesets.len(), 2);
        let branch_changeset = &changesets[1];
        assert!(!branch_changeset.branch.is_trunk());
        assert_eq!(paths(branch_changeset), ["new.txt", "old.txt"]);
        assert!(branch_changeset.members.iter().all(|m| !m.is_dead()));
        assert_eq!(branch_changeset.log, "add new.txt");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_branch_placeholder_ignored_without_log_matching() {
        let config = Config {
            match_log_messages: false,
            ..Config::default()
        };
        let (changesets, warnings) = run(added_on_branch(), &config);
        assert!(
            changesets
                .iter()
                .flat_map(|c| &c.members)
                .all(|m| !m.is_branch_placeholder())
        );
        let branch_changeset = changesets.iter().find(|c| !c.branch.is_trunk()).unwrap();
        assert_eq!(paths(branch_changeset), ["new.txt", "old.txt"]);
        assert_eq!(branch_changeset.log, "add new.txt");
        assert!(warnings.is_empty());
    }

    /// A file's later revision may match an earlier-opened changeset than the
    /// one holding its previous revision.
    fn crossed_revisions() -> Vec<crate::normalize::RawHistory> {
        vec![
            FileBuilder::new("c.txt").rev("1.1", T, "alice", "msg X").build(),
            FileBuilder::new("d.txt").rev("1.1", T + 50, "bob", "msg Y").build(),
            FileBuilder::new("a.txt")
                .rev("1.1", T + 60, "bob", "msg Y")
                .rev("1.2", T + 70, "alice", "msg X")
                .build(),
        ]
    }

    #[test]
    fn test_revision_never_joins_a_changeset_before_its_parent() {
        let (changesets, warnings) = run(crossed_revisions(), &Config::default());
        let holding = |id: &str| {
            changesets
                .iter()
                .find(|c| c.members.iter().any(|m| m.path == "a.txt" && m.id.to_string() == id))
                .unwrap()
        };
        let (first, second) = (holding("1.1"), holding("1.2"));
        assert!((first.earliest, first.seq) < (second.earliest, second.seq));
        assert_eq!(paths(first), ["a.txt", "d.txt"]);
        assert_eq!(paths(second), ["a.txt"]);
        assert_eq!(changesets.len(), 3);
        assert!(warnings.is_empty());
    }
}
