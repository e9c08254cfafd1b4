//! Order changesets into a commit graph.
//!
//! Each branch becomes a chain ordered by earliest timestamp, with the
//! creation sequence breaking ties. A branch's first changeset is parented
//! on the changeset of its parent branch that holds the revisions the branch
//! forked from. The resulting graph is flattened into an emission order in
//! which every parent precedes its children.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use crate::config::Config;
use crate::model::{BranchId, Changeset, RevisionId};
use crate::symbols::{BranchArena, Resolution};
use crate::warning::{Warning, Warnings};

/// One commit to emit.
#[derive(Debug, Clone)]
pub struct CommitNode {
    pub changeset: Changeset,
    /// Index of the parent node, always smaller than this node's index.
    pub parent: Option<usize>,
    /// Lightweight tags pointing at this commit, in emission order.
    pub tags: Vec<String>,
}

/// A branch without commits of its own, pointing at its fork point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub target: usize,
}

/// The complete, ordered history ready for emission.
#[derive(Debug, Clone)]
pub struct CommitGraph {
    /// Nodes in emission order.
    pub nodes: Vec<CommitNode>,
    /// Branches that only exist as symbols.
    pub branch_refs: Vec<BranchRef>,
    branch_names: Vec<String>,
    /// Set when every revision of the run came from one file.
    single_file: Option<String>,
}

impl CommitGraph {
    pub fn branch_name(&self, id: BranchId) -> &str {
        &self.branch_names[id.0]
    }

    pub fn single_file(&self) -> Option<&str> {
        self.single_file.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Build the commit graph. Fails before anything is emitted if the branch
/// fork structure is cyclic.
pub fn build(
    changesets: Vec<Changeset>,
    resolution: &Resolution,
    config: &Config,
    warnings: &mut Warnings,
) -> Result<CommitGraph, Error> {
    let arena = &resolution.branches;

    let paths: BTreeSet<&str> = changesets
        .iter()
        .flat_map(|c| c.members.iter().map(|m| m.path.as_str()))
        .collect();
    let single_file = match paths.len() {
        1 => paths.first().map(|p| p.to_string()),
        _ => None,
    };

    let mut changesets = changesets;
    if config.skip_branches {
        let before = changesets.len();
        changesets.retain(|c| c.branch.is_trunk());
        tracing::info!("skipping {} branch changesets", before - changesets.len());
    }

    let mut chains: BTreeMap<BranchId, Vec<Changeset>> = BTreeMap::new();
    for changeset in changesets {
        chains.entry(changeset.branch).or_default().push(changeset);
    }
    for chain in chains.values_mut() {
        chain.sort_by_key(|c| (c.earliest, c.seq));
    }

    let locations = index_revisions(&chains);

    let mut forks: BTreeMap<BranchId, (BranchId, usize)> = BTreeMap::new();
    for (&branch, chain) in &chains {
        if branch.is_trunk() {
            continue;
        }
        let on_branch: Vec<_> = chain[0]
            .members
            .iter()
            .filter(|m| arena.branch_of(m) == branch)
            .collect();
        let fork_revisions: Vec<(String, RevisionId)> = on_branch
            .iter()
            .filter(|m| !m.added_on_branch)
            .filter_map(|m| m.branch_path.last().map(|f| (m.path.clone(), f.clone())))
            .collect();
        let mut fork = fork_point(arena, &locations, branch, &fork_revisions);
        if fork.is_none() && on_branch.iter().all(|m| m.added_on_branch) {
            fork = latest_before(arena, &chains, branch, chain[0].earliest);
        }
        match fork {
            Some(fork) => {
                forks.insert(branch, fork);
            }
            None => warnings.push(Warning::OrphanBranch {
                branch: arena.name(branch).to_string(),
            }),
        }
    }

    check_acyclic(arena, &forks)?;

    // Flatten into one arena of changesets with parent links.
    let mut slot_of: HashMap<(BranchId, usize), usize> = HashMap::new();
    let mut slots: Vec<(Changeset, Option<(BranchId, usize)>)> = Vec::new();
    for (&branch, chain) in &mut chains {
        for (position, changeset) in chain.drain(..).enumerate() {
            let parent = if position == 0 {
                forks.get(&branch).copied()
            } else {
                Some((branch, position - 1))
            };
            slot_of.insert((branch, position), slots.len());
            slots.push((changeset, parent));
        }
    }
    let parents: Vec<Option<usize>> = slots
        .iter()
        .map(|(_, parent)| parent.and_then(|p| slot_of.get(&p).copied()))
        .collect();
    let order = emission_order(&slots, &parents);

    let mut node_of = vec![0usize; slots.len()];
    for (node, &slot) in order.iter().enumerate() {
        node_of[slot] = node;
    }

    let mut tags: Vec<BTreeSet<String>> = vec![BTreeSet::new(); slots.len()];
    for (name, targets) in resolution.table.tags() {
        let hits: BTreeSet<usize> = targets
            .iter()
            .filter_map(|(path, rev)| locations.get(&(path.clone(), rev.clone())))
            .filter_map(|location| slot_of.get(location).copied())
            .collect();
        if hits.len() > 1 {
            warnings.push(Warning::SymbolConflict {
                symbol: name.clone(),
                detail: format!("lands on {} different commits; tagging each", hits.len()),
            });
        }
        for slot in hits {
            tags[slot].insert(name.clone());
        }
    }

    let mut slots: Vec<Option<(Changeset, Option<(BranchId, usize)>)>> =
        slots.into_iter().map(Some).collect();
    let mut nodes = Vec::with_capacity(order.len());
    for &slot in &order {
        let Some((changeset, _)) = slots[slot].take() else {
            continue;
        };
        let mut node_tags: Vec<String> = std::mem::take(&mut tags[slot]).into_iter().collect();
        if config.tag_each_revision {
            node_tags.extend(
                changeset
                    .members
                    .iter()
                    .map(|m| revision_tag_name(&m.path, &m.id)),
            );
        }
        nodes.push(CommitNode {
            parent: parents[slot].map(|p| node_of[p]),
            tags: node_tags,
            changeset,
        });
    }

    let branch_refs = if config.skip_branches {
        Vec::new()
    } else {
        empty_branch_refs(resolution, &chains, &locations, &slot_of, &node_of, warnings)
    };

    tracing::info!(
        "built commit graph: {} commits on {} branches",
        nodes.len(),
        chains.len()
    );

    Ok(CommitGraph {
        nodes,
        branch_refs,
        branch_names: arena.ids().map(|id| arena.name(id).to_string()).collect(),
        single_file,
    })
}

/// Name of the per-revision tag for `path` at `id`.
pub fn revision_tag_name(path: &str, id: &RevisionId) -> String {
    format!("{path}@{id}")
}

type Locations = HashMap<(String, RevisionId), (BranchId, usize)>;

/// Where every revision ended up: (path, revision) → (branch, chain position).
fn index_revisions(chains: &BTreeMap<BranchId, Vec<Changeset>>) -> Locations {
    let mut locations = HashMap::new();
    for (&branch, chain) in chains {
        for (position, changeset) in chain.iter().enumerate() {
            for member in &changeset.members {
                locations.insert((member.path.clone(), member.id.clone()), (branch, position));
            }
        }
    }
    locations
}

/// The latest changeset on `branch`'s parent holding any of `fork_revisions`.
fn fork_point(
    arena: &BranchArena,
    locations: &Locations,
    branch: BranchId,
    fork_revisions: &[(String, RevisionId)],
) -> Option<(BranchId, usize)> {
    let parent = arena.parent(branch)?;
    fork_revisions
        .iter()
        .filter_map(|key| locations.get(key).copied())
        .filter(|(b, _)| *b == parent)
        .max_by_key(|(_, position)| *position)
}

/// For a branch whose files were all added on it, fork from the last
/// changeset of the parent branch no later than the branch's first one.
fn latest_before(
    arena: &BranchArena,
    chains: &BTreeMap<BranchId, Vec<Changeset>>,
    branch: BranchId,
    earliest: i64,
) -> Option<(BranchId, usize)> {
    let parent = arena.parent(branch)?;
    let position = chains
        .get(&parent)?
        .iter()
        .rposition(|c| c.earliest <= earliest)?;
    Some((parent, position))
}

/// Follow fork edges from every branch, failing if a walk revisits a branch.
fn check_acyclic(
    arena: &BranchArena,
    forks: &BTreeMap<BranchId, (BranchId, usize)>,
) -> Result<(), Error> {
    for &start in forks.keys() {
        let mut seen: Vec<BranchId> = Vec::new();
        let mut current = start;
        loop {
            if seen.contains(&current) {
                seen.push(current);
                return Err(Error::CyclicBranchGraph {
                    branches: seen.iter().map(|b| arena.name(*b).to_string()).collect(),
                });
            }
            seen.push(current);
            match forks.get(&current) {
                Some((parent, _)) => current = *parent,
                None => break,
            }
        }
    }
    Ok(())
}

/// Topological order over parent links, taking the ready changeset with the
/// smallest `(earliest, seq)` first.
fn emission_order(
    slots: &[(Changeset, Option<(BranchId, usize)>)],
    parents: &[Option<usize>],
) -> Vec<usize> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); slots.len()];
    let mut ready = BinaryHeap::new();
    for (slot, parent) in parents.iter().enumerate() {
        let key = Reverse((slots[slot].0.earliest, slots[slot].0.seq, slot));
        match parent {
            Some(p) => children[*p].push(slot),
            None => ready.push(key),
        }
    }

    let mut order = Vec::with_capacity(slots.len());
    while let Some(Reverse((_, _, slot))) = ready.pop() {
        order.push(slot);
        for &child in &children[slot] {
            ready.push(Reverse((slots[child].0.earliest, slots[child].0.seq, child)));
        }
    }
    order
}

/// Refs for branches that have a symbol but no changesets.
fn empty_branch_refs(
    resolution: &Resolution,
    chains: &BTreeMap<BranchId, Vec<Changeset>>,
    locations: &Locations,
    slot_of: &HashMap<(BranchId, usize), usize>,
    node_of: &[usize],
    warnings: &mut Warnings,
) -> Vec<BranchRef> {
    let arena = &resolution.branches;
    let mut refs = Vec::new();
    for (name, numbers) in resolution.table.branches() {
        let Some(branch) = arena.find(name) else {
            continue;
        };
        if chains.contains_key(&branch) {
            continue;
        }
        let fork_revisions: Vec<(String, RevisionId)> = numbers
            .iter()
            .filter_map(|(path, number)| number.branch_base().map(|base| (path.clone(), base)))
            .collect();
        match fork_point(arena, locations, branch, &fork_revisions)
            .and_then(|location| slot_of.get(&location))
        {
            Some(&slot) => refs.push(BranchRef {
                name: arena.name(branch).to_string(),
                target: node_of[slot],
            }),
            None => warnings.push(Warning::OrphanBranch {
                branch: name.clone(),
            }),
        }
    }
    refs
}

/// Errors from graph construction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("branch fork points form a cycle: {}", .branches.join(" -> "))]
    CyclicBranchGraph { branches: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::group;
    use crate::normalize::RawHistory;
    use crate::testutil::{FileBuilder, prepare};

    const T: i64 = 1_000_000_000;

    fn run(files: Vec<RawHistory>, config: &Config) -> (Result<CommitGraph, Error>, Warnings) {
        let (histories, resolution, mut warnings) = prepare(files);
        let changesets = group(&histories, &resolution, config, &mut warnings);
        let graph = build(changesets, &resolution, config, &mut warnings);
        (graph, warnings)
    }

    fn branched() -> Vec<RawHistory> {
        vec![
            FileBuilder::new("a.txt")
                .rev("1.1", T, "alice", "start")
                .rev("1.2", T + 1000, "alice", "trunk work")
                .rev("1.1.2.1", T + 2000, "alice", "branch work")
                .sprouts("1.1", &["1.1.2.1"])
                .symbol("BR", "1.1.0.2")
                .symbol("V1", "1.2")
                .build(),
        ]
    }

    #[test]
    fn test_parents_precede_children() {
        let (graph, _) = run(branched(), &Config::default());
        let graph = graph.unwrap();
        assert_eq!(graph.len(), 3);
        for (index, node) in graph.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                assert!(parent < index);
            }
        }
        assert!(graph.nodes[0].parent.is_none());
    }

    #[test]
    fn test_branch_forks_from_its_origin() {
        let (graph, warnings) = run(branched(), &Config::default());
        let graph = graph.unwrap();
        let branch_node = graph
            .nodes
            .iter()
            .find(|n| graph.branch_name(n.changeset.branch) == "BR")
            .unwrap();
        let fork = &graph.nodes[branch_node.parent.unwrap()];
        assert_eq!(fork.changeset.log, "start");
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_tags_attach_to_their_commit() {
        let (graph, _) = run(branched(), &Config::default());
        let graph = graph.unwrap();
        let tagged: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.tags.contains(&"V1".to_string()))
            .map(|n| n.changeset.log.as_str())
            .collect();
        assert_eq!(tagged, ["trunk work"]);
    }

    #[test]
    fn test_skip_branches_keeps_trunk_only() {
        let config = Config {
            skip_branches: true,
            ..Config::default()
        };
        let (graph, _) = run(branched(), &config);
        let graph = graph.unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.nodes.iter().all(|n| n.changeset.branch.is_trunk()));
    }

    #[test]
    fn test_tag_each_revision() {
        let config = Config {
            tag_each_revision: true,
            ..Config::default()
        };
        let (graph, _) = run(branched(), &config);
        let graph = graph.unwrap();
        assert!(graph.nodes[0].tags.contains(&"a.txt@1.1".to_string()));
    }

    #[test]
    fn test_branch_without_trunk_ancestor_is_orphaned() {
        // INNER forks from the unnamed outer branch, which ends up with no
        // changesets once its only one is removed.
        let files = vec![
            FileBuilder::new("a.txt")
                .rev("1.1", T, "alice", "start")
                .rev("1.1.2.1", T + 100, "alice", "outer")
                .rev("1.1.2.1.2.1", T + 200, "alice", "inner")
                .symbol("INNER", "1.1.2.1.0.2")
                .build(),
        ];
        let (histories, resolution, mut warnings) = prepare(files);
        let mut changesets = group(&histories, &resolution, &Config::default(), &mut warnings);
        // Drop the outer branch's only changeset so the inner one has nowhere to fork from.
        changesets.retain(|c| c.log != "outer");
        let graph = build(changesets, &resolution, &Config::default(), &mut warnings).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(
            warnings
                .as_slice()
                .iter()
                .any(|w| matches!(w, Warning::OrphanBranch { branch } if branch == "INNER"))
        );
        let inner = graph
            .nodes
            .iter()
            .find(|n| n.changeset.log == "inner")
            .unwrap();
        assert!(inner.parent.is_none());
    }

    #[test]
    fn test_cyclic_branch_graph_is_fatal() {
        // X sits inside Y in a.txt and Y inside X in b.txt. Inner revisions
        // carry earlier timestamps, so each branch's first changeset forks
        // from the other branch.
        let files = vec![
            FileBuilder::new("a.txt")
                .rev("1.1", T, "alice", "base a")
                .rev("1.1.2.1", T + 300, "alice", "y work")
                .rev("1.1.2.1.2.1", T + 100, "alice", "x work")
                .symbol("Y", "1.1.0.2")
                .symbol("X", "1.1.2.1.0.2")
                .build(),
            FileBuilder::new("b.txt")
                .rev("1.1", T + 10, "alice", "base b")
                .rev("1.1.2.1", T + 400, "alice", "x first")
                .rev("1.1.2.1.2.1", T + 200, "alice", "y first")
                .symbol("X", "1.1.0.2")
                .symbol("Y", "1.1.2.1.0.2")
                .build(),
        ];
        let (histories, mut resolution, mut warnings) = prepare(files);
        let changesets = group(&histories, &resolution, &Config::default(), &mut warnings);
        // Resolution keeps the first evidence (X under Y); install the
        // opposite edge as well to model evidence that cannot be reconciled.
        let x = resolution.branches.find("X").unwrap();
        let y = resolution.branches.find("Y").unwrap();
        resolution.branches.set_parent(y, x);
        let err = build(changesets, &resolution, &Config::default(), &mut warnings).unwrap_err();
        assert!(matches!(err, Error::CyclicBranchGraph { .. }));
    }

    #[test]
    fn test_equal_timestamps_keep_creation_order() {
        let (graph, _) = run(
            vec![
                FileBuilder::new("a.txt").rev("1.1", T, "alice", "one").build(),
                FileBuilder::new("b.txt").rev("1.1", T, "bob", "two").build(),
            ],
            &Config::default(),
        );
        let graph = graph.unwrap();
        let logs: Vec<&str> = graph.nodes.iter().map(|n| n.changeset.log.as_str()).collect();
        assert_eq!(logs, ["one", "two"]);
        assert_eq!(graph.nodes[1].parent, Some(0));
    }

    #[test]
    fn test_symbol_only_branch_points_at_fork() {
        let (graph, _) = run(
            vec![
                FileBuilder::new("a.txt")
                    .rev("1.1", T, "alice", "start")
                    .rev("1.2", T + 1000, "alice", "more")
                    .symbol("EMPTY", "1.1.0.2")
                    .build(),
            ],
            &Config::default(),
        );
        let graph = graph.unwrap();
        assert_eq!(
            graph.branch_refs,
            [BranchRef {
                name: "EMPTY".to_string(),
                target: 0
            }]
        );
    }

    #[test]
    fn test_branch_of_added_files_forks_from_latest_trunk_commit() {
        let (graph, warnings) = run(
            vec![
                FileBuilder::new("base.txt")
                    .rev("1.1", T, "alice", "first")
                    .rev("1.2", T + 1000, "alice", "second")
                    .build(),
                FileBuilder::new("new.txt")
                    .dead("1.1", T + 2000, "alice", "file new.txt was initially added on branch BR.")
                    .rev("1.1.2.1", T + 2001, "alice", "add new.txt")
                    .sprouts("1.1", &["1.1.2.1"])
                    .symbol("BR", "1.1.0.2")
                    .build(),
            ],
            &Config::default(),
        );
        let graph = graph.unwrap();
        assert_eq!(graph.len(), 3);
        let branch_node = graph
            .nodes
            .iter()
            .find(|n| graph.branch_name(n.changeset.branch) == "BR")
            .unwrap();
        let fork = &graph.nodes[branch_node.parent.unwrap()];
        assert_eq!(fork.changeset.log, "second");
        assert!(warnings.is_empty());
    }
}
