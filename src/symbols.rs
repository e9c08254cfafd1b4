//! Global symbol table and branch identities.
//!
//! RCS attaches symbols per file, so nothing guarantees that a name means the
//! same thing everywhere. Resolution collects every attachment into a table
//! that is built once and then only read, and assigns each logical branch a
//! [`BranchId`] in an arena shared by the later stages.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{BranchId, RevisionId, RevisionRecord, SymbolName};
use crate::normalize::NormalizedFile;
use crate::warning::{Warning, Warnings};

/// Read-only lookup of where every symbol points in every file.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    /// Stable symbols: name → path → tagged revision.
    tags: BTreeMap<SymbolName, BTreeMap<String, RevisionId>>,
    /// Branch symbols: name → path → branch number.
    branches: BTreeMap<SymbolName, BTreeMap<String, RevisionId>>,
    /// path → branch number → names, for naming branch nodes.
    branch_names: BTreeMap<String, BTreeMap<RevisionId, BTreeSet<SymbolName>>>,
}

impl SymbolTable {
    /// The revision `name` tags in `path`, if it is a tag there.
    pub fn tag_target(&self, name: &str, path: &str) -> Option<&RevisionId> {
        self.tags.get(name)?.get(path)
    }

    pub fn is_tag(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    /// All stable symbols with their per-file targets, by name.
    pub fn tags(&self) -> impl Iterator<Item = (&SymbolName, &BTreeMap<String, RevisionId>)> {
        self.tags.iter()
    }

    /// All branch symbols with their per-file branch numbers, by name.
    pub fn branches(&self) -> impl Iterator<Item = (&SymbolName, &BTreeMap<String, RevisionId>)> {
        self.branches.iter()
    }

    /// The name given to `branch` in `path`, if any. Aliases resolve to the
    /// alphabetically first name.
    pub fn branch_name(&self, path: &str, branch: &RevisionId) -> Option<&str> {
        self.branch_names
            .get(path)?
            .get(branch)?
            .iter()
            .next()
            .map(String::as_str)
    }
}

/// A logical branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    pub name: String,
    /// The branch this one forks from; `None` for the trunk.
    pub parent: Option<BranchId>,
}

/// Arena of logical branches, indexed by [`BranchId`].
#[derive(Debug, Clone)]
pub struct BranchArena {
    nodes: Vec<BranchNode>,
    /// (path, branch number) → logical branch.
    by_file: BTreeMap<(String, RevisionId), BranchId>,
    /// Branch symbol → logical branch.
    by_symbol: BTreeMap<SymbolName, BranchId>,
}

impl BranchArena {
    fn new(trunk_name: &str) -> Self {
        Self {
            nodes: vec![BranchNode {
                name: trunk_name.to_string(),
                parent: None,
            }],
            by_file: BTreeMap::new(),
            by_symbol: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: BranchId) -> &BranchNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: BranchId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn parent(&self, id: BranchId) -> Option<BranchId> {
        self.nodes[id.0].parent
    }

    pub fn ids(&self) -> impl Iterator<Item = BranchId> + use<> {
        (0..self.nodes.len()).map(BranchId)
    }

    /// The logical branch of a per-file branch number.
    pub fn lookup(&self, path: &str, branch: &RevisionId) -> Option<BranchId> {
        self.by_file.get(&(path.to_string(), branch.clone())).copied()
    }

    /// The logical branch a record lives on.
    pub fn branch_of(&self, record: &RevisionRecord) -> BranchId {
        match record.id.branch_number() {
            None => BranchId::TRUNK,
            Some(number) => {
                let id = self.lookup(&record.path, &number);
                debug_assert!(id.is_some(), "{}:{} was never resolved", record.path, record.id);
                id.unwrap_or(BranchId::TRUNK)
            }
        }
    }

    /// The logical branch a branch symbol names.
    pub fn find(&self, symbol: &str) -> Option<BranchId> {
        self.by_symbol.get(symbol).copied()
    }

    #[cfg(test)]
    pub(crate) fn set_parent(&mut self, id: BranchId, parent: BranchId) {
        self.nodes[id.0].parent = Some(parent);
    }

    fn add(&mut self, name: String) -> BranchId {
        self.nodes.push(BranchNode { name, parent: None });
        BranchId(self.nodes.len() - 1)
    }
}

/// The output of symbol resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub table: SymbolTable,
    pub branches: BranchArena,
}

/// Build the symbol table and branch arena for a set of normalized files.
pub fn resolve(files: &[NormalizedFile], trunk_name: &str, warnings: &mut Warnings) -> Resolution {
    let mut files: Vec<&NormalizedFile> = files.iter().collect();
    files.sort_by(|a, b| a.history.path.cmp(&b.history.path));

    let table = build_table(&files, warnings);
    let branches = build_arena(&files, &table, trunk_name, warnings);

    tracing::debug!(
        "resolved {} tags and {} branches",
        table.tags.len(),
        branches.len() - 1
    );

    Resolution { table, branches }
}

fn build_table(files: &[&NormalizedFile], warnings: &mut Warnings) -> SymbolTable {
    let mut table = SymbolTable::default();

    for file in files {
        let path = &file.history.path;
        for (name, target) in &file.symbols {
            if let Some(branch) = target.as_branch_symbol() {
                table
                    .branches
                    .entry(name.clone())
                    .or_default()
                    .insert(path.clone(), branch.clone());
                table
                    .branch_names
                    .entry(path.clone())
                    .or_default()
                    .entry(branch)
                    .or_default()
                    .insert(name.clone());
            } else if file.history.revisions.iter().any(|r| &r.id == target) {
                table
                    .tags
                    .entry(name.clone())
                    .or_default()
                    .insert(path.clone(), target.clone());
            } else {
                warnings.push(Warning::SymbolConflict {
                    symbol: name.clone(),
                    detail: format!("names missing revision {path}:{target}; dropping it"),
                });
            }
        }
        for (name, target) in &file.dropped_symbols {
            warnings.push(Warning::SymbolConflict {
                symbol: name.clone(),
                detail: format!("target '{target}' in {path} is not a revision number; dropping it"),
            });
        }
    }

    let mixed: Vec<SymbolName> = table
        .tags
        .keys()
        .filter(|name| table.branches.contains_key(*name))
        .cloned()
        .collect();
    for name in mixed {
        let tagged: Vec<&str> = table.tags[&name].keys().map(String::as_str).collect();
        warnings.push(Warning::SymbolConflict {
            symbol: name.clone(),
            detail: format!(
                "used as a tag in {} but as a branch elsewhere; treating it as a branch",
                tagged.join(", ")
            ),
        });
        table.tags.remove(&name);
    }

    table
}

fn build_arena(
    files: &[&NormalizedFile],
    table: &SymbolTable,
    trunk_name: &str,
    warnings: &mut Warnings,
) -> BranchArena {
    let mut arena = BranchArena::new(trunk_name);
    // Which file first fixed a node's parent, for conflict messages.
    let mut parent_source: BTreeMap<BranchId, String> = BTreeMap::new();

    for file in files {
        let path = &file.history.path;

        // Branch numbers with revisions, plus those only known from symbols.
        let mut numbers: BTreeSet<RevisionId> = file
            .history
            .revisions
            .iter()
            .filter_map(|r| r.id.branch_number())
            .collect();
        for (_, target) in &file.symbols {
            if let Some(branch) = target.as_branch_symbol() {
                let base_exists = branch
                    .branch_base()
                    .is_some_and(|base| file.history.revisions.iter().any(|r| r.id == base));
                if base_exists {
                    numbers.insert(branch);
                }
            }
        }

        // Shorter numbers first so a parent branch is known before its children.
        let mut numbers: Vec<RevisionId> = numbers.into_iter().collect();
        numbers.sort_by(|a, b| a.components().len().cmp(&b.components().len()).then(a.cmp(b)));

        for number in numbers {
            let id = match table.branch_name(path, &number) {
                Some(name) => match arena.by_symbol.get(name) {
                    Some(&id) => id,
                    None => {
                        let id = arena.add(branch_node_name(table, name, trunk_name, warnings));
                        arena.by_symbol.insert(name.to_string(), id);
                        id
                    }
                },
                None => arena.add(format!("unnamed/{path}/{number}")),
            };
            arena.by_file.insert((path.clone(), number.clone()), id);

            let parent = match number.branch_base() {
                Some(base) if base.is_trunk() => Some(BranchId::TRUNK),
                Some(base) => base
                    .branch_number()
                    .and_then(|outer| arena.lookup(path, &outer)),
                None => None,
            };
            let Some(parent) = parent else {
                continue;
            };

            let current = arena.nodes[id.0].parent;
            match current {
                None => {
                    arena.nodes[id.0].parent = Some(parent);
                    parent_source.insert(id, path.clone());
                }
                Some(existing) if existing != parent => {
                    warnings.push(Warning::SymbolConflict {
                        symbol: arena.name(id).to_string(),
                        detail: format!(
                            "forks from '{}' in {} but from '{}' in {path}; keeping the former",
                            arena.name(existing),
                            parent_source.get(&id).map_or("?", String::as_str),
                            arena.name(parent),
                        ),
                    });
                }
                Some(_) => {}
            }
        }
    }

    arena
}

/// The node name for branch symbol `name`, moved aside when it would
/// collide with the trunk.
fn branch_node_name(
    table: &SymbolTable,
    name: &str,
    trunk_name: &str,
    warnings: &mut Warnings,
) -> String {
    if name != trunk_name {
        return name.to_string();
    }
    let mut renamed = format!("{name}-branch");
    while table.branches.contains_key(&renamed) {
        renamed.push_str("-branch");
    }
    warnings.push(Warning::SymbolConflict {
        symbol: name.to_string(),
        detail: format!("branch has the trunk's name; writing it as '{renamed}'"),
    });
    renamed
}
