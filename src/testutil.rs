//! Builders shared by the unit tests.

use std::path::PathBuf;

use crate::model::{FileHistory, RevisionState};
use crate::normalize::{NormalizedFile, RawHistory, RawRevision, normalize};
use crate::symbols::{Resolution, resolve};
use crate::warning::Warnings;

pub struct FileBuilder {
    raw: RawHistory,
}

impl FileBuilder {
    pub fn new(path: &str) -> Self {
        Self {
            raw: RawHistory {
                path: path.to_string(),
                origin: PathBuf::from(format!("{path},v")),
                executable: false,
                symbols: Vec::new(),
                revisions: Vec::new(),
            },
        }
    }

    pub fn rev(mut self, id: &str, timestamp: i64, author: &str, log: &str) -> Self {
        self.raw.revisions.push(RawRevision {
            id: id.to_string(),
            author: author.to_string(),
            committer: None,
            timestamp,
            tz_offset: 0,
            log: log.to_string(),
            state: RevisionState::Normal,
            branches: Vec::new(),
        });
        self
    }

    pub fn dead(mut self, id: &str, timestamp: i64, author: &str, log: &str) -> Self {
        self = self.rev(id, timestamp, author, log);
        if let Some(last) = self.raw.revisions.last_mut() {
            last.state = RevisionState::Dead;
        }
        self
    }

    /// Record `starts` as the branches sprouting from revision `id`.
    pub fn sprouts(mut self, id: &str, starts: &[&str]) -> Self {
        if let Some(rev) = self.raw.revisions.iter_mut().find(|r| r.id == id) {
            rev.branches = starts.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    pub fn symbol(mut self, name: &str, target: &str) -> Self {
        self.raw.symbols.push((name.to_string(), target.to_string()));
        self
    }

    pub fn build(self) -> RawHistory {
        self.raw
    }
}

/// Normalize and resolve `files` the way the pipeline does.
pub fn prepare(files: Vec<RawHistory>) -> (Vec<FileHistory>, Resolution, Warnings) {
    let normalized: Vec<NormalizedFile> = files
        .into_iter()
        .map(|raw| normalize(raw).unwrap())
        .collect();
    let mut warnings = Warnings::new();
    let resolution = resolve(&normalized, "master", &mut warnings);
    let histories = normalized.into_iter().map(|f| f.history).collect();
    (histories, resolution, warnings)
}
