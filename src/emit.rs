//! Serialize a commit graph as a `git fast-import` stream.
//!
//! The stream is written in one pass. Blobs for a commit are fetched and
//! written right before the commit that references them, so only one
//! changeset's content is held in memory at a time.

use std::collections::HashMap;
use std::io::Write;

use crate::authors::AuthorMap;
use crate::config::Config;
use crate::graph::{CommitGraph, CommitNode};
use crate::model::{ContentRef, RevisionId, RevisionRecord};
use crate::warning::Warnings;

/// Supplies the content of a revision on demand.
pub trait ContentSource {
    fn fetch(&self, content: &ContentRef) -> anyhow::Result<Vec<u8>>;
}

/// Counts of what was written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub blobs: usize,
    pub commits: usize,
    pub tags: usize,
}

/// Write `graph` to `out`.
pub fn emit<W: Write>(
    graph: &CommitGraph,
    source: &dyn ContentSource,
    authors: &mut AuthorMap,
    config: &Config,
    out: W,
    warnings: &mut Warnings,
) -> Result<EmitStats, Error> {
    let mut emitter = Emitter {
        out,
        source,
        next_mark: 1,
        blob_marks: HashMap::new(),
        commit_marks: Vec::with_capacity(graph.len()),
        stats: EmitStats::default(),
    };

    for node in &graph.nodes {
        emitter.commit(graph, node, authors, config, warnings)?;
    }
    for branch in &graph.branch_refs {
        let mark = emitter.commit_marks[branch.target];
        emitter.reset(&format!("refs/heads/{}", sanitize_ref(&branch.name)), mark)?;
    }
    emitter.out.flush()?;

    tracing::info!(
        "wrote {} blobs, {} commits and {} tags",
        emitter.stats.blobs,
        emitter.stats.commits,
        emitter.stats.tags
    );
    Ok(emitter.stats)
}

struct Emitter<'a, W> {
    out: W,
    source: &'a dyn ContentSource,
    next_mark: u64,
    blob_marks: HashMap<(String, RevisionId), u64>,
    /// Mark of every node emitted so far, by node index.
    commit_marks: Vec<u64>,
    stats: EmitStats,
}

enum FileChange<'a> {
    Modify { mode: &'static str, mark: u64, path: &'a str },
    Delete { path: &'a str },
}

impl<W: Write> Emitter<'_, W> {
    fn mark(&mut self) -> u64 {
        let mark = self.next_mark;
        self.next_mark += 1;
        mark
    }

    fn blob(&mut self, record: &RevisionRecord) -> Result<u64, Error> {
        let key = (record.path.clone(), record.id.clone());
        if let Some(&mark) = self.blob_marks.get(&key) {
            return Ok(mark);
        }
        let content = self
            .source
            .fetch(&record.content)
            .map_err(|source| Error::Content {
                path: record.path.clone(),
                revision: record.id.clone(),
                source,
            })?;
        let mark = self.mark();
        write!(self.out, "blob\nmark :{mark}\ndata {}\n", content.len())?;
        self.out.write_all(&content)?;
        self.out.write_all(b"\n")?;
        self.blob_marks.insert(key, mark);
        self.stats.blobs += 1;
        Ok(mark)
    }

    fn commit(
        &mut self,
        graph: &CommitGraph,
        node: &CommitNode,
        authors: &mut AuthorMap,
        config: &Config,
        warnings: &mut Warnings,
    ) -> Result<(), Error> {
        let changeset = &node.changeset;

        let mut changes = Vec::with_capacity(changeset.members.len());
        for member in &changeset.members {
            if member.is_dead() {
                changes.push(FileChange::Delete { path: &member.path });
            } else {
                let mark = self.blob(member)?;
                let mode = if member.executable { "100755" } else { "100644" };
                changes.push(FileChange::Modify {
                    mode,
                    mark,
                    path: &member.path,
                });
            }
        }

        let author = authors.identity(&changeset.author, warnings);
        let committer = if config.author_is_committer {
            author.clone()
        } else if changeset.committer != changeset.author {
            authors.identity(&changeset.committer, warnings)
        } else if let Some(committer) = &config.committer {
            committer.clone()
        } else {
            author.clone()
        };
        let date = format!(
            "{} {}",
            changeset.earliest,
            format_offset(changeset.tz_offset())
        );

        let mut message = match graph.single_file() {
            Some(path) if config.log_filename_prefix => format!("{path}: {}", changeset.log),
            _ => changeset.log.clone(),
        };
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }

        let mark = self.mark();
        let branch = sanitize_ref(graph.branch_name(changeset.branch));
        write!(
            self.out,
            "commit refs/heads/{branch}\nmark :{mark}\nauthor {author} {date}\ncommitter {committer} {date}\ndata {}\n",
            message.len()
        )?;
        self.out.write_all(message.as_bytes())?;
        if let Some(parent) = node.parent {
            writeln!(self.out, "from :{}", self.commit_marks[parent])?;
        }
        for change in &changes {
            match change {
                FileChange::Modify { mode, mark, path } => {
                    writeln!(self.out, "M {mode} :{mark} {}", quote_path(path))?
                }
                FileChange::Delete { path } => writeln!(self.out, "D {}", quote_path(path))?,
            }
        }
        self.out.write_all(b"\n")?;
        self.commit_marks.push(mark);
        self.stats.commits += 1;

        for tag in &node.tags {
            self.reset(&format!("refs/tags/{}", sanitize_ref(tag)), mark)?;
            self.stats.tags += 1;
        }
        Ok(())
    }

    fn reset(&mut self, refname: &str, mark: u64) -> Result<(), Error> {
        write!(self.out, "reset {refname}\nfrom :{mark}\n\n")?;
        Ok(())
    }
}

/// `+hhmm` / `-hhmm` from seconds east of UTC.
fn format_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.unsigned_abs() / 60;
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

/// Quote a path the way fast-import expects when it could be misread.
fn quote_path(path: &str) -> String {
    if !path.starts_with('"') && !path.contains('\n') {
        return path.to_string();
    }
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Make `name` acceptable to `git check-ref-format`, replacing what is not.
pub fn sanitize_ref(name: &str) -> String {
    let components: Vec<String> = name
        .split('/')
        .filter(|c| !c.is_empty())
        .map(|component| {
            let mut clean: String = component
                .chars()
                .map(|c| match c {
                    ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\' => '_',
                    c if c.is_control() => '_',
                    c => c,
                })
                .collect();
            while clean.contains("..") {
                clean = clean.replace("..", "._");
            }
            clean = clean.replace("@{", "@_");
            if clean.starts_with('.') {
                clean.insert(0, '_');
            }
            if clean.ends_with('.') {
                clean.push('_');
            }
            if clean.ends_with(".lock") {
                clean.push('_');
            }
            clean
        })
        .collect();
    let joined = components.join("/");
    if joined.is_empty() || joined == "@" {
        "_".to_string()
    } else {
        joined
    }
}

/// Errors from writing the stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write fast-import stream")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch content of {path} revision {revision}")]
    Content {
        path: String,
        revision: RevisionId,
        #[source]
        source: anyhow::Error,
    },
}
