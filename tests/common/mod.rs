//! Shared helpers for the pipeline tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;

use rcs_fast_export::{
    AuthorMap, Config, ContentRef, ContentSource, RawHistory, RawRevision, Report, RevisionState,
};

pub const T: i64 = 1_000_000_000;

/// Builds a `RawHistory` the way an rlog parse would deliver it.
pub struct HistoryBuilder {
    raw: RawHistory,
}

impl HistoryBuilder {
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

    pub fn sprouts(mut self, id: &str, branches: &[&str]) -> Self {
        if let Some(rev) = self.raw.revisions.iter_mut().find(|r| r.id == id) {
            rev.branches = branches.iter().map(|b| b.to_string()).collect();
        }
        self
    }

    pub fn symbol(mut self, name: &str, target: &str) -> Self {
        self.raw.symbols.push((name.to_string(), target.to_string()));
        self
    }

    pub fn executable(mut self) -> Self {
        self.raw.executable = true;
        self
    }

    pub fn build(self) -> RawHistory {
        self.raw
    }
}

/// Content is `<path> <revision>\n`, and every fetch is recorded.
#[derive(Default)]
pub struct MemorySource {
    pub fetched: RefCell<Vec<ContentRef>>,
}

impl ContentSource for MemorySource {
    fn fetch(&self, content: &ContentRef) -> anyhow::Result<Vec<u8>> {
        self.fetched.borrow_mut().push(content.clone());
        let origin = content.origin.display().to_string();
        let path = origin.trim_end_matches(",v");
        Ok(format!("{path} {}\n", content.revision).into_bytes())
    }
}

/// Run the pipeline into memory.
pub fn run(histories: Vec<RawHistory>, config: &Config) -> (String, Report) {
    let source = MemorySource::default();
    let mut out = Vec::new();
    let report = rcs_fast_export::convert(
        histories,
        &source,
        &mut AuthorMap::default(),
        config,
        &mut out,
    )
    .unwrap();
    (String::from_utf8(out).unwrap(), report)
}

/// A commit read back out of a stream.
#[derive(Debug, Clone)]
pub struct StreamCommit {
    pub refname: String,
    pub mark: u64,
    pub from: Option<u64>,
    pub message: String,
    /// `M`/`D` lines, verbatim.
    pub changes: Vec<String>,
}

/// A blob read back out of a stream.
#[derive(Debug, Clone)]
pub struct StreamBlob {
    pub mark: u64,
    pub data: String,
}

/// A `reset` record read back out of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReset {
    pub refname: String,
    pub from: u64,
}

#[derive(Debug, Default)]
pub struct Stream {
    pub blobs: Vec<StreamBlob>,
    pub commits: Vec<StreamCommit>,
    pub resets: Vec<StreamReset>,
}

impl Stream {
    pub fn blob(&self, mark: u64) -> Option<&StreamBlob> {
        self.blobs.iter().find(|b| b.mark == mark)
    }
}

/// Parse the subset of fast-import the exporter writes.
pub fn parse_stream(stream: &str) -> Stream {
    let mut parsed = Stream::default();
    let mut rest = stream;

    while !rest.is_empty() {
        let line = next_line(&mut rest);
        if line.is_empty() {
            continue;
        }
        if line == "blob" {
            let mark = mark_of(next_line(&mut rest), "mark :");
            let data = read_data(&mut rest);
            parsed.blobs.push(StreamBlob { mark, data });
        } else if let Some(refname) = line.strip_prefix("commit ") {
            let mark = mark_of(next_line(&mut rest), "mark :");
            let author = next_line(&mut rest);
            assert!(author.starts_with("author "), "{author}");
            let committer = next_line(&mut rest);
            assert!(committer.starts_with("committer "), "{committer}");
            let message = read_data(&mut rest);
            let mut commit = StreamCommit {
                refname: refname.to_string(),
                mark,
                from: None,
                message,
                changes: Vec::new(),
            };
            loop {
                let line = next_line(&mut rest);
                if line.is_empty() {
                    break;
                }
                if let Some(from) = line.strip_prefix("from :") {
                    commit.from = Some(from.parse().unwrap());
                } else {
                    commit.changes.push(line.to_string());
                }
            }
            parsed.commits.push(commit);
        } else if let Some(refname) = line.strip_prefix("reset ") {
            let from = mark_of(next_line(&mut rest), "from :");
            parsed.resets.push(StreamReset {
                refname: refname.to_string(),
                from,
            });
        } else {
            panic!("unexpected stream line: {line}");
        }
    }
    parsed
}

fn next_line<'a>(rest: &mut &'a str) -> &'a str {
    let s = *rest;
    let (line, tail) = s.split_once('\n').unwrap_or((s, ""));
    *rest = tail;
    line
}

fn read_data(rest: &mut &str) -> String {
    let line = next_line(rest);
    let len: usize = line.strip_prefix("data ").unwrap().parse().unwrap();
    let s = *rest;
    *rest = &s[len..];
    s[..len].to_string()
}

fn mark_of(line: &str, prefix: &str) -> u64 {
    line.strip_prefix(prefix).unwrap().parse().unwrap()
}
