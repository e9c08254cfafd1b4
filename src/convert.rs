//! Run a complete conversion: histories in, fast-import stream out.

use std::io::Write;
use std::path::PathBuf;

use crate::authors::AuthorMap;
use crate::config::Config;
use crate::emit::{self, ContentSource};
use crate::graph;
use crate::group::group;
use crate::normalize::{self, NormalizedFile, RawHistory, normalize};
use crate::rcs::{self, Rcs};
use crate::symbols::resolve;
use crate::warning::{Warning, Warnings};

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct Report {
    pub files: usize,
    pub revisions: usize,
    pub changesets: usize,
    pub commits: usize,
    pub blobs: usize,
    pub tags: usize,
    pub warnings: Vec<Warning>,
}

/// Discover the `,v` files under `paths` and read their histories.
pub async fn load(paths: &[PathBuf], config: &Config) -> Result<Vec<RawHistory>, Error> {
    let targets = rcs::discover(paths, &config.source.ignore)?;
    if targets.is_empty() {
        return Err(Error::NoHistories);
    }
    tracing::info!("reading {} RCS files", targets.len());
    let rcs = Rcs::new(&config.source);
    Ok(rcs.histories(targets, config.source.jobs).await?)
}

/// Convert `histories` and write the stream to `out`.
///
/// Every check that can reject the input runs before the first byte is
/// written. Failures while writing leave a truncated stream behind.
pub fn convert<W: Write>(
    mut histories: Vec<RawHistory>,
    source: &dyn ContentSource,
    authors: &mut AuthorMap,
    config: &Config,
    out: W,
) -> Result<Report, Error> {
    if histories.is_empty() {
        return Err(Error::NoHistories);
    }
    histories.sort_by(|a, b| a.path.cmp(&b.path));

    let normalized = histories
        .into_iter()
        .map(normalize)
        .collect::<Result<Vec<NormalizedFile>, _>>()?;

    let mut warnings = Warnings::new();
    let resolution = resolve(&normalized, &config.trunk_branch, &mut warnings);
    let files: Vec<_> = normalized.into_iter().map(|f| f.history).collect();
    let revisions = files.iter().map(|f| f.revisions.len()).sum();

    let changesets = group(&files, &resolution, config, &mut warnings);
    tracing::info!(
        "grouped {revisions} revisions of {} files into {} changesets",
        files.len(),
        changesets.len()
    );
    let changeset_count = changesets.len();

    let graph = graph::build(changesets, &resolution, config, &mut warnings)?;
    let stats = emit::emit(&graph, source, authors, config, out, &mut warnings)?;

    Ok(Report {
        files: files.len(),
        revisions,
        changesets: changeset_count,
        commits: stats.commits,
        blobs: stats.blobs,
        tags: stats.tags,
        warnings: warnings.into_vec(),
    })
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no RCS files found")]
    NoHistories,

    #[error(transparent)]
    Source(#[from] rcs::Error),

    #[error(transparent)]
    Normalize(#[from] normalize::Error),

    #[error(transparent)]
    Graph(#[from] graph::Error),

    #[error(transparent)]
    Emit(#[from] emit::Error),
}
