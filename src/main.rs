use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rcs_fast_export::{AuthorMap, Config, Git, LogEncoding, Rcs};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rcs-fast-export")]
#[command(about = "Convert RCS ,v files into a git fast-import stream on stdout")]
#[command(version)]
struct Cli {
    /// RCS files or directories to search for ,v files
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// TOML settings file; command-line flags take precedence over it
    #[arg(long)]
    config: Option<PathBuf>,

    /// File with `username = Full Name <email>` mappings
    #[arg(short = 'A', long)]
    authors_file: Option<PathBuf>,

    /// Use the author as committer
    #[arg(long, overrides_with = "no_author_is_committer")]
    author_is_committer: bool,

    /// Do not use the author as committer
    #[arg(long)]
    no_author_is_committer: bool,

    /// Ignore files matching this shell pattern (can be repeated)
    #[arg(long, value_name = "GLOB")]
    ignore: Vec<String>,

    /// Encoding of log messages in the RCS files
    #[arg(long, value_enum)]
    log_encoding: Option<LogEncoding>,

    /// Time window in seconds for coalescing revisions into one commit
    #[arg(long, value_name = "SECONDS")]
    rcs_commit_fuzz: Option<u32>,

    /// Check symbols when coalescing (default)
    #[arg(long, overrides_with = "no_symbol_check")]
    symbol_check: bool,

    /// Do not check symbols when coalescing
    #[arg(long)]
    no_symbol_check: bool,

    /// Coalesce revisions even when their log messages differ
    #[arg(long)]
    no_log_match: bool,

    /// Create a lightweight tag for each RCS revision
    #[arg(long)]
    tag_each_rev: bool,

    /// Prepend the file name to commit logs for single-file imports
    #[arg(long)]
    log_filename: bool,

    /// Only convert trunk revisions
    #[arg(long)]
    skip_branches: bool,

    /// Warn about usernames not found in the authors map
    #[arg(long)]
    warn_missing_authors: bool,

    /// Check out content without expanding RCS keywords
    #[arg(long)]
    no_expand_keywords: bool,

    /// Name of the branch trunk revisions go to
    #[arg(long, value_name = "NAME")]
    trunk_branch: Option<String>,

    /// Committer identity (`Name <email>`) when the author is not used
    #[arg(long, value_name = "IDENT")]
    committer: Option<String>,

    /// Number of rlog processes to run at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Log per-revision detail
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer the flags that were given on top of `config`.
    fn apply(&self, config: &mut Config) {
        if self.author_is_committer {
            config.author_is_committer = true;
        }
        if self.no_author_is_committer {
            config.author_is_committer = false;
        }
        config.source.ignore.extend(self.ignore.iter().cloned());
        if let Some(encoding) = self.log_encoding {
            config.source.log_encoding = encoding;
        }
        if let Some(fuzz) = self.rcs_commit_fuzz {
            config.fuzz_seconds = fuzz;
        }
        if self.symbol_check {
            config.symbol_check = true;
        }
        if self.no_symbol_check {
            config.symbol_check = false;
        }
        if self.no_log_match {
            config.match_log_messages = false;
        }
        config.tag_each_revision |= self.tag_each_rev;
        config.log_filename_prefix |= self.log_filename;
        config.skip_branches |= self.skip_branches;
        config.warn_missing_authors |= self.warn_missing_authors;
        if self.no_expand_keywords {
            config.source.expand_keywords = false;
        }
        if let Some(trunk) = &self.trunk_branch {
            config.trunk_branch = trunk.clone();
        }
        if let Some(committer) = &self.committer {
            config.committer = Some(committer.clone());
        }
        if let Some(path) = &self.authors_file {
            config.authors_file = Some(path.clone());
        }
        if let Some(jobs) = self.jobs {
            config.source.jobs = jobs;
        }
    }
}

/// Build the author map from the config table, the authors file and the
/// local git identity of the current user.
fn author_map(config: &Config, git: &Git) -> anyhow::Result<AuthorMap> {
    let mut map = config.authors.clone();
    if let Some(path) = &config.authors_file {
        map.extend(rcs_fast_export::load_authors(path)?);
    }
    let mut authors = AuthorMap::new(map, config.warn_missing_authors);

    if let Ok(user) = std::env::var("USER") {
        if !authors.contains(&user) {
            if let Some(ident) = git.user_ident() {
                tracing::debug!("mapping current user {user} to {ident}");
                authors.insert(user, ident);
            }
        }
    }
    Ok(authors)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    let git = Git;
    let mut authors = author_map(&config, &git)?;
    if !config.author_is_committer && config.committer.is_none() {
        match git.committer_ident() {
            Ok(ident) => config.committer = Some(ident),
            Err(e) => tracing::debug!("no git committer identity: {e}"),
        }
    }

    let histories = rcs_fast_export::load(&cli.paths, &config).await?;
    let rcs = Rcs::new(&config.source);
    let stdout = std::io::stdout();
    let report = rcs_fast_export::convert(
        histories,
        &rcs,
        &mut authors,
        &config,
        BufWriter::new(stdout.lock()),
    )
    .context("conversion failed")?;

    tracing::info!(
        "converted {} revisions of {} files: {} changesets, {} commits, {} tags, {} warnings",
        report.revisions,
        report.files,
        report.changesets,
        report.commits,
        report.tags,
        report.warnings.len()
    );
    Ok(())
}
