//! Read histories and content out of RCS `,v` files with the RCS tools.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use tokio::task::JoinSet;

use crate::config::{LogEncoding, SourceConfig};
use crate::emit::ContentSource;
use crate::model::{ContentRef, RevisionId};
use crate::normalize::RawHistory;
use crate::rlog::{self, Target};

/// Runs `rlog` and `co` against `,v` files.
#[derive(Debug, Clone)]
pub struct Rcs {
    log_encoding: LogEncoding,
    expand_keywords: bool,
}

impl Rcs {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            log_encoding: config.log_encoding,
            expand_keywords: config.expand_keywords,
        }
    }

    /// Run `rlog` on one file and parse its output.
    pub async fn rlog(&self, target: Target) -> Result<RawHistory, Error> {
        let command = format!("rlog {}", target.origin.display());
        let output = tokio::process::Command::new("rlog")
            .arg(&target.origin)
            .output()
            .await
            .map_err(|e| Error::Exec {
                command: command.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(Error::Failed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = self.log_encoding.decode(&output.stdout);
        let history = rlog::parse(&text, target)?;
        tracing::debug!("{}: {} revisions", history.path, history.revisions.len());
        Ok(history)
    }

    /// Run `rlog` on every target with at most `jobs` processes at once.
    ///
    /// Histories come back sorted by path whatever order the processes
    /// finish in. The first failure ends the run.
    pub async fn histories(&self, targets: Vec<Target>, jobs: usize) -> Result<Vec<RawHistory>, Error> {
        let jobs = jobs.max(1);
        let mut pending = targets.into_iter();
        let mut tasks = JoinSet::new();
        let mut histories = Vec::new();

        loop {
            while tasks.len() < jobs {
                let Some(target) = pending.next() else {
                    break;
                };
                let rcs = self.clone();
                tasks.spawn(async move { rcs.rlog(target).await });
            }
            let Some(result) = tasks.join_next().await else {
                break;
            };
            histories.push(result??);
        }

        histories.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(histories)
    }

    /// Check out the full text of `revision` with `co`.
    pub fn checkout(&self, origin: &Path, revision: &RevisionId) -> Result<Vec<u8>, Error> {
        let mut args = vec!["-q".to_string(), format!("-p{revision}")];
        if !self.expand_keywords {
            args.push("-kk".to_string());
        }
        let command = format!("co {} {}", args.join(" "), origin.display());

        let output = Command::new("co")
            .args(&args)
            .arg(origin)
            .output()
            .map_err(|e| Error::Exec {
                command: command.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(Error::Failed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl ContentSource for Rcs {
    fn fetch(&self, content: &ContentRef) -> anyhow::Result<Vec<u8>> {
        Ok(self.checkout(&content.origin, &content.revision)?)
    }
}

/// Find the `,v` files named by `paths`.
///
/// Directories are walked recursively. Files whose repository path or base
/// name matches one of the `ignore` globs are left out. The result is sorted
/// by repository path; when two files map to the same path the first one
/// found wins.
pub fn discover(paths: &[PathBuf], ignore: &[String]) -> Result<Vec<Target>, Error> {
    let patterns = ignore
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| Error::Pattern {
                pattern: p.clone(),
                source: e,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let ignored = |path: &str| {
        let name = path.rsplit('/').next().unwrap_or(path);
        patterns.iter().any(|p| p.matches(path) || p.matches(name))
    };

    let mut found: BTreeMap<String, Target> = BTreeMap::new();
    let mut add = |origin: PathBuf, path: String| {
        if ignored(&path) {
            tracing::debug!("ignoring {}", origin.display());
            return;
        }
        if let Some(existing) = found.get(&path) {
            tracing::warn!(
                "{} and {} both map to {path}; keeping the first",
                existing.origin.display(),
                origin.display()
            );
            return;
        }
        let executable = is_executable(&origin);
        found.insert(
            path.clone(),
            Target {
                path,
                origin,
                executable,
            },
        );
    };

    for root in paths {
        if root.is_dir() {
            for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::Walk {
                    path: root.display().to_string(),
                    source: e,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(root) else {
                    continue;
                };
                if let Some(path) = repository_path(relative) {
                    add(entry.path().to_path_buf(), path);
                }
            }
        } else {
            let name = root.file_name().map(Path::new);
            match name.and_then(repository_path) {
                Some(path) => add(root.clone(), path),
                None => tracing::warn!("skipping {}: not an RCS file", root.display()),
            }
        }
    }

    Ok(found.into_values().collect())
}

/// Map the location of a `,v` file to the path of the file it versions.
///
/// `RCS` and `Attic` directories are dropped, as is the `,v` suffix.
/// Returns `None` for anything that is not a `,v` file.
pub fn repository_path(relative: &Path) -> Option<String> {
    let mut parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let name = parts.pop()?;
    let name = name.strip_suffix(",v")?;
    if name.is_empty() {
        return None;
    }
    parts.retain(|p| p != "RCS" && p != "Attic");
    parts.push(name.to_string());
    Some(parts.join("/"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

/// Errors from reading RCS files.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to execute {command}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error(transparent)]
    Parse(#[from] rlog::Error),

    #[error("failed to walk '{path}'")]
    Walk {
        path: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid ignore pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("rlog task failed")]
    Task(#[from] tokio::task::JoinError),
}
