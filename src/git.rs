//! Identity lookups from the local git configuration.

use std::process::Command;

/// Access to `git` settings of the current environment.
pub struct Git;

impl Git {
    /// The committer identity git would use, without its timestamp.
    ///
    /// `git var GIT_COMMITTER_IDENT` prints `Name <email> 1700000000 +0100`;
    /// only `Name <email>` is returned.
    pub fn committer_ident(&self) -> Result<String, Error> {
        let output = self.run_output(&["var", "GIT_COMMITTER_IDENT"])?;
        strip_timestamp(output.trim())
            .ok_or_else(|| Error::Failed(format!("unexpected identity '{}'", output.trim())))
    }

    /// `Name <email>` from `user.name` and `user.email`, if both are set.
    pub fn user_ident(&self) -> Option<String> {
        let name = self.config("user.name")?;
        let email = self.config("user.email")?;
        Some(format!("{name} <{email}>"))
    }

    /// Look up a single config value.
    pub fn config(&self, key: &str) -> Option<String> {
        self.run_output(&["config", "--get", key])
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Run a git command and capture its stdout.
    fn run_output(&self, args: &[&str]) -> Result<String, Error> {
        let output = Command::new("git")
            .args(args)
            .output()
            .map_err(|e| Error::Exec(format!("git {}: {e}", args.first().unwrap_or(&""))))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(Error::Failed(format!("git {}", args.join(" "))))
        }
    }
}

/// Drop the trailing `<seconds> <offset>` of an identity line.
fn strip_timestamp(ident: &str) -> Option<String> {
    let end = ident.rfind('>')?;
    Some(ident[..=end].to_string())
}

/// Errors from git operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to execute: {0}")]
    Exec(String),

    #[error("{0}")]
    Failed(String),
}
