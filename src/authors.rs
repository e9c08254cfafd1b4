//! Username to identity mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::warning::{Warning, Warnings};

/// Maps RCS usernames to `Full Name <email>` identities.
#[derive(Debug, Clone, Default)]
pub struct AuthorMap {
    map: BTreeMap<String, String>,
    warn_missing: bool,
    warned: BTreeSet<String>,
}

impl AuthorMap {
    pub fn new(map: BTreeMap<String, String>, warn_missing: bool) -> Self {
        Self {
            map,
            warn_missing,
            warned: BTreeSet::new(),
        }
    }

    pub fn contains(&self, username: &str) -> bool {
        self.map.contains_key(username)
    }

    pub fn insert(&mut self, username: impl Into<String>, identity: impl Into<String>) {
        let username = username.into();
        let identity = with_email(&username, identity.into());
        self.map.insert(username, identity);
    }

    /// The fast-import identity for `username`.
    ///
    /// Unmapped usernames are used as both name and email. When warnings are
    /// enabled, each unmapped username is reported once.
    pub fn identity(&mut self, username: &str, warnings: &mut Warnings) -> String {
        if let Some(identity) = self.map.get(username) {
            return identity.clone();
        }
        if self.warn_missing && self.warned.insert(username.to_string()) {
            warnings.push(Warning::UnmappedAuthor {
                username: username.to_string(),
            });
        }
        format!("{username} <{username}@example.com>")
    }
}

/// Parse authors file content: `username = Full Name <email>` per line.
///
/// Blank lines and `#` comments are skipped. A later definition of the same
/// username replaces the earlier one with a warning.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((username, identity)) = line.split_once('=') else {
            tracing::warn!("authors line {}: expected 'username = Name <email>'", lineno + 1);
            continue;
        };
        let username = username.trim().to_string();
        let identity = with_email(&username, identity.trim().to_string());
        if let Some(previous) = map.insert(username.clone(), identity.clone()) {
            tracing::warn!("username {username} redefined from '{previous}' to '{identity}'");
        }
    }
    map
}

/// Read and parse an authors file.
pub fn load(path: &Path) -> Result<BTreeMap<String, String>, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(parse(&content))
}

/// fast-import requires an email part; supply the username when it is missing.
fn with_email(username: &str, identity: String) -> String {
    if identity.contains('<') {
        identity
    } else {
        format!("{identity} <{username}>")
    }
}

/// Errors from reading an authors file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read authors file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
