//! Conversion settings.
//!
//! Settings can come from a TOML file; command-line flags are layered on top
//! by the binary. Every field has a default, so an empty file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default coalescing window, in seconds.
pub const DEFAULT_FUZZ_SECONDS: u32 = 300;

/// Everything that shapes a conversion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest timestamp gap between revisions of one changeset.
    pub fuzz_seconds: u32,

    /// Refuse to group revisions whose tags would then point at the wrong state.
    pub symbol_check: bool,

    /// Require identical log messages within a changeset.
    pub match_log_messages: bool,

    /// Drop everything that is not on the trunk.
    pub skip_branches: bool,

    /// Emit a lightweight tag for every RCS revision.
    pub tag_each_revision: bool,

    /// Prefix log messages with the file name when converting a single file.
    pub log_filename_prefix: bool,

    /// Use the author identity as committer.
    pub author_is_committer: bool,

    /// Warn once per username missing from the authors map.
    pub warn_missing_authors: bool,

    /// Committer identity (`Name <email>`) when the author is not used.
    pub committer: Option<String>,

    /// Ref name of the trunk.
    pub trunk_branch: String,

    /// File in `username = Full Name <email>` format.
    pub authors_file: Option<PathBuf>,

    /// Inline author mappings; entries from `authors_file` take precedence.
    pub authors: BTreeMap<String, String>,

    pub source: SourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fuzz_seconds: DEFAULT_FUZZ_SECONDS,
            symbol_check: true,
            match_log_messages: true,
            skip_branches: false,
            tag_each_revision: false,
            log_filename_prefix: false,
            author_is_committer: false,
            warn_missing_authors: false,
            committer: None,
            trunk_branch: "master".to_string(),
            authors_file: None,
            authors: BTreeMap::new(),
            source: SourceConfig::default(),
        }
    }
}

/// Settings for reading RCS files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Shell globs of files to leave out.
    pub ignore: Vec<String>,

    pub log_encoding: LogEncoding,

    /// Let `co` expand RCS keywords; `false` checks out with `-kk`.
    pub expand_keywords: bool,

    /// How many `rlog` processes may run at once.
    pub jobs: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ignore: Vec::new(),
            log_encoding: LogEncoding::Utf8,
            expand_keywords: true,
            jobs: 8,
        }
    }
}

/// Encoding of log messages inside the RCS files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogEncoding {
    #[value(name = "utf-8", alias = "utf8")]
    Utf8,
    #[value(name = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl LogEncoding {
    /// Decode raw bytes written in this encoding.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            LogEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            // Latin-1 maps every byte to the code point of the same value.
            LogEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

impl Config {
    /// Parse a config from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize the config back to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::from_toml(&content)?)
    }
}

/// Errors from loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
}
