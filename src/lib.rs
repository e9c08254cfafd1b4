//! rcs-fast-export: convert RCS file histories into a git fast-import stream.
//!
//! RCS versions each file on its own. This crate rebuilds project-wide
//! history from those per-file histories and writes it as a stream that
//! `git fast-import` can load.
//!
//! # Architecture
//!
//! - **Rcs / Rlog**: Discover `,v` files and read their histories with the RCS tools
//! - **Normalize**: Derive revision parents and validate each file's history
//! - **Symbols**: Resolve tags and branches across files into one table
//! - **Group**: Coalesce revisions into changesets by author, log and time
//! - **Graph**: Order changesets into commits on branches
//! - **Emit**: Write the commit graph as a fast-import stream
//! - **Convert**: Run the whole pipeline and report what happened

mod authors;
mod config;
mod convert;
mod emit;
mod git;
mod graph;
mod group;
mod model;
mod normalize;
mod rcs;
mod rlog;
mod symbols;
mod warning;

#[cfg(test)]
mod testutil;

pub use authors::{AuthorMap, load as load_authors, parse as parse_authors};
pub use config::{Config, DEFAULT_FUZZ_SECONDS, LogEncoding, SourceConfig};
pub use convert::{Error, Report, convert, load};
pub use emit::{ContentSource, EmitStats, emit, sanitize_ref};
pub use git::Git;
pub use graph::{BranchRef, CommitGraph, CommitNode, build as build_graph, revision_tag_name};
pub use group::group;
pub use model::{
    BranchId, Changeset, ContentRef, FileHistory, ParseRevisionError, RevisionId, RevisionRecord,
    RevisionState, SymbolName,
};
pub use normalize::{NormalizedFile, RawHistory, RawRevision, normalize};
pub use rcs::{Rcs, discover};
pub use rlog::{Target, parse_date};
pub use symbols::{BranchArena, BranchNode, Resolution, SymbolTable, resolve};
pub use warning::{Warning, Warnings};
