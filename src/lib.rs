//! # sitegraph
//!
//! A static site build engine. A content directory is loaded into a graph
//! of typed nodes, validated as a whole, and rendered into an output tree
//! whose locations and links are derived from the graph.
//!
//! # Architecture: Load, Validate, Render
//!
//! ```text
//! 1. Load      content/  →  Node graph        (typed values, bottom-up)
//! 2. Validate  graph     →  ok | every error  (links, assets, symlinks)
//! 3. Render    graph     →  dist/             (render paths, cached assets)
//! ```
//!
//! Loading never resolves references: a page pointing at another page holds
//! a path until validation, which runs after every node exists. Rendering
//! only starts on a fully validated graph, so themes can treat every link
//! as resolvable.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`path`] | Hierarchical paths: content identities, render locations, public URIs |
//! | [`naming`] | `<comment>.<name>.<type>` entry name convention |
//! | [`content`] | Node handles, the content trait, the type registry and built-in types |
//! | [`loader`] | Directory walker, loader context, deferred validation |
//! | [`render`] | Render path resolution, links, file output and the basic theme |
//! | [`cache`] | Content-addressed build cache: regions, blobs, image and asset pipelines |
//! | [`imaging`] | Pure-Rust image identify and resize behind a backend trait |
//! | [`config`] | `sitegraph.toml` loading, validation and merging |
//! | [`git`] | Last-commit information per content file |
//! | [`slug`] | URL-safe slugs |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Replaceable Nodes
//!
//! A [`content::Node`] is a shared slot, not a value. Reloading part of the
//! tree swaps the value inside the slot, so every other node holding the
//! handle sees the new content without being rebuilt.
//!
//! ## Explicit Context
//!
//! All bookkeeping of a load (paths, metadata, validators, phase) lives in a
//! [`loader::LoaderContext`] passed by reference. Several sites can be
//! loaded side by side in one process.
//!
//! ## Cache Keys Describe Inputs
//!
//! The [`cache`] keys every result by a fingerprint of what produced it: the
//! source file's identity, size and mtime plus the transform chain.
//! Changing an input changes the key; nothing is ever invalidated by hand.
//!
//! ## Maud Over Template Engines
//!
//! HTML is generated with [Maud](https://maud.lambda.xyz/), a compile-time
//! HTML macro system. Malformed markup is a build error and every
//! interpolation is escaped.

pub mod cache;
pub mod config;
pub mod content;
pub mod git;
pub mod imaging;
pub mod loader;
pub mod naming;
pub mod output;
pub mod path;
pub mod render;
pub mod slug;

#[cfg(test)]
pub(crate) mod test_helpers;
