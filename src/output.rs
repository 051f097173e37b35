//! CLI output formatting for every command.
//!
//! Output is **information-centric, not file-centric**: each node is shown
//! by its identity (name and type) with the file it came from as an indented
//! `Source:` line, so `check` reads like a content inventory while still
//! letting users trace data back to files.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! (root) [website] → /
//!     Source: _index.yml
//!     @title [md]
//!         Source: @title.md
//!     010 about [page] → about/
//!         Source: 010.about.page/_index.yml
//! ```
//!
//! ## Build
//!
//! ```text
//! about/index.html
//! index.html
//! robots.txt
//!
//! Rendered 3 files, 1 alias in 12ms
//! image-resize: 4 cached, 1 computed (5 lookups)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::{CacheStats, GcStats};
use crate::loader::{LoaderContext, ValidationErrors};
use crate::render::{RenderSummary, Renderer};
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `path` relative to `root`, with `/` separators.
fn relative_source(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let joined = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            Component::ParentDir => Some("..".into()),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if relative.has_root() {
        format!("/{joined}")
    } else {
        joined
    }
}

// ============================================================================
// Check: content tree
// ============================================================================

/// Format the loaded content tree, one node per line, children indented
/// below their parent. With a `renderer`, each line also shows where the
/// node renders.
pub fn format_content_tree(loader: &LoaderContext, renderer: Option<&Renderer<'_>>) -> Vec<String> {
    let mut lines = Vec::new();
    for (path, node) in loader.nodes() {
        let depth = path.segments().len();
        let Some(meta) = loader.metadata(node) else {
            continue;
        };

        let name = if path.is_root() {
            "(root)".to_string()
        } else {
            path.name()
        };
        let mut header = match &meta.comment {
            Some(comment) => format!("{}{} {} [{}]", indent(depth), comment, name, meta.type_tag),
            None => format!("{}{} [{}]", indent(depth), name, meta.type_tag),
        };
        if let Some(renderer) = renderer
            && let Ok(render_path) = renderer.find_render_path(node)
        {
            if render_path.is_root() {
                header.push_str(" → /");
            } else {
                header.push_str(&format!(" → {render_path}"));
            }
        }
        lines.push(header);
        lines.push(format!(
            "{}Source: {}",
            indent(depth + 1),
            relative_source(meta.source.file(), loader.root_dir())
        ));
    }
    lines
}

pub fn print_content_tree(loader: &LoaderContext, renderer: Option<&Renderer<'_>>) {
    for line in format_content_tree(loader, renderer) {
        println!("{line}");
    }
}

/// Format every validation failure, one per line, grouped under a count.
pub fn format_validation_errors(errors: &ValidationErrors) -> Vec<String> {
    let mut lines = vec![format!(
        "{} validation error{}",
        errors.errors().len(),
        plural(errors.errors().len())
    )];
    for error in errors.errors() {
        let path = if error.path.is_root() {
            "(root)".to_string()
        } else {
            error.path.to_string()
        };
        lines.push(format!("{}{}: {}", indent(1), path, error.message));
    }
    lines
}

pub fn print_validation_errors(errors: &ValidationErrors) {
    for line in format_validation_errors(errors) {
        eprintln!("{line}");
    }
}

// ============================================================================
// Build
// ============================================================================

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Format the files a build wrote followed by a one-line summary.
pub fn format_render_summary(summary: &RenderSummary) -> Vec<String> {
    let mut lines: Vec<String> = summary.files.iter().map(|f| f.to_string()).collect();
    lines.push(String::new());
    lines.push(format!(
        "Rendered {} file{}, {} alias{} in {}ms",
        summary.files.len(),
        plural(summary.files.len()),
        summary.aliases,
        if summary.aliases == 1 { "" } else { "es" },
        (summary.clear + summary.render).as_millis()
    ));
    lines
}

pub fn print_render_summary(summary: &RenderSummary) {
    for line in format_render_summary(summary) {
        println!("{line}");
    }
}

/// Format per-region cache statistics. Regions nobody asked are omitted.
pub fn format_cache_stats(stats: &BTreeMap<String, CacheStats>) -> Vec<String> {
    stats
        .iter()
        .filter(|(_, s)| s.total() > 0)
        .map(|(region, s)| {
            let mut line = format!("{region}: {s}");
            if s.stale > 0 {
                line.push_str(&format!(", {} stale", s.stale));
            }
            line
        })
        .collect()
}

pub fn print_cache_stats(stats: &BTreeMap<String, CacheStats>) {
    for line in format_cache_stats(stats) {
        println!("{line}");
    }
}

pub fn format_gc_stats(stats: &GcStats) -> Vec<String> {
    vec![format!(
        "Removed {} unreferenced blob{}, kept {}",
        stats.removed,
        plural(stats.removed),
        stats.kept
    )]
}

pub fn print_gc_stats(stats: &GcStats) {
    for line in format_gc_stats(stats) {
        println!("{line}");
    }
}
