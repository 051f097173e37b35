//! Shared test utilities.
//!
//! Fixture trees are written inline instead of copied from disk, so each test
//! shows exactly the content it loads.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! write_tree(tmp.path(), &[
//!     ("@title.md", "# Site"),
//!     ("blog.folder/post.page/_index.yml", "title: Post"),
//! ]);
//! let (ctx, _root) = load_site(tmp.path());
//! let post = find_node(&ctx, "blog/post");
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::content::{Node, TypeRegistry};
use crate::loader::{ContentLoader, LoaderContext};
use crate::path::ContentPath;

// =========================================================================
// Fixture setup
// =========================================================================

/// Write `(relative path, contents)` pairs below `root`, creating parent
/// directories. Existing files are overwritten.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, contents) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
    }
}

/// Write a small valid JPEG of the given size.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save(path).unwrap();
}

// =========================================================================
// Loading and lookups (panic with a clear message on miss)
// =========================================================================

/// Load `root` as a `website` with the built-in types. Panics on failure.
pub fn load_site(root: &Path) -> (LoaderContext, Node) {
    let loader = ContentLoader::new(Arc::new(TypeRegistry::with_builtin_types()));
    let mut ctx = LoaderContext::new(root);
    let node = loader
        .load(&mut ctx, "website")
        .unwrap_or_else(|e| panic!("loading {} failed: {e}", root.display()));
    (ctx, node)
}

/// Find a node by identity path. Panics if not found.
pub fn find_node(ctx: &LoaderContext, path: &str) -> Node {
    ctx.content_by_path(&ContentPath::parse(path))
        .cloned()
        .unwrap_or_else(|| {
            let paths: Vec<String> = ctx.nodes().iter().map(|(p, _)| p.to_string()).collect();
            panic!("node '{path}' not found. Available: {paths:?}")
        })
}
