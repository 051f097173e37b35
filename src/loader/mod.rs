//! Convention-driven loading of a content directory into a [`Node`] graph.
//!
//! ```text
//! content/                     website (root type chosen by the caller)
//! ├── _index.yml               declaration of the root node
//! ├── @title.md                property `title`, parsed by the `md` type
//! ├── 010.about.page/          child `about`, comment `010`
//! │   ├── _index.yml
//! │   └── @body.md
//! ├── blog/                    untyped: resolved from the property's type
//! └── logo.png                 not a registered type: left for assets
//! ```
//!
//! Each directory is loaded bottom-up. Entries are visited in file-name
//! order; hidden entries and the declaration file itself are skipped. Files
//! whose type tag names a [`Parsable`](crate::content::Parsable) type become
//! leaf nodes, other files are ignored. Directories recurse with the
//! [`Nestable`](crate::content::Nestable) type named by their tag, or the
//! single type their property accepts. Once every child is loaded the
//! declaration is deserialized, the value is built and wrapped in a
//! [`Node`], and its subtree is walked to queue validators.
//!
//! After the whole tree is loaded the context switches to validation, which
//! either finishes or fails with every problem found.

mod context;
mod error;

pub use context::{
    ContentMetadata, LoadedChild, LoaderContext, LoaderPhase, Source, Timings, ValidationContext,
};
pub use error::{LoadError, LookupError, ValidationError, ValidationErrors};

use crate::content::registry::{NestableType, ParsableType};
use crate::content::{BuildContext, Content, Node, Reachable, TypeRegistry, Walker};
use crate::naming::parse_entry_name;
use crate::path::ContentPath;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Per-directory declaration file.
pub const DECLARATION_FILE: &str = "_index.yml";

/// Loads content trees with a fixed set of registered types.
#[derive(Clone)]
pub struct ContentLoader {
    registry: Arc<TypeRegistry>,
}

impl ContentLoader {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Load the tree below `ctx.root_dir()` with a root node of type
    /// `root_tag`, then validate it.
    pub fn load(&self, ctx: &mut LoaderContext, root_tag: &str) -> Result<Node, LoadError> {
        let start = Instant::now();
        let root_dir = ctx.root_dir().to_path_buf();
        if !root_dir.is_dir() {
            return Err(LoadError::NotADirectory(root_dir));
        }
        let root_type = self
            .registry
            .nestable(root_tag)
            .ok_or_else(|| LoadError::UnresolvedType {
                path: ContentPath::root(),
                property: "root".to_string(),
                requested: root_tag.to_string(),
            })?;

        info!(root = %root_dir.display(), root_type = root_tag, "loading content");
        let mut session = Session::new(&self.registry, ctx, HashMap::new());
        let root = session.load_dir(&root_dir, ContentPath::root(), root_type, None)?;
        ctx.set_root(root.node.clone());
        ctx.record_loading(start.elapsed());
        ctx.finished_loading_start_validate()?;
        Ok(root.node.clone())
    }

    /// Reload the subtree rooted at `node` from disk.
    ///
    /// Every handle whose identity path still exists after the reload keeps
    /// pointing at the fresh value, so nodes outside the subtree holding
    /// on to it see the new data. The merged graph is validated again.
    ///
    /// If the subtree fails to load, the context and every handle are left
    /// exactly as they were. Validation errors of the new data are returned
    /// with the new data in place.
    pub fn reload(&self, ctx: &mut LoaderContext, node: &Node) -> Result<(), LoadError> {
        let start = Instant::now();
        let metadata = ctx
            .metadata(node)
            .cloned()
            .ok_or(LoadError::NotReloadable(node.id()))?;
        let path = metadata.path.clone();
        info!(path = %path, "reloading subtree");

        let snapshot = ctx.snapshot();
        let reuse = ctx.evict_subtree(&path);
        let replacements = match self.load_subtree(ctx, reuse, &metadata, node) {
            Ok(replacements) => replacements,
            Err(e) => {
                ctx.restore(snapshot);
                warn!(path = %path, error = %e, "reload failed, keeping previous content");
                return Err(e);
            }
        };
        for (handle, content) in replacements {
            handle.replace(content);
        }
        ctx.refresh_ancestors(&path);
        ctx.record_loading(start.elapsed());
        ctx.finished_loading_start_validate()?;
        Ok(())
    }

    /// Load the subtree described by `metadata` again. Returns the new values
    /// of reused handles, which are swapped in only once all of it loaded.
    fn load_subtree(
        &self,
        ctx: &mut LoaderContext,
        reuse: HashMap<ContentPath, Node>,
        metadata: &ContentMetadata,
        node: &Node,
    ) -> Result<Vec<(Node, Arc<dyn Content>)>, LoadError> {
        let path = metadata.path.clone();
        let comment = metadata.comment.clone();
        let mut session = Session::new(&self.registry, ctx, reuse);
        match &metadata.source {
            Source::Directory { dir, .. } => {
                let ty = self
                    .registry
                    .nestable(&metadata.type_tag)
                    .ok_or(LoadError::NotReloadable(node.id()))?;
                session.load_dir(dir, path, ty, comment)?;
            }
            Source::File(file) => {
                let ty = self
                    .registry
                    .parsable(&metadata.type_tag)
                    .ok_or(LoadError::NotReloadable(node.id()))?;
                session.load_file(file, path, ty, comment)?;
            }
        }
        Ok(session.replacements)
    }
}

/// State of one `load` or `reload` call.
struct Session<'a> {
    registry: &'a TypeRegistry,
    ctx: &'a mut LoaderContext,
    /// Handles evicted by a reload, keyed by their identity path.
    reuse: HashMap<ContentPath, Node>,
    /// New values for reused handles, applied after a successful reload.
    replacements: Vec<(Node, Arc<dyn Content>)>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LoadError + '_ {
    move |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_declaration(file: &Path) -> Result<serde_yaml::Value, LoadError> {
    if !file.is_file() {
        return Ok(serde_yaml::Value::Mapping(Default::default()));
    }
    let text = fs::read_to_string(file).map_err(io_error(file))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|source| LoadError::Declaration {
            file: file.to_path_buf(),
            source,
        })?;
    Ok(match value {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
        other => other,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf, bool)>, LoadError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == DECLARATION_FILE {
            continue;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        entries.push((name, path, is_dir));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

impl<'a> Session<'a> {
    fn new(
        registry: &'a TypeRegistry,
        ctx: &'a mut LoaderContext,
        reuse: HashMap<ContentPath, Node>,
    ) -> Self {
        Self {
            registry,
            ctx,
            reuse,
            replacements: Vec::new(),
        }
    }

    /// The handle previously living at `path`, or a new one holding
    /// `content`. A reused handle keeps its old value until the session's
    /// replacements are applied.
    fn node_for(&mut self, path: &ContentPath, content: Arc<dyn Content>) -> Node {
        match self.reuse.remove(path) {
            Some(node) => {
                self.replacements.push((node.clone(), content));
                node
            }
            None => Node::from_arc(content),
        }
    }

    /// Value `node` will hold once the session is applied.
    fn content_of(&self, node: &Node) -> Arc<dyn Content> {
        self.replacements
            .iter()
            .find(|(handle, _)| handle == node)
            .map(|(_, content)| content.clone())
            .unwrap_or_else(|| node.get())
    }

    fn load_dir(
        &mut self,
        dir: &Path,
        path: ContentPath,
        ty: &NestableType,
        comment: Option<String>,
    ) -> Result<Arc<ContentMetadata>, LoadError> {
        trace!(path = %path, dir = %dir.display(), type_tag = ty.tag, "loading directory");
        let registry = self.registry;
        let mut children: BTreeMap<String, Vec<LoadedChild>> = BTreeMap::new();
        let mut descendants = BTreeMap::new();

        for (file_name, entry, is_dir) in sorted_entries(dir)? {
            let name = parse_entry_name(&file_name);
            let property = name.property_name().to_string();
            let child_path = path.child(&name.path_segment());

            let loaded = if is_dir {
                let spec = ty.property(&property).ok_or_else(|| LoadError::UnknownProperty {
                    path: child_path.clone(),
                    type_tag: ty.tag.to_string(),
                    property: property.clone(),
                })?;
                let tag = name
                    .type_tag
                    .as_deref()
                    .or_else(|| spec.accepts.single())
                    .filter(|tag| spec.accepts.accepts(tag));
                let child_type = tag.and_then(|tag| registry.nestable(tag)).ok_or_else(|| {
                    LoadError::UnresolvedType {
                        path: child_path.clone(),
                        property: property.clone(),
                        requested: name.type_tag.clone().unwrap_or_default(),
                    }
                })?;
                self.load_dir(&entry, child_path, child_type, name.comment.clone())?
            } else {
                let Some(child_type) = name
                    .type_tag
                    .as_deref()
                    .and_then(|tag| registry.parsable(tag))
                else {
                    trace!(file = %entry.display(), "not a content file, skipping");
                    continue;
                };
                let spec = ty.property(&property).ok_or_else(|| LoadError::UnknownProperty {
                    path: child_path.clone(),
                    type_tag: ty.tag.to_string(),
                    property: property.clone(),
                })?;
                if !spec.accepts.accepts(child_type.tag) {
                    return Err(LoadError::UnresolvedType {
                        path: child_path,
                        property,
                        requested: child_type.tag.to_string(),
                    });
                }
                self.load_file(&entry, child_path, child_type, name.comment.clone())?
            };

            descendants.insert(loaded.path.clone(), loaded.node.clone());
            descendants.extend(
                loaded
                    .descendants
                    .iter()
                    .map(|(p, n)| (p.clone(), n.clone())),
            );
            children.entry(property).or_default().push(LoadedChild {
                name: name.path_segment(),
                comment: name.comment,
                node: loaded.node.clone(),
            });
        }

        for spec in ty.properties.iter().filter(|p| p.required) {
            if children.get(spec.name).is_none_or(Vec::is_empty) {
                return Err(LoadError::MissingProperty {
                    path,
                    type_tag: ty.tag.to_string(),
                    property: spec.name.to_string(),
                });
            }
        }

        let declaration = dir.join(DECLARATION_FILE);
        let value = read_declaration(&declaration)?;
        let commit = self.ctx.commit_info_for(&declaration).cloned();
        let content = {
            let mut cx = BuildContext {
                type_tag: ty.tag,
                path: &path,
                dir,
                declaration: &declaration,
                children: &children,
                commit: commit.as_ref(),
            };
            ty.build(value, &mut cx)?
        };
        let node = self.node_for(&path, content);
        let metadata = Arc::new(ContentMetadata {
            node: node.clone(),
            path: path.clone(),
            type_tag: ty.tag.to_string(),
            comment,
            source: Source::Directory {
                dir: dir.to_path_buf(),
                declaration,
            },
            children,
            descendants,
        });
        self.ctx.register_loaded_content(metadata.clone())?;
        self.register_reachable(&path, &node)?;
        debug!(path = %path, type_tag = ty.tag, "loaded node");
        Ok(metadata)
    }

    fn load_file(
        &mut self,
        file: &Path,
        path: ContentPath,
        ty: &ParsableType,
        comment: Option<String>,
    ) -> Result<Arc<ContentMetadata>, LoadError> {
        trace!(path = %path, file = %file.display(), type_tag = ty.tag, "parsing file");
        let content = ty.parse(file, &path)?;
        let node = self.node_for(&path, content);
        let metadata = Arc::new(ContentMetadata {
            node: node.clone(),
            path: path.clone(),
            type_tag: ty.tag.to_string(),
            comment,
            source: Source::File(file.to_path_buf()),
            children: BTreeMap::new(),
            descendants: BTreeMap::new(),
        });
        self.ctx.register_loaded_content(metadata.clone())?;
        self.register_reachable(&path, &node)?;
        Ok(metadata)
    }

    /// Register `node` and everything it reaches with `owner`, queueing a
    /// validator for each. Nodes loaded from disk register themselves under
    /// their own path and are not descended into again.
    fn register_reachable(&mut self, owner: &ContentPath, node: &Node) -> Result<(), LoadError> {
        if !self
            .ctx
            .register_content_def(owner, &Reachable::Node(node.clone()))
        {
            return Ok(());
        }
        let mut walker = Walker::default();
        self.content_of(node).visit(&mut walker);
        let (found, missing) = walker.finish();
        if let Some(field) = missing.into_iter().next() {
            return Err(LoadError::MissingField {
                path: owner.clone(),
                field,
            });
        }
        for value in found {
            match value {
                Reachable::Node(nested) => {
                    if self.ctx.metadata(&nested).is_none() {
                        self.register_reachable(owner, &nested)?;
                    }
                }
                other => {
                    self.ctx.register_content_def(owner, &other);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Folder, Markdown, Page, Website};
    use crate::test_helpers::{find_node, write_tree};
    use tempfile::TempDir;

    fn loader() -> ContentLoader {
        ContentLoader::new(Arc::new(TypeRegistry::with_builtin_types()))
    }

    fn load(tmp: &TempDir) -> Result<(LoaderContext, Node), LoadError> {
        let mut ctx = LoaderContext::new(tmp.path());
        let root = loader().load(&mut ctx, "website")?;
        Ok((ctx, root))
    }

    // =========================================================================
    // Type resolution and grouping
    // =========================================================================

    #[test]
    fn loads_folder_page_and_title() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("@title.md", "# My Site"),
                ("a.folder/b.page/_index.yml", "title: B"),
            ],
        );
        let (ctx, root) = load(&tmp).unwrap();

        let website = root.downcast::<Website>().unwrap();
        assert_eq!(website.children.len(), 1);
        assert_eq!(
            ctx.find_content_path(&website.children[0]).unwrap(),
            ContentPath::parse("a")
        );
        let title = website.title.as_ref().unwrap().downcast::<Markdown>().unwrap();
        assert_eq!(title.source(), "# My Site");

        let folder = website.children[0].downcast::<Folder>().unwrap();
        let page = folder.children[0].downcast::<Page>().unwrap();
        assert_eq!(page.title, "B");
        assert_eq!(ctx.phase(), LoaderPhase::Finished);
    }

    #[test]
    fn comments_are_not_part_of_identity() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("020.second.page/_index.yml", "title: Second"),
                ("010.first.page/_index.yml", "title: First"),
            ],
        );
        let (ctx, root) = load(&tmp).unwrap();
        let website = root.downcast::<Website>().unwrap();
        let titles: Vec<String> = website
            .children
            .iter()
            .map(|n| n.downcast::<Page>().unwrap().title.clone())
            .collect();
        assert_eq!(titles, vec!["First", "Second"]);

        let first = find_node(&ctx, "first");
        let meta = ctx.metadata(&first).unwrap();
        assert_eq!(meta.comment.as_deref(), Some("010"));
        assert_eq!(meta.type_tag, "page");
    }

    #[test]
    fn untyped_directory_uses_single_accepted_type() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("blog.folder/@index/_index.yml", "title: Blog"),
                ("blog.folder/post.page/_index.yml", "title: Post"),
            ],
        );
        let (ctx, _) = load(&tmp).unwrap();
        let index = find_node(&ctx, "blog/@index");
        assert!(index.is::<Page>());
    }

    #[test]
    fn untyped_directory_with_ambiguous_property_fails() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("misc/_index.yml", "")]);
        let err = load(&tmp).unwrap_err();
        assert!(matches!(err, LoadError::UnresolvedType { .. }), "{err}");
    }

    #[test]
    fn unknown_type_tag_fails() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.gallery/_index.yml", "")]);
        let err = load(&tmp).unwrap_err();
        match err {
            LoadError::UnresolvedType { path, requested, .. } => {
                assert_eq!(path, ContentPath::parse("a"));
                assert_eq!(requested, "gallery");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_property_fails() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("@sidebar.md", "x")]);
        let err = load(&tmp).unwrap_err();
        assert!(matches!(err, LoadError::UnknownProperty { .. }), "{err}");
    }

    #[test]
    fn hidden_and_unregistered_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                (".git/config", "x"),
                ("logo.png", "not really a png"),
                ("about.page/_index.yml", "title: About"),
            ],
        );
        let (ctx, _) = load(&tmp).unwrap();
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn missing_root_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = LoaderContext::new(tmp.path().join("nope"));
        let err = loader().load(&mut ctx, "website").unwrap_err();
        assert!(matches!(err, LoadError::NotADirectory(_)));
    }

    #[test]
    fn malformed_declaration_names_the_file() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.page/_index.yml", "title: [unclosed")]);
        let err = load(&tmp).unwrap_err();
        assert!(matches!(err, LoadError::Declaration { .. }));
        assert!(err.to_string().contains("_index.yml"));
    }

    #[test]
    fn unknown_declaration_field_fails() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.page/_index.yml", "title: A\ncolour: red")]);
        assert!(matches!(
            load(&tmp).unwrap_err(),
            LoadError::Declaration { .. }
        ));
    }

    #[test]
    fn duplicate_identity_paths_fail() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("010.about.page/_index.yml", "title: One"),
                ("020.about.page/_index.yml", "title: Two"),
            ],
        );
        let err = load(&tmp).unwrap_err();
        assert!(matches!(err, LoadError::DuplicatePath { .. }), "{err}");
    }

    #[test]
    fn missing_asset_fails_at_load() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.page/_index.yml", "title: A\nimage: gone.jpg")]);
        assert!(matches!(
            load(&tmp).unwrap_err(),
            LoadError::MissingAsset { .. }
        ));
    }

    #[test]
    fn asset_names_cannot_leave_their_directory() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("secret.txt", "outside"),
                ("a.page/_index.yml", "title: A\nattachments: [../secret.txt]"),
            ],
        );
        let err = load(&tmp).unwrap_err();
        assert!(
            matches!(&err, LoadError::InvalidAsset { name, .. } if name == "../secret.txt"),
            "{err}"
        );

        let decl = format!("title: A\nimage: '{}'", tmp.path().join("secret.txt").display());
        write_tree(tmp.path(), &[("a.page/_index.yml", decl.as_str())]);
        assert!(matches!(load(&tmp).unwrap_err(), LoadError::InvalidAsset { .. }));

        write_tree(
            tmp.path(),
            &[
                ("a.page/_index.yml", "title: A\nattachments: [cv.txt]"),
                ("a.page/cv.txt", "cv"),
            ],
        );
        load(&tmp).unwrap();
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validation_collects_every_error() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("a.page/_index.yml", "title: A\nlink: ../nowhere"),
                ("b.page/_index.yml", "title: ''"),
                ("c.page/@body.md", "[broken](../missing)"),
                ("c.page/_index.yml", "title: C"),
            ],
        );
        let err = load(&tmp).unwrap_err();
        let LoadError::Validation(errors) = err else {
            panic!("expected validation errors, got {err}");
        };
        let messages: Vec<String> = errors.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(messages.len(), 3, "{messages:?}");
        assert!(messages.contains(&"a: Invalid content path: nowhere".to_string()));
        assert!(messages.contains(&"b: page title must not be empty".to_string()));
        assert!(messages.contains(&"c/@body: Invalid link: ../missing".to_string()));
    }

    #[test]
    fn references_resolve_to_nodes() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("a.page/_index.yml", "title: A\nlink: ../b"),
                ("b.page/_index.yml", "title: B"),
            ],
        );
        let (ctx, _) = load(&tmp).unwrap();
        let a = find_node(&ctx, "a").downcast::<Page>().unwrap();
        let target = a.link.as_ref().unwrap().target().unwrap();
        assert_eq!(target, find_node(&ctx, "b"));
    }

    #[test]
    fn assets_find_their_container() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("a.page/_index.yml", "title: A\nattachments: [notes.txt]"),
                ("a.page/notes.txt", "hello"),
            ],
        );
        let (ctx, _) = load(&tmp).unwrap();
        let a_node = find_node(&ctx, "a");
        let a = a_node.downcast::<Page>().unwrap();
        let asset = &a.attachments[0];
        assert_eq!(asset.path().to_string(), "a/notes.txt");
        assert_eq!(asset.container(), Some(a_node));
    }

    // =========================================================================
    // Metadata and reload
    // =========================================================================

    #[test]
    fn metadata_tracks_children_and_descendants() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("@title.md", "Title"),
                ("blog.folder/post.page/_index.yml", "title: Post"),
            ],
        );
        let (ctx, root) = load(&tmp).unwrap();
        let meta = ctx.metadata(&root).unwrap();
        assert_eq!(meta.children["title"][0].name, "@title");
        assert_eq!(meta.children["children"][0].name, "blog");
        let paths: Vec<String> = meta.descendants.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["@title", "blog", "blog/post"]);
        assert_eq!(
            ctx.content_path_for_source(&tmp.path().join("@title.md")),
            Some(&ContentPath::parse("@title"))
        );
    }

    #[test]
    fn reload_keeps_handles_and_paths() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("blog.folder/post.page/_index.yml", "title: Old"),
                ("about.page/_index.yml", "title: About\nlink: ../blog/post"),
            ],
        );
        let (mut ctx, _) = load(&tmp).unwrap();
        let blog = find_node(&ctx, "blog");
        let post = find_node(&ctx, "blog/post");
        let about = find_node(&ctx, "about");

        fs::write(tmp.path().join("blog.folder/post.page/_index.yml"), "title: New").unwrap();
        write_tree(tmp.path(), &[("blog.folder/extra.page/_index.yml", "title: Extra")]);
        loader().reload(&mut ctx, &blog).unwrap();

        assert_eq!(post.downcast::<Page>().unwrap().title, "New");
        assert_eq!(find_node(&ctx, "blog/post"), post);
        assert_eq!(ctx.find_content_path(&about).unwrap(), ContentPath::parse("about"));
        assert!(ctx.content_by_path(&ContentPath::parse("blog/extra")).is_some());

        let link = about.downcast::<Page>().unwrap().link.clone().unwrap();
        assert_eq!(link.target(), Some(post));

        let root_meta = ctx.metadata(ctx.root_node().unwrap()).unwrap();
        assert!(root_meta.descendants.contains_key(&ContentPath::parse("blog/extra")));
        assert_eq!(ctx.phase(), LoaderPhase::Finished);
    }

    #[test]
    fn reload_of_file_node() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("@title.md", "Old")]);
        let (mut ctx, root) = load(&tmp).unwrap();
        let title = root.downcast::<Website>().unwrap().title.clone().unwrap();

        fs::write(tmp.path().join("@title.md"), "New").unwrap();
        loader().reload(&mut ctx, &title).unwrap();
        assert_eq!(title.downcast::<Markdown>().unwrap().source(), "New");
    }

    #[test]
    fn reload_surfaces_new_validation_errors() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("a.page/_index.yml", "title: A"),
                ("b.page/_index.yml", "title: B\nlink: ../a"),
            ],
        );
        let (mut ctx, _) = load(&tmp).unwrap();
        let b = find_node(&ctx, "b");
        fs::write(tmp.path().join("b.page/_index.yml"), "title: B\nlink: ../zzz").unwrap();
        let err = loader().reload(&mut ctx, &b).unwrap_err();
        assert!(matches!(err, LoadError::Validation(_)));
        assert_eq!(ctx.phase(), LoaderPhase::Validating);
    }

    #[test]
    fn failed_reload_leaves_context_untouched() {
        let tmp = TempDir::new().unwrap();
        write_tree(
            tmp.path(),
            &[
                ("blog.folder/a.page/_index.yml", "title: A"),
                ("blog.folder/b.page/_index.yml", "title: B"),
                ("about.page/_index.yml", "title: About\nlink: ../blog/a"),
            ],
        );
        let (mut ctx, _) = load(&tmp).unwrap();
        let blog = find_node(&ctx, "blog");
        let a = find_node(&ctx, "blog/a");
        let about = find_node(&ctx, "about");

        fs::write(tmp.path().join("blog.folder/a.page/_index.yml"), "title: A2").unwrap();
        fs::write(tmp.path().join("blog.folder/b.page/_index.yml"), "title: [oops").unwrap();
        let err = loader().reload(&mut ctx, &blog).unwrap_err();
        assert!(matches!(err, LoadError::Declaration { .. }), "{err}");

        assert_eq!(ctx.phase(), LoaderPhase::Finished);
        assert_eq!(ctx.find_content_path(&about).unwrap(), ContentPath::parse("about"));
        assert_eq!(ctx.find_content_path(&a).unwrap(), ContentPath::parse("blog/a"));
        assert!(ctx.content_by_path(&ContentPath::parse("blog")).is_some());
        assert!(ctx.content_by_path(&ContentPath::parse("blog/b")).is_some());
        assert_eq!(a.downcast::<Page>().unwrap().title, "A");
        let root_meta = ctx.metadata(ctx.root_node().unwrap()).unwrap();
        assert!(root_meta.descendants.contains_key(&ContentPath::parse("blog/b")));

        fs::write(tmp.path().join("blog.folder/b.page/_index.yml"), "title: B2").unwrap();
        loader().reload(&mut ctx, &blog).unwrap();
        assert_eq!(a.downcast::<Page>().unwrap().title, "A2");
        assert_eq!(find_node(&ctx, "blog/b").downcast::<Page>().unwrap().title, "B2");
        assert_eq!(ctx.phase(), LoaderPhase::Finished);
    }

    #[test]
    fn reload_of_unknown_node_fails() {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("a.page/_index.yml", "title: A")]);
        let (mut ctx, _) = load(&tmp).unwrap();
        let stray = Node::new(Markdown::new("x"));
        assert!(matches!(
            loader().reload(&mut ctx, &stray),
            Err(LoadError::NotReloadable(_))
        ));
    }
}
