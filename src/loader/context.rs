//! Per-session registry of everything the loader produced.
//!
//! A [`LoaderContext`] is created by the caller and passed by reference to
//! the loader, the renderer and the validation hooks. It indexes nodes by
//! content path, by source file and by identity, and owns the ordered list
//! of deferred validators.
//!
//! ## Phases
//!
//! ```text
//! Loading ──► Validating ──► Finished
//!    ▲                          │
//!    └──────── reload ──────────┘
//! ```
//!
//! Content paths of nodes ([`LoaderContext::find_content_path`]) are only
//! handed out after `Loading`: until the tree is complete, a node's final
//! position is not known.

use super::error::{LoadError, LookupError, ValidationError, ValidationErrors};
use crate::content::{ContentReference, FileAsset, Node, NodeId, Reachable};
use crate::git::CommitInfo;
use crate::path::ContentPath;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoaderPhase {
    Loading,
    Validating,
    Finished,
}

/// Where a node came from on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Directory node with its (possibly absent) declaration file.
    Directory { dir: PathBuf, declaration: PathBuf },
    /// Node parsed from a single file.
    File(PathBuf),
}

impl Source {
    /// File that identifies the node: the declaration or the parsed file.
    pub fn file(&self) -> &Path {
        match self {
            Source::Directory { declaration, .. } => declaration,
            Source::File(file) => file,
        }
    }
}

/// One entry of a property group.
#[derive(Debug, Clone)]
pub struct LoadedChild {
    /// Path segment (`about`, `@title`).
    pub name: String,
    pub comment: Option<String>,
    pub node: Node,
}

/// What the loader knows about a node beyond its value.
#[derive(Debug, Clone)]
pub struct ContentMetadata {
    pub node: Node,
    pub path: ContentPath,
    pub type_tag: String,
    pub comment: Option<String>,
    pub source: Source,
    /// Direct children, grouped by property name.
    pub children: BTreeMap<String, Vec<LoadedChild>>,
    /// Every node below this one.
    pub descendants: BTreeMap<ContentPath, Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegisteredKey {
    Node(NodeId),
    Value(usize),
}

/// Deferred check, run once loading finished.
#[derive(Debug, Clone)]
enum Validator {
    Node { owner: ContentPath, node: Node },
    Reference { owner: ContentPath, reference: ContentReference },
    Asset { owner: ContentPath, asset: FileAsset },
}

impl Validator {
    fn owner(&self) -> &ContentPath {
        match self {
            Validator::Node { owner, .. }
            | Validator::Reference { owner, .. }
            | Validator::Asset { owner, .. } => owner,
        }
    }

    fn run(&self, ctx: &LoaderContext) -> Vec<ValidationError> {
        let owner = self.owner();
        let cx = ValidationContext { ctx, owner };
        let messages = match self {
            Validator::Node { node, .. } => {
                let content = node.get();
                let mut messages = content.validate(&cx);
                if let Some(target) = content.content_symlink() {
                    messages.extend(check_symlink(ctx, owner, &target));
                }
                messages
            }
            Validator::Reference { reference, .. } => reference.validate(&cx).err().into_iter().collect(),
            Validator::Asset { asset, .. } => asset.validate(&cx).err().into_iter().collect(),
        };
        messages
            .into_iter()
            .map(|message| ValidationError {
                path: owner.clone(),
                message,
            })
            .collect()
    }
}

/// A symlink must point at a direct child, which keeps render path
/// resolution finite.
fn check_symlink(ctx: &LoaderContext, owner: &ContentPath, target: &Node) -> Option<String> {
    match ctx.metadata(target) {
        Some(meta) if !meta.path.is_root() && meta.path.parent() == *owner => None,
        Some(meta) => Some(format!(
            "content symlink must point to a direct child, not {}",
            meta.path
        )),
        None => Some("content symlink points to unregistered content".to_string()),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub loading: Duration,
    pub validating: Duration,
}

/// Registry of one loading session. See the [module docs](self).
pub struct LoaderContext {
    root_dir: PathBuf,
    phase: LoaderPhase,
    root: Option<Node>,
    content_by_path: HashMap<ContentPath, Node>,
    metadata: HashMap<NodeId, Arc<ContentMetadata>>,
    path_by_source: HashMap<PathBuf, ContentPath>,
    validators: Vec<Validator>,
    registered: HashMap<RegisteredKey, ContentPath>,
    commit_info: HashMap<String, CommitInfo>,
    timings: Timings,
}

impl fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContext")
            .field("root_dir", &self.root_dir)
            .field("phase", &self.phase)
            .field("nodes", &self.content_by_path.len())
            .field("validators", &self.validators.len())
            .finish_non_exhaustive()
    }
}

/// Indices as they were before a reload started.
pub(crate) struct Snapshot {
    phase: LoaderPhase,
    root: Option<Node>,
    content_by_path: HashMap<ContentPath, Node>,
    metadata: HashMap<NodeId, Arc<ContentMetadata>>,
    path_by_source: HashMap<PathBuf, ContentPath>,
    validators: Vec<Validator>,
    registered: HashMap<RegisteredKey, ContentPath>,
    timings: Timings,
}

impl LoaderContext {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            phase: LoaderPhase::Loading,
            root: None,
            content_by_path: HashMap::new(),
            metadata: HashMap::new(),
            path_by_source: HashMap::new(),
            validators: Vec::new(),
            registered: HashMap::new(),
            commit_info: HashMap::new(),
            timings: Timings::default(),
        }
    }

    /// Commit metadata keyed by file path relative to the content root.
    pub fn with_commit_info(mut self, commit_info: HashMap<String, CommitInfo>) -> Self {
        self.commit_info = commit_info;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn phase(&self) -> LoaderPhase {
        self.phase
    }

    pub fn root_node(&self) -> Option<&Node> {
        self.root.as_ref()
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn content_by_path(&self, path: &ContentPath) -> Option<&Node> {
        self.content_by_path.get(path)
    }

    /// Content path of the node loaded from `file` (a declaration file or a
    /// parsed content file).
    pub fn content_path_for_source(&self, file: &Path) -> Option<&ContentPath> {
        self.path_by_source.get(file)
    }

    pub fn metadata(&self, node: &Node) -> Option<&Arc<ContentMetadata>> {
        self.metadata.get(&node.id())
    }

    /// All registered nodes, ordered by content path.
    pub fn nodes(&self) -> Vec<(&ContentPath, &Node)> {
        let mut nodes: Vec<_> = self.content_by_path.iter().collect();
        nodes.sort_by(|a, b| a.0.cmp(b.0));
        nodes
    }

    pub fn len(&self) -> usize {
        self.content_by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content_by_path.is_empty()
    }

    /// Identity path of a node. Fails while still loading.
    pub fn find_content_path(&self, node: &Node) -> Result<ContentPath, LookupError> {
        if self.phase == LoaderPhase::Loading {
            return Err(LookupError::StillLoading);
        }
        self.metadata(node)
            .map(|m| m.path.clone())
            .ok_or(LookupError::Unregistered(node.id()))
    }

    /// How far `child` lies below `parent`; `None` if it is not a
    /// descendant. Only meaningful for ordering.
    pub fn sub_page_distance(&self, parent: &Node, child: &Node) -> Result<Option<usize>, LookupError> {
        let parent = self.find_content_path(parent)?;
        let child = self.find_content_path(child)?;
        Ok(child.sub_path_distance(&parent))
    }

    /// Commit info for a file below the content root.
    pub fn commit_info_for(&self, file: &Path) -> Option<&CommitInfo> {
        let relative = file.strip_prefix(&self.root_dir).ok()?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.commit_info.get(&key)
    }

    /// Index a freshly loaded node. Two different nodes claiming the same
    /// identity path is an error.
    pub fn register_loaded_content(&mut self, metadata: Arc<ContentMetadata>) -> Result<(), LoadError> {
        if let Some(existing) = self.content_by_path.get(&metadata.path)
            && *existing != metadata.node
        {
            let first = self
                .metadata(existing)
                .map(|m| m.source.file().to_path_buf())
                .unwrap_or_default();
            return Err(LoadError::DuplicatePath {
                path: metadata.path.clone(),
                first,
                second: metadata.source.file().to_path_buf(),
            });
        }
        self.content_by_path
            .insert(metadata.path.clone(), metadata.node.clone());
        self.path_by_source
            .entry(metadata.source.file().to_path_buf())
            .or_insert_with(|| metadata.path.clone());
        self.metadata.insert(metadata.node.id(), metadata);
        Ok(())
    }

    /// Register a value reachable from `owner` and queue its validator.
    /// Returns `false` if the value was registered before.
    pub fn register_content_def(&mut self, owner: &ContentPath, value: &Reachable) -> bool {
        let key = match value {
            Reachable::Node(node) => RegisteredKey::Node(node.id()),
            Reachable::Reference(reference) => RegisteredKey::Value(reference.identity()),
            Reachable::Asset(asset) => RegisteredKey::Value(asset.identity()),
        };
        if self.registered.contains_key(&key) {
            return false;
        }
        self.registered.insert(key, owner.clone());
        let owner = owner.clone();
        self.validators.push(match value {
            Reachable::Node(node) => Validator::Node {
                owner,
                node: node.clone(),
            },
            Reachable::Reference(reference) => Validator::Reference {
                owner,
                reference: reference.clone(),
            },
            Reachable::Asset(asset) => Validator::Asset {
                owner,
                asset: asset.clone(),
            },
        });
        true
    }

    /// Leave the loading phase and run every validator in registration
    /// order. All failures are reported together.
    pub fn finished_loading_start_validate(&mut self) -> Result<(), ValidationErrors> {
        self.phase = LoaderPhase::Validating;
        let start = Instant::now();
        let errors: Vec<ValidationError> = self
            .validators
            .iter()
            .flat_map(|validator| validator.run(self))
            .collect();
        self.timings.validating = start.elapsed();
        debug!(
            validators = self.validators.len(),
            errors = errors.len(),
            elapsed_ms = self.timings.validating.as_millis() as u64,
            "validation finished"
        );
        if errors.is_empty() {
            self.phase = LoaderPhase::Finished;
            Ok(())
        } else {
            Err(ValidationErrors(errors))
        }
    }

    pub(crate) fn set_root(&mut self, root: Node) {
        self.root = Some(root);
    }

    pub(crate) fn record_loading(&mut self, elapsed: Duration) {
        self.timings.loading = elapsed;
        info!(
            nodes = self.content_by_path.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "content loaded"
        );
    }

    pub(crate) fn metadata_by_path(&self, path: &ContentPath) -> Option<&Arc<ContentMetadata>> {
        self.content_by_path
            .get(path)
            .and_then(|node| self.metadata.get(&node.id()))
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            root: self.root.clone(),
            content_by_path: self.content_by_path.clone(),
            metadata: self.metadata.clone(),
            path_by_source: self.path_by_source.clone(),
            validators: self.validators.clone(),
            registered: self.registered.clone(),
            timings: self.timings,
        }
    }

    /// Put back every index captured by [`LoaderContext::snapshot`].
    pub(crate) fn restore(&mut self, snapshot: Snapshot) {
        self.phase = snapshot.phase;
        self.root = snapshot.root;
        self.content_by_path = snapshot.content_by_path;
        self.metadata = snapshot.metadata;
        self.path_by_source = snapshot.path_by_source;
        self.validators = snapshot.validators;
        self.registered = snapshot.registered;
        self.timings = snapshot.timings;
        debug!(phase = ?self.phase, "restored loader context");
    }

    /// Drop everything registered at or below `path` and return the evicted
    /// handles so a reload can reuse them.
    pub(crate) fn evict_subtree(&mut self, path: &ContentPath) -> HashMap<ContentPath, Node> {
        self.phase = LoaderPhase::Loading;
        let evicted: Vec<ContentPath> = self
            .content_by_path
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        let mut handles = HashMap::new();
        for p in evicted {
            if let Some(node) = self.content_by_path.remove(&p) {
                self.metadata.remove(&node.id());
                handles.insert(p, node);
            }
        }
        self.path_by_source.retain(|_, p| !p.starts_with(path));
        self.validators.retain(|v| !v.owner().starts_with(path));
        self.registered.retain(|_, owner| !owner.starts_with(path));
        debug!(path = %path, evicted = handles.len(), "evicted subtree");
        handles
    }

    /// After a subtree at `path` was reloaded, bring the ancestors'
    /// descendant maps in line with the new subtree.
    pub(crate) fn refresh_ancestors(&mut self, path: &ContentPath) {
        let subtree: BTreeMap<ContentPath, Node> = self
            .content_by_path
            .iter()
            .filter(|(p, _)| p.starts_with(path))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        let mut current = path.clone();
        while !current.is_root() {
            current = current.parent();
            let Some(old) = self.metadata_by_path(&current).cloned() else {
                continue;
            };
            let mut updated = (*old).clone();
            updated.descendants.retain(|p, _| !p.starts_with(path));
            updated
                .descendants
                .extend(subtree.iter().map(|(p, n)| (p.clone(), n.clone())));
            self.metadata.insert(updated.node.id(), Arc::new(updated));
        }
    }
}

/// View handed to [`Content::validate`](crate::content::Content::validate)
/// and the reference/asset validators.
pub struct ValidationContext<'a> {
    ctx: &'a LoaderContext,
    owner: &'a ContentPath,
}

impl<'a> ValidationContext<'a> {
    /// Path of the node the validated value belongs to.
    pub fn owner_path(&self) -> &ContentPath {
        self.owner
    }

    pub fn content_by_path(&self, path: &ContentPath) -> Option<&'a Node> {
        self.ctx.content_by_path(path)
    }

    pub fn loader(&self) -> &'a LoaderContext {
        self.ctx
    }
}
