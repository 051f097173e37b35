//! The typed content graph.
//!
//! Every loaded entry becomes a [`Node`]: a stable handle around a value
//! implementing [`Content`]. Handles compare by identity, survive reloads
//! (the loader swaps the value behind the handle), and are cheap to clone.
//!
//! Content types describe what they reach through [`Content::visit`], an
//! explicit visitor used by the loader to register nested nodes,
//! [`ContentReference`]s and [`FileAsset`]s for validation. Generic
//! containers (`Option`, `Vec`, maps) implement [`Walk`] so a type can hand
//! its fields to the [`Walker`] without spelling out the traversal.
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | Tag → factory dispatch table, property declarations, build context |
//! | [`reference`] | Path references between nodes, resolved during validation |
//! | [`asset`] | Files shipped alongside content (`FileAsset`, `ImageAsset`) |
//! | [`markdown`] | The `md` parsable type |
//! | [`types`] | Built-in node types: `website`, `folder`, `page` |

pub mod asset;
pub mod markdown;
pub mod reference;
pub mod registry;
pub mod types;

pub use asset::{FileAsset, ImageAsset};
pub use markdown::Markdown;
pub use reference::ContentReference;
pub use registry::{
    BuildContext, Nestable, Parsable, PropertySpec, TypeRegistry, TypeSet,
};
pub use types::{Folder, Page, Website};

use crate::loader::ValidationContext;
use crate::path::RenderPath;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Property group receiving entries without a leading `@`.
pub const CHILDREN: &str = "children";

/// Type-erasure helper, implemented for every sized `Send + Sync` type.
pub trait AsAny: Any + Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A value stored in the content graph.
///
/// All hooks have defaults, so a plain data type only needs an empty impl.
pub trait Content: AsAny + fmt::Debug {
    /// Report every nested node, reference and asset held by this value.
    fn visit(&self, _walker: &mut Walker) {}

    /// Semantic checks run once loading finished. Each returned message
    /// becomes one validation error attributed to this node.
    fn validate(&self, _cx: &ValidationContext<'_>) -> Vec<String> {
        Vec::new()
    }

    /// Overrides the last render path segment.
    fn slug(&self) -> Option<&str> {
        None
    }

    /// Text to slugify into the last render path segment when no explicit
    /// [`Content::slug`] is set.
    fn slug_source(&self) -> Option<&str> {
        None
    }

    /// Replaces render path resolution entirely.
    fn custom_render_path(&self) -> Option<RenderPath> {
        None
    }

    /// A direct child rendered at this node's own location.
    fn content_symlink(&self) -> Option<Node> {
        None
    }

    /// Extra locations that redirect to this node.
    fn render_path_aliases(&self) -> Vec<RenderPath> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

struct Slot {
    id: NodeId,
    target: RwLock<Arc<dyn Content>>,
}

/// Stable, identity-compared handle to a content value.
#[derive(Clone)]
pub struct Node(Arc<Slot>);

impl Node {
    pub fn new<C: Content>(content: C) -> Self {
        Self::from_arc(Arc::new(content))
    }

    pub fn from_arc(content: Arc<dyn Content>) -> Self {
        let id = NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        Node(Arc::new(Slot {
            id,
            target: RwLock::new(content),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    /// Current value behind the handle.
    pub fn get(&self) -> Arc<dyn Content> {
        self.0.target.read().clone()
    }

    pub fn downcast<T: Content>(&self) -> Option<Arc<T>> {
        self.get().into_any().downcast::<T>().ok()
    }

    pub fn is<T: Content>(&self) -> bool {
        self.downcast::<T>().is_some()
    }

    /// True if the handle currently resolves to exactly `content`.
    pub fn points_to(&self, content: &Arc<dyn Content>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.get()), Arc::as_ptr(content))
    }

    /// Swap the value behind the handle. Every clone observes the new value.
    pub(crate) fn replace(&self, content: Arc<dyn Content>) {
        *self.0.target.write() = content;
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0.id)
    }
}

// =============================================================================
// Traversal
// =============================================================================

/// Something found while walking a content value.
#[derive(Debug, Clone)]
pub enum Reachable {
    Node(Node),
    Reference(ContentReference),
    Asset(FileAsset),
}

/// Collects what a [`Content::visit`] call reports.
#[derive(Debug, Default)]
pub struct Walker {
    found: Vec<Reachable>,
    missing: Vec<String>,
}

impl Walker {
    pub fn visit<W: Walk + ?Sized>(&mut self, value: &W) -> &mut Self {
        value.walk(self);
        self
    }

    /// Visit a field that must be present once loading is done.
    pub fn require<W: Walk>(&mut self, field: &str, value: &Option<W>) -> &mut Self {
        match value {
            Some(v) => v.walk(self),
            None => self.missing.push(field.to_string()),
        }
        self
    }

    pub fn node(&mut self, node: &Node) {
        self.found.push(Reachable::Node(node.clone()));
    }

    pub fn reference(&mut self, reference: &ContentReference) {
        self.found.push(Reachable::Reference(reference.clone()));
    }

    pub fn asset(&mut self, asset: &FileAsset) {
        self.found.push(Reachable::Asset(asset.clone()));
    }

    pub(crate) fn finish(self) -> (Vec<Reachable>, Vec<String>) {
        (self.found, self.missing)
    }
}

/// Values a [`Walker`] can descend into.
pub trait Walk {
    fn walk(&self, walker: &mut Walker);
}

impl Walk for Node {
    fn walk(&self, walker: &mut Walker) {
        walker.node(self);
    }
}

impl<T: Walk> Walk for Option<T> {
    fn walk(&self, walker: &mut Walker) {
        if let Some(value) = self {
            value.walk(walker);
        }
    }
}

impl<T: Walk> Walk for [T] {
    fn walk(&self, walker: &mut Walker) {
        for value in self {
            value.walk(walker);
        }
    }
}

impl<T: Walk> Walk for Vec<T> {
    fn walk(&self, walker: &mut Walker) {
        self.as_slice().walk(walker);
    }
}

impl<K, T: Walk> Walk for BTreeMap<K, T> {
    fn walk(&self, walker: &mut Walker) {
        for value in self.values() {
            value.walk(walker);
        }
    }
}

impl<K, T: Walk, S> Walk for HashMap<K, T, S> {
    fn walk(&self, walker: &mut Walker) {
        for value in self.values() {
            value.walk(walker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Text(&'static str);
    impl Content for Text {}

    #[derive(Debug)]
    struct Holder {
        items: Vec<Node>,
        extra: Option<Node>,
        named: BTreeMap<String, Node>,
    }
    impl Content for Holder {
        fn visit(&self, walker: &mut Walker) {
            walker
                .visit(&self.items)
                .visit(&self.named)
                .require("extra", &self.extra);
        }
    }

    #[test]
    fn nodes_compare_by_identity() {
        let a = Node::new(Text("same"));
        let b = Node::new(Text("same"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn downcast_to_concrete_type() {
        let node = Node::new(Text("hello"));
        assert_eq!(node.downcast::<Text>().unwrap().0, "hello");
        assert!(!node.is::<Holder>());
    }

    #[test]
    fn replace_is_visible_through_every_clone() {
        let node = Node::new(Text("old"));
        let other_handle = node.clone();
        node.replace(Arc::new(Text("new")));
        assert_eq!(other_handle.downcast::<Text>().unwrap().0, "new");
        assert_eq!(node.id(), other_handle.id());
    }

    #[test]
    fn points_to_checks_current_target() {
        let content: Arc<dyn Content> = Arc::new(Text("x"));
        let node = Node::from_arc(content.clone());
        assert!(node.points_to(&content));
        node.replace(Arc::new(Text("y")));
        assert!(!node.points_to(&content));
    }

    #[test]
    fn walker_collects_nested_values_and_missing_fields() {
        let mut named = BTreeMap::new();
        named.insert("k".to_string(), Node::new(Text("c")));
        let holder = Holder {
            items: vec![Node::new(Text("a")), Node::new(Text("b"))],
            extra: None,
            named,
        };
        let mut walker = Walker::default();
        holder.visit(&mut walker);
        let (found, missing) = walker.finish();
        assert_eq!(found.len(), 3);
        assert_eq!(missing, vec!["extra".to_string()]);
    }
}
