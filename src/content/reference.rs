//! References from one node to another by content path.

use super::{Node, Walk, Walker};
use crate::loader::ValidationContext;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

struct Inner {
    raw: String,
    target: RwLock<Option<Node>>,
}

/// A path to another node, written relative to the node that declares it
/// (`../sibling`, `child`) or absolute from the content root (`/about`).
///
/// The target is resolved during validation; until then [`target`](Self::target)
/// returns `None`.
#[derive(Clone)]
pub struct ContentReference(Arc<Inner>);

impl ContentReference {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Arc::new(Inner {
            raw: raw.into(),
            target: RwLock::new(None),
        }))
    }

    pub fn raw(&self) -> &str {
        &self.0.raw
    }

    pub fn target(&self) -> Option<Node> {
        self.0.target.read().clone()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn validate(&self, cx: &ValidationContext<'_>) -> Result<(), String> {
        let path = cx.owner_path().resolve(&self.0.raw);
        let resolved = cx.content_by_path(&path).cloned();
        let found = resolved.is_some();
        *self.0.target.write() = resolved;
        if found {
            Ok(())
        } else {
            Err(format!("Invalid content path: {path}"))
        }
    }
}

impl fmt::Debug for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentReference({:?})", self.0.raw)
    }
}

impl Walk for ContentReference {
    fn walk(&self, walker: &mut Walker) {
        walker.reference(self);
    }
}

impl Serialize for ContentReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.raw)
    }
}

impl<'de> Deserialize<'de> for ContentReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ContentReference::new)
    }
}
