//! Hierarchical paths: content identity, render output, and public URIs.
//!
//! All three flavours share one implementation, [`HierPath`], parameterized by
//! a [`PathKind`] marker so the compiler keeps them apart: a [`ContentPath`]
//! can never be handed to something expecting a [`UriReferencePath`].
//!
//! ## Representation
//!
//! A path is stored as its normalized, percent-encoded form without a leading
//! separator. Branch (directory-like) paths end with `/`, leaf (file-like)
//! paths do not, and the root is the empty string:
//!
//! ```text
//! ""                  root
//! "blog/"             branch
//! "blog/hello%20you/" branch with an encoded segment
//! "blog/cover.jpg"    leaf
//! ```
//!
//! `Display` trims the separators (`blog/cover.jpg`, `blog`), while
//! [`HierPath::to_string_external`] keeps the trailing `/` of branches.
//! Equality, ordering and hashing only look at the encoded form, so a
//! [`RenderPath`] compares equal regardless of its [`RenderPathType`].

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Characters escaped inside a single path segment. `/` is escaped so a
/// segment can never introduce an extra level; `@` stays readable because
/// property segments use it as a prefix.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'\\')
    .add(b'^')
    .add(b'[')
    .add(b']')
    .add(b'|');

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("leaf path `{0}` must end in a file name with an extension")]
    LeafWithoutExtension(String),
}

/// Marker distinguishing the path flavours.
pub trait PathKind: Copy + Default + fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentKind;

impl PathKind for ContentKind {
    const NAME: &'static str = "ContentPath";
}

/// Tag carried by render paths: where the output belongs and which URL
/// prefix applies to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderPathType {
    #[default]
    Content,
    StaticAsset,
}

impl PathKind for RenderPathType {
    const NAME: &'static str = "RenderPath";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UriKind;

impl PathKind for UriKind {
    const NAME: &'static str = "UriReferencePath";
}

/// Identity of a node in the content graph.
pub type ContentPath = HierPath<ContentKind>;
/// Location of a rendered output below the output root.
pub type RenderPath = HierPath<RenderPathType>;
/// Externally visible path, including any configured URL prefix.
pub type UriReferencePath = HierPath<UriKind>;

/// Immutable hierarchical path. See the [module docs](self).
#[derive(Clone)]
pub struct HierPath<K: PathKind> {
    encoded: String,
    kind: K,
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

fn decode_segment(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

impl<K: PathKind> HierPath<K> {
    fn from_encoded(encoded: String) -> Self {
        Self {
            encoded,
            kind: K::default(),
        }
    }

    pub fn root() -> Self {
        Self::from_encoded(String::new())
    }

    /// Parse a `/`-separated string into a branch path.
    ///
    /// Empty segments are dropped and every segment is normalized: already
    /// encoded input is decoded first, so `"a b"` and `"a%20b"` parse to the
    /// same path.
    pub fn parse(path: &str) -> Self {
        Self::from_segments(path.split('/').map(decode_segment))
    }

    /// Parse a string whose final segment names a file.
    ///
    /// Input ending in `/` is parsed as a branch. Otherwise the final segment
    /// must contain a `.`.
    pub fn parse_leaf_path(path: &str) -> Result<Self, PathError> {
        if path.is_empty() || path.ends_with('/') {
            return Ok(Self::parse(path));
        }
        let (dir, file) = match path.rfind('/') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => ("", path),
        };
        if !file.contains('.') {
            return Err(PathError::LeafWithoutExtension(path.to_string()));
        }
        Ok(Self::parse(dir).child_leaf(&decode_segment(file)))
    }

    /// Build a branch path from raw (unencoded) segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut encoded = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            encoded.push_str(&encode_segment(segment));
            encoded.push('/');
        }
        Self::from_encoded(encoded)
    }

    fn branch_prefix(&self) -> String {
        if self.is_leaf() {
            format!("{}/", self.encoded)
        } else {
            self.encoded.clone()
        }
    }

    /// Branch child. An empty segment yields the path itself.
    pub fn child(&self, segment: &str) -> Self {
        if segment.is_empty() {
            return self.clone();
        }
        let mut encoded = self.branch_prefix();
        encoded.push_str(&encode_segment(segment));
        encoded.push('/');
        self.with_encoded(encoded)
    }

    /// Leaf child, e.g. a file inside this directory.
    pub fn child_leaf(&self, file_name: &str) -> Self {
        if file_name.is_empty() {
            return self.clone();
        }
        let mut encoded = self.branch_prefix();
        encoded.push_str(&encode_segment(file_name));
        self.with_encoded(encoded)
    }

    /// Parent branch. The parent of the root is the root.
    pub fn parent(&self) -> Self {
        let trimmed = self.encoded.trim_end_matches('/');
        let encoded = match trimmed.rfind('/') {
            Some(pos) => trimmed[..=pos].to_string(),
            None => String::new(),
        };
        self.with_encoded(encoded)
    }

    pub fn sibling(&self, segment: &str) -> Self {
        self.parent().child(segment)
    }

    /// Resolve a relative reference against this path.
    ///
    /// `.` and empty segments are ignored, `..` moves to the parent, and a
    /// reference starting with `/` is parsed from the root.
    pub fn resolve(&self, reference: &str) -> Self {
        if reference.starts_with('/') {
            return self.with_encoded(Self::parse(reference).encoded);
        }
        let mut current = self.clone();
        for segment in reference.split('/') {
            match segment {
                "" | "." => {}
                ".." => current = current.parent(),
                other => current = current.child(&decode_segment(other)),
            }
        }
        current
    }

    /// Decoded last segment; empty for the root.
    pub fn name(&self) -> String {
        self.encoded
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(decode_segment)
            .unwrap_or_default()
    }

    /// Decoded segments from the root down.
    pub fn segments(&self) -> Vec<String> {
        self.encoded
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode_segment)
            .collect()
    }

    pub fn is_root(&self) -> bool {
        self.encoded.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_root() && !self.encoded.ends_with('/')
    }

    /// True if `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        if prefix.is_leaf() {
            return self.encoded == prefix.encoded;
        }
        self.encoded.starts_with(&prefix.encoded)
    }

    /// Ordering hint: how far below `parent` this path sits, measured in
    /// encoded characters. `None` if it is not a descendant.
    pub fn sub_path_distance(&self, parent: &Self) -> Option<usize> {
        self.starts_with(parent)
            .then(|| self.encoded.len() - parent.encoded.len())
    }

    /// This path placed below `prefix` (a `/`-separated string).
    pub fn prefixed(&self, prefix: &str) -> Self {
        let mut encoded = Self::parse(prefix).encoded;
        encoded.push_str(&self.encoded);
        self.with_encoded(encoded)
    }

    /// Relabel as another path flavour. Segments are kept untouched.
    pub fn transform<O: PathKind>(&self) -> HierPath<O> {
        HierPath::from_encoded(self.encoded.clone())
    }

    pub fn kind(&self) -> K {
        self.kind
    }

    pub fn with_kind(&self, kind: K) -> Self {
        Self {
            encoded: self.encoded.clone(),
            kind,
        }
    }

    /// Encoded form, keeping the trailing `/` of branch paths.
    pub fn to_string_external(&self) -> String {
        self.encoded.clone()
    }

    /// Map onto the filesystem below `root`, decoding every segment.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.segments() {
            path.push(segment);
        }
        path
    }

    fn with_encoded(&self, encoded: String) -> Self {
        Self {
            encoded,
            kind: self.kind,
        }
    }
}

impl HierPath<RenderPathType> {
    /// Same location, different output tag.
    pub fn as_type(&self, kind: RenderPathType) -> Self {
        self.with_kind(kind)
    }
}

impl<K: PathKind> fmt::Display for HierPath<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoded.trim_matches('/'))
    }
}

impl<K: PathKind> fmt::Debug for HierPath<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?}, {:?})", K::NAME, self.encoded, self.kind)
    }
}

impl<K: PathKind> PartialEq for HierPath<K> {
    fn eq(&self, other: &Self) -> bool {
        self.encoded == other.encoded
    }
}

impl<K: PathKind> Eq for HierPath<K> {}

impl<K: PathKind> Hash for HierPath<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.encoded.hash(state);
    }
}

impl<K: PathKind> PartialOrd for HierPath<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: PathKind> Ord for HierPath<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded.cmp(&other.encoded)
    }
}

impl<K: PathKind> Serialize for HierPath<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded)
    }
}

impl<'de, K: PathKind> Deserialize<'de> for HierPath<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_leaf_path(&raw).map_err(serde::de::Error::custom)
    }
}
