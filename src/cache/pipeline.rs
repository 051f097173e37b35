//! Cached transformation chains for text assets (stylesheets, scripts).
//!
//! An [`AssetPipeline`] reads one source file, runs it through an ordered
//! list of [`Transformer`]s and stores the result as a blob. The cache key
//! is the source's `path:size:mtime` plus each transformer's key, in order.
//! On a hit nothing runs; the values transformers computed on the first
//! run (a digest, a source map name) are handed back through
//! [`Transformer::restore`].

use super::{CacheError, CacheStore, CacheValue, io_error};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

pub const ASSET_PIPELINE_REGION: &str = "asset-pipeline";

/// A text asset moving through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderAsset {
    pub file_name: String,
    pub content: String,
}

/// One step of an [`AssetPipeline`].
pub trait Transformer: Send + Sync {
    /// Identifies this transformer and its settings within a cache key.
    fn cache_key(&self) -> String;

    fn transform(&mut self, input: RenderAsset) -> Result<RenderAsset, CacheError>;

    /// Value computed by the last `transform`, persisted with the result.
    fn value(&self) -> Option<serde_json::Value> {
        None
    }

    /// Receive the value persisted by an earlier run instead of transforming.
    fn restore(&mut self, _value: serde_json::Value) {}
}

#[derive(Serialize)]
struct PipelineKey<'a> {
    cache_info: &'a str,
    transformers: Vec<String>,
}

/// Result of running a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// File name the asset should be published under.
    pub file_name: String,
    pub blob: String,
    /// Per-transformer values, in pipeline order.
    pub values: Vec<Option<serde_json::Value>>,
}

impl CacheValue for PipelineOutput {
    fn blob(&self) -> Option<&str> {
        Some(&self.blob)
    }
}

pub struct AssetPipeline {
    cache_info: String,
    source: PathBuf,
    transformers: Vec<Box<dyn Transformer>>,
}

impl AssetPipeline {
    /// Pipeline over `source`, identified in the cache by `name` (usually
    /// the path the theme asked for) plus the file's size and mtime.
    pub fn new(name: &str, source: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let source = source.into();
        let meta = fs::metadata(&source).map_err(io_error(&source))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            cache_info: format!("{name}:{}:{modified}", meta.len()),
            source,
            transformers: Vec::new(),
        })
    }

    pub fn transform(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    pub fn cache_info(&self) -> &str {
        &self.cache_info
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Current value of the transformer at `index`.
    pub fn value(&self, index: usize) -> Option<serde_json::Value> {
        self.transformers.get(index).and_then(|t| t.value())
    }

    pub fn run(&mut self, store: &CacheStore) -> Result<PipelineOutput, CacheError> {
        let key = PipelineKey {
            cache_info: &self.cache_info,
            transformers: self.transformers.iter().map(|t| t.cache_key()).collect(),
        };
        let mut computed = false;
        let output = store
            .region::<PipelineKey<'_>, PipelineOutput>(ASSET_PIPELINE_REGION)
            .get_or_compute(&key, || {
                computed = true;
                run_transformers(&self.source, &mut self.transformers, store)
            })?;
        if !computed {
            for (transformer, value) in self.transformers.iter_mut().zip(&output.values) {
                if let Some(value) = value {
                    transformer.restore(value.clone());
                }
            }
        }
        Ok(output)
    }
}

fn run_transformers(
    source: &Path,
    transformers: &mut [Box<dyn Transformer>],
    store: &CacheStore,
) -> Result<PipelineOutput, CacheError> {
    let content = fs::read_to_string(source).map_err(io_error(source))?;
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!(source = %source.display(), steps = transformers.len(), "running asset pipeline");

    let mut asset = RenderAsset { file_name, content };
    for transformer in transformers.iter_mut() {
        asset = transformer.transform(asset)?;
    }
    Ok(PipelineOutput {
        blob: store
            .blobs()
            .store_bytes(&asset.file_name, asset.content.as_bytes())?,
        file_name: asset.file_name,
        values: transformers.iter().map(|t| t.value()).collect(),
    })
}

/// Embeds a content hash in the file name (`site.css` → `site.1a2b3c4d5e6f7a8b.css`)
/// so published assets can be cached forever. Its value is the full hex digest.
#[derive(Debug, Default)]
pub struct DigestTransformer {
    digest: Option<String>,
}

impl DigestTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl Transformer for DigestTransformer {
    fn cache_key(&self) -> String {
        "digest:sha256".to_string()
    }

    fn transform(&mut self, input: RenderAsset) -> Result<RenderAsset, CacheError> {
        let digest = format!("{:x}", Sha256::digest(input.content.as_bytes()));
        let short = &digest[..16];
        let file_name = match input.file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{short}.{ext}"),
            _ => format!("{}.{short}", input.file_name),
        };
        self.digest = Some(digest);
        Ok(RenderAsset {
            file_name,
            content: input.content,
        })
    }

    fn value(&self) -> Option<serde_json::Value> {
        self.digest.clone().map(serde_json::Value::String)
    }

    fn restore(&mut self, value: serde_json::Value) {
        if let serde_json::Value::String(digest) = value {
            self.digest = Some(digest);
        }
    }
}
