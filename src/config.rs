//! Site configuration module.
//!
//! Handles loading, validating, and merging `sitegraph.toml`. Stock defaults
//! are the base layer; the user file overrides only the keys it names.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [paths]
//! content = "content"        # Content root, relative to the config file
//! output = "dist"            # Render target, cleared on every build
//! cache = ".sitegraph-cache" # Build cache (resized images, assets)
//!
//! [url]
//! protocol = "https"
//! host = "example.org"
//! path_prefix = ""           # e.g. "docs/" when served below a sub path
//! # static_prefix = "static/"  # defaults to path_prefix
//!
//! [loader]
//! root_type = "website"      # Type tag of the content root
//! git_info = true            # Attach last-commit info to pages
//!
//! [render]
//! image_quality = 90         # JPEG/WebP quality of resized images (1-100)
//! # max_threads = 4          # Parallel render workers (omit for all cores)
//! # stylesheet = "theme/site.css"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::render::UrlConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default name of the configuration file.
pub const CONFIG_FILE: &str = "sitegraph.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `sitegraph.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Where content is read from and output is written to.
    pub paths: PathsConfig,
    /// How public URLs are formed.
    pub url: UrlConfig,
    /// Content loading settings.
    pub loader: LoaderConfig,
    /// Rendering settings.
    pub render: RenderConfig,
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.protocol.is_empty() || self.url.host.is_empty() {
            return Err(ConfigError::Validation(
                "url.protocol and url.host must not be empty".into(),
            ));
        }
        if let Err(e) = self.url.base_url() {
            return Err(ConfigError::Validation(format!(
                "url.protocol and url.host do not form a valid URL: {e}"
            )));
        }
        if self.loader.root_type.is_empty() {
            return Err(ConfigError::Validation(
                "loader.root_type must not be empty".into(),
            ));
        }
        if !(1..=100).contains(&self.render.image_quality) {
            return Err(ConfigError::Validation(
                "render.image_quality must be 1-100".into(),
            ));
        }
        if self.render.max_threads == Some(0) {
            return Err(ConfigError::Validation(
                "render.max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the relative paths of this config against `base`, usually
    /// the directory holding the config file.
    pub fn resolve_paths(&self, base: &Path) -> ResolvedPaths {
        ResolvedPaths {
            content: base.join(&self.paths.content),
            output: base.join(&self.paths.output),
            cache: base.join(&self.paths.cache),
            stylesheet: self.render.stylesheet.as_ref().map(|s| base.join(s)),
        }
    }
}

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub content: String,
    pub output: String,
    pub cache: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            content: "content".to_string(),
            output: "dist".to_string(),
            cache: ".sitegraph-cache".to_string(),
        }
    }
}

/// Absolute (or config-relative) paths a build works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub content: PathBuf,
    pub output: PathBuf,
    pub cache: PathBuf,
    pub stylesheet: Option<PathBuf>,
}

/// Content loading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Type tag of the node loaded from the content root.
    pub root_type: String,
    /// Read last-commit information from git for every page.
    pub git_info: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root_type: "website".to_string(),
            git_info: true,
        }
    }
}

/// Rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Maximum number of parallel render workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_threads: Option<usize>,
    /// Quality of resized images.
    pub image_quality: u32,
    /// Stylesheet published with a content hash and linked from every page.
    pub stylesheet: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_threads: None,
            image_quality: 90,
            stylesheet: None,
        }
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &RenderConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_threads.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SiteConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(file: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !file.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(file)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `file`, falling back to the stock defaults when the
/// file does not exist.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(file: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(file)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `sitegraph.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitegraph configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Relative paths are resolved
# against the directory holding this file.
#
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Paths
# ---------------------------------------------------------------------------
[paths]
# Content root: a directory tree of typed entries and _index.yml files.
content = "content"
# Render target. Cleared before every build.
output = "dist"
# Build cache for resized images and published assets.
# Safe to delete; it is rebuilt on the next build.
cache = ".sitegraph-cache"

# ---------------------------------------------------------------------------
# Public URLs
# ---------------------------------------------------------------------------
[url]
protocol = "https"
# Host name, optionally with a port.
host = "example.org"
# Prefix of every content URL, e.g. "docs/" when the site is served
# below https://example.org/docs/.
path_prefix = ""
# Prefix of static asset URLs (images, attachments, stylesheets).
# Defaults to path_prefix.
# static_prefix = "static/"

# ---------------------------------------------------------------------------
# Loading
# ---------------------------------------------------------------------------
[loader]
# Type tag of the content root.
root_type = "website"
# Attach the newest commit touching each declaration to its page.
# Silently skipped when the content is not inside a git repository.
git_info = true

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Quality of resized JPEG and WebP images (1-100).
image_quality = 90
# Maximum parallel render workers. Omit to use all CPU cores.
# Values larger than the core count are clamped down.
# max_threads = 4
# Stylesheet linked from every page, published with a content hash
# in its file name.
# stylesheet = "theme/site.css"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_paths() {
        let config = SiteConfig::default();
        assert_eq!(config.paths.content, "content");
        assert_eq!(config.paths.output, "dist");
        assert_eq!(config.paths.cache, ".sitegraph-cache");
    }

    #[test]
    fn default_config_loader_and_render() {
        let config = SiteConfig::default();
        assert_eq!(config.loader.root_type, "website");
        assert!(config.loader.git_info);
        assert_eq!(config.render.image_quality, 90);
        assert_eq!(config.render.max_threads, None);
        assert_eq!(config.render.stylesheet, None);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[url]
host = "docs.example.com"
path_prefix = "v2/"
"#;
        let config: SiteConfig = toml::from_str(toml).unwrap();

        // Overridden values
        assert_eq!(config.url.host, "docs.example.com");
        assert_eq!(config.url.path_prefix, "v2/");
        // Default values preserved
        assert_eq!(config.url.protocol, "https");
        assert_eq!(config.url.static_prefix(), "v2/");
        assert_eq!(config.paths.output, "dist");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(
            &file,
            r#"
[paths]
content = "site"

[render]
max_threads = 2
stylesheet = "theme/site.css"
"#,
        )
        .unwrap();

        let config = load_config(&file).unwrap();
        assert_eq!(config.paths.content, "site");
        assert_eq!(config.paths.output, "dist");
        assert_eq!(config.render.max_threads, Some(2));
        assert_eq!(config.render.stylesheet.as_deref(), Some("theme/site.css"));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(&file, "this is not valid toml [[[").unwrap();

        assert!(matches!(load_config(&file), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn resolve_paths_against_config_dir() {
        let mut config = SiteConfig::default();
        config.render.stylesheet = Some("theme/site.css".into());
        let paths = config.resolve_paths(Path::new("/srv/site"));
        assert_eq!(paths.content, Path::new("/srv/site/content"));
        assert_eq!(paths.output, Path::new("/srv/site/dist"));
        assert_eq!(paths.cache, Path::new("/srv/site/.sitegraph-cache"));
        assert_eq!(
            paths.stylesheet.as_deref(),
            Some(Path::new("/srv/site/theme/site.css"))
        );
    }

    // =========================================================================
    // Thread count
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let config = RenderConfig::default();
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let config = RenderConfig {
            max_threads: Some(100_000),
            ..RenderConfig::default()
        };
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = RenderConfig {
            max_threads: Some(1),
            ..RenderConfig::default()
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged.get("a").unwrap().as_integer(), Some(1));
        assert_eq!(merged.get("b").unwrap().as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str(
            r#"
[url]
protocol = "https"
host = "example.org"
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[url]
host = "example.net"
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let url = merged.get("url").unwrap();
        assert_eq!(url.get("protocol").unwrap().as_str(), Some("https"));
        assert_eq!(url.get("host").unwrap().as_str(), Some("example.net"));
    }

    #[test]
    fn merge_toml_adds_new_keys() {
        let base: toml::Value = toml::from_str("[render]\nimage_quality = 90").unwrap();
        let overlay: toml::Value = toml::from_str("[render]\nmax_threads = 3").unwrap();
        let merged = merge_toml(base, overlay);
        let render = merged.get("render").unwrap();
        assert_eq!(render.get("image_quality").unwrap().as_integer(), Some(90));
        assert_eq!(render.get("max_threads").unwrap().as_integer(), Some(3));
    }

    // =========================================================================
    // Unknown key rejection
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let result: Result<SiteConfig, _> = toml::from_str("[paths]\nsource = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        let result: Result<SiteConfig, _> = toml::from_str("[colors]\nlight = \"#fff\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_rejected_via_load_config() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(&file, "[url]\nhostname = \"example.org\"").unwrap();
        assert!(load_config(&file).is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        SiteConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_quality_bounds() {
        let mut config = SiteConfig::default();
        config.render.image_quality = 100;
        assert!(config.validate().is_ok());
        config.render.image_quality = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        config.render.image_quality = 101;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_zero_threads() {
        let mut config = SiteConfig::default();
        config.render.max_threads = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_empty_root_type() {
        let mut config = SiteConfig::default();
        config.loader.root_type = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_bad_host() {
        let mut config = SiteConfig::default();
        config.url.host = "exa mple.org".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join(CONFIG_FILE);
        fs::write(&file, "[render]\nimage_quality = 200").unwrap();
        assert!(matches!(load_config(&file), Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // stock_config_toml tests
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: SiteConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn stock_config_toml_contains_all_sections() {
        let content = stock_config_toml();
        for section in ["[paths]", "[url]", "[loader]", "[render]"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value().unwrap();
        assert!(val.is_table());
        for key in ["paths", "url", "loader", "render"] {
            assert!(val.get(key).is_some(), "missing {key}");
        }
    }
}
