use clap::{Args, Parser, Subcommand};
use sitegraph::cache::CacheStore;
use sitegraph::cache::image::ImageCache;
use sitegraph::config::{self, ResolvedPaths, SiteConfig};
use sitegraph::content::TypeRegistry;
use sitegraph::imaging::{Quality, RustBackend};
use sitegraph::loader::{ContentLoader, LoadError, LoaderContext};
use sitegraph::render::{BasicTheme, FileOutputRenderer, Renderer};
use sitegraph::{git, output};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Shared flags for commands that use the build cache.
#[derive(Args, Clone)]
struct CacheArgs {
    /// Ignore cached results and recompute everything
    #[arg(long)]
    no_cache: bool,
}

fn version_string() -> &'static str {
    let hash = env!("SITEGRAPH_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("{}@{hash}", env!("CARGO_PKG_VERSION")).into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "sitegraph")]
#[command(about = "Build a static site from a typed content tree")]
#[command(long_about = "\
Build a static site from a typed content tree

Directories and files are named <comment>.<name>.<type>. Each directory may
declare its fields in _index.yml; entries named @<property> fill a property
of their parent.

Content structure:

  content/
  ├── _index.yml                   # Website declaration (name, ...)
  ├── @title.md                    # Website title, markdown
  ├── 010.about.page/              # Page `about`, ordered by its comment
  │   ├── _index.yml               # title, slug, link, image, aliases
  │   ├── @body.md                 # Page body; links are checked
  │   └── portrait.jpg             # Image asset, resized through the cache
  └── blog.folder/                 # Folder `blog`
      ├── @index.page/             # Rendered at the folder's own location
      └── first-post.page/

Run 'sitegraph gen-config' to generate a documented sitegraph.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file; paths in it are relative to its directory
    #[arg(long, default_value = config::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log loader, cache and render details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the content tree without rendering
    Check,
    /// Load, validate and render the site
    Build(CacheArgs),
    /// Manage the build cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Print a stock sitegraph.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Remove blobs no cache entry refers to
    Gc,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Check => {
            let (site_config, paths) = load_site_config(&cli.config)?;
            println!("==> Checking {}", paths.content.display());
            let ctx = load_content(&site_config, &paths)?;
            let renderer = Renderer::new(&ctx, site_config.url.clone());
            output::print_content_tree(&ctx, Some(&renderer));
            println!("==> Content is valid ({} nodes)", ctx.len());
        }
        Command::Build(cache_args) => {
            let (site_config, paths) = load_site_config(&cli.config)?;
            println!("==> Loading {}", paths.content.display());
            let ctx = load_content(&site_config, &paths)?;
            init_thread_pool(&site_config.render);

            let store = Arc::new(if cache_args.no_cache {
                CacheStore::open_fresh(&paths.cache)?
            } else {
                CacheStore::open(&paths.cache)?
            });
            let images = ImageCache::new(store.clone(), Arc::new(RustBackend::new()))
                .with_quality(Quality::new(site_config.render.image_quality));
            let mut theme = BasicTheme::new();
            if let Some(stylesheet) = &paths.stylesheet {
                theme = theme.with_stylesheet(stylesheet);
            }

            println!("==> Rendering → {}", paths.output.display());
            let renderer = Renderer::new(&ctx, site_config.url.clone());
            let summary = FileOutputRenderer::new(renderer, &theme, &paths.output)
                .with_images(images)
                .render_website()?;
            store.flush()?;
            output::print_render_summary(&summary);
            output::print_cache_stats(&store.stats());
            println!("==> Build complete: {}", paths.output.display());
        }
        Command::Cache(CacheCommand::Gc) => {
            let (_, paths) = load_site_config(&cli.config)?;
            let store = CacheStore::open(&paths.cache)?;
            let stats = store.collect_garbage()?;
            output::print_gc_stats(&stats);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `--verbose` switches the crate to debug.
fn init_tracing(verbose: bool) {
    let default = if verbose { "sitegraph=debug" } else { "sitegraph=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `config_file` and resolve its paths against the file's directory.
fn load_site_config(config_file: &Path) -> Result<(SiteConfig, ResolvedPaths), config::ConfigError> {
    let site_config = config::load_config(config_file)?;
    let dir = match config_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let paths = site_config.resolve_paths(dir);
    Ok((site_config, paths))
}

/// Load and validate the content tree, printing every validation failure.
fn load_content(
    site_config: &SiteConfig,
    paths: &ResolvedPaths,
) -> Result<LoaderContext, Box<dyn std::error::Error>> {
    let mut ctx = LoaderContext::new(&paths.content);
    if site_config.loader.git_info {
        ctx = ctx.with_commit_info(git::load_commit_info_or_empty(&paths.content));
    }
    let loader = ContentLoader::new(Arc::new(TypeRegistry::with_builtin_types()));
    match loader.load(&mut ctx, &site_config.loader.root_type) {
        Ok(_) => Ok(ctx),
        Err(LoadError::Validation(errors)) => {
            output::print_validation_errors(&errors);
            Err("content failed validation".into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialize the rayon thread pool based on render config.
///
/// Caps at the number of available CPU cores; users can constrain down, not up.
fn init_thread_pool(render: &config::RenderConfig) {
    let threads = config::effective_threads(render);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
