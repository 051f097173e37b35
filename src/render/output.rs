//! Rendering a loaded site into an output directory.
//!
//! [`FileOutputRenderer`] clears the target, asks the [`Theme`] to render
//! every node it accepts, once per [`OutputType`], and writes redirect stubs
//! for every render path alias. Nodes render in parallel on the rayon pool;
//! images and assets they need go through the build cache and are linked
//! into the output tree.
//!
//! ## Output Structure
//!
//! ```text
//! dist/
//! ├── index.html                 website
//! ├── robots.txt                 website, robots.txt output
//! ├── site.1a2b3c4d5e6f7a8b.css  stylesheet published through the asset pipeline
//! ├── about/
//! │   ├── index.html             page
//! │   └── fit_800x600_me.jpg     resized image, hard-linked from the cache
//! └── old-about/
//!     └── index.html             alias: redirect stub to /about/
//! ```
//!
//! A node its parent names as content symlink is not rendered on its own:
//! it shares the parent's location and the parent's template shows it.

use super::{RenderError, Renderer, io_error};
use crate::cache::image::{ImageCache, ImageInfo};
use crate::cache::pipeline::AssetPipeline;
use crate::content::{FileAsset, Folder, ImageAsset, Markdown, Node, Page, Website};
use crate::imaging::FillType;
use crate::loader::LoaderContext;
use crate::path::{RenderPath, RenderPathType};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A kind of file produced for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputType {
    Html,
    RobotsTxt,
}

impl OutputType {
    pub const ALL: [OutputType; 2] = [OutputType::Html, OutputType::RobotsTxt];

    pub fn name(self) -> &'static str {
        match self {
            OutputType::Html => "html",
            OutputType::RobotsTxt => "robots.txt",
        }
    }

    /// File written for a branch render path.
    pub fn index_file(self) -> &'static str {
        match self {
            OutputType::Html => "index.html",
            OutputType::RobotsTxt => "robots.txt",
        }
    }

    /// Leaf render paths are files already; branches get the index file.
    pub fn file_for_render_path(self, render_path: &RenderPath) -> RenderPath {
        if render_path.is_leaf() {
            render_path.clone()
        } else {
            render_path.child_leaf(self.index_file())
        }
    }
}

/// Turns nodes into file contents.
pub trait Theme: Send + Sync {
    /// Whether this theme produces `output` for `node`.
    fn accepts(&self, node: &Node, output: OutputType) -> bool;

    fn render(&self, cx: &RenderContext<'_>) -> Result<String, RenderError>;
}

/// A resized image published into the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLink {
    pub href: String,
    pub width: u32,
    pub height: u32,
}

/// Everything a theme can do while rendering one node.
pub struct RenderContext<'a> {
    renderer: &'a Renderer<'a>,
    node: &'a Node,
    output: OutputType,
    render_path: RenderPath,
    target: &'a Path,
    images: Option<&'a ImageCache>,
}

impl<'a> RenderContext<'a> {
    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn output_type(&self) -> OutputType {
        self.output
    }

    pub fn render_path(&self) -> &RenderPath {
        &self.render_path
    }

    pub fn renderer(&self) -> &'a Renderer<'a> {
        self.renderer
    }

    pub fn loader(&self) -> &'a LoaderContext {
        self.renderer.loader()
    }

    pub fn href(&self, node: &Node) -> Result<String, RenderError> {
        self.renderer.href(node, false)
    }

    pub fn absolute_href(&self, node: &Node) -> Result<String, RenderError> {
        self.renderer.href(node, true)
    }

    fn images(&self) -> Result<&'a ImageCache, RenderError> {
        self.images
            .ok_or_else(|| RenderError::Theme("no build cache configured for images".to_string()))
    }

    /// Static asset location of `file_name` next to the node owning `asset`.
    fn next_to(&self, asset: &FileAsset, file_name: &str) -> Result<RenderPath, RenderError> {
        let container = asset.container().ok_or_else(|| RenderError::MissingParent {
            path: asset.path().clone(),
        })?;
        Ok(self
            .renderer
            .find_render_path(&container)?
            .child_leaf(file_name)
            .as_type(RenderPathType::StaticAsset))
    }

    /// Publish `asset` next to the node that owns it and return its href.
    pub fn link_asset(&self, asset: &FileAsset) -> Result<String, RenderError> {
        let render_path = self.next_to(asset, &asset.name())?;
        link_file(asset.file(), &render_path.to_fs_path(self.target))?;
        self.renderer.href_for_render_path(&render_path, false)
    }

    pub fn image_info(&self, image: &ImageAsset) -> Result<ImageInfo, RenderError> {
        Ok(image.info(self.images()?)?)
    }

    /// Resize `image` through the cache and publish the result next to it.
    pub fn resize(
        &self,
        image: &ImageAsset,
        width: u32,
        height: u32,
        fill: FillType,
    ) -> Result<ImageLink, RenderError> {
        let images = self.images()?;
        let resized = images.resize(image, width, height, fill)?;
        let render_path = self.next_to(image.asset(), &resized.file_name)?;
        images
            .store()
            .blobs()
            .link_into(&resized.blob, &render_path.to_fs_path(self.target))?;
        Ok(ImageLink {
            href: self.renderer.href_for_render_path(&render_path, false)?,
            width: resized.width,
            height: resized.height,
        })
    }

    /// Run `pipeline` through the cache, publish the result in `dir` and
    /// return its href.
    pub fn publish(&self, pipeline: &mut AssetPipeline, dir: &RenderPath) -> Result<String, RenderError> {
        let store = self.images()?.store();
        let output = pipeline.run(store)?;
        let render_path = dir
            .child_leaf(&output.file_name)
            .as_type(RenderPathType::StaticAsset);
        store
            .blobs()
            .link_into(&output.blob, &render_path.to_fs_path(self.target))?;
        self.renderer.href_for_render_path(&render_path, false)
    }

    /// HTML of a markdown node, with links to other content rewritten to
    /// their hrefs.
    pub fn markdown(&self, node: &Node) -> Result<String, RenderError> {
        self.render_markdown(node, false)
    }

    /// Like [`RenderContext::markdown`], limited to the text before
    /// `<!--more-->` (or the first paragraph).
    pub fn markdown_summary(&self, node: &Node) -> Result<String, RenderError> {
        self.render_markdown(node, true)
    }

    fn render_markdown(&self, node: &Node, summary: bool) -> Result<String, RenderError> {
        let markdown = node
            .downcast::<Markdown>()
            .ok_or_else(|| RenderError::Theme("expected markdown content".to_string()))?;
        let base = self.loader().find_content_path(node)?.parent();
        let resolve = |link: &str| {
            let (path, fragment) = match link.find(['#', '?']) {
                Some(pos) => link.split_at(pos),
                None => (link, ""),
            };
            let target = self.loader().content_by_path(&base.resolve(path))?;
            let href = self.renderer.href(target, false).ok()?;
            Some(format!("{href}{fragment}"))
        };
        Ok(if summary {
            markdown.render_summary_html(resolve)
        } else {
            markdown.render_html(resolve)
        })
    }
}

/// Hard-link `source` to `target`, copying across devices. An existing
/// target is kept.
fn link_file(source: &Path, target: &Path) -> Result<bool, RenderError> {
    if target.exists() {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    match fs::hard_link(source, target) {
        Ok(()) => Ok(true),
        // Another worker linked it first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(_) => {
            fs::copy(source, target).map_err(io_error(target))?;
            Ok(true)
        }
    }
}

/// Outcome of [`FileOutputRenderer::render_website`].
#[derive(Debug, Clone, Default)]
pub struct RenderSummary {
    /// Files written by the theme, sorted.
    pub files: Vec<RenderPath>,
    pub aliases: usize,
    pub clear: Duration,
    pub render: Duration,
}

/// Renders a site into a directory on disk.
pub struct FileOutputRenderer<'a> {
    renderer: Renderer<'a>,
    theme: &'a dyn Theme,
    target: PathBuf,
    images: Option<ImageCache>,
}

impl<'a> FileOutputRenderer<'a> {
    pub fn new(renderer: Renderer<'a>, theme: &'a dyn Theme, target: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            theme,
            target: target.into(),
            images: None,
        }
    }

    pub fn with_images(mut self, images: ImageCache) -> Self {
        self.images = Some(images);
        self
    }

    pub fn renderer(&self) -> &Renderer<'a> {
        &self.renderer
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Remove and recreate the target directory.
    fn clear(&self) -> Result<(), RenderError> {
        if self.target.exists() {
            let target = fs::canonicalize(&self.target).map_err(io_error(&self.target))?;
            let content = fs::canonicalize(self.renderer.loader().root_dir())
                .unwrap_or_else(|_| self.renderer.loader().root_dir().to_path_buf());
            if content.starts_with(&target) {
                return Err(RenderError::UnsafeTarget(self.target.clone()));
            }
            debug!(target = %self.target.display(), "clearing output directory");
            fs::remove_dir_all(&self.target).map_err(io_error(&self.target))?;
        }
        fs::create_dir_all(&self.target).map_err(io_error(&self.target))
    }

    /// Clear the target and render every node the theme accepts.
    pub fn render_website(&self) -> Result<RenderSummary, RenderError> {
        let start = Instant::now();
        self.clear()?;
        let clear = start.elapsed();

        let start = Instant::now();
        let nodes: Vec<&Node> = self
            .renderer
            .loader()
            .nodes()
            .into_iter()
            .map(|(_, node)| node)
            .collect();
        let mut jobs = Vec::new();
        for node in &nodes {
            if self.renderer.is_symlink_target(node)? {
                continue;
            }
            for output in OutputType::ALL {
                if self.theme.accepts(node, output) {
                    jobs.push((*node, output));
                }
            }
        }

        let mut files = jobs
            .par_iter()
            .map(|(node, output)| self.render_content(node, *output))
            .collect::<Result<Vec<_>, _>>()?;
        files.sort();
        let aliases = nodes
            .par_iter()
            .map(|node| self.write_render_path_aliases(node))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum::<usize>();
        let render = start.elapsed();

        info!(files = files.len(), aliases, "finished rendering");
        if let Some(images) = &self.images {
            for (region, stats) in images.store().stats() {
                info!(region = %region, %stats, "cache statistics");
            }
        }
        info!(clear = ?clear, render = ?render, "render timings");
        Ok(RenderSummary {
            files,
            aliases,
            clear,
            render,
        })
    }

    /// Render `node` as `output` and return the file written.
    pub fn render_content(&self, node: &Node, output: OutputType) -> Result<RenderPath, RenderError> {
        let render_path = self.renderer.find_render_path(node)?;
        self.write_output(node, output, &render_path)
            .map_err(|source| RenderError::Rendering {
                render_path,
                source: Box::new(source),
            })
    }

    fn write_output(
        &self,
        node: &Node,
        output: OutputType,
        render_path: &RenderPath,
    ) -> Result<RenderPath, RenderError> {
        let cx = RenderContext {
            renderer: &self.renderer,
            node,
            output,
            render_path: render_path.clone(),
            target: &self.target,
            images: self.images.as_ref(),
        };
        let body = self.theme.render(&cx)?;
        let file = output.file_for_render_path(render_path);
        let fs_path = file.to_fs_path(&self.target);
        if let Some(dir) = fs_path.parent() {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        fs::write(&fs_path, body).map_err(io_error(&fs_path))?;
        debug!(file = %file, "rendered");
        Ok(file)
    }

    /// Write a redirect stub at each alias of `node`.
    fn write_render_path_aliases(&self, node: &Node) -> Result<usize, RenderError> {
        let aliases = node.get().render_path_aliases();
        if aliases.is_empty() {
            return Ok(0);
        }
        let target_url = self.renderer.href(node, true)?;
        let stub = redirect_stub(&target_url).into_string();
        for alias in &aliases {
            let file = OutputType::Html.file_for_render_path(alias);
            let fs_path = file.to_fs_path(&self.target);
            if let Some(dir) = fs_path.parent() {
                fs::create_dir_all(dir).map_err(io_error(dir))?;
            }
            fs::write(&fs_path, &stub).map_err(io_error(&fs_path))?;
            debug!(alias = %alias, target = %target_url, "wrote redirect");
        }
        Ok(aliases.len())
    }
}

/// Page sending visitors and crawlers to `target_url`.
fn redirect_stub(target_url: &str) -> Markup {
    html! {
        (DOCTYPE)
        html {
            head {
                link rel="canonical" href=(target_url);
                meta name="robots" content="noindex";
                meta charset="utf-8";
                meta http-equiv="refresh" content={ "0; url=" (target_url) };
            }
        }
    }
}

// ============================================================================
// Basic theme
// ============================================================================

/// Plain HTML theme used by the command line tool.
#[derive(Debug, Clone, Default)]
pub struct BasicTheme {
    stylesheet: Option<PathBuf>,
}

impl BasicTheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish this file with a content hash in its name and link it from
    /// every page.
    pub fn with_stylesheet(mut self, stylesheet: impl Into<PathBuf>) -> Self {
        self.stylesheet = Some(stylesheet.into());
        self
    }

    fn stylesheet_href(&self, cx: &RenderContext<'_>) -> Result<Option<String>, RenderError> {
        let Some(path) = &self.stylesheet else {
            return Ok(None);
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut pipeline = AssetPipeline::new(&name, path)?
            .transform(crate::cache::pipeline::DigestTransformer::new());
        cx.publish(&mut pipeline, &RenderPath::root()).map(Some)
    }

    fn render_html(&self, cx: &RenderContext<'_>) -> Result<String, RenderError> {
        let node = cx.node();
        let stylesheet = self.stylesheet_href(cx)?;
        let title = node_title(cx, node);
        let nav = site_nav(cx)?;
        let content = if let Some(website) = node.downcast::<Website>() {
            let intro = website.title.as_ref().map(|t| cx.markdown(t)).transpose()?;
            let children = child_list(cx, &website.children)?;
            html! {
                @if let Some(intro) = intro {
                    (PreEscaped(intro))
                }
                (children)
            }
        } else if let Some(folder) = node.downcast::<Folder>() {
            let index = match &folder.index {
                Some(index) => Some((node_title(cx, index), page_content(cx, index)?)),
                None => None,
            };
            let children = child_list(cx, &folder.children)?;
            html! {
                @if let Some((index_title, index)) = index {
                    h2 { (index_title) }
                    (index)
                }
                (children)
            }
        } else {
            page_content(cx, node)?
        };

        Ok(document(&title, stylesheet.as_deref(), nav, content).into_string())
    }
}

impl Theme for BasicTheme {
    fn accepts(&self, node: &Node, output: OutputType) -> bool {
        match output {
            OutputType::Html => node.is::<Website>() || node.is::<Folder>() || node.is::<Page>(),
            OutputType::RobotsTxt => node.is::<Website>(),
        }
    }

    fn render(&self, cx: &RenderContext<'_>) -> Result<String, RenderError> {
        match cx.output_type() {
            OutputType::Html => self.render_html(cx),
            OutputType::RobotsTxt => Ok("User-agent: *\nAllow: /\n".to_string()),
        }
    }
}

fn node_title(cx: &RenderContext<'_>, node: &Node) -> String {
    if let Some(page) = node.downcast::<Page>() {
        return page.title.clone();
    }
    if let Some(folder) = node.downcast::<Folder>()
        && let Some(title) = &folder.title
    {
        return title.clone();
    }
    if let Some(website) = node.downcast::<Website>()
        && !website.name.is_empty()
    {
        return website.name.clone();
    }
    cx.loader()
        .find_content_path(node)
        .map(|p| p.name())
        .unwrap_or_default()
}

/// Top-level sections of the website, the one containing the current node
/// marked current.
fn site_nav(cx: &RenderContext<'_>) -> Result<Markup, RenderError> {
    let loader = cx.loader();
    let Some(website) = loader.root_node().and_then(|root| root.downcast::<Website>()) else {
        return Ok(html! {});
    };
    let mut sections = Vec::with_capacity(website.children.len());
    for child in &website.children {
        let is_current = loader.sub_page_distance(child, cx.node())?.is_some();
        sections.push((cx.href(child)?, node_title(cx, child), is_current));
    }
    Ok(html! {
        @if !sections.is_empty() {
            nav {
                ul {
                    @for (href, title, is_current) in &sections {
                        li class=[is_current.then_some("current")] { a href=(href) { (title) } }
                    }
                }
            }
        }
    })
}

/// Renders the base HTML document structure
fn document(title: &str, stylesheet: Option<&str>, nav: Markup, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                @if let Some(href) = stylesheet {
                    link rel="stylesheet" href=(href);
                }
            }
            body {
                (nav)
                h1 { (title) }
                (content)
            }
        }
    }
}

/// Links to `children`; pages with a body get their summary as a teaser.
fn child_list(cx: &RenderContext<'_>, children: &[Node]) -> Result<Markup, RenderError> {
    let mut links = Vec::with_capacity(children.len());
    for child in children {
        let teaser = match child.downcast::<Page>().and_then(|page| page.body.clone()) {
            Some(body) => Some(cx.markdown_summary(&body)?),
            None => None,
        };
        links.push((cx.href(child)?, node_title(cx, child), teaser));
    }
    Ok(html! {
        @if !links.is_empty() {
            ul.children {
                @for (href, title, teaser) in &links {
                    li {
                        a href=(href) { (title) }
                        @if let Some(teaser) = teaser {
                            div.summary { (PreEscaped(teaser)) }
                        }
                    }
                }
            }
        }
    })
}

fn page_content(cx: &RenderContext<'_>, node: &Node) -> Result<Markup, RenderError> {
    let Some(page) = node.downcast::<Page>() else {
        return Ok(html! {});
    };
    let image = match &page.image {
        Some(image) => Some(cx.resize(image, 800, 600, FillType::Fit)?),
        None => None,
    };
    let body = page.body.as_ref().map(|b| cx.markdown(b)).transpose()?;
    let link = match page.link.as_ref().and_then(|l| l.target()) {
        Some(target) => Some((cx.href(&target)?, node_title(cx, &target))),
        None => None,
    };
    let mut attachments = Vec::with_capacity(page.attachments.len());
    for attachment in &page.attachments {
        attachments.push((cx.link_asset(attachment)?, attachment.name()));
    }

    Ok(html! {
        article {
            @if let Some(image) = &image {
                img src=(image.href) width=(image.width) height=(image.height) alt=(page.title);
            }
            @if let Some(body) = body {
                (PreEscaped(body))
            }
            @if let Some((href, title)) = &link {
                p.related { "See also: " a href=(href) { (title) } }
            }
            @if !attachments.is_empty() {
                ul.attachments {
                    @for (href, name) in &attachments {
                        li { a href=(href) download { (name) } }
                    }
                }
            }
            @if let Some(commit) = &page.commit {
                footer {
                    "Last updated " (commit.author_date.format("%Y-%m-%d").to_string()) " by " (commit.author_name)
                }
            }
        }
    })
}
