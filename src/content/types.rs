//! Built-in node types.
//!
//! ```text
//! content/                      website
//! ├── _index.yml                name: My Site
//! ├── @title.md                 website.title
//! ├── 010.about.page/           page
//! │   ├── _index.yml            title, slug, link, image, aliases, ...
//! │   ├── @body.md              page.body
//! │   └── portrait.jpg          referenced as `image: portrait.jpg`
//! └── 020.blog.folder/          folder
//!     ├── @index.page/          rendered at the folder's own location
//!     └── first.page/
//! ```

use super::{
    BuildContext, CHILDREN, Content, ContentReference, FileAsset, ImageAsset, Nestable, Node,
    PropertySpec, TypeSet, Walker,
};
use crate::git::CommitInfo;
use crate::loader::{LoadError, ValidationContext};
use crate::path::RenderPath;
use crate::slug::Slug;
use serde::Deserialize;

const PAGE_TYPES: TypeSet = TypeSet::Only(&["folder", "page"]);
const MARKDOWN: TypeSet = TypeSet::Only(&["md"]);

fn parse_aliases(aliases: &[String]) -> Vec<RenderPath> {
    aliases.iter().map(|a| RenderPath::parse(a)).collect()
}

// =============================================================================
// Website
// =============================================================================

/// Root of a site.
#[derive(Debug)]
pub struct Website {
    pub name: String,
    pub title: Option<Node>,
    pub children: Vec<Node>,
    pub commit: Option<CommitInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebsiteDecl {
    pub name: String,
}

impl Content for Website {
    fn visit(&self, walker: &mut Walker) {
        walker.visit(&self.title).visit(&self.children);
    }
}

impl Nestable for Website {
    const TAG: &'static str = "website";
    type Decl = WebsiteDecl;

    fn properties() -> &'static [PropertySpec] {
        const PROPERTIES: &[PropertySpec] = &[
            PropertySpec::optional("title", MARKDOWN),
            PropertySpec::children(PAGE_TYPES),
        ];
        PROPERTIES
    }

    fn build(decl: WebsiteDecl, cx: &mut BuildContext<'_>) -> Result<Self, LoadError> {
        Ok(Website {
            name: decl.name,
            title: cx.child("title"),
            children: cx.children(CHILDREN),
            commit: cx.commit_info(),
        })
    }
}

// =============================================================================
// Folder
// =============================================================================

/// A section grouping pages. An `@index.page` child is rendered at the
/// folder's own location.
#[derive(Debug)]
pub struct Folder {
    pub title: Option<String>,
    pub slug: Option<Slug>,
    pub index: Option<Node>,
    pub children: Vec<Node>,
    pub aliases: Vec<RenderPath>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FolderDecl {
    pub title: Option<String>,
    pub slug: Option<Slug>,
    pub aliases: Vec<String>,
}

impl Content for Folder {
    fn visit(&self, walker: &mut Walker) {
        walker.visit(&self.index).visit(&self.children);
    }

    fn slug(&self) -> Option<&str> {
        self.slug.as_ref().map(Slug::as_str)
    }

    fn content_symlink(&self) -> Option<Node> {
        self.index.clone()
    }

    fn render_path_aliases(&self) -> Vec<RenderPath> {
        self.aliases.clone()
    }
}

impl Nestable for Folder {
    const TAG: &'static str = "folder";
    type Decl = FolderDecl;

    fn properties() -> &'static [PropertySpec] {
        const PROPERTIES: &[PropertySpec] = &[
            PropertySpec::optional("index", TypeSet::Only(&["page"])),
            PropertySpec::children(PAGE_TYPES),
        ];
        PROPERTIES
    }

    fn build(decl: FolderDecl, cx: &mut BuildContext<'_>) -> Result<Self, LoadError> {
        Ok(Folder {
            title: decl.title,
            slug: decl.slug,
            index: cx.child("index"),
            children: cx.children(CHILDREN),
            aliases: parse_aliases(&decl.aliases),
        })
    }
}

// =============================================================================
// Page
// =============================================================================

/// A single rendered page.
#[derive(Debug)]
pub struct Page {
    pub title: String,
    pub slug: Option<Slug>,
    /// Derive the render path segment from the title when `slug` is unset.
    pub slug_from_title: bool,
    pub body: Option<Node>,
    pub link: Option<ContentReference>,
    pub image: Option<ImageAsset>,
    pub attachments: Vec<FileAsset>,
    pub aliases: Vec<RenderPath>,
    pub render_path: Option<RenderPath>,
    pub commit: Option<CommitInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PageDecl {
    pub title: String,
    pub slug: Option<Slug>,
    pub slug_from_title: bool,
    /// Related content, relative to this page.
    pub link: Option<ContentReference>,
    /// Image file in the page directory.
    pub image: Option<String>,
    pub attachments: Vec<String>,
    /// Old locations that should redirect here.
    pub aliases: Vec<String>,
    /// Fixed output location, bypassing the tree-derived one.
    pub render_path: Option<String>,
}

impl Content for Page {
    fn visit(&self, walker: &mut Walker) {
        walker
            .visit(&self.body)
            .visit(&self.link)
            .visit(&self.image)
            .visit(&self.attachments);
    }

    fn validate(&self, _cx: &ValidationContext<'_>) -> Vec<String> {
        if self.title.trim().is_empty() {
            vec!["page title must not be empty".to_string()]
        } else {
            Vec::new()
        }
    }

    fn slug(&self) -> Option<&str> {
        self.slug.as_ref().map(Slug::as_str)
    }

    fn slug_source(&self) -> Option<&str> {
        self.slug_from_title.then_some(self.title.as_str())
    }

    fn custom_render_path(&self) -> Option<RenderPath> {
        self.render_path.clone()
    }

    fn render_path_aliases(&self) -> Vec<RenderPath> {
        self.aliases.clone()
    }
}

impl Nestable for Page {
    const TAG: &'static str = "page";
    type Decl = PageDecl;

    fn properties() -> &'static [PropertySpec] {
        const PROPERTIES: &[PropertySpec] = &[PropertySpec::optional("body", MARKDOWN)];
        PROPERTIES
    }

    fn build(decl: PageDecl, cx: &mut BuildContext<'_>) -> Result<Self, LoadError> {
        let image = decl
            .image
            .as_deref()
            .map(|name| cx.image_asset(name))
            .transpose()?;
        let attachments = decl
            .attachments
            .iter()
            .map(|name| cx.file_asset(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            title: decl.title,
            slug: decl.slug,
            slug_from_title: decl.slug_from_title,
            body: cx.child("body"),
            link: decl.link,
            image,
            attachments,
            aliases: parse_aliases(&decl.aliases),
            render_path: decl.render_path.as_deref().map(RenderPath::parse),
            commit: cx.commit_info(),
        })
    }
}
