//! Markdown content (`*.md`).
//!
//! Links without a scheme are treated as internal content paths, resolved
//! against the directory the file lives in. They are checked during
//! validation and rewritten to public hrefs when rendering.

use super::{Content, Parsable};
use crate::loader::{LoadError, ValidationContext};
use crate::path::ContentPath;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html as md_html};
use std::fs;
use std::path::Path;

/// Marker separating a post's summary from the rest of the body.
const MORE_MARKER: &str = "<!--more-->";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markdown {
    source: String,
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_SMART_PUNCTUATION
}

/// Internal links point at content: no scheme, no mail address, not a
/// fragment of the current page, not protocol-relative.
fn is_internal_link(url: &str) -> bool {
    !url.is_empty()
        && !has_scheme(url)
        && !url.contains('@')
        && !url.starts_with('#')
        && !url.starts_with("//")
}

/// `scheme ":"` prefix, where a scheme is `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn strip_fragment(url: &str) -> &str {
    url.split(['#', '?']).next().unwrap_or(url)
}

impl Markdown {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Link targets that refer to other content.
    pub fn internal_links(&self) -> Vec<String> {
        Parser::new_ext(&self.source, parser_options())
            .filter_map(|event| match event {
                Event::Start(Tag::Link { dest_url, .. }) if is_internal_link(&dest_url) => {
                    Some(dest_url.to_string())
                }
                _ => None,
            })
            .collect()
    }

    /// Render to HTML, leaving links untouched.
    pub fn to_html(&self) -> String {
        render(&self.source, |_| None)
    }

    /// Render to HTML, replacing internal link targets with whatever
    /// `resolve` returns for them (links it declines are kept as written).
    pub fn render_html(&self, resolve: impl FnMut(&str) -> Option<String>) -> String {
        render(&self.source, resolve)
    }

    /// [`Markdown::render_html`] of the [`Markdown::summary`] only.
    pub fn render_summary_html(&self, resolve: impl FnMut(&str) -> Option<String>) -> String {
        render(self.summary(), resolve)
    }

    /// Text before `<!--more-->`, or the first paragraph.
    pub fn summary(&self) -> &str {
        if let Some((summary, _)) = self.source.split_once(MORE_MARKER) {
            return summary.trim_end();
        }
        let normalized = self.source.trim_start();
        normalized
            .split("\n\n")
            .next()
            .unwrap_or(normalized)
            .trim_end()
    }
}

fn render(source: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> String {
    let parser = Parser::new_ext(source, parser_options()).map(|event| match event {
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if is_internal_link(&dest_url) => {
            let dest_url = resolve(&dest_url).map(CowStr::from).unwrap_or(dest_url);
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        other => other,
    });
    let mut out = String::new();
    md_html::push_html(&mut out, parser);
    out
}

impl Content for Markdown {
    fn validate(&self, cx: &ValidationContext<'_>) -> Vec<String> {
        let base = cx.owner_path().parent();
        self.internal_links()
            .into_iter()
            .filter(|link| {
                let target = base.resolve(strip_fragment(link));
                cx.content_by_path(&target).is_none()
            })
            .map(|link| format!("Invalid link: {link}"))
            .collect()
    }
}

impl Parsable for Markdown {
    const TAG: &'static str = "md";

    fn parse(file: &Path, _path: &ContentPath) -> Result<Self, LoadError> {
        let source = fs::read_to_string(file).map_err(|source| LoadError::Io {
            path: file.to_path_buf(),
            source,
        })?;
        Ok(Markdown::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_html() {
        let md = Markdown::new("# Hello\n\nSome *text*.");
        let html = md.to_html();
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<em>text</em>"));
    }

    #[test]
    fn finds_internal_links_only() {
        let md = Markdown::new(
            "[a](../other) [b](https://example.org) [c](mailto:x@y.z) [d](#top) [e](/about)",
        );
        assert_eq!(md.internal_links(), vec!["../other", "/about"]);
    }

    #[test]
    fn any_scheme_makes_a_link_external() {
        let md = Markdown::new(
            "[call](tel:+123) [js](javascript:alert(1)) [img](data:text/plain,hi) \
             [cdn](//cdn.example.org/x.js) [colon](./time:now) [up](../a:b)",
        );
        assert_eq!(md.internal_links(), vec!["./time:now", "../a:b"]);
    }

    #[test]
    fn render_rewrites_internal_links() {
        let md = Markdown::new("[next](../second) and [ext](https://example.org)");
        let html = md.render_html(|link| (link == "../second").then(|| "/blog/second/".to_string()));
        assert!(html.contains(r#"href="/blog/second/""#));
        assert!(html.contains(r#"href="https://example.org""#));
    }

    #[test]
    fn summary_uses_more_marker() {
        let md = Markdown::new("Intro text.\n<!--more-->\nRest.");
        assert_eq!(md.summary(), "Intro text.");
    }

    #[test]
    fn summary_falls_back_to_first_paragraph() {
        let md = Markdown::new("First paragraph.\n\nSecond paragraph.");
        assert_eq!(md.summary(), "First paragraph.");
    }

    #[test]
    fn summary_html_rewrites_links_and_stops_at_marker() {
        let md = Markdown::new("Read [this](../other) first.\n<!--more-->\nHidden *rest*.");
        let html = md.render_summary_html(|_| Some("/other/".to_string()));
        assert!(html.contains(r#"<a href="/other/">this</a>"#), "{html}");
        assert!(!html.contains("Hidden"));
    }

    #[test]
    fn strip_fragment_drops_anchor_and_query() {
        assert_eq!(strip_fragment("../page#section"), "../page");
        assert_eq!(strip_fragment("page?x=1"), "page");
    }
}
