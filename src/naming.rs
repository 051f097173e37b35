//! File-name convention for entries in the content tree.
//!
//! Every file or directory below the content root is named
//! `[@][comment.]slug.typeIdentifier`:
//!
//! - a leading `@` marks a **named property** of the parent node; without it
//!   the entry is an anonymous member of the parent's `children` group,
//! - the optional `comment` is free-form (typically an ordering prefix such as
//!   `010`) and does not take part in the node's identity,
//! - `slug` becomes the entry's path segment,
//! - `typeIdentifier` selects the content type from the registry.
//!
//! ```text
//! @title.md             property "title", type "md"
//! 010.about.page/       child "about", comment "010", type "page"
//! blog.folder/          child "blog", type "folder"
//! @intro/               property "intro", type inferred from the parent
//! ```

/// Result of parsing an entry name like `010.about.page`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    /// Leading `@`: the entry fills a named property.
    pub is_property: bool,
    /// Free-form prefix, e.g. `010` from `010.about.page`.
    pub comment: Option<String>,
    /// Identity segment.
    pub slug: String,
    /// Type tag, absent for bare names.
    pub type_tag: Option<String>,
}

impl EntryName {
    /// Property group this entry belongs to.
    pub fn property_name(&self) -> &str {
        if self.is_property {
            &self.slug
        } else {
            crate::content::CHILDREN
        }
    }

    /// Path segment used for the entry's identity path.
    pub fn path_segment(&self) -> String {
        if self.is_property {
            format!("@{}", self.slug)
        } else {
            self.slug.clone()
        }
    }
}

/// Parse an entry name following the `[@][comment.]slug.type` convention.
///
/// - `"about.page"` → slug="about", type=Some("page")
/// - `"010.about.page"` → comment=Some("010"), slug="about", type=Some("page")
/// - `"@title.md"` → property, slug="title", type=Some("md")
/// - `"intro"` → slug="intro", type=None
/// - `"2019.my.trip.page"` → comment=Some("2019"), slug="my.trip", type=Some("page")
pub fn parse_entry_name(name: &str) -> EntryName {
    let (is_property, rest) = match name.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, name),
    };
    let parts: Vec<&str> = rest.split('.').collect();
    let (comment, slug, type_tag) = match parts.as_slice() {
        [slug] => (None, slug.to_string(), None),
        [slug, tag] => (None, slug.to_string(), Some(tag.to_string())),
        [comment, middle @ .., tag] => (
            Some(comment.to_string()),
            middle.join("."),
            Some(tag.to_string()),
        ),
        [] => (None, String::new(), None),
    };
    EntryName {
        is_property,
        comment,
        slug,
        type_tag,
    }
}
