//! Request path to content type resolution
//!
//! Resolution is a single pass over an ordered rule table; the first rule
//! whose suffix matches decides both the content type and the path that is
//! looked up on the medium.

/// Document served for any path ending in the directory marker
pub const INDEX_DOCUMENT: &str = "index.htm";

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const OCTET_STREAM: &str = "application/octet-stream";
/// Content type used for directory listings
pub const TEXT_JSON: &str = "text/json";

/// Source view suffix: serves the underlying file as plain text
pub const SOURCE_VIEW_SUFFIX: &str = ".src";

/// How a matching rule rewrites the request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTransform {
    Keep,
    StripSuffix,
}

/// A single entry of the resolution table
#[derive(Debug, Clone, Copy)]
pub struct ContentRule {
    pub suffix: &'static str,
    pub content_type: &'static str,
    pub transform: PathTransform,
}

impl ContentRule {
    const fn keep(suffix: &'static str, content_type: &'static str) -> Self {
        Self {
            suffix,
            content_type,
            transform: PathTransform::Keep,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.ends_with(self.suffix)
    }

    fn apply(&self, path: &str) -> String {
        match self.transform {
            PathTransform::Keep => path.to_string(),
            PathTransform::StripSuffix => path[..path.len() - self.suffix.len()].to_string(),
        }
    }
}

/// Ordered, first-match-wins. The source view rule must stay first: it
/// yields plain text even when the unwrapped path carries a known extension.
pub const CONTENT_RULES: &[ContentRule] = &[
    ContentRule {
        suffix: SOURCE_VIEW_SUFFIX,
        content_type: TEXT_PLAIN,
        transform: PathTransform::StripSuffix,
    },
    ContentRule::keep(".htm", TEXT_HTML),
    ContentRule::keep(".css", "text/css"),
    ContentRule::keep(".js", "application/javascript"),
    ContentRule::keep(".png", "image/png"),
    ContentRule::keep(".gif", "image/gif"),
    ContentRule::keep(".jpg", "image/jpeg"),
    ContentRule::keep(".ico", "image/x-icon"),
    ContentRule::keep(".xml", "text/xml"),
    ContentRule::keep(".pdf", "application/pdf"),
    ContentRule::keep(".zip", "application/zip"),
];

/// Outcome of resolving a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Path to look up on the medium
    pub path: String,
    pub content_type: &'static str,
    /// True when the index document was appended
    pub directory_default: bool,
}

impl Resolution {
    /// Apply the `download` request option
    pub fn force_download(mut self) -> Self {
        self.content_type = OCTET_STREAM;
        self
    }

    /// Re-target this resolution at the index document of a directory.
    pub fn into_directory_index(self) -> Self {
        let mut path = self.path;
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(INDEX_DOCUMENT);
        Self {
            path,
            content_type: TEXT_HTML,
            directory_default: true,
        }
    }
}

/// Resolve a request path into the path to open and its content type.
pub fn resolve(path: &str) -> Resolution {
    if path.ends_with('/') {
        return Resolution {
            path: format!("{path}{INDEX_DOCUMENT}"),
            content_type: TEXT_HTML,
            directory_default: true,
        };
    }

    match CONTENT_RULES.iter().find(|rule| rule.matches(path)) {
        Some(rule) => Resolution {
            path: rule.apply(path),
            content_type: rule.content_type,
            directory_default: false,
        },
        None => Resolution {
            path: path.to_string(),
            content_type: TEXT_PLAIN,
            directory_default: false,
        },
    }
}
