//! Post predicates.
//!
//! Filters are pure functions of the decoded post: no I/O, no shared state.

use creeper_core::Post;

/// A predicate deciding whether a post is published.
pub trait PostFilter: Send + Sync {
    /// Short label used in logs and the `reason` metric label.
    fn name(&self) -> &'static str;

    /// Whether the post passes.
    fn accept(&self, post: &Post) -> bool;
}

/// Keeps posts declaring at least one allowed language.
///
/// Tags are compared case-insensitively and exactly, so `en` does not admit
/// `en-US`. Posts without any language tag are rejected.
#[derive(Debug, Clone)]
pub struct LanguageFilter {
    allowed: Vec<String>,
}

impl LanguageFilter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}

impl PostFilter for LanguageFilter {
    fn name(&self) -> &'static str {
        "language"
    }

    fn accept(&self, post: &Post) -> bool {
        post.languages
            .iter()
            .any(|lang| self.allowed.iter().any(|a| a.eq_ignore_ascii_case(lang)))
    }
}

/// Case-insensitive substring matcher over post text.
///
/// Used for logging only; it never affects whether a post is published.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// First keyword contained in `text`, if any.
    pub fn find(&self, text: &str) -> Option<&str> {
        if self.keywords.is_empty() {
            return None;
        }
        let text = text.to_lowercase();
        self.keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(String::as_str)
    }
}
