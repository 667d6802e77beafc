//! Content categories of indexable texts and the search filter over them.

use crate::error::EmbedderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Category of a text row in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Title,
    Document,
    Comment,
    Contact,
}

impl ContentType {
    /// Every category, in storage order.
    pub const ALL: [ContentType; 4] = [Self::Title, Self::Document, Self::Comment, Self::Contact];

    /// Categories the indexer produces embeddings for.
    pub const EMBEDDABLE: [ContentType; 3] = [Self::Title, Self::Document, Self::Comment];

    /// Value stored in the `kind` column
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Document => "document",
            Self::Comment => "comment",
            Self::Contact => "contact",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = EmbedderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ct| ct.as_str() == s)
            .ok_or_else(|| EmbedderError::InvalidFilter {
                reason: format!(
                    "unknown content type '{s}', expected one of title, document, comment, contact"
                ),
            })
    }
}

/// Non-empty set of content types a search is restricted to.
///
/// The set can only be built through validating constructors, so any value
/// reaching the storage layer is one of the fixed category names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeFilter(BTreeSet<ContentType>);

impl ContentTypeFilter {
    /// Filter over the given types. Fails when no type is given.
    pub fn new(types: impl IntoIterator<Item = ContentType>) -> Result<Self, EmbedderError> {
        let set: BTreeSet<ContentType> = types.into_iter().collect();
        if set.is_empty() {
            return Err(EmbedderError::InvalidFilter {
                reason: "at least one of title, contact, document, comment must be specified"
                    .to_string(),
            });
        }
        Ok(Self(set))
    }

    /// Filter over every category.
    pub fn all() -> Self {
        Self(ContentType::ALL.into_iter().collect())
    }

    /// Build from `(name, enabled)` flags.
    ///
    /// Every name must be a known category, even when disabled, and at least
    /// one must be enabled.
    pub fn from_flags<'a>(
        flags: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<Self, EmbedderError> {
        let mut enabled = Vec::new();
        for (name, on) in flags {
            let content_type = name.parse::<ContentType>()?;
            if on {
                enabled.push(content_type);
            }
        }
        Self::new(enabled)
    }

    pub fn contains(&self, content_type: ContentType) -> bool {
        self.0.contains(&content_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = ContentType> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ContentTypeFilter {
    type Err = EmbedderError;

    /// Parse a comma separated list such as `"title,document"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let types = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ContentType>, _>>()?;
        Self::new(types)
    }
}
