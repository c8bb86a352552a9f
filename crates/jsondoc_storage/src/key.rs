//! Database names, document ids and the storage keys derived from them.

use crate::error::{StorageError, StorageResult};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Separator between the segments of a document id.
pub const SEGMENT_SEPARATOR: char = '/';

/// Returns true if `name` matches `^[A-Za-z0-9_-]+$`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Name of a database: a collection of documents sharing one lock scope and
/// one storage subtree.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Validates and wraps a database name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] if the name is empty or contains
    /// anything other than word characters and hyphens.
    pub fn new(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        if is_valid_name(&name) {
            Ok(Self(name))
        } else {
            Err(StorageError::InvalidName { name })
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseName({})", self.0)
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatabaseName {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Hierarchical identifier of a document, such as `users/alice`.
///
/// Each `/`-separated segment must match `^[A-Za-z0-9_-]+$`, so a valid id
/// never contains `.`, path separators of the host platform, or empty
/// segments. An id maps deterministically to one storage location.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Parses and validates a document id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidId`] if any segment is empty or
    /// contains a disallowed character.
    pub fn parse(id: impl Into<String>) -> StorageResult<Self> {
        let id = id.into();
        if id.split(SEGMENT_SEPARATOR).all(is_valid_name) {
            Ok(Self(id))
        } else {
            Err(StorageError::InvalidId { id })
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEGMENT_SEPARATOR)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Random token distinguishing the staging files of one commit attempt.
///
/// Each token is a fresh v4 UUID rendered as 32 lowercase hex digits, so two
/// commits never share staging keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingToken(String);

impl StagingToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StagingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one stored blob: either a live document or the staged copy of
/// a document written during a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    id: DocumentId,
    token: Option<StagingToken>,
}

impl DocumentKey {
    /// Key of the live document.
    #[must_use]
    pub fn live(id: &DocumentId) -> Self {
        Self {
            id: id.clone(),
            token: None,
        }
    }

    /// Key of the staging copy of `id` for the commit identified by `token`.
    #[must_use]
    pub fn staged(id: &DocumentId, token: &StagingToken) -> Self {
        Self {
            id: id.clone(),
            token: Some(token.clone()),
        }
    }

    /// Returns the document id.
    #[must_use]
    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    /// Returns the staging token, if this is a staging key.
    #[must_use]
    pub fn token(&self) -> Option<&StagingToken> {
        self.token.as_ref()
    }

    /// Returns true if this key addresses a staging copy.
    #[must_use]
    pub fn is_staged(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.token {
            Some(token) => write!(f, "{}.{}", self.id, token),
            None => write!(f, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_name("users"));
        assert!(is_valid_name("user_data-2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name(".."));
    }

    #[test]
    fn database_name_rejects_separators() {
        assert!(DatabaseName::new("sampledb").is_ok());
        assert!(matches!(
            DatabaseName::new("sample/db"),
            Err(StorageError::InvalidName { .. })
        ));
    }

    #[test]
    fn document_id_segments() {
        let id = DocumentId::parse("foo/bar/baz").unwrap();
        assert_eq!(id.segments().collect::<Vec<_>>(), vec!["foo", "bar", "baz"]);
        assert_eq!(id.to_string(), "foo/bar/baz");
    }

    #[test]
    fn document_id_rejects_bad_segments() {
        for bad in ["", "/foo", "foo/", "foo//bar", "foo/../bar", "foo/a.json", "f o"] {
            assert!(
                matches!(DocumentId::parse(bad), Err(StorageError::InvalidId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn staging_tokens_are_unique() {
        let a = StagingToken::generate();
        let b = StagingToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(is_valid_name(a.as_str()));
    }

    #[test]
    fn staged_key_display() {
        let id = DocumentId::parse("foo/a").unwrap();
        let token = StagingToken::generate();
        let key = DocumentKey::staged(&id, &token);
        assert!(key.is_staged());
        assert_eq!(key.to_string(), format!("foo/a.{token}"));
        assert_eq!(DocumentKey::live(&id).to_string(), "foo/a");
    }

    proptest! {
        #[test]
        fn generated_ids_parse(segments in prop::collection::vec("[A-Za-z0-9_-]{1,12}", 1..5)) {
            let raw = segments.join("/");
            let id = DocumentId::parse(raw.clone()).unwrap();
            prop_assert_eq!(id.as_str(), raw.as_str());
            prop_assert_eq!(id.segments().count(), segments.len());
        }

        #[test]
        fn ids_with_dots_are_rejected(prefix in "[a-z]{1,8}", suffix in "[a-z]{1,8}") {
            let raw = format!("{prefix}.{suffix}");
            prop_assert!(DocumentId::parse(raw).is_err());
        }
    }
}
