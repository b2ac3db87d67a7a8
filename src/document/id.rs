//! Type-prefixed document identifiers and collection tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DbError, DbResult};

fn valid_type_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// The set of documents sharing a type prefix, e.g. `USER`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Collection(String);

impl Collection {
    /// Create a collection tag. The name must be a valid type prefix.
    pub fn new(name: impl Into<String>) -> DbResult<Self> {
        let name = name.into();
        if !valid_type_prefix(&name) {
            return Err(DbError::InvalidIdentifier(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased "append s" name, for outer layers that expose plural
    /// collection reads (`USER` → `users`)
    pub fn plural_name(&self) -> String {
        format!("{}s", self.0.to_ascii_lowercase())
    }

    /// Returns true if `id` belongs to this collection
    pub fn contains(&self, id: &DocumentId) -> bool {
        id.type_prefix() == self.0
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Collection {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::new(s)
    }
}

impl TryFrom<String> for Collection {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Collection::new(value)
    }
}

impl From<Collection> for String {
    fn from(c: Collection) -> Self {
        c.0
    }
}

/// Globally unique document identifier of the form `<TYPE>_<opaque-id>`.
///
/// Immutable once assigned. Ordering is plain string ordering, which is
/// the order query results are returned in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Parse and validate an identifier
    pub fn parse(raw: &str) -> DbResult<Self> {
        let (prefix, opaque) = raw
            .split_once('_')
            .ok_or_else(|| DbError::InvalidIdentifier(raw.to_string()))?;

        if !valid_type_prefix(prefix)
            || opaque.is_empty()
            || opaque.chars().any(char::is_whitespace)
        {
            return Err(DbError::InvalidIdentifier(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    /// Build an identifier from a collection and an opaque part
    pub fn new(collection: &Collection, opaque: &str) -> DbResult<Self> {
        Self::parse(&format!("{}_{}", collection.as_str(), opaque))
    }

    /// Mint a fresh identifier in `collection`
    pub fn generate(collection: &Collection) -> Self {
        Self(format!("{}_{}", collection.as_str(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `TYPE` part
    pub fn type_prefix(&self) -> &str {
        match self.0.split_once('_') {
            Some((prefix, _)) => prefix,
            None => &self.0,
        }
    }

    /// The part after the first underscore
    pub fn opaque(&self) -> &str {
        match self.0.split_once('_') {
            Some((_, opaque)) => opaque,
            None => "",
        }
    }

    pub fn collection(&self) -> Collection {
        Collection(self.type_prefix().to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentId::parse(s)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocumentId::parse(&value)
    }
}

impl TryFrom<&str> for DocumentId {
    type Error = DbError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        DocumentId::parse(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}
