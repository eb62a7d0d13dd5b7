//! Record keys and their canonical string identity

use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};

/// Canonical string identity of a record.
///
/// Two records share a cache entry iff their storage keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for StorageKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A structured key understood by the primary store
pub trait RecordKey: Clone + Debug + Send + Sync + 'static {
    /// Returns the canonical string identity used for cache lookups
    fn storage_key(&self) -> StorageKey;

    /// Whether the store still has to allocate an identifier for this key
    fn is_incomplete(&self) -> bool {
        false
    }

    /// Returns a copy of this key completed with a store-allocated identifier
    fn with_allocated_id(&self, _id: i64) -> Self {
        self.clone()
    }
}

impl RecordKey for StorageKey {
    fn storage_key(&self) -> StorageKey {
        self.clone()
    }
}

impl RecordKey for String {
    fn storage_key(&self) -> StorageKey {
        StorageKey::new(self.clone())
    }
}

/// Identifier component of an [`EntityKey`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// Caller-chosen string name
    Name(String),
    /// Numeric identifier
    Id(i64),
    /// Identifier not yet allocated by the store
    Incomplete,
}

/// Hierarchical key: a kind plus identifier, optionally nested under a parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    kind: String,
    id: KeyId,
    parent: Option<Box<EntityKey>>,
}

impl EntityKey {
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Name(name.into()),
            parent: None,
        }
    }

    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Id(id),
            parent: None,
        }
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: KeyId::Incomplete,
            parent: None,
        }
    }

    /// Nests this key under the given parent
    pub fn with_parent(mut self, parent: EntityKey) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn parent(&self) -> Option<&EntityKey> {
        self.parent.as_deref()
    }

    /// Returns the top-most ancestor (the key itself when it has no parent)
    pub fn root(&self) -> &EntityKey {
        let mut key = self;
        while let Some(parent) = key.parent() {
            key = parent;
        }
        key
    }

    fn write_path(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.write_path(out);
        }
        out.push('/');
        out.push_str(&format!("{:?}", self.kind));
        out.push(',');
        match &self.id {
            KeyId::Name(name) => out.push_str(&format!("{:?}", name)),
            KeyId::Id(id) => out.push_str(&id.to_string()),
            KeyId::Incomplete => out.push('?'),
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = String::new();
        self.write_path(&mut path);
        f.write_str(&path)
    }
}

impl RecordKey for EntityKey {
    fn storage_key(&self) -> StorageKey {
        StorageKey::new(self.to_string())
    }

    fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete
    }

    fn with_allocated_id(&self, id: i64) -> Self {
        let mut key = self.clone();
        if key.id == KeyId::Incomplete {
            key.id = KeyId::Id(id);
        }
        key
    }
}
