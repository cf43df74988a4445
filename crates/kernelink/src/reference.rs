//! Reference table: locally minted ids for objects living in the engine.
//!
//! The table is the single source of truth for whether an id still denotes a
//! live remote object. Ids come from a monotonic counter and are never reused
//! within a session, even after disposal.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::render::is_identifier;

/// Session-unique identifier of a remote reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(u64);

impl RefId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical type tag of a remote object (e.g. `IsotonicRegressionModel`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefKind(Arc<str>);

impl RefKind {
    pub fn new(kind: impl AsRef<str>) -> Self {
        Self(Arc::from(kind.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RefKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to an object inside the engine. Cheap to clone; clones denote the
/// same remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteReference {
    id: RefId,
    kind: RefKind,
}

impl RemoteReference {
    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn kind(&self) -> &RefKind {
        &self.kind
    }
}

impl fmt::Display for RemoteReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

struct ReferenceEntry {
    kind: RefKind,
    placeholder: Arc<str>,
}

pub struct ReferenceTable {
    next_id: AtomicU64,
    entries: DashMap<RefId, ReferenceEntry>,
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    fn mint(&self) -> RefId {
        RefId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Mint a reference whose engine-side name is derived from its kind and id.
    pub fn register(&self, kind: impl Into<RefKind>) -> RemoteReference {
        let kind = kind.into();
        let id = self.mint();
        let placeholder = format!("{}_{}", sanitize_kind(kind.as_str()), id);

        tracing::trace!(%id, %kind, %placeholder, "Registered reference");
        self.entries.insert(
            id,
            ReferenceEntry {
                kind: kind.clone(),
                placeholder: Arc::from(placeholder),
            },
        );
        RemoteReference { id, kind }
    }

    /// Register a reference whose engine-side name was chosen by the engine.
    ///
    /// The handle is spliced into later commands as a variable name, so it
    /// must be an identifier. Bare numbers such as `42` fail with
    /// [`BridgeError::InvalidHandle`] and register nothing.
    pub fn register_handle(
        &self,
        kind: impl Into<RefKind>,
        handle: &str,
    ) -> Result<RemoteReference> {
        let handle = handle.trim();
        if !is_identifier(handle) {
            return Err(BridgeError::InvalidHandle(handle.to_string()));
        }

        let kind = kind.into();
        let id = self.mint();
        tracing::trace!(%id, %kind, %handle, "Registered engine handle");
        self.entries.insert(
            id,
            ReferenceEntry {
                kind: kind.clone(),
                placeholder: Arc::from(handle),
            },
        );
        Ok(RemoteReference { id, kind })
    }

    /// Canonical textual form of a reference inside a command.
    pub fn placeholder_for(&self, reference: &RemoteReference) -> Result<String> {
        self.entries
            .get(&reference.id)
            .map(|entry| entry.placeholder.to_string())
            .ok_or(BridgeError::StaleReference { id: reference.id })
    }

    pub fn dispose(&self, reference: &RemoteReference) -> Result<()> {
        match self.entries.remove(&reference.id) {
            Some((id, entry)) => {
                tracing::debug!(%id, kind = %entry.kind, "Disposed reference");
                Ok(())
            }
            None => Err(BridgeError::StaleReference { id: reference.id }),
        }
    }

    pub fn is_live(&self, reference: &RemoteReference) -> bool {
        self.entries.contains_key(&reference.id)
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Session teardown: every outstanding reference becomes stale.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            tracing::debug!(count, "Released all references");
        }
    }
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_kind(kind: &str) -> String {
    let mut out: String = kind
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
