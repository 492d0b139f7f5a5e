//! Core type definitions for Holdfast.

use std::fmt;

/// Index of an entity kind in the schema's closed kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KindId(pub u16);

impl KindId {
    /// Creates a kind id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind:{}", self.0)
    }
}

/// Index of a field within a kind's field table.
///
/// Field order is the fixed encode order for entity blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u16);

impl FieldId {
    /// Creates a field id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field:{}", self.0)
    }
}

/// Stable identity key for an entity row.
///
/// A SHA-256 digest over the canonical encoding of the entity's kind
/// name and identity fields. Used as the row key in durable storage and
/// as the in-memory index key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdKey([u8; 32]);

impl IdKey {
    /// Creates an idkey from raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Creates an idkey from a slice.
    ///
    /// Returns `None` if the slice is not exactly 32 bytes.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() == 32 {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(slice);
            Some(Self(bytes))
        } else {
            None
        }
    }
}

impl fmt::Debug for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdKey({self})")
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// How long a holder keeps its entities retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldKind {
    /// Released only on explicit request. Callers must pair every
    /// persistent remember with an eventual forget.
    Persistent,
    /// Bulk-released at a session boundary.
    Session,
}

impl HoldKind {
    /// Storage discriminant for this kind.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::Persistent => 0,
            Self::Session => 1,
        }
    }

    /// Parses a storage discriminant.
    #[must_use]
    pub const fn from_discriminant(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Persistent),
            1 => Some(Self::Session),
            _ => None,
        }
    }
}

/// Remote scheduling priority of a pending action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemotePriority {
    /// Send on the next sync round, ahead of batched work.
    Immediate,
    /// Batch with other deferred work.
    Batched,
}

impl RemotePriority {
    /// Storage discriminant for this priority.
    #[must_use]
    pub const fn discriminant(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::Batched => 1,
        }
    }

    /// Parses a storage discriminant.
    #[must_use]
    pub const fn from_discriminant(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Immediate),
            1 => Some(Self::Batched),
            _ => None,
        }
    }
}

/// A serializable command queued for eventual remote synchronization.
///
/// Actions stay queued until acknowledged by a sync round, then are
/// removed by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Store-assigned id, used for acknowledgement.
    pub id: i64,
    /// Opaque serialized command payload.
    pub payload: Vec<u8>,
    /// Remote scheduling priority.
    pub priority: RemotePriority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idkey_roundtrip() {
        let key = IdKey::from_bytes([7u8; 32]);
        assert_eq!(IdKey::from_slice(key.as_bytes()), Some(key));
        assert!(IdKey::from_slice(&[0u8; 31]).is_none());
    }

    #[test]
    fn idkey_display_is_hex() {
        let key = IdKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{key}").len(), 64);
        assert!(format!("{key}").starts_with("abab"));
    }

    #[test]
    fn hold_kind_discriminants() {
        for kind in [HoldKind::Persistent, HoldKind::Session] {
            assert_eq!(HoldKind::from_discriminant(kind.discriminant()), Some(kind));
        }
        assert_eq!(HoldKind::from_discriminant(9), None);
    }

    #[test]
    fn priority_discriminants() {
        for priority in [RemotePriority::Immediate, RemotePriority::Batched] {
            assert_eq!(
                RemotePriority::from_discriminant(priority.discriminant()),
                Some(priority)
            );
        }
    }
}
