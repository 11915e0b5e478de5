//! Message identity derivation.

use crate::Result;
use serde::Serialize;

/// Derives a stable string identity for a message.
///
/// The engine uses the derived key for duplicate suppression and status lookup:
/// two messages with the same key are the same logical entry. Implementations
/// must be deterministic for the lifetime of an engine instance.
pub trait KeyDeriver<T>: Send + Sync {
    fn derive(&self, message: &T) -> Result<String>;
}

/// Any infallible `Fn(&T) -> String` closure is a deriver.
impl<T, F> KeyDeriver<T> for F
where
    F: Fn(&T) -> String + Send + Sync,
{
    fn derive(&self, message: &T) -> Result<String> {
        Ok(self(message))
    }
}

/// Default strategy: the message's canonical JSON text is its key.
///
/// Stable for primitives and plain structured data. Known caveats, inherited
/// from structural serialization and owned by the caller rather than the
/// engine: map types with nondeterministic iteration order produce unstable
/// keys, and non-finite floats encode as `null` (so such messages are declined
/// as absent). Supply a custom [`KeyDeriver`] when referential identity or any
/// of the above applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralKeyDeriver;

impl StructuralKeyDeriver {
    pub fn new() -> Self {
        Self
    }
}

impl<T: Serialize> KeyDeriver<T> for StructuralKeyDeriver {
    fn derive(&self, message: &T) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }
}

/// The structural encoding of an absent value. Submissions whose derived key
/// equals this are declined, mirroring the null-message rejection rule.
pub(crate) const NULL_KEY: &str = "null";
