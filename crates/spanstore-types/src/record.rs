use crate::error::TypeResult;
use crate::hash::TypeHash;
use crate::RecordId;

/// A value the object store can persist.
///
/// Implementations must satisfy:
/// - `decode(&r.encode())` yields a record equal to `r` (ids aside: the
///   store sets the id after decoding).
/// - `decode` fails on truncated or corrupt input instead of panicking or
///   reading out of bounds. [`crate::RecordReader`] gives this for free.
/// - `type_hash()` is stable across program versions for as long as the
///   encoding is compatible.
pub trait Record: Sized {
    /// The schema identifier stored next to every instance.
    fn type_hash() -> TypeHash;

    /// The id this record is stored under.
    fn id(&self) -> RecordId;

    /// Assign the id (called by the store after a load).
    fn set_id(&mut self, id: RecordId);

    /// Serialize the record payload.
    fn encode(&self) -> Vec<u8>;

    /// Deserialize a fresh instance from a payload.
    fn decode(bytes: &[u8]) -> TypeResult<Self>;
}
