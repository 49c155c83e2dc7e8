//! Transactional, id-indexed object storage on a single byte medium.
//!
//! A store is a flat byte array: a 17-byte header, variable-length records
//! and index blocks. Two pointer slots in the header name index blocks and a
//! selector byte says which one is authoritative. Commits write a fresh
//! block, aim the inactive slot at it and flip the selector, so a reader
//! always sees either the old or the new generation.
//!
//! # Key Types
//!
//! - [`ObjectStore`] -- store, load, delete, commit, rollback and pack
//! - [`Medium`] -- the byte-moving backend: [`FileMedium`], [`MemoryMedium`],
//!   [`StreamMedium`]
//! - [`RecordIndex`] -- in-memory id, location and type tables
//! - [`StoreConfig`] -- durability and recovery knobs, loadable from TOML
//!
//! # Design Rules
//!
//! 1. Ids are chosen by the caller; the store never assigns them.
//! 2. Uncommitted changes are visible through the handle that made them and
//!    nowhere else.
//! 3. Bytes of the last committed generation are never overwritten before
//!    the commit that releases them.
//! 4. Malformed media surface as [`StoreError::Corrupt`]; broken in-memory
//!    invariants panic.

pub mod config;
pub mod error;
pub mod index;
pub mod layout;
pub mod medium;
pub mod store;

pub use config::{StoreConfig, SyncMode};
pub use error::{StoreError, StoreResult};
pub use index::RecordIndex;
pub use layout::{Header, IndexEntry, Slot};
pub use medium::{FileMedium, Medium, MemoryMedium, StreamMedium};
pub use store::{Location, ObjectStore, PackReport, StoreReport, TypeCount};
