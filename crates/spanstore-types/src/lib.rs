//! Foundation types for spanstore.
//!
//! This crate provides the identifiers and record contract shared by every
//! other spanstore crate.
//!
//! # Key Types
//!
//! - [`RecordId`] -- caller-assigned, non-negative 64-bit record identifier
//! - [`TypeHash`] -- stable 32-bit identifier of a record's logical schema
//! - [`Record`] -- the serialize / deserialize contract a stored type fulfils
//! - [`RecordWriter`] / [`RecordReader`] -- big-endian field codecs that fail
//!   on truncated input instead of reading out of bounds

pub mod codec;
pub mod error;
pub mod hash;
pub mod record;

pub use codec::{RecordReader, RecordWriter};
pub use error::{TypeError, TypeResult};
pub use hash::TypeHash;
pub use record::Record;

/// Identifier of a stored record.
///
/// Ids are chosen by the caller. The store reports the highest id in use so
/// callers can mint fresh ones, but never assigns ids itself.
pub type RecordId = u64;
