/*!
 *! # BurrowDB
 *! An embedded, single-file document database.
 *!
 *! Schemaless [`bson::Document`]s are persisted into a paged datafile and
 *! served through on-disk skip-list indexes. Updates are crash-safe via a
 *! write-ahead journal: a commit becomes durable when the journal's commit
 *! marker reaches stable storage, and recovery on open re-applies or discards
 *! the journal as a whole.
 *!
 *! The engine is single-writer / multi-reader within one process.
 */

#![allow(clippy::too_many_arguments)]

use std::fmt::Display;

pub mod engine;
mod utils;

pub use engine::{AutoId, BurrowEngine, EngineSettings, Order, Query};

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the engine, as a closed set of kinds.
///
/// Operations either return a well-formed result or one of these; the
/// datafile is left in its pre-operation state whenever an error surfaces.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid database file: {0}")]
    InvalidDatabase(String),

    #[error("invalid database version: expected {expected}, found {found}")]
    InvalidDatabaseVersion { expected: u8, found: u8 },

    #[error("datafile not found: {0}")]
    FileNotFound(String),

    #[error("datafile corrupted: {0}")]
    FileCorrupted(String),

    #[error("timed out waiting for {0} lock")]
    LockTimeout(&'static str),

    #[error("duplicate key in unique index `{index}`: {key}")]
    IndexDuplicateKey { index: String, key: String },

    #[error("no index on field `{field}` of collection `{collection}`")]
    IndexNotFound { collection: String, field: String },

    #[error("index key too long: {got} bytes (max {max})")]
    IndexKeyTooLong { got: usize, max: usize },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("document nesting exceeds {0} levels")]
    DocumentMaxDepth(usize),

    #[error("invalid data type for `{field}`: {value}")]
    InvalidDataType { field: String, value: String },

    #[error("collection `{collection}` reached a size limit: {reason}")]
    CollectionLimitSize { collection: String, reason: String },

    #[error("datafile is open read-only")]
    ReadOnly,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_database(detail: impl Display) -> Error {
        Error::InvalidDatabase(detail.to_string())
    }

    pub(crate) fn invalid_database_version(expected: u8, found: u8) -> Error {
        Error::InvalidDatabaseVersion { expected, found }
    }

    pub(crate) fn file_corrupted(detail: impl Display) -> Error {
        Error::FileCorrupted(detail.to_string())
    }

    pub(crate) fn invalid_page_type(page_id: u32, expected: impl Display, found: impl Display) -> Error {
        Error::FileCorrupted(format!(
            "page {page_id}: expected {expected} page, found {found}"
        ))
    }

    pub(crate) fn index_duplicate_key(index: &str, key: impl Display) -> Error {
        Error::IndexDuplicateKey {
            index: index.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn index_not_found(collection: &str, field: &str) -> Error {
        Error::IndexNotFound {
            collection: collection.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn index_key_too_long(got: usize) -> Error {
        Error::IndexKeyTooLong {
            got,
            max: engine::MAX_INDEX_KEY_LENGTH,
        }
    }

    pub(crate) fn invalid_format(detail: impl Display) -> Error {
        Error::InvalidFormat(detail.to_string())
    }

    pub(crate) fn document_max_depth() -> Error {
        Error::DocumentMaxDepth(engine::MAX_DOCUMENT_DEPTH)
    }

    pub(crate) fn invalid_data_type(field: &str, value: impl Display) -> Error {
        Error::InvalidDataType {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub(crate) fn collection_limit_size(collection: &str, reason: impl Display) -> Error {
        Error::CollectionLimitSize {
            collection: collection.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<bson::ser::Error> for Error {
    fn from(err: bson::ser::Error) -> Self {
        Error::invalid_format(err)
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::invalid_format(err)
    }
}
