use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create ledger directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("keying mismatch: {0}")]
    KeyingMismatch(String),

    #[error("unknown session: {0}")]
    UnknownSession(i64),

    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("no eligible groups for this report")]
    NoEligibleGroups,

    #[error("invalid {kind}: {value:?}")]
    InvalidValue { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
