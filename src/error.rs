use thiserror::Error;
use std::io;

/// Errors surfaced by the engine. Each variant maps to a stable numeric
/// code that the shell reports as `DB error: (<code>), <message>`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("syntax error, could not parse statement")]
    InvalidStatement,
    #[error("name longer than 32 bytes")]
    NameTooLong,
    #[error("email longer than 256 bytes")]
    EmailTooLong,
    #[error("table full, page limit reached")]
    TableFull,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("row not found")]
    RowNotFound,
    #[error("short write to database file")]
    WriteFailed,
}

impl DbError {
    pub fn code(&self) -> i32 {
        match self {
            DbError::InvalidStatement => 0,
            DbError::NameTooLong => 1,
            DbError::EmailTooLong => 2,
            DbError::TableFull => 3,
            DbError::Io(_) => 4,
            DbError::RowNotFound => 5,
            DbError::WriteFailed => 6,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
