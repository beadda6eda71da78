//! Crate-level error type.
//!
//! Most operations return the more specific [`crate::lock::error::LockError`]
//! or [`crate::latch::LatchError`]; this top-level error exists for the few
//! call sites (mapped-file coordination, configuration validation) that sit
//! outside both.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lock(#[from] crate::lock::LockError),

    #[error(transparent)]
    Latch(#[from] crate::latch::LatchError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
