//! Errors raised while constructing or parsing fundamental types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("bearer id {0} out of range")]
    InvalidBearer(u8),
}
