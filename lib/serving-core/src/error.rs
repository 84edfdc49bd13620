use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{object} has no {field}")]
    MissingObjectKey { object: String, field: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    pub fn missing(object: impl Into<String>, field: &'static str) -> Self {
        Self::MissingObjectKey {
            object: object.into(),
            field,
        }
    }
}
