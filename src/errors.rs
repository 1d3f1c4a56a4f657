use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    /// The backing store is unreachable or a referenced record is missing.
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A production request could not be created. Requests created before the
    /// failure are listed in `created` and are not rolled back here.
    #[error("Order creation failed for product {product_id}: {message}")]
    OrderCreation {
        product_id: String,
        message: String,
        created: Vec<Uuid>,
    },

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl ServiceError {
    /// Wraps any displayable store failure as a data-access fault.
    pub fn db_error<E: Display>(error: E) -> Self {
        ServiceError::DatabaseError(error.to_string())
    }

    /// Data-access and order-creation faults abort the current operation;
    /// the remaining variants describe a bad request the caller can correct.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::OrderCreation { .. } | Self::Other(_)
        )
    }

    /// Ids of production requests that were already written when the error
    /// was raised.
    pub fn created_requests(&self) -> &[Uuid] {
        match self {
            Self::OrderCreation { created, .. } => created,
            _ => &[],
        }
    }
}
