//! Request-level error taxonomy.
//!
//! Failures internal to one source or one deal never abort unrelated
//! work; these variants cover the errors that are surfaced to callers
//! or retried by the owning loop. Transport-level parser failures stay
//! `anyhow` errors inside the scanner, which isolates them per source.

use thiserror::Error;
use uuid::Uuid;

use crate::types::DealStatus;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("deal {0} not found")]
    DealNotFound(Uuid),

    #[error("gift '{0}' not found")]
    ItemNotFound(String),

    #[error("deposit memo code already in use: {0}")]
    DuplicateMemoCode(String),

    #[error("invalid deal spec: {0}")]
    InvalidDealSpec(String),

    #[error("illegal deal transition: {from} -> {to}")]
    InvalidTransition { from: DealStatus, to: DealStatus },

    /// Fatal for the current operation; the scheduler retries next pass.
    #[error("persistence unavailable: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Retried with backoff by the deposit watcher.
    #[error("ledger query failed: {0}")]
    Ledger(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let id = Uuid::nil();
        assert_eq!(
            ServiceError::DealNotFound(id).to_string(),
            format!("deal {id} not found")
        );
        assert!(ServiceError::InvalidTransition {
            from: DealStatus::Processing,
            to: DealStatus::Cancelled,
        }
        .to_string()
        .contains("processing -> cancelled"));
    }
}
