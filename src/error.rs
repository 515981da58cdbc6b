//! Error types for command and event handlers.

use thiserror::Error;

/// Errors surfaced by command handlers and core-bus observers.
///
/// Protocol errors (bad nick, missing params, ...) are not represented here:
/// those are numeric replies sent to the client, after which the handler
/// returns `Ok(())`. A `HandlerError` means the handler itself failed; the
/// dispatcher logs it and the remaining handlers in the dispatch still run.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("account store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("password hashing error: {0}")]
    Hashing(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for command and event handlers.
pub type HandlerResult = Result<(), HandlerError>;
