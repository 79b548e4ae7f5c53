//! Credential verification and the session lifecycle built on top of it.

mod credentials;
mod session;

pub use credentials::{CredentialStore, VerifiedUser};
#[cfg(test)]
pub(crate) use credentials::test_store;
pub use session::{spawn_cleanup_task, LoginOutcome, LoginStage, Session, SessionManager, SessionStore};

use thiserror::Error;

/// Errors raised while checking credentials or managing accounts
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing username or password")]
    MissingInput,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User already exists")]
    AlreadyExists,

    #[error("User does not exist")]
    NotFound,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
