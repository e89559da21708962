use shared::error::BackendError;
use thiserror::Error;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Client-side form checks. Raised before any backend call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("You must be logged in to create a post")]
    AuthRequired,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Startup(String),
}

pub fn validate_sign_up_passwords(password: &str, confirm: &str) -> Result<(), ValidationError> {
    if password != confirm {
        return Err(ValidationError::PasswordMismatch);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}
