//! Error taxonomy shared by every core operation

use log::error;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Rejected before persistence: empty body, malformed id, illegal transition.
    #[error("validation error: {0}")]
    Validation(String),

    /// The principal is not allowed to touch the resource.
    #[error("access denied: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation",
            ChatError::Authorization(_) => "authorization",
            ChatError::NotFound(_) => "not_found",
            ChatError::Database(_) => "storage",
        }
    }

    /// Storage failures are the only ones worth retrying by hand; the rest are
    /// deterministic for the same input.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Database(_))
    }
}

/// Logs the underlying storage error and converts it. Used at repository call
/// sites so every storage failure is logged once, where it happened.
pub(crate) fn storage(e: sqlx::Error) -> ChatError {
    error!("{e}");
    ChatError::Database(e)
}

const MAX_ID_LEN: usize = 64;

/// Checks an opaque identifier (conversation, contract, principal, plan).
pub fn validate_id(what: &str, id: &str) -> ChatResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(ChatError::Validation(format!(
            "{what} must be 1..={MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ChatError::Validation(format!("malformed {what} `{id}`")));
    }
    Ok(())
}

pub fn validate_body(body: &str) -> ChatResult<()> {
    if body.trim().is_empty() {
        return Err(ChatError::Validation("message body is empty".to_owned()));
    }
    Ok(())
}
