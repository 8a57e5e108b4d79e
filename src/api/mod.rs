use crate::core::error::{ChatError, validate_id};
use async_trait::async_trait;
use axum::{Json, Router};
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub mod contracts;
pub mod conversations;
pub mod plans;
pub mod profile;

const X_USER_ID: &str = "X-User-ID";

pub fn router() -> Router {
    Router::new()
        .nest("/conversations", conversations::router())
        .nest("/contracts", contracts::router())
        .nest("/plans", plans::router())
        .nest("/profile", profile::router())
}

/// The authenticated principal, as asserted by the identity provider in front
/// of this service.
#[derive(Debug)]
pub struct ExtractUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(user_id) = parts.headers.get(X_USER_ID) {
            let user_id = user_id
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            validate_id("principal id", user_id)
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
            Ok(ExtractUser(user_id.to_owned()))
        } else {
            Err((StatusCode::BAD_REQUEST, "`X-User-ID` header is missing"))
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Authorization(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let message = match &self {
            // already logged where it happened, don't leak it
            ChatError::Database(_) => "storage unavailable".to_owned(),
            other => other.to_string(),
        };

        (
            self.status_code(),
            Json(ErrorBody {
                error: self.kind(),
                message,
            }),
        )
            .into_response()
    }
}
