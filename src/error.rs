//! Request-level error taxonomy for the HTTP gateway.
//!
//! Every handler funnels failures through [`AppError`] so the wire shapes
//! stay consistent: JSON envelopes carry `{ok: false, error, message}` and
//! upstream provider failures propagate their status and detail. Internals
//! are never leaked — an unclassified error surfaces as `server_error`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    Validation(String),

    /// Unknown order id.
    #[error("order not found")]
    NotFound,

    /// Admin auth missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Payment-provider API keys are not configured.
    #[error("payment provider credentials are not configured")]
    MissingCredentials,

    /// The secret required to verify a callback is not configured.
    #[error("callback verification secret is not configured")]
    MissingSecret,

    /// A payment callback carried a signature that does not verify.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// The payment provider answered with an error status.
    #[error("payment provider error ({status})")]
    Provider { status: u16, detail: serde_json::Value },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::SignatureMismatch => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MissingCredentials | Self::MissingSecret | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Provider { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
        }
    }

    /// Stable machine-readable error code used in JSON envelopes.
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "missing_parameters",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::MissingCredentials => "no_credentials",
            Self::MissingSecret => "no_webhook_secret",
            Self::SignatureMismatch => "bad_signature",
            Self::Provider { .. } => "razorpay_error",
            Self::Internal(_) => "server_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let Self::Internal(ref e) = self {
            tracing::error!("request failed: {e:#}");
            let body = serde_json::json!({"ok": false, "error": "server_error"});
            return (status, Json(body)).into_response();
        }

        let body = match &self {
            Self::Provider { detail, .. } => {
                serde_json::json!({"ok": false, "error": self.code(), "detail": detail})
            }
            _ => serde_json::json!({"ok": false, "error": self.code(), "message": self.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}
