//! HTTP failure envelope (§6, §7): every error response is
//! `{success: false, code, message, data: null, timestamp}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use cs_core::error::ClientCode;
use cs_core::CsError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct FailureEnvelope {
    success: bool,
    code: &'static str,
    message: String,
    data: Option<()>,
    timestamp: chrono::DateTime<Utc>,
}

pub struct ApiError(pub CsError);

impl From<CsError> for ApiError {
    fn from(err: CsError) -> Self {
        ApiError(err)
    }
}

fn status_for(code: ClientCode) -> StatusCode {
    match code {
        ClientCode::Validation => StatusCode::BAD_REQUEST,
        ClientCode::AuthFailed => StatusCode::UNAUTHORIZED,
        ClientCode::Forbidden => StatusCode::FORBIDDEN,
        ClientCode::NotFound => StatusCode::NOT_FOUND,
        ClientCode::Conflict => StatusCode::CONFLICT,
        ClientCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ClientCode::TransientStorage => StatusCode::SERVICE_UNAVAILABLE,
        ClientCode::Ai | ClientCode::Translation => StatusCode::BAD_GATEWAY,
        ClientCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.client_code();
        let status = status_for(code);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(err = %self.0, "internal error");
        }
        let body = FailureEnvelope {
            success: false,
            code: code.as_str(),
            message: self.0.to_string(),
            data: None,
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

/// Wraps a successful payload in `{success: true, data, timestamp}` (§6).
pub fn ok<T: Serialize>(status: StatusCode, payload: T) -> Response {
    #[derive(Serialize)]
    struct SuccessEnvelope<T> {
        success: bool,
        data: T,
        timestamp: chrono::DateTime<Utc>,
    }
    (
        status,
        Json(SuccessEnvelope {
            success: true,
            data: payload,
            timestamp: Utc::now(),
        }),
    )
        .into_response()
}
