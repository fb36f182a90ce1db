use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::application::{error::AppError, error::ErrorReport, seckill::SeckillError};
use crate::cache::IdError;
use crate::domain::seckill::SeckillRejection;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const CACHE_UNAVAILABLE: &str = "cache_unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized(hint: Option<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Caller identity required",
            hint,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn with_report(mut self, source: &'static str, error: &dyn std::error::Error) -> Self {
        self.report = Some(ErrorReport::from_error(source, self.status, error));
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!(
                    "{}: {}",
                    self.code,
                    self.hint.as_deref().unwrap_or(self.message)
                ),
            )
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::new(
            err.status_code(),
            err.code(),
            err.presentation_message(),
            err.hint(),
        )
        .with_report("application::error::AppError", &err)
    }
}

impl From<SeckillRejection> for ApiError {
    fn from(rejection: SeckillRejection) -> Self {
        let message = match rejection {
            SeckillRejection::NotStarted => "Flash sale has not started",
            SeckillRejection::Ended => "Flash sale has ended",
            SeckillRejection::OutOfStock => "Voucher is out of stock",
            SeckillRejection::AlreadyPurchased => "Voucher already purchased",
            SeckillRejection::TooManyConcurrentAttempts => "Another order attempt is in progress",
        };
        ApiError::new(StatusCode::CONFLICT, rejection.as_str(), message, None)
    }
}

impl From<SeckillError> for ApiError {
    fn from(err: SeckillError) -> Self {
        const SOURCE: &str = "application::seckill::SeckillError";
        match err {
            SeckillError::Rejected(rejection) => rejection.into(),
            SeckillError::VoucherNotFound { .. } => {
                ApiError::not_found("Seckill voucher not found").with_report(SOURCE, &err)
            }
            SeckillError::Repo(repo) => AppError::from(repo).into(),
            SeckillError::Lock(_) | SeckillError::Id(IdError::Store(_)) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE_UNAVAILABLE,
                "Service temporarily unavailable",
                Some("Retry shortly".to_string()),
            )
            .with_report(SOURCE, &err),
            SeckillError::Id(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "Unexpected error occurred",
                None,
            )
            .with_report(SOURCE, &err),
        }
    }
}
