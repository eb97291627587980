use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    payments::{ProcessorError, webhook::WebhookError},
    response::ApiResponse,
    services::stock_ledger::StockError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Unauthorized {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(String),

    #[error("Conflict {0}")]
    Conflict(String),

    #[error("No payment recorded for intent {0}")]
    PaymentNotFound(String),

    #[error("Payment processor error")]
    Processor(#[from] ProcessorError),

    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    #[error("ORM error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::InvalidQuantity(qty) => {
                AppError::BadRequest(format!("quantity must be greater than 0, got {qty}"))
            }
            StockError::UnknownProduct(_) => AppError::NotFound,
            StockError::InsufficientStock(product_id) => {
                AppError::InsufficientStock(product_id.to_string())
            }
            StockError::Db(err) => AppError::OrmError(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound | AppError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::EmptyCart | AppError::Webhook(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::InsufficientStock(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Processor(_) => StatusCode::BAD_GATEWAY,
            AppError::OrmError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }

        (status, axum::Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// True when the store rejected a write because of a unique constraint.
pub fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}
