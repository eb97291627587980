use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::payments::WebhookReceipt,
    error::AppResult,
    payments::webhook::SIGNATURE_HEADER,
    response::{ApiResponse, Meta},
    services::webhook_service,
    state::AppState,
};

pub const MAX_WEBHOOK_BODY: usize = 64 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(stripe_webhook))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY))
}

/// The body is taken as raw bytes: the signature covers the exact payload.
#[utoipa::path(
    post,
    path = "/api/webhooks/stripe",
    request_body(content = String, description = "Signed processor event", content_type = "application/json"),
    params(
        ("Stripe-Signature" = String, Header, description = "t=<timestamp>,v1=<hmac>")
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = ApiResponse<WebhookReceipt>),
        (status = 400, description = "Missing or invalid signature, or malformed event"),
        (status = 413, description = "Payload too large"),
    ),
    tag = "Webhooks"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<WebhookReceipt>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = webhook_service::accept(&state, &body, signature).await?;

    Ok(Json(ApiResponse::success(
        "Webhook received",
        WebhookReceipt {
            received: true,
            outcome: ack.as_str().to_string(),
        },
        Some(Meta::empty()),
    )))
}
