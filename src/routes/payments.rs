use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::payments::{ClientSecret, CreateIntentRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Payment,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_intent))
        .route("/orders/{order_id}", get(get_payment_for_order))
}

#[utoipa::path(
    post,
    path = "/api/payments/intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Client secret of the order's payment intent", body = ApiResponse<ClientSecret>),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order is cancelled"),
        (status = 502, description = "Payment processor unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateIntentRequest>,
) -> AppResult<Json<ApiResponse<ClientSecret>>> {
    let resp = payment_service::create_intent(&state, &user, payload.order_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/orders/{order_id}",
    params(
        ("order_id" = Uuid, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Payment recorded for the order", body = ApiResponse<Payment>),
        (status = 403, description = "Order belongs to another user"),
        (status = 404, description = "Order or payment not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment_for_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::get_payment_for_order(&state, &user, order_id).await?;
    Ok(Json(resp))
}
