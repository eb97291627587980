use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::payments::ClientSecret,
    entity::{
        orders::Model as OrderModel,
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult, is_unique_violation},
    middleware::auth::AuthUser,
    models::{OrderStatus, Payment, PaymentStatus},
    payments::CreateIntent,
    response::{ApiResponse, Meta},
    services::order_service::find_active_order,
    state::AppState,
};

/// Get a client secret for paying `order_id`.
///
/// An order owns at most one payment intent: when a payment row already
/// exists the secret of its intent is fetched again instead of opening a new
/// one. Concurrent first calls share an idempotency key at the processor and
/// the loser of the insert race falls back to the winner's row.
pub async fn create_intent(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<ClientSecret>> {
    let order = owned_order(state, user, order_id).await?;
    if order.status == OrderStatus::Cancelled.as_str() {
        return Err(AppError::Conflict("order is cancelled".to_string()));
    }

    if let Some(payment) = find_by_order(&state.orm, order.id).await? {
        tracing::debug!(order_id = %order.id, intent_id = %payment.external_intent_id, "reusing payment intent");
        return existing_secret(state, &payment).await;
    }

    let amount = to_minor_units(order.total_amount)?;
    let currency = state.config.payments.currency.clone();
    let intent = state
        .processor
        .create_intent(CreateIntent {
            amount,
            currency: currency.clone(),
            metadata: HashMap::from([
                ("order_id".to_string(), order.id.to_string()),
                ("order_number".to_string(), order.order_number.clone()),
            ]),
            idempotency_key: format!("order-{}", order.id),
        })
        .await?;

    let now = Utc::now();
    let inserted = PaymentActive {
        id: Set(Uuid::now_v7()),
        order_id: Set(order.id),
        external_intent_id: Set(intent.id.clone()),
        external_payment_method_id: Set(None),
        amount: Set(amount),
        currency: Set(currency),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        deleted_at: Set(None),
    }
    .insert(&state.orm)
    .await;

    match inserted {
        Ok(payment) => {
            tracing::info!(order_id = %order.id, intent_id = %payment.external_intent_id, amount, "payment intent opened");
            if let Err(err) = log_audit(
                state,
                Some(user.user_id),
                "payment_intent_created",
                Some("payments"),
                Some(serde_json::json!({ "order_id": order.id, "payment_id": payment.id })),
            )
            .await
            {
                tracing::warn!(error = %err, "audit log failed");
            }

            Ok(ApiResponse::success(
                "Payment intent created",
                ClientSecret {
                    client_secret: intent.client_secret,
                    payment_intent_id: intent.id,
                },
                Some(Meta::empty()),
            ))
        }
        Err(err) if is_unique_violation(&err) => {
            let payment = find_by_order(&state.orm, order.id)
                .await?
                .ok_or_else(|| AppError::Conflict("payment is being created, retry".to_string()))?;
            existing_secret(state, &payment).await
        }
        Err(err) => Err(err.into()),
    }
}

/// Payment recorded for an order owned by `user`.
pub async fn get_payment_for_order(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    let order = owned_order(state, user, order_id).await?;
    let payment = find_by_order(&state.orm, order.id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(ApiResponse::success(
        "OK",
        payment_from_entity(payment)?,
        Some(Meta::empty()),
    ))
}

/// Order totals are already kept in the currency's minor unit, so this only
/// guards against amounts the processor would refuse.
pub fn to_minor_units(total_amount: i64) -> AppResult<i64> {
    if total_amount <= 0 {
        return Err(AppError::BadRequest(
            "order total must be positive to be paid".to_string(),
        ));
    }
    Ok(total_amount)
}

pub(crate) async fn find_by_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Option<PaymentModel>> {
    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .filter(PaymentCol::DeletedAt.is_null())
        .one(conn)
        .await?;
    Ok(payment)
}

pub(crate) async fn find_by_intent<C: ConnectionTrait>(
    conn: &C,
    intent_id: &str,
) -> AppResult<Option<PaymentModel>> {
    let payment = Payments::find()
        .filter(PaymentCol::ExternalIntentId.eq(intent_id))
        .filter(PaymentCol::DeletedAt.is_null())
        .one(conn)
        .await?;
    Ok(payment)
}

async fn owned_order(state: &AppState, user: &AuthUser, order_id: Uuid) -> AppResult<OrderModel> {
    let order = find_active_order(&state.orm, order_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }
    Ok(order)
}

async fn existing_secret(
    state: &AppState,
    payment: &PaymentModel,
) -> AppResult<ApiResponse<ClientSecret>> {
    let intent = state
        .processor
        .get_intent(&payment.external_intent_id)
        .await?;

    Ok(ApiResponse::success(
        "Payment intent exists",
        ClientSecret {
            client_secret: intent.client_secret,
            payment_intent_id: intent.id,
        },
        Some(Meta::empty()),
    ))
}

pub(crate) fn payment_from_entity(model: PaymentModel) -> AppResult<Payment> {
    let status = model
        .status
        .parse::<PaymentStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("payment {}: {err}", model.id)))?;
    Ok(Payment {
        id: model.id,
        order_id: model.order_id,
        external_intent_id: model.external_intent_id,
        external_payment_method_id: model.external_payment_method_id,
        amount: model.amount,
        currency: model.currency,
        status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}
