//! Applies payment outcomes reported by the processor to local state.
//!
//! Each outcome is applied in one transaction. Payment status updates are
//! conditional on the row still being in an allowed source status, so
//! redelivered or concurrently delivered notifications collapse into a single
//! state change.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, TransactionTrait,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    entity::{
        orders::{Column as OrderCol, Entity as Orders},
        payments::{Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    models::{OrderStatus, PaymentStatus},
    payments::webhook::PaymentEventKind,
    services::payment_service::find_by_intent,
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Canceled,
}

impl OutcomeKind {
    pub fn from_event(kind: &PaymentEventKind) -> Option<Self> {
        match kind {
            PaymentEventKind::Succeeded => Some(OutcomeKind::Succeeded),
            PaymentEventKind::Failed => Some(OutcomeKind::Failed),
            PaymentEventKind::Canceled => Some(OutcomeKind::Canceled),
            PaymentEventKind::Other => None,
        }
    }

    pub fn target_status(&self) -> PaymentStatus {
        match self {
            OutcomeKind::Succeeded => PaymentStatus::Succeeded,
            OutcomeKind::Failed => PaymentStatus::Failed,
            OutcomeKind::Canceled => PaymentStatus::Canceled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub intent_id: String,
    pub kind: OutcomeKind,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// The payment moved to the reported status.
    Applied,
    /// The payment was already in the reported status.
    AlreadyApplied,
    /// The reported status would move the payment backwards.
    Ignored,
}

pub async fn reconcile(state: &AppState, outcome: &PaymentOutcome) -> AppResult<ReconcileResult> {
    let txn = state.orm.begin().await?;
    match apply(&txn, outcome).await {
        Ok(result) => {
            txn.commit().await?;
            tracing::info!(
                intent_id = %outcome.intent_id,
                outcome = ?outcome.kind,
                result = ?result,
                "payment outcome reconciled"
            );
            Ok(result)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!(error = %rollback_err, "reconcile rollback failed");
            }
            Err(err)
        }
    }
}

async fn apply(txn: &DatabaseTransaction, outcome: &PaymentOutcome) -> AppResult<ReconcileResult> {
    let payment = find_by_intent(txn, &outcome.intent_id)
        .await?
        .ok_or_else(|| AppError::PaymentNotFound(outcome.intent_id.clone()))?;
    let current = payment
        .status
        .parse::<PaymentStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("payment {}: {err}", payment.id)))?;
    let target = outcome.kind.target_status();

    let result = if current == target {
        ReconcileResult::AlreadyApplied
    } else if !current.can_transition_to(target) {
        tracing::warn!(
            intent_id = %outcome.intent_id,
            current = %current,
            reported = %target,
            "ignoring backwards payment transition"
        );
        ReconcileResult::Ignored
    } else {
        let sources: Vec<&str> = PaymentStatus::sources_for(target)
            .iter()
            .map(PaymentStatus::as_str)
            .collect();
        let mut update = Payments::update_many()
            .col_expr(PaymentCol::Status, Expr::value(target.as_str()))
            .col_expr(PaymentCol::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(PaymentCol::Id.eq(payment.id))
            .filter(PaymentCol::Status.is_in(sources));
        if let Some(method) = &outcome.payment_method_id {
            update = update.col_expr(
                PaymentCol::ExternalPaymentMethodId,
                Expr::value(method.clone()),
            );
        }
        if update.exec(txn).await?.rows_affected == 0 {
            // a concurrent delivery moved the row first
            ReconcileResult::AlreadyApplied
        } else {
            ReconcileResult::Applied
        }
    };

    // Replays of a success also repair an order left behind by an earlier run.
    let payment_succeeded = result == ReconcileResult::Applied || current == PaymentStatus::Succeeded;
    if target == PaymentStatus::Succeeded && payment_succeeded {
        confirm_order(txn, payment.order_id).await?;
    }

    Ok(result)
}

/// Move a pending order to confirmed. Orders that already moved on are left
/// alone.
async fn confirm_order(txn: &DatabaseTransaction, order_id: Uuid) -> AppResult<bool> {
    let result = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(OrderStatus::Confirmed.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(OrderCol::Id.eq(order_id))
        .filter(OrderCol::Status.eq(OrderStatus::Pending.as_str()))
        .exec(txn)
        .await?;

    if result.rows_affected == 1 {
        tracing::info!(%order_id, "order confirmed");
        return Ok(true);
    }

    let order = Orders::find_by_id(order_id).one(txn).await?;
    match order {
        Some(order) if order.status == OrderStatus::Cancelled.as_str() => {
            tracing::error!(%order_id, "payment succeeded for a cancelled order");
        }
        Some(_) => {}
        None => {
            tracing::error!(%order_id, "payment references a missing order");
        }
    }
    Ok(false)
}
