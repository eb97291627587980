//! Intake for processor notifications.
//!
//! A verified event is stored in the `payment_events` inbox before anything
//! else happens, so an acknowledged event is never lost. Reconciliation is
//! attempted right away; rows that fail are picked up again by
//! [`process_pending_events`].

use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect,
    sea_query::{Expr, OnConflict},
};
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    entity::payment_events::{Column as EventCol, Entity as PaymentEvents, Model as EventModel},
    error::{AppError, AppResult},
    payments::webhook::{PaymentEventKind, WebhookError, verify_event},
    services::reconciler::{self, OutcomeKind, PaymentOutcome, ReconcileResult},
    state::AppState,
};

const SWEEP_BATCH: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAck {
    /// Stored in the inbox. `reconciled` is false when applying it failed and
    /// the retry sweep owns it now.
    Accepted { reconciled: bool },
    /// The event id was seen before.
    Duplicate,
    /// Verified, but of a kind this service does not act on.
    Ignored,
}

impl WebhookAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAck::Accepted { reconciled: true } => "processed",
            WebhookAck::Accepted { reconciled: false } => "queued",
            WebhookAck::Duplicate => "duplicate",
            WebhookAck::Ignored => "ignored",
        }
    }
}

pub async fn accept(
    state: &AppState,
    payload: &[u8],
    signature: Option<&str>,
) -> AppResult<WebhookAck> {
    let signature = signature.ok_or(WebhookError::MissingSignature)?;
    let event = verify_event(
        payload,
        signature,
        state.config.stripe.webhook_secret.expose_secret(),
        state.config.payments.webhook_tolerance_secs,
    )
    .inspect_err(|err| tracing::warn!(error = %err, "webhook rejected"))?;

    if event.kind == PaymentEventKind::Other {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "webhook ignored");
        return Ok(WebhookAck::Ignored);
    }
    let intent_id = event.intent_id.clone().ok_or_else(|| {
        WebhookError::InvalidPayload("event carries no payment intent id".to_string())
    })?;

    let row = EventModel {
        id: Uuid::now_v7(),
        event_id: event.id.clone(),
        event_type: event.event_type.clone(),
        intent_id,
        payment_method_id: event.payment_method_id.clone(),
        attempts: 0,
        last_error: None,
        processed_at: None,
        received_at: Utc::now().into(),
    };

    let inserted = PaymentEvents::insert(row.clone().into_active_model())
        .on_conflict(OnConflict::column(EventCol::EventId).do_nothing().to_owned())
        .exec_without_returning(&state.orm)
        .await?;

    if inserted == 0 {
        tracing::info!(event_id = %row.event_id, "duplicate webhook delivery");
        return Ok(WebhookAck::Duplicate);
    }

    tracing::info!(
        event_id = %row.event_id,
        event_type = %row.event_type,
        intent_id = %row.intent_id,
        "webhook stored"
    );

    let reconciled = process_event(state, &row).await.is_ok();
    Ok(WebhookAck::Accepted { reconciled })
}

/// Re-drive inbox rows that have not been applied yet and have attempts left.
/// Returns how many were applied during this sweep.
pub async fn process_pending_events(state: &AppState, max_attempts: i32) -> AppResult<usize> {
    let pending = PaymentEvents::find()
        .filter(EventCol::ProcessedAt.is_null())
        .filter(EventCol::Attempts.lt(max_attempts))
        .order_by_asc(EventCol::ReceivedAt)
        .limit(SWEEP_BATCH)
        .all(&state.orm)
        .await?;

    let mut applied = 0;
    for event in pending {
        match process_event(state, &event).await {
            Ok(_) => applied += 1,
            Err(err) if event.attempts + 1 >= max_attempts => {
                tracing::error!(
                    event_id = %event.event_id,
                    intent_id = %event.intent_id,
                    attempts = event.attempts + 1,
                    error = %err,
                    "giving up on payment event"
                );
            }
            Err(_) => {}
        }
    }

    if applied > 0 {
        tracing::info!(applied, "pending payment events applied");
    }
    Ok(applied)
}

pub fn spawn_retry_worker(state: AppState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let max_attempts = state.config.payments.reconcile_max_attempts;
            if let Err(err) = process_pending_events(&state, max_attempts).await {
                tracing::warn!(error = %err, "payment event sweep failed");
            }
        }
    })
}

async fn process_event(state: &AppState, event: &EventModel) -> AppResult<ReconcileResult> {
    let kind = OutcomeKind::from_event(&PaymentEventKind::from_event_type(&event.event_type))
        .ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "stored event {} has unsupported type {}",
                event.event_id,
                event.event_type
            ))
        })?;
    let outcome = PaymentOutcome {
        intent_id: event.intent_id.clone(),
        kind,
        payment_method_id: event.payment_method_id.clone(),
    };

    match reconciler::reconcile(state, &outcome).await {
        Ok(result) => {
            PaymentEvents::update_many()
                .col_expr(EventCol::Attempts, Expr::col(EventCol::Attempts).add(1))
                .col_expr(EventCol::ProcessedAt, Expr::value(Utc::now().fixed_offset()))
                .col_expr(EventCol::LastError, Expr::value(Option::<String>::None))
                .filter(EventCol::Id.eq(event.id))
                .exec(&state.orm)
                .await?;
            Ok(result)
        }
        Err(err) => {
            tracing::warn!(
                event_id = %event.event_id,
                intent_id = %event.intent_id,
                error = %err,
                "payment event not applied"
            );
            PaymentEvents::update_many()
                .col_expr(EventCol::Attempts, Expr::col(EventCol::Attempts).add(1))
                .col_expr(EventCol::LastError, Expr::value(err.to_string()))
                .filter(EventCol::Id.eq(event.id))
                .exec(&state.orm)
                .await?;
            Err(err)
        }
    }
}
