use chrono::Utc;
use sea_orm::{
    ColumnTrait, Condition, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::{
        admin::InventoryAdjustRequest,
        orders::{OrderList, OrderStatusChange, OrderWithItems, UpdateOrderStatusRequest},
    },
    entity::{
        orders::{Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{OrderStatus, Product},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::product_from_entity,
        order_service::{find_active_order, load_items, order_from_entity, parse_status},
        stock_ledger::{self, StockError},
    },
    state::AppState,
};

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all().add(OrderCol::DeletedAt.is_null());
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = parse_status(status)?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);

    Ok(ApiResponse::success("Orders", OrderList { items: orders }, Some(meta)))
}

pub async fn get_order_admin(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_admin(user)?;
    let order = find_active_order(&state.orm, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "Order found",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Move an order along its fulfilment path.
///
/// `confirmed` is only ever reached through a successful payment, so it is
/// refused here. Cancelling hands every line's quantity back to stock in the
/// same transaction as the status change.
pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<OrderStatusChange>> {
    ensure_admin(user)?;
    let next = parse_status(&payload.status)?;
    if next == OrderStatus::Confirmed {
        return Err(AppError::BadRequest(
            "orders are confirmed by payment only".to_string(),
        ));
    }

    let txn = state.orm.begin().await?;
    let (previous, order) = match change_status(&txn, id, next).await {
        Ok(changed) => {
            txn.commit().await?;
            changed
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!(error = %rollback_err, "status update rollback failed");
            }
            return Err(err);
        }
    };

    tracing::info!(order_id = %order.id, from = %previous, to = %next, "order status changed");

    if let Err(err) = log_audit(
        state,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({
            "order_id": order.id,
            "from": previous.as_str(),
            "to": next.as_str(),
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        OrderStatusChange {
            order: order_from_entity(order)?,
            previous_status: previous,
        },
        Some(Meta::empty()),
    ))
}

async fn change_status(
    txn: &DatabaseTransaction,
    id: Uuid,
    next: OrderStatus,
) -> AppResult<(OrderStatus, OrderModel)> {
    let order = find_active_order(txn, id).await?.ok_or(AppError::NotFound)?;
    let current = parse_status(&order.status)?;
    if !current.can_be_set_manually(next) {
        return Err(AppError::Conflict(format!(
            "cannot move order from {current} to {next}"
        )));
    }

    let result = Orders::update_many()
        .col_expr(OrderCol::Status, Expr::value(next.as_str()))
        .col_expr(OrderCol::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(OrderCol::Id.eq(id))
        .filter(OrderCol::Status.eq(current.as_str()))
        .exec(txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::Conflict(
            "order status changed concurrently".to_string(),
        ));
    }

    if next == OrderStatus::Cancelled {
        for item in load_items(txn, id).await? {
            stock_ledger::release(txn, item.product_id, item.quantity).await?;
        }
    }

    let updated = Orders::find_by_id(id).one(txn).await?.ok_or(AppError::NotFound)?;
    Ok((current, updated))
}

pub async fn adjust_inventory(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: InventoryAdjustRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let applied = match payload.delta {
        0 => return Err(AppError::BadRequest("delta must not be 0".into())),
        delta if delta > 0 => stock_ledger::release(&state.orm, id, delta).await,
        delta => {
            let units = delta
                .checked_neg()
                .ok_or_else(|| AppError::BadRequest("delta is out of range".into()))?;
            stock_ledger::reserve(&state.orm, id, units).await
        }
    };
    applied.map_err(|err| match err {
        StockError::InsufficientStock(_) => {
            AppError::BadRequest("stock cannot be negative".into())
        }
        other => other.into(),
    })?;

    let updated = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!(product_id = %id, delta = payload.delta, stock = updated.stock, "inventory adjusted");

    if let Err(err) = log_audit(
        state,
        Some(user.user_id),
        "inventory_adjust",
        Some("products"),
        Some(serde_json::json!({ "product_id": updated.id, "delta": payload.delta })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Inventory updated",
        product_from_entity(updated),
        Some(Meta::empty()),
    ))
}
