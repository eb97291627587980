use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{OrderList, OrderWithItems},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult, is_unique_violation},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, OrderStatus},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::{
        cart_service::{self, CartLine},
        stock_ledger::{self, StockError},
    },
    state::AppState,
};

const ORDER_NUMBER_ATTEMPTS: usize = 5;
const ORDER_NUMBER_SUFFIX_LEN: usize = 8;
/// Crockford base32: no I, L, O or U.
const ORDER_NUMBER_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all()
        .add(OrderCol::UserId.eq(user.user_id))
        .add(OrderCol::DeletedAt.is_null());
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        let status = parse_status(status)?;
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
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
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

/// Turn the user's cart into a pending order.
///
/// Runs as one transaction: cart snapshot, stock reservation for every line,
/// order insertion and cart clearing either all commit or none do.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let (order, items) = match place_order(&txn, user.user_id).await {
        Ok(placed) => {
            txn.commit().await?;
            placed
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::error!(error = %rollback_err, "checkout rollback failed");
            }
            tracing::info!(user_id = %user.user_id, error = %err, "checkout rejected");
            return Err(err);
        }
    };

    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        total_amount = order.total_amount,
        "order placed"
    );

    if let Err(err) = log_audit(
        state,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "order_number": order.order_number })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order_from_entity(order)?,
            items: items.into_iter().map(order_item_from_entity).collect(),
        },
        Some(Meta::empty()),
    ))
}

async fn place_order(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> AppResult<(OrderModel, Vec<OrderItemModel>)> {
    let lines = cart_service::snapshot(txn, user_id).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    for line in &lines {
        stock_ledger::reserve(txn, line.product_id, line.quantity)
            .await
            .map_err(|err| match err {
                StockError::InsufficientStock(_) => {
                    AppError::InsufficientStock(line.product_name.clone())
                }
                other => other.into(),
            })?;
    }

    let placed = build_order(txn, user_id, &lines).await?;

    // a concurrent checkout that already consumed this cart deletes fewer rows
    let cleared = cart_service::clear(txn, user_id).await?;
    if cleared != lines.len() as u64 {
        return Err(AppError::Conflict(
            "cart changed while checking out".to_string(),
        ));
    }

    Ok(placed)
}

/// Persist an order and its lines with prices fixed from `lines`.
pub async fn build_order<C>(
    conn: &C,
    user_id: Uuid,
    lines: &[CartLine],
) -> AppResult<(OrderModel, Vec<OrderItemModel>)>
where
    C: ConnectionTrait + TransactionTrait,
{
    let total_amount = order_total(lines)?;
    let now = Utc::now();
    let order = insert_order(conn, user_id, total_amount, now).await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::now_v7()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: Set(now.into()),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    Ok((order, items))
}

/// Insert the order row, drawing a fresh order number whenever the previous
/// one collides. Each attempt runs in its own savepoint so a unique violation
/// does not poison the enclosing transaction.
async fn insert_order<C>(
    conn: &C,
    user_id: Uuid,
    total_amount: i64,
    now: DateTime<Utc>,
) -> AppResult<OrderModel>
where
    C: ConnectionTrait + TransactionTrait,
{
    let order_id = Uuid::now_v7();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let order_number = generate_order_number(now);
        let savepoint = conn.begin().await?;
        let inserted = OrderActive {
            id: Set(order_id),
            user_id: Set(user_id),
            order_number: Set(order_number.clone()),
            total_amount: Set(total_amount),
            status: Set(OrderStatus::Pending.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            deleted_at: Set(None),
        }
        .insert(&savepoint)
        .await;

        match inserted {
            Ok(order) => {
                savepoint.commit().await?;
                return Ok(order);
            }
            Err(err) if is_unique_violation(&err) && attempt < ORDER_NUMBER_ATTEMPTS => {
                savepoint.rollback().await?;
                tracing::warn!(%order_number, attempt, "order number collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Exact total of `price * quantity` over `lines`, in minor currency units.
pub fn order_total(lines: &[CartLine]) -> AppResult<i64> {
    lines.iter().try_fold(0i64, |acc, line| {
        line.unit_price
            .checked_mul(i64::from(line.quantity))
            .and_then(|subtotal| acc.checked_add(subtotal))
            .ok_or_else(|| AppError::BadRequest("order total is out of range".to_string()))
    })
}

/// `ORD-<timestamp>-<random>`, e.g. `ORD-20250301120455-7QF2K9XM`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ORDER_NUMBER_ALPHABET.len());
            char::from(ORDER_NUMBER_ALPHABET[idx])
        })
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_active_order(&state.orm, id)
        .await?
        .ok_or(AppError::NotFound)?;
    if order.user_id != user.user_id {
        return Err(AppError::Forbidden);
    }

    let items = load_items(&state.orm, order.id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Look up an order that has not been soft-deleted.
pub(crate) async fn find_active_order<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> AppResult<Option<OrderModel>> {
    let order = Orders::find_by_id(id)
        .filter(OrderCol::DeletedAt.is_null())
        .one(conn)
        .await?;
    Ok(order)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItem>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::ProductId)
        .all(conn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();
    Ok(items)
}

pub(crate) fn parse_status(status: &str) -> AppResult<OrderStatus> {
    status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::BadRequest(err.to_string()))
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|err| AppError::Internal(anyhow::anyhow!("order {}: {err}", model.id)))?;
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        order_number: model.order_number,
        total_amount: model.total_amount,
        status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(unit_price: i64, quantity: i32) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            product_name: "Widget".into(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn total_is_exact_sum_of_lines() {
        let lines = [line(500, 2), line(1999, 3)];
        assert_eq!(order_total(&lines).ok(), Some(1000 + 5997));
    }

    #[test]
    fn total_overflow_is_rejected() {
        let lines = [line(i64::MAX, 2)];
        assert!(matches!(order_total(&lines), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn order_number_has_timestamp_prefix_and_random_suffix() {
        let now = Utc::now();
        let number = generate_order_number(now);
        let prefix = format!("ORD-{}-", now.format("%Y%m%d%H%M%S"));
        assert!(number.starts_with(&prefix));
        let suffix = &number[prefix.len()..];
        assert_eq!(suffix.len(), ORDER_NUMBER_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| ORDER_NUMBER_ALPHABET.contains(&b)));
    }
}
