use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, QueryTrait, SelectTwo, Set, sea_query::LockType,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    entity::{
        cart_items::{
            ActiveModel as CartActive, Column as CartCol, Entity as CartItems, Model as CartModel,
        },
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

/// One cart line joined with the product's current catalog data.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
}

/// Read the user's cart as it stands inside `conn`, ordered by product id.
///
/// On PostgreSQL the user's cart rows are locked until the surrounding
/// transaction ends. Only `cart_items` is named in the lock: PostgreSQL
/// rejects `FOR UPDATE` on the nullable side of the product join.
pub async fn snapshot<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<Vec<CartLine>> {
    let rows = snapshot_query(conn.get_database_backend(), user_id)
        .all(conn)
        .await?;
    let mut lines = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        let product = product.ok_or_else(|| {
            AppError::Conflict(format!("product {} is no longer available", item.product_id))
        })?;
        lines.push(CartLine {
            product_id: item.product_id,
            product_name: product.name,
            quantity: item.quantity,
            unit_price: product.price,
        });
    }
    Ok(lines)
}

fn snapshot_query(backend: DbBackend, user_id: Uuid) -> SelectTwo<CartItems, Products> {
    let mut query = CartItems::find()
        .find_also_related(Products)
        .filter(CartCol::UserId.eq(user_id))
        .order_by_asc(CartCol::ProductId);
    match backend {
        DbBackend::Postgres => {
            QueryTrait::query(&mut query).lock_with_tables(LockType::Update, [CartItems]);
            query
        }
        _ => query,
    }
}

/// Delete every line of the user's cart, returning how many were removed.
pub async fn clear<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<u64> {
    let result = CartItems::delete_many()
        .filter(CartCol::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

pub async fn list_cart(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartList>> {
    let (page, limit, offset) = pagination.normalize();
    let finder = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .order_by_desc(CartCol::CreatedAt);

    let total = finder.clone().count(&state.orm).await? as i64;

    let rows = finder
        .find_also_related(Products)
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items: Vec<CartItemDto> = rows
        .into_iter()
        .filter_map(|(item, product)| {
            product.map(|product| CartItemDto {
                id: item.id,
                product: product_from_entity(product),
                quantity: item.quantity,
            })
        })
        .collect();
    let subtotal: i64 = items
        .iter()
        .map(|i| i.product.price * i64::from(i.quantity))
        .sum();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "OK",
        CartList { items, subtotal },
        Some(meta),
    ))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product = Products::find_by_id(payload.product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::BadRequest("product not found".to_string()))?;
    if product.stock < payload.quantity {
        return Err(AppError::InsufficientStock(product.name));
    }

    let existing = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(payload.product_id))
        .one(&state.orm)
        .await?;

    let cart_item = match existing {
        Some(item) => {
            let mut active: CartActive = item.into();
            active.quantity = Set(payload.quantity);
            active.update(&state.orm).await?
        }
        None => {
            CartActive {
                id: Set(Uuid::now_v7()),
                user_id: Set(user.user_id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                created_at: Set(Utc::now().into()),
            }
            .insert(&state.orm)
            .await?
        }
    };

    if let Err(err) = log_audit(
        state,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item_from_entity(cart_item), None))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        state,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let removed = clear(&state.orm, user.user_id).await?;
    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({ "removed": removed }),
        Some(Meta::empty()),
    ))
}

fn cart_item_from_entity(model: CartModel) -> CartItem {
    CartItem {
        id: model.id,
        product_id: model.product_id,
        user_id: model.user_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub(crate) fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        stock: model.stock,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
