//! Authoritative per-product stock.
//!
//! Every mutation is a single conditional `UPDATE`, so the read, the check and
//! the decrement happen as one step inside the database. Callers pass the
//! transaction the reservation belongs to; rolling it back releases the stock.

use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
    sea_query::Expr,
};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::products::{Column as ProdCol, Entity as Products};

#[derive(Debug, Error)]
pub enum StockError {
    #[error("quantity must be greater than 0, got {0}")]
    InvalidQuantity(i32),

    #[error("unknown product {0}")]
    UnknownProduct(Uuid),

    #[error("insufficient stock for product {0}")]
    InsufficientStock(Uuid),

    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Take `quantity` units of `product_id`. Fails without side effect when the
/// product has fewer units available.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity(quantity));
    }

    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .filter(ProdCol::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        return Ok(());
    }

    match available(conn, product_id).await? {
        Some(_) => Err(StockError::InsufficientStock(product_id)),
        None => Err(StockError::UnknownProduct(product_id)),
    }
}

/// Return `quantity` units to `product_id`.
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), StockError> {
    if quantity <= 0 {
        return Err(StockError::InvalidQuantity(quantity));
    }

    let result = Products::update_many()
        .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).add(quantity))
        .filter(ProdCol::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(StockError::UnknownProduct(product_id));
    }
    Ok(())
}

/// Units currently available, `None` for an unknown product.
pub async fn available<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<Option<i32>, DbErr> {
    Products::find_by_id(product_id)
        .select_only()
        .column(ProdCol::Stock)
        .into_tuple::<i32>()
        .one(conn)
        .await
}
