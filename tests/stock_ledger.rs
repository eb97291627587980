mod common;

use storefront_checkout::services::stock_ledger::{self, StockError};
use uuid::Uuid;

use common::{seed_product, setup_state};

#[tokio::test]
async fn reserve_and_release_move_stock() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let product_id = seed_product(&state, "Lamp", 2500, 4).await?;

    stock_ledger::reserve(&state.orm, product_id, 3).await?;
    assert_eq!(stock_ledger::available(&state.orm, product_id).await?, Some(1));

    let err = stock_ledger::reserve(&state.orm, product_id, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, StockError::InsufficientStock(id) if id == product_id));
    assert_eq!(stock_ledger::available(&state.orm, product_id).await?, Some(1));

    stock_ledger::release(&state.orm, product_id, 3).await?;
    assert_eq!(stock_ledger::available(&state.orm, product_id).await?, Some(4));
    Ok(())
}

#[tokio::test]
async fn rejects_bad_quantities_and_unknown_products() -> anyhow::Result<()> {
    let (state, _) = setup_state().await?;
    let product_id = seed_product(&state, "Desk", 12000, 1).await?;

    for qty in [0, -2] {
        let err = stock_ledger::reserve(&state.orm, product_id, qty)
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidQuantity(q) if q == qty));
    }

    let ghost = Uuid::now_v7();
    let err = stock_ledger::reserve(&state.orm, ghost, 1).await.unwrap_err();
    assert!(matches!(err, StockError::UnknownProduct(id) if id == ghost));
    let err = stock_ledger::release(&state.orm, ghost, 1).await.unwrap_err();
    assert!(matches!(err, StockError::UnknownProduct(_)));
    assert_eq!(stock_ledger::available(&state.orm, ghost).await?, None);
    Ok(())
}
