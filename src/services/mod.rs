pub mod admin_service;
pub mod cart_service;
pub mod order_service;
pub mod payment_service;
pub mod reconciler;
pub mod stock_ledger;
pub mod webhook_service;
