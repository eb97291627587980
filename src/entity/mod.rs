pub mod audit_logs;
pub mod cart_items;
pub mod order_items;
pub mod orders;
pub mod payment_events;
pub mod payments;
pub mod products;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use payment_events::Entity as PaymentEvents;
pub use payments::Entity as Payments;
pub use products::Entity as Products;
