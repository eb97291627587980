use serde::Deserialize;
use utoipa::ToSchema;

/// Signed stock change: positive restocks, negative writes units off.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
}
