use sea_orm::entity::prelude::*;

/// Inbox of verified processor notifications awaiting reconciliation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payment_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub event_id: String,
    pub event_type: String,
    #[sea_orm(indexed)]
    pub intent_id: String,
    pub payment_method_id: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTimeWithTimeZone>,
    pub received_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
