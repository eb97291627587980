use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{config::AppConfig, payments::PaymentProcessor};

#[derive(Clone)]
pub struct AppState {
    pub orm: DatabaseConnection,
    pub processor: Arc<dyn PaymentProcessor>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        orm: DatabaseConnection,
        processor: Arc<dyn PaymentProcessor>,
        config: AppConfig,
    ) -> Self {
        Self {
            orm,
            processor,
            config: Arc::new(config),
        }
    }
}
