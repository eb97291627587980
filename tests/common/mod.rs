#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait,
    Set,
};
use secrecy::SecretString;
use storefront_checkout::{
    config::{AppConfig, PaymentSettings, StripeConfig},
    db::{create_orm_conn, run_migrations},
    entity::{
        Products,
        cart_items::ActiveModel as CartActive,
        products::ActiveModel as ProductActive,
    },
    middleware::auth::{ADMIN_ROLE, AuthUser},
    payments::{
        CreateIntent, PaymentIntent, PaymentProcessor, ProcessorError, webhook::sign_payload,
    },
    state::AppState,
};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_secret";
pub const JWT_SECRET: &str = "integration-jwt-secret";

/// In-process processor. Requests replayed with the same idempotency key get
/// the intent created the first time.
#[derive(Default)]
pub struct FakeProcessor {
    by_key: Mutex<HashMap<String, PaymentIntent>>,
    created: AtomicUsize,
}

impl FakeProcessor {
    /// Number of distinct intents opened.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, ProcessorError> {
        let mut by_key = self.by_key.lock().unwrap();
        if let Some(existing) = by_key.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let intent = PaymentIntent {
            id: format!("pi_fake_{n}"),
            client_secret: format!("pi_fake_{n}_secret_{}", request.amount),
            status: "requires_payment_method".to_string(),
        };
        by_key.insert(request.idempotency_key, intent.clone());
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ProcessorError> {
        self.by_key
            .lock()
            .unwrap()
            .values()
            .find(|intent| intent.id == intent_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api {
                status: 404,
                message: format!("No such payment_intent: {intent_id}"),
            })
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: SecretString::from(JWT_SECRET.to_string()),
        stripe: StripeConfig {
            secret_key: SecretString::from("sk_test_unused".to_string()),
            webhook_secret: SecretString::from(WEBHOOK_SECRET.to_string()),
            api_base: "http://127.0.0.1:9".to_string(),
        },
        payments: PaymentSettings::default(),
    }
}

/// PostgreSQL URL from `TEST_DATABASE_URL` or `DATABASE_URL`, if one is set.
fn postgres_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
}

/// Connect to PostgreSQL inside a fresh schema so tests running in parallel
/// never see each other's rows.
async fn isolated_postgres(url: &str) -> anyhow::Result<DatabaseConnection> {
    let schema = format!("test_{}", Uuid::new_v4().simple());
    let bootstrap = create_orm_conn(url).await?;
    bootstrap
        .execute_unprepared(&format!("CREATE SCHEMA \"{schema}\""))
        .await?;
    bootstrap.close().await?;

    let mut options = ConnectOptions::new(url);
    options.sqlx_logging(false).set_schema_search_path(schema);
    Ok(Database::connect(options).await?)
}

/// Application state over PostgreSQL when a URL is configured, otherwise over
/// an in-memory SQLite database.
pub async fn setup_state() -> anyhow::Result<(AppState, Arc<FakeProcessor>)> {
    let orm = match postgres_url() {
        Some(url) => isolated_postgres(&url).await?,
        None => create_orm_conn("sqlite::memory:").await?,
    };
    run_migrations(&orm).await?;
    let processor = Arc::new(FakeProcessor::default());
    let state = AppState::new(orm, processor.clone(), test_config());
    Ok((state, processor))
}

pub fn customer() -> AuthUser {
    AuthUser {
        user_id: Uuid::now_v7(),
        role: "user".into(),
    }
}

pub fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::now_v7(),
        role: ADMIN_ROLE.into(),
    }
}

pub async fn seed_product(
    state: &AppState,
    name: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::now_v7()),
        name: Set(name.to_string()),
        description: Set(Some(format!("{name} for testing"))),
        price: Set(price),
        stock: Set(stock),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

/// Put a line straight into the cart, skipping the availability check done
/// by the cart endpoint.
pub async fn put_in_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> anyhow::Result<()> {
    CartActive {
        id: Set(Uuid::now_v7()),
        user_id: Set(user.user_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        created_at: Set(Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(())
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))?;
    Ok(product.stock)
}

/// A processor notification for `intent_id` and a valid signature header.
pub fn signed_event(event_id: &str, event_type: &str, intent_id: &str) -> (Vec<u8>, String) {
    let payload = serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": intent_id,
                "object": "payment_intent",
                "payment_method": "pm_card_visa"
            }
        }
    })
    .to_string()
    .into_bytes();
    let header = sign_payload(&payload, WEBHOOK_SECRET, Utc::now().timestamp());
    (payload, header)
}
