//! Payment processor collaborator.
//!
//! The checkout core talks to the processor only through [`PaymentProcessor`],
//! so the live [`StripeClient`] can be swapped for an in-process double.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeClient;

/// Request for a new payment intent.
#[derive(Debug, Clone)]
pub struct CreateIntent {
    /// Amount in the currency's minor unit.
    pub amount: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
    /// Replaying a request with the same key returns the original intent.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub status: String,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("processor rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected processor response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, ProcessorError>;

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ProcessorError>;
}
