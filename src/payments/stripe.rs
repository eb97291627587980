//! Stripe payment intents over the REST API (no SDK dependency).

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{CreateIntent, PaymentIntent, PaymentProcessor, ProcessorError};
use crate::config::StripeConfig;

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: SecretString,
    api_base: String,
}

#[derive(Deserialize)]
struct IntentBody {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            http: Client::new(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn read_intent(resp: Response) -> Result<PaymentIntent, ProcessorError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorEnvelope>()
                .await
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ProcessorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: IntentBody = resp.json().await?;
        let client_secret = body.client_secret.ok_or_else(|| {
            ProcessorError::InvalidResponse(format!("intent {} has no client_secret", body.id))
        })?;
        Ok(PaymentIntent {
            id: body.id,
            client_secret,
            status: body.status,
        })
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, ProcessorError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }

        let resp = self
            .http
            .post(self.url("payment_intents"))
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;

        let intent = Self::read_intent(resp).await?;
        tracing::debug!(intent_id = %intent.id, amount = request.amount, "payment intent created");
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ProcessorError> {
        let resp = self
            .http
            .get(self.url(&format!("payment_intents/{intent_id}")))
            .basic_auth(self.secret_key.expose_secret(), None::<&str>)
            .send()
            .await?;

        Self::read_intent(resp).await
    }
}
