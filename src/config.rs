use std::{env, time::Duration};

use secrecy::SecretString;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: SecretString,
    pub stripe: StripeConfig,
    pub payments: PaymentSettings,
}

/// Credentials for the payment processor. Handed to the client at
/// construction; nothing is stored in process-wide state.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// ISO currency code charged for every order, lowercase.
    pub currency: String,
    /// Maximum accepted age of a signed webhook, in seconds.
    pub webhook_tolerance_secs: i64,
    pub reconcile_interval: Duration,
    pub reconcile_max_attempts: i32,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            currency: "jpy".to_string(),
            webhook_tolerance_secs: 300,
            reconcile_interval: Duration::from_secs(30),
            reconcile_max_attempts: 10,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = required_secret("JWT_SECRET")?;

        let stripe = StripeConfig {
            secret_key: required_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: required_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string()),
        };

        let defaults = PaymentSettings::default();
        let payments = PaymentSettings {
            currency: env::var("PAYMENT_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            webhook_tolerance_secs: parsed_or("WEBHOOK_TOLERANCE_SECS", defaults.webhook_tolerance_secs),
            reconcile_interval: env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            reconcile_max_attempts: parsed_or("RECONCILE_MAX_ATTEMPTS", defaults.reconcile_max_attempts),
        };

        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            stripe,
            payments,
        })
    }
}

fn required_secret(key: &str) -> anyhow::Result<SecretString> {
    let value = env::var(key).map_err(|_| anyhow::anyhow!("{key} is not set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{key} is empty");
    }
    Ok(SecretString::from(value))
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
