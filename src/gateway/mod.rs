use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// A remote payment intent minted by the gateway.
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub gateway_order_id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// External payment gateway boundary.
///
/// Constructed once at startup and injected into the settlement engine;
/// never a module-level singleton. Implementations must bound their
/// outbound calls — a timeout is a retryable failure, never success.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Mint a remote payment intent for `amount_minor` in minor currency
    /// units, tagged with `receipt` for reconciliation on the gateway side.
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayIntent, ServiceError>;

    /// Key id handed to clients so they can open the gateway's checkout UI.
    fn key_id(&self) -> &str;

    /// Verify the gateway's signature over a completed payment.
    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool;
}

/// Hex HMAC-SHA256 over `gateway_order_id + "|" + gateway_payment_id`.
pub fn expected_signature(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

fn verify_with_secret(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> bool {
    let expected = expected_signature(secret, gateway_order_id, gateway_payment_id);
    constant_time_eq(&expected, signature)
}

/// HTTP client for a real gateway deployment.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig, base_url: String) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RemoteOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&json!({
                "amount": amount_minor,
                "currency": currency,
                "receipt": receipt,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("Payment gateway intent creation timed out");
                    ServiceError::ExternalServiceError(
                        "Payment gateway timed out; retry payment".to_string(),
                    )
                } else {
                    ServiceError::ExternalServiceError(format!("Payment gateway error: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "Payment gateway rejected intent creation: {}",
                response.status()
            )));
        }

        let remote: RemoteOrderResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Malformed gateway response: {}", e))
        })?;

        info!(gateway_order_id = %remote.id, "Created payment intent");

        Ok(GatewayIntent {
            gateway_order_id: remote.id,
            amount_minor: remote.amount,
            currency: remote.currency,
        })
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        verify_with_secret(
            &self.key_secret,
            gateway_order_id,
            gateway_payment_id,
            signature,
        )
    }
}

/// Local gateway for development and the test harness: mints deterministic
/// intents without any network traffic, sharing the HMAC scheme with
/// `HttpGateway`.
pub struct SandboxGateway {
    key_id: String,
    key_secret: String,
}

impl SandboxGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        }
    }

    /// Produce the signature a real gateway would attach to a captured
    /// payment. Exposed for dev tooling and tests.
    pub fn sign(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        expected_signature(&self.key_secret, gateway_order_id, gateway_payment_id)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        Ok(GatewayIntent {
            gateway_order_id: format!("order_{}", Uuid::new_v4().simple()),
            amount_minor,
            currency: currency.to_string(),
        })
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn verify_payment_signature(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> bool {
        verify_with_secret(
            &self.key_secret,
            gateway_order_id,
            gateway_payment_id,
            signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_pair() {
        let sig = expected_signature("secret", "order_1", "pay_1");
        assert!(verify_with_secret("secret", "order_1", "pay_1", &sig));
        assert!(!verify_with_secret("secret", "order_1", "pay_2", &sig));
        assert!(!verify_with_secret("other", "order_1", "pay_1", &sig));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
    }

    #[tokio::test]
    async fn sandbox_mints_unique_intents() {
        let cfg = crate::config::GatewayConfig {
            base_url: None,
            key_id: "k".into(),
            key_secret: "gateway_secret".into(),
            currency: "INR".into(),
            timeout_secs: 5,
        };
        let gw = SandboxGateway::new(&cfg);
        let a = gw.create_intent(100, "INR", "r1").await.expect("intent");
        let b = gw.create_intent(100, "INR", "r2").await.expect("intent");
        assert_ne!(a.gateway_order_id, b.gateway_order_id);
        assert_eq!(a.amount_minor, 100);
    }
}
