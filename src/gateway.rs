//! Payment gateway port and the Midtrans Snap adapter.
//!
//! The engine only needs two capabilities from a gateway: open a hosted
//! checkout for an order reference, and authenticate the status
//! notifications posted back. [`PaymentGateway`] is the seam; tests swap in
//! a scripted implementation.
//!
//! Midtrans signs notifications with
//! `hex(sha512(order_id ‖ status_code ‖ gross_amount ‖ server_key))`.
//! The comparison is constant-time.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use crate::error::{EngineError, EngineResult};

pub const SNAP_SANDBOX_URL: &str = "https://app.sandbox.midtrans.com/snap/v1";
pub const SNAP_PRODUCTION_URL: &str = "https://app.midtrans.com/snap/v1";

const ITEM_NAME_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct Payer {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub order_ref: String,
    pub gross_amount: i64,
    pub item_id: String,
    pub item_name: String,
    pub payer: Payer,
}

/// Hosted checkout handed back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSession {
    pub token: String,
    pub redirect_url: String,
}

/// Body of a Midtrans HTTP notification. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    pub signature_key: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout for one charge attempt.
    async fn create_charge(&self, request: &ChargeRequest) -> EngineResult<ChargeSession>;

    /// Authenticate a notification before any of its fields are trusted.
    fn verify_notification(&self, notification: &GatewayNotification) -> bool;
}

fn signature_digest(order_id: &str, status_code: &str, gross_amount: &str, server_key: &str) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hasher.finalize().to_vec()
}

pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    hex::encode(signature_digest(order_id, status_code, gross_amount, server_key))
}

pub fn verify_signature(notification: &GatewayNotification, server_key: &str) -> bool {
    let Ok(provided) = hex::decode(notification.signature_key.trim()) else {
        return false;
    };
    let expected = signature_digest(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    provided.len() == expected.len() && bool::from(provided.ct_eq(&expected))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct MidtransGateway {
    client: reqwest::Client,
    server_key: String,
    base_url: String,
}

impl MidtransGateway {
    pub fn new(server_key: String, production: bool) -> anyhow::Result<Self> {
        let base_url = if production {
            SNAP_PRODUCTION_URL
        } else {
            SNAP_SANDBOX_URL
        };
        Self::with_base_url(server_key, base_url.to_string())
    }

    pub fn with_base_url(server_key: String, base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(MidtransGateway {
            client,
            server_key,
            base_url,
        })
    }

    /// HTTP Basic credentials: the server key with an empty password.
    fn authorization(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:", self.server_key)))
    }

    fn charge_body(request: &ChargeRequest) -> serde_json::Value {
        json!({
            "transaction_details": {
                "order_id": request.order_ref,
                "gross_amount": request.gross_amount,
            },
            "customer_details": {
                "first_name": request.payer.name,
                "email": request.payer.email,
            },
            "item_details": [{
                "id": request.item_id,
                "price": request.gross_amount,
                "quantity": 1,
                "name": truncate_chars(&request.item_name, ITEM_NAME_MAX_CHARS),
            }],
        })
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> EngineResult<ChargeSession> {
        let url = format!("{}/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&Self::charge_body(request))
            .send()
            .await
            .map_err(|e| EngineError::ExternalServiceFailure(format!("midtrans: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExternalServiceFailure(format!(
                "midtrans returned {}: {}",
                status,
                truncate_chars(&body, 200)
            )));
        }
        response
            .json::<ChargeSession>()
            .await
            .map_err(|e| EngineError::ExternalServiceFailure(format!("midtrans response: {}", e)))
    }

    fn verify_notification(&self, notification: &GatewayNotification) -> bool {
        verify_signature(notification, &self.server_key)
    }
}
