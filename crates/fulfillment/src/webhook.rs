//! Payment provider webhooks.
//!
//! The provider signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{payload}"` and sends it in a header of the form
//! `t=<unix seconds>,v1=<hex digest>`. Several `v1` entries may be present
//! while a secret is being rotated.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::error::{FulfillmentError, Result};
use crate::payment::PaymentConfirmed;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "payment-signature";

/// Event type that carries a confirmed payment.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("no matching signature")]
    Mismatch,

    #[error("invalid signing secret")]
    InvalidSecret,
}

/// Verifies webhook signatures against a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance,
        }
    }

    /// Produces a header value for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> std::result::Result<String, SignatureError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }

    /// Checks `header` against `payload`.
    ///
    /// The comparison is constant-time. Deliveries signed more than the
    /// configured tolerance away from `now` are rejected.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
                }
                "v1" => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }
        if now.timestamp().abs_diff(timestamp) > self.tolerance.num_seconds().unsigned_abs() {
            return Err(SignatureError::Expired);
        }

        for signature in signatures {
            let Ok(expected) = hex::decode(signature) else {
                continue;
            };
            if self.mac(timestamp, payload)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(SignatureError::Mismatch)
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> std::result::Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

/// A webhook delivery envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| FulfillmentError::Validation(format!("malformed webhook body: {e}")))
    }

    /// Returns the confirmed payment carried by this event, or `None` for
    /// event types the engine does not handle.
    pub fn payment_confirmed(&self) -> Result<Option<PaymentConfirmed>> {
        if self.kind != CHECKOUT_COMPLETED {
            return Ok(None);
        }
        serde_json::from_value(self.data.object.clone())
            .map(Some)
            .map_err(|e| FulfillmentError::Validation(format!("malformed payment payload: {e}")))
    }
}
