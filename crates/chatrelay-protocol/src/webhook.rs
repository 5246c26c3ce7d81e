use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope delivered to a tenant's configured outbound webhook URL.
///
/// `delivery_id` is stable across retries of the same delivery, so a
/// receiver can dedupe on it; `event` names the domain event that
/// triggered the delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub delivery_id: Uuid,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl WebhookEnvelope {
    #[must_use]
    pub fn new(delivery_id: Uuid, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            delivery_id,
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serializes to the exact bytes that get HMAC-signed and sent as the
    /// request body. Keeping this as one method avoids the signature and
    /// the body ever being computed from two different serializations.
    pub fn to_signed_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_signed_body_is_stable_json() {
        let env = WebhookEnvelope::new(Uuid::nil(), "message.received", serde_json::json!({"a": 1}));
        let body1 = env.to_signed_body().expect("serializes");
        let body2 = env.to_signed_body().expect("serializes");
        assert_eq!(body1, body2);
    }
}
