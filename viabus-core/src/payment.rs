use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::models::TransactionStatus;

/// Provider-reported payment-link state. The core only ever maps these
/// into `TransactionStatus`; provider API semantics beyond this surface
/// are out of scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentLinkStatus {
    Pending,
    Processing,
    Paid,
    Cancelled,
    Expired,
    Underpaid,
    Failed,
}

impl PaymentLinkStatus {
    pub fn to_transaction_status(self) -> TransactionStatus {
        match self {
            PaymentLinkStatus::Pending => TransactionStatus::Pending,
            PaymentLinkStatus::Processing => TransactionStatus::Processing,
            PaymentLinkStatus::Paid => TransactionStatus::Paid,
            PaymentLinkStatus::Cancelled => TransactionStatus::Cancelled,
            PaymentLinkStatus::Expired => TransactionStatus::Expired,
            PaymentLinkStatus::Underpaid => TransactionStatus::Underpaid,
            PaymentLinkStatus::Failed => TransactionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePaymentLinkRequest {
    pub order_code: i64,
    /// Integer minor-unit currency (VND, no decimals).
    pub amount: i64,
    pub description: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLink {
    pub order_code: i64,
    pub payment_link_id: String,
    pub checkout_url: String,
    pub qr_code: String,
    pub status: PaymentLinkStatus,
}

/// Raw webhook body as delivered by the provider: opaque event data plus
/// an HMAC signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub data: WebhookData,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub order_code: i64,
    pub payment_link_id: String,
    pub status: PaymentLinkStatus,
    pub reference: Option<String>,
    pub transaction_time: Option<DateTime<Utc>>,
}

/// Narrow interface over the external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> CoreResult<PaymentLink>;

    async fn get_payment_link(&self, payment_link_id: &str) -> CoreResult<PaymentLinkStatus>;

    async fn cancel_payment_link(
        &self,
        payment_link_id: &str,
        reason: &str,
    ) -> CoreResult<PaymentLinkStatus>;

    /// HMAC verification of an inbound webhook. Any mismatch is fatal for
    /// that request; no partial processing.
    fn verify_webhook_signature(&self, payload: &WebhookPayload) -> CoreResult<()>;
}

/// The provider rejects link expiries at or past the 32-bit epoch
/// boundary; validate before calling out.
pub fn validate_link_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> CoreResult<()> {
    if expires_at <= now {
        return Err(CoreError::InvalidState(
            "payment link expiry must be in the future".into(),
        ));
    }
    let epoch_2038 = Utc.with_ymd_and_hms(2038, 1, 19, 3, 14, 7).unwrap();
    if expires_at >= epoch_2038 {
        return Err(CoreError::InvalidState(
            "payment link expiry past the 2038 epoch boundary".into(),
        ));
    }
    Ok(())
}

pub fn validate_amount(amount: i64) -> CoreResult<()> {
    if amount <= 0 {
        return Err(CoreError::InvalidState(
            "payment amount must be a positive integer".into(),
        ));
    }
    Ok(())
}

/// Canonical string the provider signs: fields sorted by key, joined as
/// `key=value` pairs with `&`.
pub fn canonical_webhook_string(data: &WebhookData) -> String {
    let mut fields = vec![
        ("orderCode".to_string(), data.order_code.to_string()),
        ("paymentLinkId".to_string(), data.payment_link_id.clone()),
        ("status".to_string(), format!("{:?}", data.status).to_uppercase()),
    ];
    if let Some(reference) = &data.reference {
        fields.push(("reference".to_string(), reference.clone()));
    }
    if let Some(time) = &data.transaction_time {
        fields.push(("transactionTime".to_string(), time.to_rfc3339()));
    }
    fields.sort();
    fields
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_must_be_future() {
        let now = Utc::now();
        assert!(validate_link_expiry(now - Duration::seconds(1), now).is_err());
        assert!(validate_link_expiry(now, now).is_err());
        assert!(validate_link_expiry(now + Duration::minutes(30), now).is_ok());
    }

    #[test]
    fn test_expiry_rejects_2038() {
        let now = Utc::now();
        let past_boundary = Utc.with_ymd_and_hms(2038, 6, 1, 0, 0, 0).unwrap();
        assert!(validate_link_expiry(past_boundary, now).is_err());
    }

    #[test]
    fn test_amount_positive() {
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-500).is_err());
        assert!(validate_amount(150_000).is_ok());
    }

    #[test]
    fn test_canonical_string_is_sorted() {
        let data = WebhookData {
            order_code: 42,
            payment_link_id: "pl_1".into(),
            status: PaymentLinkStatus::Paid,
            reference: Some("FT123".into()),
            transaction_time: None,
        };
        let s = canonical_webhook_string(&data);
        assert_eq!(
            s,
            "orderCode=42&paymentLinkId=pl_1&reference=FT123&status=PAID"
        );
    }
}
