use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

use viabus_core::error::{CoreError, CoreResult};
use viabus_core::payment::{
    canonical_webhook_string, CreatePaymentLinkRequest, PaymentGateway, PaymentLink,
    PaymentLinkStatus, WebhookPayload,
};

use crate::app_config::PaymentConfig;

type HmacSha256 = Hmac<Sha256>;

/// Payment-provider client over its REST API. Requests are signed with
/// the shared checksum key; webhook signatures are verified with the
/// same key before anything else looks at the payload.
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    api_key: String,
    checksum_key: String,
}

#[derive(Debug, Deserialize)]
struct ProviderEnvelope<T> {
    code: String,
    desc: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentLinkData {
    order_code: i64,
    payment_link_id: String,
    #[serde(default)]
    checkout_url: String,
    #[serde(default)]
    qr_code: String,
    status: String,
}

/// Statuses outside the documented set resolve to Failed rather than
/// aborting reconciliation.
fn map_status(raw: &str) -> PaymentLinkStatus {
    match raw {
        "PENDING" => PaymentLinkStatus::Pending,
        "PROCESSING" => PaymentLinkStatus::Processing,
        "PAID" => PaymentLinkStatus::Paid,
        "CANCELLED" => PaymentLinkStatus::Cancelled,
        "EXPIRED" => PaymentLinkStatus::Expired,
        "UNDERPAID" => PaymentLinkStatus::Underpaid,
        "FAILED" => PaymentLinkStatus::Failed,
        other => {
            warn!(status = other, "unknown payment link status from provider");
            PaymentLinkStatus::Failed
        }
    }
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| CoreError::internal("build payment http client", e))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            api_key: config.api_key.clone(),
            checksum_key: config.checksum_key.clone(),
        })
    }

    fn sign(&self, payload: &str) -> CoreResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.checksum_key.as_bytes())
            .map_err(|e| CoreError::internal("hmac key", e))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-client-id", &self.client_id)
            .header("x-api-key", &self.api_key)
    }

    async fn unwrap_envelope<T>(
        context: &str,
        response: reqwest::Response,
    ) -> CoreResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Upstream(format!(
                "{context}: provider returned http {status}"
            )));
        }
        let envelope: ProviderEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CoreError::upstream(context, e))?;
        if envelope.code != "00" {
            return Err(CoreError::Upstream(format!(
                "{context}: provider error {} ({})",
                envelope.code, envelope.desc
            )));
        }
        envelope.data.ok_or_else(|| {
            CoreError::Upstream(format!("{context}: provider response missing data"))
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment_link(
        &self,
        request: &CreatePaymentLinkRequest,
    ) -> CoreResult<PaymentLink> {
        // Provider signs create requests over the sorted field string.
        let expired_at = request.expires_at.timestamp();
        let canonical = format!(
            "amount={}&description={}&expiredAt={}&orderCode={}",
            request.amount, request.description, expired_at, request.order_code
        );
        let signature = self.sign(&canonical)?;

        let body = json!({
            "orderCode": request.order_code,
            "amount": request.amount,
            "description": request.description,
            "expiredAt": expired_at,
            "signature": signature,
        });

        let response = self
            .request(reqwest::Method::POST, "/v2/payment-requests")
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::upstream("create payment link", e))?;
        let data: PaymentLinkData = Self::unwrap_envelope("create payment link", response).await?;

        Ok(PaymentLink {
            order_code: data.order_code,
            payment_link_id: data.payment_link_id,
            checkout_url: data.checkout_url,
            qr_code: data.qr_code,
            status: map_status(&data.status),
        })
    }

    async fn get_payment_link(&self, payment_link_id: &str) -> CoreResult<PaymentLinkStatus> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/v2/payment-requests/{payment_link_id}"),
            )
            .send()
            .await
            .map_err(|e| CoreError::upstream("get payment link", e))?;
        let data: PaymentLinkData = Self::unwrap_envelope("get payment link", response).await?;
        Ok(map_status(&data.status))
    }

    async fn cancel_payment_link(
        &self,
        payment_link_id: &str,
        reason: &str,
    ) -> CoreResult<PaymentLinkStatus> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v2/payment-requests/{payment_link_id}/cancel"),
            )
            .json(&json!({ "cancellationReason": reason }))
            .send()
            .await
            .map_err(|e| CoreError::upstream("cancel payment link", e))?;
        let data: PaymentLinkData = Self::unwrap_envelope("cancel payment link", response).await?;
        Ok(map_status(&data.status))
    }

    fn verify_webhook_signature(&self, payload: &WebhookPayload) -> CoreResult<()> {
        let expected = hex::decode(&payload.signature).map_err(|_| CoreError::SignatureInvalid)?;
        let mut mac = HmacSha256::new_from_slice(self.checksum_key.as_bytes())
            .map_err(|e| CoreError::internal("hmac key", e))?;
        mac.update(canonical_webhook_string(&payload.data).as_bytes());
        // Constant-time comparison through the mac itself.
        mac.verify_slice(&expected)
            .map_err(|_| CoreError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use viabus_core::payment::WebhookData;

    fn gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new(&PaymentConfig {
            base_url: "https://provider.invalid".into(),
            client_id: "client".into(),
            api_key: "key".into(),
            checksum_key: "secret".into(),
            request_timeout_seconds: 1,
        })
        .unwrap()
    }

    fn sample_data() -> WebhookData {
        WebhookData {
            order_code: 7,
            payment_link_id: "pl_7".into(),
            status: PaymentLinkStatus::Paid,
            reference: Some("FT77".into()),
            transaction_time: Some(Utc::now()),
        }
    }

    #[test]
    fn test_webhook_signature_round_trip() {
        let gateway = gateway();
        let data = sample_data();
        let signature = gateway
            .sign(&canonical_webhook_string(&data))
            .unwrap();
        let payload = WebhookPayload { data, signature };
        assert!(gateway.verify_webhook_signature(&payload).is_ok());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let gateway = gateway();
        let data = sample_data();
        let signature = gateway
            .sign(&canonical_webhook_string(&data))
            .unwrap();
        let mut tampered = data;
        tampered.order_code += 1;
        let payload = WebhookPayload {
            data: tampered,
            signature,
        };
        assert!(matches!(
            gateway.verify_webhook_signature(&payload),
            Err(CoreError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        let gateway = gateway();
        let payload = WebhookPayload {
            data: sample_data(),
            signature: "not-hex".into(),
        };
        assert!(matches!(
            gateway.verify_webhook_signature(&payload),
            Err(CoreError::SignatureInvalid)
        ));
    }

    #[test]
    fn test_unknown_status_maps_to_failed() {
        assert_eq!(map_status("PAID"), PaymentLinkStatus::Paid);
        assert_eq!(map_status("SOMETHING_NEW"), PaymentLinkStatus::Failed);
    }
}
