use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use service::{
    CheckoutRequest, CheckoutSession, PaymentGateway, ProviderError, SessionItem,
    SessionMetadata, WebhookEvent,
};
use sha2::Sha256;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{check_status, transport};

type HmacSha256 = Hmac<Sha256>;

/// Stripe caps metadata values at 500 characters.
const METADATA_VALUE_MAX: usize = 500;
const COMPLETED_EVENT: &str = "checkout.session.completed";

/// # StripeGateway
///
/// Hosted checkout through the Stripe REST API (form-encoded requests,
/// secret key as basic-auth user).
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
    tolerance: Duration,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: String,
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    payment_status: String,
    amount_total: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

impl StripeGateway {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        secret_key: &str,
        webhook_secret: &str,
        tolerance: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            tolerance,
        }
    }

    fn session_form(request: &CheckoutRequest) -> Result<Vec<(String, String)>, ProviderError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "client_reference_id".to_string(),
                request.metadata.user_id.to_string(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }
        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            form.push((
                format!("{prefix}[price_data][currency]"),
                request.currency.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            form.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(image) = &item.image {
                form.push((
                    format!("{prefix}[price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
            form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        }
        for (key, value) in encode_metadata(&request.metadata)? {
            form.push((format!("metadata[{key}]"), value));
        }
        Ok(form)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip_all, fields(lines = request.line_items.len()))]
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let form = Self::session_form(&request)?;
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let raw: RawSession = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        debug!(session = %raw.id, "Stripe session created");
        raw.try_into()
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(transport)?;
        let raw: RawSession = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        raw.try_into()
    }

    fn parse_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProviderError> {
        verify_signature(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance,
            Utc::now().timestamp(),
        )?;
        let event: RawEvent =
            serde_json::from_slice(payload).map_err(|e| ProviderError::Payload(e.to_string()))?;
        if event.kind != COMPLETED_EVENT {
            return Ok(WebhookEvent::Ignored { kind: event.kind });
        }
        let raw: RawSession = serde_json::from_value(event.data.object)
            .map_err(|e| ProviderError::Payload(e.to_string()))?;
        Ok(WebhookEvent::CheckoutCompleted(raw.try_into()?))
    }
}

impl TryFrom<RawSession> for CheckoutSession {
    type Error = ProviderError;

    fn try_from(raw: RawSession) -> Result<Self, Self::Error> {
        Ok(CheckoutSession {
            metadata: decode_metadata(&raw.metadata)?,
            id: raw.id,
            url: raw.url,
            status: raw.status.unwrap_or_else(|| "open".into()),
            payment_status: raw.payment_status,
            amount_total: raw.amount_total,
        })
    }
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=…]`) against the raw body.
pub(crate) fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), ProviderError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp =
        timestamp.ok_or_else(|| ProviderError::Signature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(ProviderError::Signature("missing v1 signature".into()));
    }
    let age = now.abs_diff(timestamp);
    if age > tolerance.as_secs() {
        return Err(ProviderError::Signature(format!(
            "timestamp outside tolerance ({age}s)"
        )));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|sig| mac.clone().verify_slice(&sig).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(ProviderError::Signature("no matching signature".into()))
    }
}

/// Splits a value over `key_0`, `key_1`, … so each part fits a metadata slot.
fn chunked(key: &str, value: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = value.chars().collect();
    chars
        .chunks(METADATA_VALUE_MAX)
        .enumerate()
        .map(|(i, part)| (format!("{key}_{i}"), part.iter().collect()))
        .collect()
}

fn joined(metadata: &HashMap<String, String>, key: &str) -> Option<String> {
    let mut out = String::new();
    let mut i = 0;
    while let Some(part) = metadata.get(&format!("{key}_{i}")) {
        out.push_str(part);
        i += 1;
    }
    (i > 0).then_some(out)
}

pub(crate) fn encode_metadata(
    metadata: &SessionMetadata,
) -> Result<Vec<(String, String)>, ProviderError> {
    let mut pairs = vec![("userId".to_string(), metadata.user_id.to_string())];
    if let Some(address) = &metadata.address {
        let json =
            serde_json::to_string(address).map_err(|e| ProviderError::Payload(e.to_string()))?;
        pairs.extend(chunked("address", &json));
    }
    let items = serde_json::to_string(&metadata.items)
        .map_err(|e| ProviderError::Payload(e.to_string()))?;
    pairs.extend(chunked("items", &items));
    Ok(pairs)
}

/// `None` when the session was not created by this storefront.
pub(crate) fn decode_metadata(
    metadata: &HashMap<String, String>,
) -> Result<Option<SessionMetadata>, ProviderError> {
    let Some(user_id) = metadata.get("userId") else {
        return Ok(None);
    };
    let user_id = Uuid::parse_str(user_id)
        .map_err(|e| ProviderError::Payload(format!("userId: {e}")))?;
    let address = joined(metadata, "address")
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| ProviderError::Payload(format!("address: {e}")))?;
    let items: Vec<SessionItem> = match joined(metadata, "items") {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| ProviderError::Payload(format!("items: {e}")))?,
        None => Vec::new(),
    };
    Ok(Some(SessionMetadata {
        user_id,
        address,
        items,
    }))
}
