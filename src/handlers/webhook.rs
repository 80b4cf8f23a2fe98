use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

use crate::db::queries;
use crate::services::conversation::{self, InboundMessage};
use crate::state::AppState;

const FALLBACK_REPLY: &str = "Şu anda bir sorun yaşıyoruz. Lütfen biraz sonra tekrar dene.";

// ── Envelope ──

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeMetadata {
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    pub from: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppText {
    pub body: String,
}

/// A customer message pulled out of the envelope, tagged with the business
/// number it was sent to.
#[derive(Debug, PartialEq, Eq)]
pub struct IncomingText {
    pub phone_number_id: String,
    pub from: String,
    pub body: String,
}

/// Flattens every message in the envelope. Non-text messages (images,
/// reactions) become empty text, which the engine answers with the menu.
pub fn extract_messages(envelope: WebhookEnvelope) -> Vec<IncomingText> {
    let mut out = vec![];
    for entry in envelope.entry {
        for change in entry.changes {
            let phone_number_id = change
                .value
                .metadata
                .map(|m| m.phone_number_id)
                .unwrap_or_default();
            for message in change.value.messages {
                out.push(IncomingText {
                    phone_number_id: phone_number_id.clone(),
                    from: message.from,
                    body: message.text.map(|t| t.body).unwrap_or_default(),
                });
            }
        }
    }
    out
}

fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Checks an `X-Hub-Signature: sha1=<hex>` header against the raw body.
pub fn validate_signature(app_secret: &str, header: &str, body: &[u8]) -> bool {
    let Some(provided) = header.strip_prefix("sha1=") else {
        return false;
    };

    let mut mac = match Hmac::<Sha1>::new_from_slice(app_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = to_hex(&mac.finalize().into_bytes());

    expected.eq_ignore_ascii_case(provided)
}

// ── Handlers ──

/// Subscription handshake: echoes `hub.challenge` when the token matches.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params.get("hub.verify_token").map(String::as_str).unwrap_or("");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    let expected = &state.config.whatsapp_verify_token;
    if mode == "subscribe" && !expected.is_empty() && token == expected {
        tracing::info!("webhook verified");
        return (StatusCode::OK, challenge).into_response();
    }

    tracing::warn!(mode = %mode, "webhook verification rejected");
    StatusCode::FORBIDDEN.into_response()
}

pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // skipped when no app secret is configured (dev mode)
    if !state.config.whatsapp_app_secret.is_empty() {
        let signature = headers
            .get("x-hub-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !validate_signature(&state.config.whatsapp_app_secret, signature, &body) {
            tracing::warn!("invalid or missing X-Hub-Signature");
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable webhook payload, ignoring");
            return StatusCode::OK.into_response();
        }
    };

    for message in extract_messages(envelope) {
        handle_message(&state, message).await;
    }

    // always acknowledged so the platform does not retry
    StatusCode::OK.into_response()
}

fn resolve_provider_id(state: &AppState, phone_number_id: &str) -> String {
    let found = state
        .db()
        .and_then(|db| queries::get_provider_by_phone_number_id(&db, phone_number_id));
    match found {
        Ok(Some(provider)) => provider.id,
        Ok(None) => state.config.default_provider_id.clone(),
        Err(e) => {
            tracing::error!(error = %e, "provider lookup failed, using default");
            state.config.default_provider_id.clone()
        }
    }
}

async fn handle_message(state: &AppState, message: IncomingText) {
    let inbound = InboundMessage {
        provider_id: resolve_provider_id(state, &message.phone_number_id),
        customer_id: message.from,
        text: message.body,
    };

    tracing::info!(
        provider = %inbound.provider_id,
        from = %inbound.customer_id,
        "incoming WhatsApp message"
    );

    match conversation::process_message(state, &inbound) {
        Ok(outcome) => {
            for reply in &outcome.replies {
                if let Err(e) = state.messaging.send_message(&inbound.customer_id, reply).await {
                    tracing::error!(error = %e, to = %inbound.customer_id, "failed to send reply");
                }
            }
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                from = %inbound.customer_id,
                "conversation processing failed"
            );
            let _ = state
                .messaging
                .send_message(&inbound.customer_id, FALLBACK_REPLY)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_messages() {
        let raw = r#"{
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "4940", "phone_number_id": "pn-1"},
                        "messages": [
                            {"from": "491701", "id": "m1", "type": "text", "text": {"body": "S1"}},
                            {"from": "491702", "id": "m2", "type": "image"}
                        ]
                    }
                }]
            }]
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        let messages = extract_messages(envelope);

        assert_eq!(
            messages,
            vec![
                IncomingText {
                    phone_number_id: "pn-1".to_string(),
                    from: "491701".to_string(),
                    body: "S1".to_string(),
                },
                IncomingText {
                    phone_number_id: "pn-1".to_string(),
                    from: "491702".to_string(),
                    body: String::new(),
                },
            ]
        );
    }

    #[test]
    fn test_status_updates_carry_no_messages() {
        let raw =
            r#"{"entry":[{"changes":[{"value":{"statuses":[{"id":"x","status":"read"}]}}]}]}"#;
        let envelope: WebhookEnvelope = serde_json::from_str(raw).unwrap();
        assert!(extract_messages(envelope).is_empty());
    }

    #[test]
    fn test_validate_signature() {
        let body = br#"{"entry":[]}"#;
        let mut mac = Hmac::<Sha1>::new_from_slice(b"secret").unwrap();
        mac.update(body);
        let header = format!("sha1={}", to_hex(&mac.finalize().into_bytes()));

        assert!(validate_signature("secret", &header, body));
        assert!(!validate_signature("other", &header, body));
        assert!(!validate_signature("secret", "", body));
        assert!(!validate_signature("secret", "sha1=00", body));
    }
}
