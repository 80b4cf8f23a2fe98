use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

/// Plain-text sender for the WhatsApp Cloud API.
pub struct WhatsAppCloudProvider {
    api_url: String,
    access_token: String,
    phone_number_id: String,
    client: reqwest::Client,
}

impl WhatsAppCloudProvider {
    pub fn new(api_url: String, access_token: String, phone_number_id: String) -> Self {
        Self {
            api_url,
            access_token,
            phone_number_id,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MessagingProvider for WhatsAppCloudProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/{}/messages",
            self.api_url.trim_end_matches('/'),
            self.phone_number_id
        );

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        });

        self.client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .context("failed to send WhatsApp message")?
            .error_for_status()
            .context("WhatsApp API returned error")?;

        Ok(())
    }
}
