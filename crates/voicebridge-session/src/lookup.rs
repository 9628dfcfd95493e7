//! `lookup_customer` support: a small GET against the same backend webhook
//! `voicebridge-transfer::TicketWebhookClient` posts to, grounded on the same
//! `Kimjaechol-MoA_new::integrations::supabase::SupabaseClient` `reqwest`
//! idiom. Kept here rather than in `voicebridge-transfer` since it has
//! nothing to do with transfers — it only happens to share a backend.

use std::time::Duration;

use serde_json::Value;

use voicebridge_core::VoiceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const LOOKUP_PATH: &str = "/api/customers/lookup";

pub struct CustomerLookupClient {
    http: reqwest::Client,
    backend_url: String,
    token: String,
}

impl CustomerLookupClient {
    pub fn new(backend_url: impl Into<String>, token: impl Into<String>) -> Result<Self, VoiceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Internal {
                detail: format!("failed to build customer lookup client: {e}"),
            })?;
        Ok(Self {
            http,
            backend_url: backend_url.into(),
            token: token.into(),
        })
    }

    /// `query` is passed through as the JSON body of a POST; the backend
    /// resolves it against whatever identifiers it was given (phone number,
    /// account id, ...).
    pub async fn lookup(&self, query: &Value) -> Result<Value, VoiceError> {
        let url = format!("{}{LOOKUP_PATH}", self.backend_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(query)
            .send()
            .await
            .map_err(|e| VoiceError::Internal {
                detail: format!("customer lookup request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(VoiceError::Internal {
                detail: format!("customer lookup returned {}", resp.status()),
            });
        }

        resp.json::<Value>().await.map_err(|e| VoiceError::Internal {
            detail: format!("malformed customer lookup response: {e}"),
        })
    }
}
