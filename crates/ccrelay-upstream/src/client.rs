use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ccrelay_core::config::UpstreamConfig;
use ccrelay_core::credential::Credential;
use ccrelay_core::usage::{UsageSnapshot, WindowUsage};

use crate::error::UpstreamError;
use crate::sse::{CompletionEvent, SseDecoder};

/// Browser-like identity presented to the upstream session endpoints.
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Error bodies are truncated to this many characters before they travel.
const BODY_PREFIX_CHARS: usize = 512;

/// Upstream-assigned conversation id, discarded after the response is sent.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMeta {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Stateless HTTP operations against the upstream chat-conversation service.
/// Never retries — retry avoidance is the selector's job on the next request.
pub struct CcapiClient {
    /// Control-plane calls: usage, conversation list/create.
    client: reqwest::Client,
    /// Completion calls: generous timeout for long streams.
    stream_client: reqwest::Client,
}

impl CcapiClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let stream_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.stream_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            stream_client,
        }
    }

    fn org_url(cred: &Credential, suffix: &str) -> String {
        format!(
            "{}/api/organizations/{}{}",
            cred.base_url, cred.org_id, suffix
        )
    }

    /// Browser-session headers shared by every upstream call.
    fn apply_session(
        builder: reqwest::RequestBuilder,
        cred: &Credential,
        accept: &str,
    ) -> reqwest::RequestBuilder {
        builder
            .header("Cookie", format!("sessionKey={}", cred.session_key))
            .header("User-Agent", USER_AGENT)
            .header("Origin", &cred.base_url)
            .header("Referer", &cred.base_url)
            .header("Accept", accept)
    }

    pub async fn fetch_usage(&self, cred: &Credential) -> Result<UsageSnapshot, UpstreamError> {
        let url = Self::org_url(cred, "/usage");
        debug!(credential = %cred.id, "fetching usage");

        let resp = Self::apply_session(self.client.get(&url), cred, "*/*")
            .send()
            .await?;
        let body = Self::read_ok_body(resp).await?;

        // One object per window; entries that don't look like a window
        // (missing utilization) are dropped, unknown windows are kept.
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(e.to_string()))?;
        let windows = raw
            .into_iter()
            .filter_map(|(name, value)| {
                serde_json::from_value::<WindowUsage>(value)
                    .ok()
                    .map(|w| (name, w))
            })
            .collect();

        Ok(UsageSnapshot::new(windows))
    }

    pub async fn list_conversations(
        &self,
        cred: &Credential,
    ) -> Result<Vec<ConversationMeta>, UpstreamError> {
        let url = Self::org_url(cred, "/chat_conversations");
        let resp = Self::apply_session(self.client.get(&url), cred, "*/*")
            .send()
            .await?;
        let body = Self::read_ok_body(resp).await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(e.to_string()))
    }

    pub async fn create_conversation(
        &self,
        cred: &Credential,
        name: &str,
        is_temporary: bool,
    ) -> Result<ConversationHandle, UpstreamError> {
        let url = Self::org_url(cred, "/chat_conversations");
        let body = json!({
            "uuid": uuid::Uuid::new_v4(),
            "name": name,
            "is_temporary": is_temporary,
            "include_conversation_preferences": true,
        });

        debug!(credential = %cred.id, is_temporary, "creating conversation");

        let resp = Self::apply_session(self.client.post(&url), cred, "*/*")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let body = Self::read_ok_body(resp).await?;

        #[derive(Deserialize)]
        struct Created {
            uuid: String,
        }
        let created: Created =
            serde_json::from_str(&body).map_err(|e| UpstreamError::Parse(e.to_string()))?;
        Ok(ConversationHandle { uuid: created.uuid })
    }

    /// Run a completion and hand back the raw SSE body for offline decode.
    pub async fn send_completion_buffered(
        &self,
        cred: &Credential,
        conv: &ConversationHandle,
        prompt: &str,
    ) -> Result<String, UpstreamError> {
        let resp = self.start_completion(cred, conv, prompt).await?;
        resp.text()
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))
    }

    /// Run a completion, forwarding decoded events as they arrive. Returns
    /// the accumulated completion text. A dropped receiver aborts the
    /// upstream read — that is how client disconnects cancel the call.
    pub async fn send_completion_streaming(
        &self,
        cred: &Credential,
        conv: &ConversationHandle,
        prompt: &str,
        tx: mpsc::Sender<CompletionEvent>,
    ) -> Result<String, UpstreamError> {
        let resp = self.start_completion(cred, conv, prompt).await?;

        let mut decoder = SseDecoder::new();
        let mut full_text = String::new();
        let mut byte_stream = resp.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| UpstreamError::Body(e.to_string()))?;
            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };
            for event in decoder.push(text) {
                if let CompletionEvent::Delta(ref t) = event {
                    full_text.push_str(t);
                }
                if tx.send(event).await.is_err() {
                    debug!(credential = %cred.id, "stream receiver dropped, aborting upstream read");
                    return Ok(full_text);
                }
            }
            if decoder.is_stopped() {
                break;
            }
        }

        for event in decoder.finish() {
            if let CompletionEvent::Delta(ref t) = event {
                full_text.push_str(t);
            }
            let _ = tx.send(event).await;
        }

        Ok(full_text)
    }

    async fn start_completion(
        &self,
        cred: &Credential,
        conv: &ConversationHandle,
        prompt: &str,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = Self::org_url(
            cred,
            &format!("/chat_conversations/{}/completion", conv.uuid),
        );
        let body = json!({
            "prompt": prompt,
            "timezone": "UTC",
        });

        debug!(credential = %cred.id, conversation = %conv.uuid, prompt_len = prompt.len(), "sending completion");

        let resp = Self::apply_session(self.stream_client.post(&url), cred, "text/event-stream")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "completion request rejected");
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                body: body_prefix(&body),
            });
        }
        Ok(resp)
    }

    /// 2xx => body text; anything else => typed Api error with a body prefix.
    async fn read_ok_body(resp: reqwest::Response) -> Result<String, UpstreamError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Body(e.to_string()))?;
        if !status.is_success() {
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                body: body_prefix(&body),
            });
        }
        Ok(body)
    }
}

fn body_prefix(body: &str) -> String {
    body.chars().take(BODY_PREFIX_CHARS).collect()
}
