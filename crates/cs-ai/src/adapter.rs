//! `AIAdapter` (§4.2): triage, chat, and draft-optimize against the game's
//! configured AI provider.

use async_trait::async_trait;
use cs_core::domain::Urgency;
use cs_core::{CsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crypto::EncryptionKey;
use crate::sanitize::sanitize_reply_text;

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub text: String,
    pub suggested_options: Vec<String>,
    pub detected_intent: String,
    pub urgency: Urgency,
    pub conversation_handle: Option<String>,
}

impl TriageResult {
    /// The deterministic fallback returned when both the workflow and chat
    /// endpoints fail (§4.2) — never an `Err`, so a flaky provider degrades
    /// the conversation instead of blocking it.
    pub fn safe_default() -> Self {
        Self {
            text: "Thanks for reaching out — I've noted your issue and a team member will follow up shortly."
                .to_string(),
            suggested_options: vec!["talk to an agent".to_string(), "view FAQ".to_string()],
            detected_intent: "unknown".to_string(),
            urgency: Urgency::NonUrgent,
            conversation_handle: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub text: String,
    pub conversation_handle: String,
}

#[derive(Debug, Clone)]
pub struct GameCredentials {
    pub ciphertext: String,
    pub base_url: String,
}

#[async_trait]
pub trait AIAdapter: Send + Sync {
    async fn triage(&self, description: &str, credentials: &GameCredentials) -> Result<TriageResult>;

    async fn chat(
        &self,
        query: &str,
        credentials: &GameCredentials,
        conversation_handle: Option<&str>,
        user_key: &str,
    ) -> Result<ChatResult>;

    /// On failure, returns `draft` unchanged (§4.2) — the caller never sees
    /// an error from this operation.
    async fn optimize(&self, draft: &str, context: &str, credentials: &GameCredentials) -> String;
}

pub struct HttpAIAdapter {
    client: reqwest::Client,
    encryption_key: EncryptionKey,
}

impl HttpAIAdapter {
    pub fn new(encryption_key: EncryptionKey) -> Self {
        Self {
            client: reqwest::Client::new(),
            encryption_key,
        }
    }

    async fn call_workflow(
        &self,
        api_key: &str,
        base_url: &str,
        description: &str,
    ) -> Result<TriageResult> {
        let body = serde_json::json!({
            "inputs": { "query": description },
            "response_mode": "blocking",
        });
        let resp = self
            .client
            .post(format!("{base_url}/workflows/run"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CsError::Ai(format!("workflow call failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CsError::Ai(format!("workflow call returned {}", resp.status())));
        }
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CsError::Ai(format!("workflow response not json: {e}")))?;
        parse_triage_response(&raw)
    }

    async fn call_chat_as_triage(
        &self,
        api_key: &str,
        base_url: &str,
        description: &str,
    ) -> Result<TriageResult> {
        let chat = self.call_chat(description, api_key, base_url, None, "triage-fallback").await?;
        Ok(TriageResult {
            text: chat.text,
            suggested_options: vec!["talk to an agent".to_string(), "view FAQ".to_string()],
            detected_intent: "unknown".to_string(),
            urgency: Urgency::NonUrgent,
            conversation_handle: Some(chat.conversation_handle),
        })
    }

    async fn call_chat(
        &self,
        query: &str,
        api_key: &str,
        base_url: &str,
        conversation_handle: Option<&str>,
        user_key: &str,
    ) -> Result<ChatResult> {
        let body = serde_json::json!({
            "query": query,
            "conversation_id": conversation_handle,
            "user": user_key,
            "response_mode": "blocking",
        });
        let resp = self
            .client
            .post(format!("{base_url}/chat-messages"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CsError::Ai(format!("chat call failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CsError::Ai(format!("chat call returned {}", resp.status())));
        }
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CsError::Ai(format!("chat response not json: {e}")))?;
        let answer = raw.get("answer").and_then(|v| v.as_str()).unwrap_or_default();
        let handle = raw
            .get("conversation_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| conversation_handle.map(str::to_string))
            .unwrap_or_default();
        Ok(ChatResult {
            text: sanitize_reply_text(answer),
            conversation_handle: handle,
        })
    }
}

fn parse_triage_response(raw: &serde_json::Value) -> Result<TriageResult> {
    let data = raw.get("data").unwrap_or(raw);
    let outputs = data.get("outputs").unwrap_or(data);

    let text = outputs
        .get("text")
        .or_else(|| outputs.get("reply"))
        .and_then(|v| v.as_str())
        .map(sanitize_reply_text)
        .ok_or_else(|| CsError::Ai("triage response missing text output".to_string()))?;

    let suggested_options = outputs
        .get("suggested_options")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let detected_intent = outputs
        .get("intent")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let urgency = match outputs.get("urgency").and_then(|v| v.as_str()) {
        Some("urgent") => Urgency::Urgent,
        _ => Urgency::NonUrgent,
    };

    let conversation_handle = data
        .get("conversation_id")
        .or_else(|| outputs.get("conversation_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    Ok(TriageResult {
        text,
        suggested_options,
        detected_intent,
        urgency,
        conversation_handle,
    })
}

#[async_trait]
impl AIAdapter for HttpAIAdapter {
    async fn triage(&self, description: &str, credentials: &GameCredentials) -> Result<TriageResult> {
        let api_key = self.encryption_key.decrypt_credential(&credentials.ciphertext)?;

        let outcome = tokio::time::timeout(
            REQUEST_DEADLINE,
            self.call_workflow(&api_key, &credentials.base_url, description),
        )
        .await;

        let primary_result = match outcome {
            Ok(result) => result,
            Err(_) => Err(CsError::Ai("workflow call timed out".to_string())),
        };

        if let Ok(triage) = primary_result {
            return Ok(triage);
        }

        let fallback = tokio::time::timeout(
            REQUEST_DEADLINE,
            self.call_chat_as_triage(&api_key, &credentials.base_url, description),
        )
        .await;

        match fallback {
            Ok(Ok(triage)) => Ok(triage),
            _ => {
                tracing::warn!("AI triage workflow and chat fallback both failed; using safe default");
                Ok(TriageResult::safe_default())
            }
        }
    }

    async fn chat(
        &self,
        query: &str,
        credentials: &GameCredentials,
        conversation_handle: Option<&str>,
        user_key: &str,
    ) -> Result<ChatResult> {
        let api_key = self.encryption_key.decrypt_credential(&credentials.ciphertext)?;
        tokio::time::timeout(
            REQUEST_DEADLINE,
            self.call_chat(query, &api_key, &credentials.base_url, conversation_handle, user_key),
        )
        .await
        .map_err(|_| CsError::Ai("chat call timed out".to_string()))?
    }

    async fn optimize(&self, draft: &str, context: &str, credentials: &GameCredentials) -> String {
        let Ok(api_key) = self.encryption_key.decrypt_credential(&credentials.ciphertext) else {
            return draft.to_string();
        };
        let query = format!("Rewrite this draft agent reply to be clearer and more polite.\nContext: {context}\nDraft: {draft}");
        let outcome = tokio::time::timeout(
            REQUEST_DEADLINE,
            self.call_chat(&query, &api_key, &credentials.base_url, None, "optimize"),
        )
        .await;
        match outcome {
            Ok(Ok(result)) => result.text,
            _ => draft.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_workflow_response() {
        let raw = serde_json::json!({
            "data": {
                "outputs": {
                    "text": "{\"text\": \"we can help with that\"}",
                    "intent": "refund_request",
                    "urgency": "urgent",
                    "suggested_options": ["refund", "escalate"],
                },
                "conversation_id": "conv-123",
            }
        });
        let triage = parse_triage_response(&raw).expect("parses");
        assert_eq!(triage.text, "we can help with that");
        assert_eq!(triage.detected_intent, "refund_request");
        assert_eq!(triage.urgency, Urgency::Urgent);
        assert_eq!(triage.conversation_handle.as_deref(), Some("conv-123"));
    }

    #[test]
    fn missing_text_output_is_an_error() {
        let raw = serde_json::json!({ "data": { "outputs": {} } });
        assert!(parse_triage_response(&raw).is_err());
    }

    #[test]
    fn safe_default_is_non_urgent_with_manual_escalation_option() {
        let fallback = TriageResult::safe_default();
        assert_eq!(fallback.urgency, Urgency::NonUrgent);
        assert_eq!(fallback.detected_intent, "unknown");
        assert!(!fallback.suggested_options.is_empty());
    }
}
