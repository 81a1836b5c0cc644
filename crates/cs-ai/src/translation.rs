//! `TranslationAdapter` (§4.3): idempotent message translation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cs_core::domain::Message;
use cs_core::{CsError, Result};
use std::time::Duration;

const REQUEST_DEADLINE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct Translation {
    pub translated_content: String,
    pub source_lang: String,
    pub provider: String,
    pub translated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TranslationAdapter: Send + Sync {
    /// Returns the cached translation from `message.metadata` if present
    /// (§4.3, §8 idempotence); otherwise calls the external provider.
    async fn translate(&self, message: &Message, target_lang: &str) -> Result<Translation>;
}

pub struct HttpTranslationAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider_name: String,
}

impl HttpTranslationAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            provider_name: "generic-translate".to_string(),
        }
    }
}

#[async_trait]
impl TranslationAdapter for HttpTranslationAdapter {
    async fn translate(&self, message: &Message, target_lang: &str) -> Result<Translation> {
        if let Some(cached) = message.cached_translation(target_lang) {
            return Ok(Translation {
                translated_content: cached.to_string(),
                source_lang: message
                    .metadata
                    .get("detectedLanguage")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                provider: self.provider_name.clone(),
                translated_at: message.created_at,
            });
        }

        let call = async {
            let body = serde_json::json!({
                "text": message.content,
                "target_lang": target_lang,
            });
            let resp = self
                .client
                .post(format!("{}/translate", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| CsError::Translation(format!("translate call failed: {e}")))?;
            if !resp.status().is_success() {
                return Err(CsError::Translation(format!("translate call returned {}", resp.status())));
            }
            let raw: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| CsError::Translation(format!("translate response not json: {e}")))?;
            let translated_content = raw
                .get("translated_text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| CsError::Translation("missing translated_text".to_string()))?
                .to_string();
            let source_lang = raw
                .get("detected_source_lang")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            Ok((translated_content, source_lang))
        };

        let (translated_content, source_lang) = tokio::time::timeout(REQUEST_DEADLINE, call)
            .await
            .map_err(|_| CsError::Translation("translate call timed out".to_string()))??;

        Ok(Translation {
            translated_content,
            source_lang,
            provider: self.provider_name.clone(),
            translated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::domain::{MessageType, SenderType};
    use cs_core::ids::{MessageId, SessionId};
    use std::collections::BTreeMap;

    fn message_with_cache(target_lang: &str, cached: &str) -> Message {
        let mut metadata = BTreeMap::new();
        metadata.insert(Message::translation_cache_key(target_lang), cached.to_string());
        Message {
            id: MessageId::new(),
            session_id: SessionId::new(),
            sender_type: SenderType::Player,
            message_type: MessageType::Text,
            content: "hello".to_string(),
            agent_id: None,
            metadata,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn cached_translation_short_circuits_the_network() {
        let adapter = HttpTranslationAdapter::new("http://unreachable.invalid", "key");
        let message = message_with_cache("ko", "안녕하세요");
        let result = adapter.translate(&message, "ko").await.expect("cache hit");
        assert_eq!(result.translated_content, "안녕하세요");
    }
}
