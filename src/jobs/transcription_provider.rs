//! Transcription provider adapters (§1 non-goal: "only the segment-list
//! contract is contracted"). Both concrete adapters below are thin HTTP
//! clients in the same style as the teacher's `backup_trigger.rs` GitHub
//! dispatch call — a `reqwest::Client`, a bearer header, a JSON body — kept
//! deliberately minimal since the wire contract with each provider is
//! outside this crate's scope.

use async_trait::async_trait;

use crate::config::Config;
use crate::vtt::TranscriptSegment;
use crate::{AppError, Result};

#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(&self, audio_bytes: Vec<u8>) -> Result<Vec<TranscriptSegment>>;
}

pub struct DeepgramProvider {
    client: reqwest::Client,
    api_key: String,
}

impl DeepgramProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for DeepgramProvider {
    async fn transcribe(&self, audio_bytes: Vec<u8>) -> Result<Vec<TranscriptSegment>> {
        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen?punctuate=true&utterances=true")
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/mp4")
            .body(audio_bytes)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("deepgram request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "deepgram returned {}: {}",
                status, body
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("failed to parse deepgram response: {}", e)))?;

        let utterances = body
            .pointer("/results/utterances")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(utterances
            .into_iter()
            .filter_map(|u| {
                Some(TranscriptSegment {
                    start_sec: u.get("start")?.as_f64()?,
                    end_sec: u.get("end")?.as_f64()?,
                    text: u.get("transcript")?.as_str()?.to_string(),
                })
            })
            .collect())
    }
}

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl TranscriptionProvider for GeminiProvider {
    async fn transcribe(&self, audio_bytes: Vec<u8>) -> Result<Vec<TranscriptSegment>> {
        use base64::Engine;

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(&audio_bytes);
        let payload = serde_json::json!({
            "contents": [{
                "parts": [
                    {"text": "Transcribe this audio into timestamped segments as JSON: [{\"start_sec\":0,\"end_sec\":0,\"text\":\"\"}]"},
                    {"inline_data": {"mime_type": "audio/mp4", "data": encoded}}
                ]
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!("gemini returned {}: {}", status, body)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("failed to parse gemini response: {}", e)))?;

        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Internal("gemini response missing transcript text".to_string()))?;

        serde_json::from_str::<Vec<TranscriptSegment>>(text)
            .map_err(|e| AppError::Internal(format!("failed to parse gemini segment list: {}", e)))
    }
}

/// Selects a provider from configuration (§6: `DEEPGRAM_API_KEY` or
/// `GEMINI_API_KEY`). `None` means the transcription worker should not
/// start at all.
pub fn from_config(config: &Config) -> Option<Box<dyn TranscriptionProvider>> {
    if let Some(key) = &config.deepgram_api_key {
        return Some(Box::new(DeepgramProvider::new(key.clone())));
    }
    if let Some(key) = &config.gemini_api_key {
        return Some(Box::new(GeminiProvider::new(key.clone(), config.gemini_model.clone())));
    }
    None
}
