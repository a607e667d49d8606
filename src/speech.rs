//! ElevenLabs speech synthesis.
//!
//! Requests raw 16-bit mono PCM (`output_format=pcm_<rate>`) and wraps it
//! in a WAV container so segments can be assembled without a decoder.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::audio::AudioSegment;
use crate::chunker::{preview, TextChunk};
use crate::config::SpeechConfig;
use crate::error::{Error, Result};
use crate::usage::{CallContext, UsageKind, UsageRecord, UsageSink};

/// Characters a job needs against what the account has left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub required: u64,
    pub available: u64,
}

impl Balance {
    pub fn is_sufficient(&self) -> bool {
        self.available >= self.required
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Characters left on the speech account.
    async fn remaining_quota(&self) -> Result<u64>;

    async fn synthesize(&self, chunk: &TextChunk, ctx: &CallContext) -> Result<AudioSegment>;

    /// Characters of text used by [`Synthesizer::generate_preview`].
    fn preview_char_count(&self) -> usize;

    async fn balance(&self, required_chars: u64) -> Result<Balance> {
        Ok(Balance {
            required: required_chars,
            available: self.remaining_quota().await?,
        })
    }

    async fn check_balance(&self, required_chars: u64) -> Result<bool> {
        Ok(self.balance(required_chars).await?.is_sufficient())
    }

    /// Synthesize the lead of `text`, independent of chunking.
    async fn generate_preview(&self, text: &str, ctx: &CallContext) -> Result<AudioSegment> {
        let lead = preview(text, self.preview_char_count());
        let chunk = TextChunk {
            index: 0,
            text: lead.to_string(),
            char_count: lead.chars().count(),
        };
        self.synthesize(&chunk, ctx).await
    }
}

pub struct ElevenLabsClient {
    config: SpeechConfig,
    api_key: String,
    preview_char_count: usize,
    client: Client,
    usage: Arc<dyn UsageSink>,
}

#[derive(Deserialize)]
struct Subscription {
    character_count: u64,
    character_limit: u64,
}

impl ElevenLabsClient {
    pub fn new(
        config: SpeechConfig,
        api_key: String,
        preview_char_count: usize,
        timeout: Duration,
        usage: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            api_key,
            preview_char_count,
            client,
            usage,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn text_to_speech(&self, text: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("/v1/text-to-speech/{}", self.config.voice_id));
        let output_format = format!("pcm_{}", self.config.sample_rate);
        let body = json!({
            "text": text,
            "model_id": self.config.model_id,
        });

        let resp = self
            .client
            .post(&url)
            .query(&[("output_format", output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("ElevenLabs returned status {status}: {detail}")));
        }

        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Upstream("ElevenLabs returned no audio".into()));
        }
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsClient {
    async fn remaining_quota(&self) -> Result<u64> {
        let resp = self
            .client
            .get(self.url("/v1/user/subscription"))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!(
                "ElevenLabs subscription lookup returned status {}",
                resp.status()
            )));
        }

        let sub: Subscription = resp.json().await?;
        debug!("ElevenLabs quota: {}/{} used", sub.character_count, sub.character_limit);
        Ok(sub.character_limit.saturating_sub(sub.character_count))
    }

    async fn synthesize(&self, chunk: &TextChunk, ctx: &CallContext) -> Result<AudioSegment> {
        // Lossless chunking can leave a trailing run of whitespace; it costs
        // nothing and plays as silence of zero length.
        if chunk.text.trim().is_empty() {
            debug!("Chunk {} is whitespace only, skipping the API call", chunk.index);
            return AudioSegment::from_pcm16(chunk.index, &[], self.config.sample_rate, 1);
        }

        let t_start = Instant::now();
        let audio = self.text_to_speech(&chunk.text).await?;

        self.usage.record(UsageRecord::now(
            UsageKind::Synthesize,
            chunk.char_count as u64,
            chunk.char_count as f64 * self.config.cost_per_character,
            ctx,
        ));

        let segment = if audio.starts_with(b"RIFF") {
            AudioSegment::from_wav(chunk.index, audio)?
        } else {
            AudioSegment::from_pcm16(chunk.index, &audio, self.config.sample_rate, 1)?
        };

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Synthesized chunk {} ({} chars → {:.1}s audio, {latency_ms:.0}ms)",
            chunk.index, chunk.char_count, segment.duration
        );
        Ok(segment)
    }

    fn preview_char_count(&self) -> usize {
        self.preview_char_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_sufficiency() {
        assert!(Balance { required: 10, available: 10 }.is_sufficient());
        assert!(!Balance { required: 11, available: 10 }.is_sufficient());
    }
}
