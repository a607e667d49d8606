//! Rewriting article text for narration.
//!
//! Sends the whole article to a language model that spells out numerals,
//! expands abbreviations and drops citation markers. Two backends: the
//! OpenAI Chat Completions API and a local Ollama `/api/generate`.
//! Unlike a best-effort cleanup, failure here is fatal: the pipeline never
//! narrates text that wasn't rewritten.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{RewriterBackend, RewriterConfig};
use crate::error::{Error, Result};
use crate::usage::{CallContext, UsageKind, UsageRecord, UsageSink};
use crate::wikipedia::Article;

const PREPROCESSING_PROMPT: &str = r#"You are a text preprocessor optimizing content for text-to-speech.

Apply these transformations to the input text:
1. Convert Arabic numerals to written words (e.g., "1" → "one", "1990" → "nineteen ninety")
2. Expand acronyms where spelling them out helps pronunciation (e.g., "USA" → "U.S.A.")
3. Expand abbreviations (e.g., "Dr." → "Doctor", "etc." → "et cetera")
4. Replace semicolons with periods for natural pauses
5. Remove or rephrase parenthetical asides that sound awkward when spoken
6. Remove citation markers like [1], [2], etc.

Keep the meaning and the paragraph structure. Return ONLY the processed text with no explanations or commentary."#;

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[ \t]*\[(?:\d+|note \d+|[a-z]|citation needed)\]").expect("citation regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub source_topic: String,
}

#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, article: &Article, ctx: &CallContext) -> Result<NormalizedText>;
}

pub struct TextNormalizer {
    config: RewriterConfig,
    api_key: Option<String>,
    client: Client,
    usage: Arc<dyn UsageSink>,
}

struct Rewrite {
    text: String,
    input_tokens: u64,
    output_tokens: u64,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl TextNormalizer {
    /// The OpenAI backend requires `api_key`; Ollama ignores it.
    pub fn new(
        config: RewriterConfig,
        api_key: Option<String>,
        timeout: Duration,
        usage: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        if config.backend == RewriterBackend::OpenAi && api_key.is_none() {
            return Err(Error::Config(format!(
                "OpenAI rewriter needs an API key in {}",
                config.api_key_env
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            api_key,
            client,
            usage,
        })
    }

    async fn rewrite_openai(&self, text: &str) -> Result<Rewrite> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": PREPROCESSING_PROMPT},
                {"role": "user", "content": text},
            ],
            "temperature": self.config.temperature,
        });
        let url = format!("{}/chat/completions", self.config.host.trim_end_matches('/'));

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("OpenAI returned status {status}: {detail}")));
        }

        let data: ChatResponse = resp.json().await?;
        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (input_tokens, output_tokens) = data
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Rewrite {
            text,
            input_tokens,
            output_tokens,
        })
    }

    async fn rewrite_ollama(&self, text: &str) -> Result<Rewrite> {
        let body = json!({
            "model": self.config.model,
            "prompt": format!("{PREPROCESSING_PROMPT}\n\nText:\n{text}\n\nProcessed:"),
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
            }
        });
        let url = format!("{}/api/generate", self.config.host.trim_end_matches('/'));

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Upstream(format!("Ollama returned status {}", resp.status())));
        }

        let data: OllamaResponse = resp.json().await?;
        Ok(Rewrite {
            text: data.response,
            input_tokens: data.prompt_eval_count,
            output_tokens: data.eval_count,
        })
    }

    fn cost(&self, rewrite: &Rewrite) -> f64 {
        match self.config.backend {
            RewriterBackend::OpenAi => {
                rewrite.input_tokens as f64 * self.config.input_cost_per_million / 1_000_000.0
                    + rewrite.output_tokens as f64 * self.config.output_cost_per_million
                        / 1_000_000.0
            }
            RewriterBackend::Ollama => 0.0,
        }
    }
}

#[async_trait]
impl Normalizer for TextNormalizer {
    async fn normalize(&self, article: &Article, ctx: &CallContext) -> Result<NormalizedText> {
        let t_start = Instant::now();
        debug!(
            "Sending {} chars to {:?} model '{}'",
            article.raw_text.len(),
            self.config.backend,
            self.config.model
        );

        let rewrite = match self.config.backend {
            RewriterBackend::OpenAi => self.rewrite_openai(&article.raw_text).await?,
            RewriterBackend::Ollama => self.rewrite_ollama(&article.raw_text).await?,
        };

        self.usage.record(UsageRecord::now(
            UsageKind::Normalize,
            rewrite.input_tokens + rewrite.output_tokens,
            self.cost(&rewrite),
            ctx,
        ));

        let text = strip_citations(rewrite.text.trim());
        if text.is_empty() {
            return Err(Error::Upstream("rewriting service returned empty text".into()));
        }

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        info!(
            "Normalized {} chars → {} chars ({latency_ms:.0}ms)",
            article.raw_text.chars().count(),
            text.chars().count()
        );

        Ok(NormalizedText {
            text,
            source_topic: article.topic.clone(),
        })
    }
}

/// Remove citation markers the model left behind.
pub fn strip_citations(text: &str) -> String {
    CITATION.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::MemoryUsageLog;

    #[test]
    fn strips_leftover_citations() {
        assert_eq!(
            strip_citations("It happened in nineteen forty-five [3]. Later[12][note 4] more."),
            "It happened in nineteen forty-five. Later more."
        );
        assert_eq!(strip_citations("Keep [brackets like this]."), "Keep [brackets like this].");
    }

    #[test]
    fn openai_backend_requires_a_key() {
        let result = TextNormalizer::new(
            RewriterConfig::default(),
            None,
            Duration::from_secs(5),
            Arc::new(MemoryUsageLog::default()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn ollama_backend_needs_no_key_and_costs_nothing() {
        let config = RewriterConfig {
            backend: RewriterBackend::Ollama,
            ..RewriterConfig::default()
        };
        let normalizer =
            TextNormalizer::new(config, None, Duration::from_secs(5), Arc::new(MemoryUsageLog::default()))
                .unwrap();
        let rewrite = Rewrite {
            text: String::new(),
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        };
        assert_eq!(normalizer.cost(&rewrite), 0.0);
    }

    #[test]
    fn openai_cost_uses_per_million_prices() {
        let normalizer = TextNormalizer::new(
            RewriterConfig::default(),
            Some("sk-test".into()),
            Duration::from_secs(5),
            Arc::new(MemoryUsageLog::default()),
        )
        .unwrap();
        let rewrite = Rewrite {
            text: String::new(),
            input_tokens: 2_000_000,
            output_tokens: 1_000_000,
        };
        assert!((normalizer.cost(&rewrite) - 0.90).abs() < 1e-9);
    }
}
