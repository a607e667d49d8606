//! Topic-to-episode orchestration.
//!
//! fetch → normalize → quota → (preview) → synthesize per chunk → assemble.
//! Every call is awaited before the next starts. The first failure stops
//! the run: audio synthesized so far is dropped and no output is written.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::audio::{AudioSegment, Assembler, PodcastFile};
use crate::chunker::{self, Chunks};
use crate::error::{AtStage, Error, Stage, StageError};
use crate::normalizer::{NormalizedText, Normalizer};
use crate::speech::{Balance, Synthesizer};
use crate::usage::CallContext;
use crate::wikipedia::ArticleSource;

pub type StageResult<T> = std::result::Result<T, StageError>;

/// Confirm the page exists, fetch it and rewrite it for narration.
///
/// A missing page fails at the fetch stage before anything else is
/// requested.
pub async fn prepare(
    source: &dyn ArticleSource,
    normalizer: &dyn Normalizer,
    topic: &str,
    ctx: &CallContext,
) -> StageResult<NormalizedText> {
    info!("Checking Wikipedia for '{topic}'");
    if !source.page_exists(topic).await.at(Stage::Fetch)? {
        return Err(StageError::new(
            Stage::Fetch,
            Error::NotFound(format!("no Wikipedia page for '{topic}'")),
        ));
    }

    let article = source.fetch_article(topic, ctx).await.at(Stage::Fetch)?;
    info!("Normalizing '{}' ({} chars)", article.topic, article.raw_text.chars().count());
    normalizer.normalize(&article, ctx).await.at(Stage::Normalize)
}

/// The speech half of the pipeline: quota, preview, synthesis, assembly.
pub struct Narrator {
    synthesizer: Arc<dyn Synthesizer>,
    assembler: Arc<dyn Assembler>,
    chunk_size: usize,
}

impl Narrator {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        assembler: Arc<dyn Assembler>,
        chunk_size: usize,
    ) -> Self {
        Self {
            synthesizer,
            assembler,
            chunk_size,
        }
    }

    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        chunker::chunk(text, self.chunk_size)
    }

    /// Fail with [`Error::InsufficientQuota`] unless the speech account
    /// covers every character of `text`.
    pub async fn ensure_quota(&self, text: &str) -> StageResult<Balance> {
        let required = text.chars().count() as u64;
        let balance = self.synthesizer.balance(required).await.at(Stage::Quota)?;
        info!("Speech quota: {} required, {} available", balance.required, balance.available);

        if !balance.is_sufficient() {
            return Err(StageError::new(
                Stage::Quota,
                Error::InsufficientQuota {
                    required: balance.required,
                    available: balance.available,
                },
            ));
        }
        Ok(balance)
    }

    pub async fn preview(
        &self,
        normalized: &NormalizedText,
        ctx: &CallContext,
    ) -> StageResult<AudioSegment> {
        self.synthesizer
            .generate_preview(&normalized.text, ctx)
            .await
            .at(Stage::Preview)
    }

    /// One segment per chunk, in chunk order. Stops at the first failure.
    pub async fn synthesize_all(
        &self,
        text: &str,
        ctx: &CallContext,
    ) -> StageResult<Vec<AudioSegment>> {
        let total = self.chunks(text).count();
        let mut segments = Vec::with_capacity(total);

        for chunk in self.chunks(text) {
            info!("Synthesizing chunk {}/{total} ({} chars)", chunk.index + 1, chunk.char_count);
            let segment = self.synthesizer.synthesize(&chunk, ctx).await.at(Stage::Synthesize)?;
            segments.push(segment);
        }
        Ok(segments)
    }

    pub fn assemble(&self, segments: &[AudioSegment], output: &Path) -> StageResult<PodcastFile> {
        self.assembler.assemble(segments, output).at(Stage::Assemble)
    }

    /// Synthesize and assemble already-normalized text.
    pub async fn narrate(
        &self,
        normalized: &NormalizedText,
        output: &Path,
        ctx: &CallContext,
    ) -> StageResult<PodcastFile> {
        let segments = self.synthesize_all(&normalized.text, ctx).await?;
        let podcast = self.assemble(&segments, output)?;
        info!(
            "Wrote {} ({:.1}s, {} segments)",
            podcast.path.display(),
            podcast.duration,
            podcast.segment_count
        );
        Ok(podcast)
    }
}

pub struct Pipeline {
    source: Arc<dyn ArticleSource>,
    normalizer: Arc<dyn Normalizer>,
    narrator: Narrator,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        normalizer: Arc<dyn Normalizer>,
        narrator: Narrator,
    ) -> Self {
        Self {
            source,
            normalizer,
            narrator,
        }
    }

    pub async fn prepare(&self, topic: &str, ctx: &CallContext) -> StageResult<NormalizedText> {
        prepare(self.source.as_ref(), self.normalizer.as_ref(), topic, ctx).await
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    /// Full unattended run: no preview, no prompt.
    pub async fn run(
        &self,
        topic: &str,
        output: &Path,
        ctx: &CallContext,
    ) -> StageResult<PodcastFile> {
        let normalized = self.prepare(topic, ctx).await?;
        self.narrator.ensure_quota(&normalized.text).await?;
        self.narrator.narrate(&normalized, output, ctx).await
    }
}
