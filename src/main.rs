//! wiki-podcast: turn a Wikipedia article into a narrated episode.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wiki_podcast::audio::{default_output_path, save_preview, WavAssembler};
use wiki_podcast::cache::TextCache;
use wiki_podcast::config::{self, Config, RewriterBackend};
use wiki_podcast::error::{AtStage, Stage};
use wiki_podcast::normalizer::{NormalizedText, TextNormalizer};
use wiki_podcast::pipeline::{self, Narrator, StageResult};
use wiki_podcast::speech::ElevenLabsClient;
use wiki_podcast::usage::{self, CallContext, JsonlUsageLog, UsageSink};
use wiki_podcast::wikipedia::WikipediaClient;
use wiki_podcast::Result;

#[derive(Parser, Debug)]
#[command(name = "wiki-podcast", about = "Turn Wikipedia articles into podcast episodes")]
struct Args {
    /// Wikipedia article title
    #[arg(required_unless_present_any = ["usage", "list_cache"])]
    topic: Option<String>,

    /// Output file (extension picks the format; non-WAV needs ffmpeg)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the preview and confirmation prompt
    #[arg(long)]
    auto: bool,

    /// Generate and save the preview, then stop
    #[arg(long)]
    preview_only: bool,

    /// Print the usage and cost report, then exit
    #[arg(long)]
    usage: bool,

    /// Fetch and normalize only, saving the text to the cache
    #[arg(long, conflicts_with = "from_cache")]
    cache_only: bool,

    /// Narrate previously cached text instead of fetching
    #[arg(long)]
    from_cache: bool,

    /// List cached topics, then exit
    #[arg(long)]
    list_cache: bool,

    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    // Keep HTTP internals quiet; logs go to stderr so reports stay on stdout
    let filter = if args.verbose {
        EnvFilter::new("debug,reqwest=warn,hyper=warn,hyper_util=warn")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn,hyper_util=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());
    config.validate()?;

    if args.usage {
        let records = usage::load_records(&config.pipeline.usage_log);
        println!("{}", usage::generate_report(&records));
        return Ok(ExitCode::SUCCESS);
    }

    if args.list_cache {
        let topics = TextCache::new(&config.pipeline.cache_dir).list();
        if topics.is_empty() {
            println!("No cached topics.");
        }
        for topic in topics {
            println!("{topic}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(topic) = args.topic.as_deref() else {
        error!("A topic is required");
        return Ok(ExitCode::from(2));
    };

    match execute(&args, &config, topic).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{e}");
            eprintln!("Error in {} stage ({}): {}", e.stage, e.source.kind(), e.source);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn execute(args: &Args, config: &Config, topic: &str) -> StageResult<()> {
    let usage: Arc<dyn UsageSink> = Arc::new(JsonlUsageLog::new(&config.pipeline.usage_log));
    let cache = TextCache::new(&config.pipeline.cache_dir);
    let ctx = CallContext::production(topic);

    // Build the speech side first so a missing key fails before any paid call
    let narrator = if args.cache_only {
        None
    } else {
        Some(build_narrator(config, usage.clone()).at(Stage::Synthesize)?)
    };

    let normalized = if args.from_cache {
        let text = cache.load(topic).at(Stage::Cache)?;
        info!("Loaded '{topic}' from cache ({} chars)", text.chars().count());
        NormalizedText {
            text,
            source_topic: topic.to_string(),
        }
    } else {
        let source = build_source(config, usage.clone()).at(Stage::Fetch)?;
        let normalizer = build_normalizer(config, usage.clone()).at(Stage::Normalize)?;
        let normalized = pipeline::prepare(&source, &normalizer, topic, &ctx).await?;
        // Only --cache-only depends on the saved text
        let saved = if args.cache_only {
            Some(cache.save(topic, &normalized.text).at(Stage::Cache)?)
        } else {
            cache.try_save(topic, &normalized.text)
        };
        if let Some(path) = saved {
            info!("Cached normalized text at {}", path.display());
        }
        normalized
    };

    let Some(narrator) = narrator else {
        println!(
            "Cached {} chars for '{topic}'. Narrate later with --from-cache.",
            normalized.text.chars().count()
        );
        return Ok(());
    };

    let balance = narrator.ensure_quota(&normalized.text).await?;
    let chunk_count = narrator.chunks(&normalized.text).count();
    info!(
        "{} chars in {chunk_count} chunks, estimated speech cost ${:.2}",
        balance.required,
        balance.required as f64 * config.speech.cost_per_character
    );

    if !args.auto || args.preview_only {
        let segment = narrator.preview(&normalized, &ctx).await?;
        let path = save_preview(&segment, topic, &config.pipeline.output_dir).at(Stage::Preview)?;
        println!("Preview saved to {} ({:.1}s)", path.display(), segment.duration);

        if args.preview_only {
            return Ok(());
        }
        if !confirm("Continue with full generation?") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let output = args.output.clone().unwrap_or_else(|| {
        default_output_path(topic, &config.pipeline.output_dir, &config.pipeline.audio_format)
    });
    let podcast = narrator.narrate(&normalized, &output, &ctx).await?;

    println!("Podcast saved to {}", podcast.path.display());
    println!(
        "Duration: {:.1} minutes ({} segments, {} Hz, {} ch)",
        podcast.duration / 60.0,
        podcast.segment_count,
        podcast.sample_rate,
        podcast.channels
    );
    Ok(())
}

fn build_source(config: &Config, usage: Arc<dyn UsageSink>) -> Result<WikipediaClient> {
    WikipediaClient::new(&config.wikipedia, config.pipeline.request_timeout(), usage)
}

fn build_normalizer(config: &Config, usage: Arc<dyn UsageSink>) -> Result<TextNormalizer> {
    let api_key = match config.rewriter.backend {
        RewriterBackend::OpenAi => Some(config::api_key(&config.rewriter.api_key_env)?),
        RewriterBackend::Ollama => None,
    };
    TextNormalizer::new(
        config.rewriter.clone(),
        api_key,
        config.pipeline.request_timeout(),
        usage,
    )
}

fn build_narrator(config: &Config, usage: Arc<dyn UsageSink>) -> Result<Narrator> {
    let api_key = config::api_key(&config.speech.api_key_env)?;
    let synthesizer = ElevenLabsClient::new(
        config.speech.clone(),
        api_key,
        config.pipeline.preview_char_count,
        config.pipeline.request_timeout(),
        usage,
    )?;
    let assembler = match &config.pipeline.intro_path {
        Some(intro) => WavAssembler::default().with_intro(intro),
        None => WavAssembler::default(),
    };
    Ok(Narrator::new(
        Arc::new(synthesizer),
        Arc::new(assembler),
        config.pipeline.chunk_size,
    ))
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
