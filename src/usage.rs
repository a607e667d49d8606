//! Usage tracking and cost reporting.
//!
//! Every external call produces one [`UsageRecord`]. Records go through a
//! [`UsageSink`] injected into each client; the production sink appends
//! them as JSON lines to the configured usage log.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Fetch,
    Normalize,
    Synthesize,
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Normalize => write!(f, "normalize"),
            Self::Synthesize => write!(f, "synthesize"),
        }
    }
}

/// Whether a call was made by a test run or a real episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextTag {
    Test,
    Production,
}

/// Who a call is made for. Threaded through every call that records usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub tag: ContextTag,
    pub topic: String,
}

impl CallContext {
    pub fn production(topic: impl Into<String>) -> Self {
        Self {
            tag: ContextTag::Production,
            topic: topic.into(),
        }
    }

    pub fn test(topic: impl Into<String>) -> Self {
        Self {
            tag: ContextTag::Test,
            topic: topic.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: String,
    pub kind: UsageKind,
    /// Characters for fetch/synthesize, tokens for normalize.
    pub quantity: u64,
    /// USD.
    pub cost: f64,
    pub context: ContextTag,
    pub topic: String,
}

impl UsageRecord {
    pub fn now(kind: UsageKind, quantity: u64, cost: f64, ctx: &CallContext) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            kind,
            quantity,
            cost: (cost * 1_000_000.0).round() / 1_000_000.0,
            context: ctx.tag,
            topic: ctx.topic.clone(),
        }
    }
}

/// Write-only side channel for usage records.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// Appends records to a JSONL file, creating parent directories on demand.
pub struct JsonlUsageLog {
    path: PathBuf,
}

impl JsonlUsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UsageSink for JsonlUsageLog {
    fn record(&self, record: UsageRecord) {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create usage log dir: {e}");
                return;
            }
        }

        match fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => match serde_json::to_string(&record) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to write usage record: {e}");
                    } else {
                        debug!("Recorded {} usage to {}", record.kind, self.path.display());
                    }
                }
                Err(e) => warn!("Failed to serialize usage record: {e}"),
            },
            Err(e) => warn!("Failed to open usage log: {e}"),
        }
    }
}

/// Keeps records in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryUsageLog {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageLog {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl UsageSink for MemoryUsageLog {
    fn record(&self, record: UsageRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Load every record from a usage log, skipping malformed lines.
pub fn load_records(path: &Path) -> Vec<UsageRecord> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let mut records = Vec::new();
    for line in std::io::BufReader::new(file).lines().map_while(|l| l.ok()) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<UsageRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => debug!("Skipping malformed usage line: {e}"),
        }
    }
    records
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub calls: u64,
    pub quantity: u64,
    pub cost: f64,
}

impl Totals {
    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.quantity += record.quantity;
        self.cost += record.cost;
    }
}

#[derive(Debug, Default)]
pub struct UsageSummary {
    pub by_kind: BTreeMap<UsageKind, Totals>,
    pub by_context: BTreeMap<ContextTag, Totals>,
    pub by_topic: BTreeMap<String, Totals>,
    pub total: Totals,
}

impl UsageSummary {
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut summary = Self::default();
        for r in records {
            summary.by_kind.entry(r.kind).or_default().add(r);
            summary.by_context.entry(r.context).or_default().add(r);
            let topic = if r.topic.is_empty() { "unknown" } else { r.topic.as_str() };
            summary.by_topic.entry(topic.to_string()).or_default().add(r);
            summary.total.add(r);
        }
        summary
    }
}

/// Generate a plain-text usage report for `--usage`.
pub fn generate_report(records: &[UsageRecord]) -> String {
    if records.is_empty() {
        return "# Usage Report\n\nNo usage recorded.".to_string();
    }

    let summary = UsageSummary::from_records(records);
    let unit = |kind: UsageKind| match kind {
        UsageKind::Normalize => "tokens",
        UsageKind::Fetch | UsageKind::Synthesize => "chars",
    };

    let mut lines = vec![
        "# Usage Report".to_string(),
        String::new(),
        "## Overall".to_string(),
    ];
    for (kind, t) in &summary.by_kind {
        lines.push(format!(
            "- {kind}: {} calls, {} {} (${:.4})",
            t.calls,
            t.quantity,
            unit(*kind),
            t.cost
        ));
    }
    lines.push(format!("- **Total cost**: ${:.4}", summary.total.cost));

    lines.extend([String::new(), "## By Context".to_string()]);
    for (context, t) in &summary.by_context {
        let name = match context {
            ContextTag::Test => "test",
            ContextTag::Production => "production",
        };
        lines.push(format!("- {name}: {} calls (${:.4})", t.calls, t.cost));
    }

    let mut topics: Vec<_> = summary.by_topic.iter().collect();
    topics.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost).then_with(|| a.0.cmp(b.0)));
    lines.extend([String::new(), "## By Topic".to_string()]);
    for (topic, t) in topics {
        lines.push(format!("- {topic}: ${:.4}", t.cost));
    }

    lines.join("\n")
}
