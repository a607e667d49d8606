//! On-disk cache of normalized article text.
//!
//! Lets an episode be narrated later without paying for the fetch and
//! rewrite again. One `<safe_name>.txt` file per topic.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\-]").expect("non-word regex"));
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("underscore regex"));

/// Filesystem-safe, lowercase form of a topic.
pub fn safe_name(topic: &str) -> String {
    let replaced = NON_WORD.replace_all(topic, "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_lowercase()
}

pub struct TextCache {
    dir: PathBuf,
}

impl TextCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", safe_name(topic)))
    }

    pub fn save(&self, topic: &str, text: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(topic);
        fs::write(&path, text)?;
        debug!("Cached {} chars to {}", text.len(), path.display());
        Ok(path)
    }

    /// Like [`save`](Self::save), but a failure is only logged. Used when
    /// the run goes on to narrate the text anyway.
    pub fn try_save(&self, topic: &str, text: &str) -> Option<PathBuf> {
        match self.save(topic, text) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not cache normalized text for '{topic}': {e}");
                None
            }
        }
    }

    /// Fails with [`Error::NotFound`] when the topic was never cached.
    pub fn load(&self, topic: &str) -> Result<String> {
        let path = self.path_for(topic);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("topic '{topic}' is not cached")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_cached(&self, topic: &str) -> bool {
        self.path_for(topic).exists()
    }

    /// Cached topics, reconstructed from file names (sorted).
    pub fn list(&self) -> Vec<String> {
        let mut topics: Vec<String> = txt_files(&self.dir)
            .iter()
            .filter_map(|p| p.file_stem())
            .map(|stem| title_case(&stem.to_string_lossy().replace('_', " ")))
            .collect();
        topics.sort();
        topics
    }

    pub fn delete(&self, topic: &str) -> Result<bool> {
        let path = self.path_for(topic);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every cached topic. Returns how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let files = txt_files(&self.dir);
        for file in &files {
            fs::remove_file(file)?;
        }
        Ok(files.len())
    }
}

fn txt_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|e| e == "txt"))
        .collect()
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
