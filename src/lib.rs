//! wiki-podcast: narrate Wikipedia articles as podcast episodes.

pub mod audio;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod speech;
pub mod usage;
pub mod wikipedia;

pub use error::{Error, Result, Stage, StageError};
pub use pipeline::{Narrator, Pipeline};
