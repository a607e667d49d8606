//! Audio segments and episode assembly.
//!
//! Segments travel through the pipeline as complete in-memory WAV files.
//! Assembly decodes them, converts every segment to the channel layout and
//! sample rate of the first one, and writes a single 16-bit WAV. Any other
//! output extension is encoded from that WAV by `ffmpeg`. An optional intro
//! clip is converted the same way and played first.
//!
//! Output is staged next to the destination and renamed into place, so a
//! failed run never leaves a truncated episode behind.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Local;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info, warn};

use crate::cache::safe_name;
use crate::error::{Error, Result};

/// Synthesized audio for one text chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub chunk_index: usize,
    /// A complete RIFF/WAVE file.
    pub bytes: Vec<u8>,
    /// Seconds.
    pub duration: f64,
}

impl AudioSegment {
    /// Wrap raw little-endian 16-bit PCM in a WAV container.
    pub fn from_pcm16(chunk_index: usize, pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Self> {
        if pcm.len() % 2 != 0 {
            return Err(Error::Format(format!(
                "PCM payload has odd length {} for 16-bit samples",
                pcm.len()
            )));
        }

        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;

        Self::from_wav(chunk_index, cursor.into_inner())
    }

    /// Validate a WAV payload and measure its duration.
    pub fn from_wav(chunk_index: usize, bytes: Vec<u8>) -> Result<Self> {
        let (spec, frames) = {
            let reader = WavReader::new(Cursor::new(bytes.as_slice()))?;
            (reader.spec(), reader.duration())
        };
        if spec.sample_rate == 0 || spec.channels == 0 {
            return Err(Error::Format("WAV header has zero rate or channels".into()));
        }
        let duration = frames as f64 / spec.sample_rate as f64;

        Ok(Self {
            chunk_index,
            bytes,
            duration,
        })
    }
}

/// The finished episode.
#[derive(Debug, Clone, PartialEq)]
pub struct PodcastFile {
    pub path: PathBuf,
    pub duration: f64,
    pub segment_count: usize,
    pub sample_rate: u32,
    pub channels: u16,
}

pub trait Assembler: Send + Sync {
    /// `segments` must be ordered by `chunk_index` with no gaps from 0.
    fn assemble(&self, segments: &[AudioSegment], output: &Path) -> Result<PodcastFile>;
}

/// Concatenates WAV segments, encoding through `ffmpeg` for non-WAV output.
pub struct WavAssembler {
    ffmpeg: PathBuf,
    intro: Option<PathBuf>,
}

impl Default for WavAssembler {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            intro: None,
        }
    }
}

impl WavAssembler {
    pub fn with_ffmpeg(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            intro: None,
        }
    }

    /// Play `intro` before the first segment of every episode.
    pub fn with_intro(mut self, intro: impl Into<PathBuf>) -> Self {
        self.intro = Some(intro.into());
        self
    }

    /// Run `ffmpeg -i input output`, letting the extensions pick the codecs.
    fn run_ffmpeg(&self, input: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input)
            .arg(output)
            .output();

        let out = match result {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "{} not found; install ffmpeg or use .wav audio",
                        self.ffmpeg.display()
                    ),
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::Io(std::io::Error::other(format!(
                "ffmpeg exited with {}: {}",
                out.status,
                stderr.trim()
            ))));
        }
        Ok(())
    }

    /// Decode the intro clip, or `None` when none is configured or the file
    /// is missing.
    fn load_intro(&self) -> Result<Option<(Vec<Vec<f32>>, u32)>> {
        let Some(path) = &self.intro else {
            return Ok(None);
        };
        if !path.exists() {
            warn!("Intro file not found at {}, skipping", path.display());
            return Ok(None);
        }

        let is_wav = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        let bytes = if is_wav {
            fs::read(path)?
        } else {
            let scratch = std::env::temp_dir()
                .join(format!("wiki-podcast-intro-{}.wav", std::process::id()));
            let decoded = self
                .run_ffmpeg(path, &scratch)
                .and_then(|()| fs::read(&scratch).map_err(Error::from));
            let _ = fs::remove_file(&scratch);
            decoded?
        };

        debug!("Loaded intro from {}", path.display());
        decode_wav(&bytes).map(Some)
    }

    fn write_output(&self, samples: &[Vec<f32>], sample_rate: u32, output: &Path) -> Result<()> {
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Io(std::io::Error::other("output path has no file name")))?;
        let ext = output
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let wav_stage = output.with_file_name(format!(".{file_name}.partial.wav"));
        let result = write_wav(&wav_stage, samples, sample_rate).and_then(|()| {
            if ext == "wav" {
                fs::rename(&wav_stage, output)?;
                return Ok(());
            }
            let encoded_stage = output.with_file_name(format!(".{file_name}.partial.{ext}"));
            let encoded = self
                .run_ffmpeg(&wav_stage, &encoded_stage)
                .and_then(|()| fs::rename(&encoded_stage, output).map_err(Error::from));
            if encoded.is_err() {
                let _ = fs::remove_file(&encoded_stage);
            }
            encoded
        });

        if wav_stage.exists() {
            let _ = fs::remove_file(&wav_stage);
        }
        result
    }
}

impl Assembler for WavAssembler {
    fn assemble(&self, segments: &[AudioSegment], output: &Path) -> Result<PodcastFile> {
        if segments.is_empty() {
            return Err(Error::Format("no audio segments to assemble".into()));
        }
        for (expected, segment) in segments.iter().enumerate() {
            if segment.chunk_index != expected {
                return Err(Error::Format(format!(
                    "segment for chunk {} found where chunk {expected} was expected",
                    segment.chunk_index
                )));
            }
        }

        let decoded = segments
            .iter()
            .map(|s| decode_wav(&s.bytes))
            .collect::<Result<Vec<_>>>()?;
        let (sample_rate, channels) = (decoded[0].1, decoded[0].0.len());
        debug!("Assembling {} segments at {sample_rate}Hz x{channels}", segments.len());

        let mut combined: Vec<Vec<f32>> = vec![Vec::new(); channels];
        if let Some((samples, rate)) = self.load_intro()? {
            let intro = convert_audio(samples, rate, sample_rate, channels)?;
            debug!("Prepending {:.1}s intro", intro[0].len() as f64 / sample_rate as f64);
            for (dst, src) in combined.iter_mut().zip(intro) {
                dst.extend(src);
            }
        }
        for (i, (samples, rate)) in decoded.into_iter().enumerate() {
            if rate != sample_rate || samples.len() != channels {
                debug!("Converting segment {i} from {rate}Hz x{}", samples.len());
            }
            let converted = convert_audio(samples, rate, sample_rate, channels)?;
            for (dst, src) in combined.iter_mut().zip(converted) {
                dst.extend(src);
            }
        }

        self.write_output(&combined, sample_rate, output)?;

        let duration = combined[0].len() as f64 / sample_rate as f64;
        info!("Wrote {} ({duration:.1}s)", output.display());
        Ok(PodcastFile {
            path: output.to_path_buf(),
            duration,
            segment_count: segments.len(),
            sample_rate,
            channels: channels as u16,
        })
    }
}

/// Decode a WAV payload into per-channel f32 samples.
fn decode_wav(bytes: &[u8]) -> Result<(Vec<Vec<f32>>, u32)> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 || spec.sample_rate == 0 {
        return Err(Error::Format("WAV header has zero rate or channels".into()));
    }
    let mut samples = vec![Vec::new(); channels];

    match spec.sample_format {
        SampleFormat::Float => {
            for (idx, sample) in reader.samples::<f32>().enumerate() {
                samples[idx % channels].push(sample?);
            }
        }
        SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            for (idx, sample) in reader.samples::<i32>().enumerate() {
                samples[idx % channels].push(sample? as f32 / max);
            }
        }
    }

    Ok((samples, spec.sample_rate))
}

fn write_wav(path: &Path, samples: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: samples.len() as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let len = samples.first().map_or(0, Vec::len);
    for idx in 0..len {
        for channel in samples {
            let value = channel[idx].clamp(-1.0, 1.0);
            writer.write_sample((value * i16::MAX as f32).round() as i16)?;
        }
    }

    writer.finalize()?;
    Ok(())
}

fn convert_audio(
    samples: Vec<Vec<f32>>,
    from_rate: u32,
    to_rate: u32,
    to_channels: usize,
) -> Result<Vec<Vec<f32>>> {
    let samples = convert_channels(samples, to_channels)?;
    if from_rate == to_rate || samples[0].is_empty() {
        return Ok(samples);
    }

    let channels = samples.len();
    let input_len = samples[0].len();
    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, channels)
        .map_err(|e| Error::Format(format!("cannot resample {from_rate}Hz → {to_rate}Hz: {e}")))?;
    resampler
        .process(&samples, None)
        .map_err(|e| Error::Format(format!("resampling failed: {e}")))
}

fn convert_channels(samples: Vec<Vec<f32>>, to_channels: usize) -> Result<Vec<Vec<f32>>> {
    let from_channels = samples.len();
    if from_channels == to_channels {
        return Ok(samples);
    }
    if to_channels == 1 {
        let len = samples[0].len();
        let mut mixed = vec![0.0_f32; len];
        for channel in &samples {
            for (idx, value) in channel.iter().enumerate().take(len) {
                mixed[idx] += *value;
            }
        }
        let scale = 1.0 / from_channels as f32;
        mixed.iter_mut().for_each(|v| *v *= scale);
        return Ok(vec![mixed]);
    }
    if from_channels == 1 {
        return Ok(vec![samples[0].clone(); to_channels]);
    }
    Err(Error::Format(format!(
        "cannot convert {from_channels} channels to {to_channels}"
    )))
}

/// Save a preview clip as `<topic>_preview.wav` in `dir`.
pub fn save_preview(segment: &AudioSegment, topic: &str, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_preview.wav", safe_name(topic)));
    fs::write(&path, &segment.bytes)?;
    debug!("Saved preview to {}", path.display());
    Ok(path)
}

/// `<dir>/<topic>_<YYYYmmdd_HHMMSS>.<format>`
pub fn default_output_path(topic: &str, dir: &Path, format: &str) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let format = format.trim_start_matches('.');
    if format.is_empty() {
        warn!("Empty audio format configured, writing WAV");
    }
    let ext = if format.is_empty() { "wav" } else { format };
    dir.join(format!("{}_{timestamp}.{ext}", safe_name(topic)))
}
