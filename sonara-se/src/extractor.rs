//! Embedding extraction
//!
//! The extractor is a black-box contract: audio file in, fixed-dimension
//! float vector out. Unreadable or corrupt audio yields `Ok(None)` rather
//! than an error so callers can degrade gracefully; only unexpected
//! runtime trouble surfaces as `Err`.
//!
//! `EnergyContourExtractor` is the built-in baseline: symphonia decode to
//! mono f32, then a deterministic time-windowed energy and zero-crossing
//! summary folded into the configured dimension. A learned model drops in
//! behind the same trait.

use async_trait::async_trait;
use sonara_common::{Error, Result};
use std::path::{Path, PathBuf};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use tracing::{debug, warn};

/// Contract for turning an audio file into an embedding vector.
#[async_trait]
pub trait EmbeddingExtractor: Send + Sync {
    /// Extract an embedding from the audio file at `audio_path`.
    /// Returns `Ok(None)` when the file is unreadable or produces no
    /// usable audio.
    async fn extract(&self, audio_path: &Path) -> Result<Option<Vec<f32>>>;

    /// Fixed output dimension of this extractor.
    fn dim(&self) -> usize;
}

/// Baseline extractor: windowed RMS energy + zero-crossing contour.
#[derive(Debug, Clone)]
pub struct EnergyContourExtractor {
    dim: usize,
}

impl EnergyContourExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingExtractor for EnergyContourExtractor {
    async fn extract(&self, audio_path: &Path) -> Result<Option<Vec<f32>>> {
        let path: PathBuf = audio_path.to_path_buf();
        let dim = self.dim;

        // Decoding is CPU-bound blocking work.
        let result = tokio::task::spawn_blocking(move || -> Option<Vec<f32>> {
            let samples = match decode_to_mono(&path) {
                Ok(samples) => samples,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Audio decode failed");
                    return None;
                }
            };
            if samples.is_empty() {
                warn!(path = %path.display(), "Audio file contains no samples");
                return None;
            }
            Some(energy_contour(&samples, dim))
        })
        .await
        .map_err(|e| Error::Internal(format!("extraction task panicked: {e}")))?;

        if let Some(ref vector) = result {
            debug!(path = %audio_path.display(), dim = vector.len(), "Embedding extracted");
        }
        Ok(result)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Summarize mono samples into a `dim`-length feature vector.
///
/// First half: per-window RMS energy. Second half: per-window
/// zero-crossing rate. The whole vector is L2-normalized so that distance
/// comparisons are scale-invariant across recordings of different levels.
fn energy_contour(samples: &[f32], dim: usize) -> Vec<f32> {
    let rms_bins = dim - dim / 2;
    let zcr_bins = dim / 2;

    let mut features = Vec::with_capacity(dim);
    features.extend(windowed(samples, rms_bins, |window| {
        let sum_sq: f64 = window.iter().map(|s| f64::from(*s) * f64::from(*s)).sum();
        (sum_sq / window.len() as f64).sqrt() as f32
    }));
    features.extend(windowed(samples, zcr_bins, |window| {
        let crossings = window
            .windows(2)
            .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
            .count();
        crossings as f32 / window.len() as f32
    }));

    let norm = features
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for value in &mut features {
            *value = (f64::from(*value) / norm) as f32;
        }
    }
    features
}

/// Apply `summarize` over `bins` contiguous windows of the sample stream.
/// Short streams repeat the tail window so the output length is always
/// exactly `bins`.
fn windowed(samples: &[f32], bins: usize, summarize: impl Fn(&[f32]) -> f32) -> Vec<f32> {
    let window_len = (samples.len() / bins).max(1);
    (0..bins)
        .map(|i| {
            let start = (i * window_len).min(samples.len() - 1);
            let end = ((i + 1) * window_len).min(samples.len()).max(start + 1);
            summarize(&samples[start..end])
        })
        .collect()
}

/// Decode an audio file to mono f32 samples (all channels averaged).
fn decode_to_mono(path: &Path) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Extraction(format!("unrecognized audio format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Extraction("no audio track in file".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Extraction(format!("unsupported codec: {e}")))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::Extraction(format!("packet read failed: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Extraction(format!("decode failed: {e}")))?;
        mix_to_mono(&decoded, &mut samples);
    }

    Ok(samples)
}

/// Append a decoded buffer to `out` as mono samples.
fn mix_to_mono(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    fn mix<S: Sample + Copy>(buf: &symphonia::core::audio::AudioBuffer<S>, out: &mut Vec<f32>)
    where
        f32: FromSample<S>,
    {
        let channels = buf.spec().channels.count();
        let frames = buf.frames();
        out.reserve(frames);
        for frame in 0..frames {
            let mut sum = 0.0f32;
            for ch in 0..channels {
                sum += f32::from_sample(buf.chan(ch)[frame]);
            }
            out.push(sum / channels as f32);
        }
    }

    match decoded {
        AudioBufferRef::U8(buf) => mix(buf, out),
        AudioBufferRef::U16(buf) => mix(buf, out),
        AudioBufferRef::U24(buf) => mix(buf, out),
        AudioBufferRef::U32(buf) => mix(buf, out),
        AudioBufferRef::S8(buf) => mix(buf, out),
        AudioBufferRef::S16(buf) => mix(buf, out),
        AudioBufferRef::S24(buf) => mix(buf, out),
        AudioBufferRef::S32(buf) => mix(buf, out),
        AudioBufferRef::F32(buf) => mix(buf, out),
        AudioBufferRef::F64(buf) => mix(buf, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contour_has_requested_dimension() {
        let samples: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin()).collect();
        for dim in [8, 512, 513] {
            assert_eq!(energy_contour(&samples, dim).len(), dim);
        }
    }

    #[test]
    fn contour_is_unit_norm_for_nonsilent_audio() {
        let samples: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.05).sin()).collect();
        let features = energy_contour(&samples, 64);
        let norm: f64 = features.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn contour_of_silence_is_all_zero() {
        let samples = vec![0.0f32; 4096];
        let features = energy_contour(&samples, 32);
        assert!(features.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn short_streams_still_fill_every_bin() {
        let samples = vec![0.5f32; 3];
        let features = energy_contour(&samples, 16);
        assert_eq!(features.len(), 16);
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[tokio::test]
    async fn missing_file_yields_none() {
        let extractor = EnergyContourExtractor::new(16);
        let result = extractor
            .extract(Path::new("/nonexistent/audio.wav"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn garbage_bytes_yield_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not audio data").unwrap();

        let extractor = EnergyContourExtractor::new(16);
        let result = extractor.extract(&path).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wav_fixture_extracts_unit_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 440.0, 8000, 8000);

        let extractor = EnergyContourExtractor::new(32);
        let vector = extractor.extract(&path).await.unwrap().unwrap();
        assert_eq!(vector.len(), 32);
        let norm: f64 = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    fn write_sine_wav(path: &Path, freq: f32, sample_rate: u32, len: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..len {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * freq * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((sample * i16::MAX as f32 * 0.8) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}
