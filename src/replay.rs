/// Offline replay
///
/// Feeds a recorded clip through the scoring oracle using the same framing
/// as live capture, to check framing and threshold behaviour against
/// fixtures without a microphone.

use crate::audio_buffer::AudioSample;
use crate::audio_source::{f32_to_sample, AudioFrame};
use crate::oracle::{OracleError, ScoringOracle};
use crate::trigger::TriggerPolicy;
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read recording {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// First frame that crossed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHit {
    pub frame_index: usize,

    /// Start of the frame, in seconds from the beginning of the recording
    pub offset_secs: f32,

    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub frames_scored: usize,
    pub detection: Option<ReplayHit>,
    pub max_score: f32,

    /// Set when the recording is not mono 16-bit at the expected rate
    pub format_warning: Option<String>,
}

impl ReplayReport {
    pub fn detected(&self) -> bool {
        self.detection.is_some()
    }
}

/// Score `samples` frame by frame, stopping at the first detection.
/// A trailing chunk shorter than `frame_len` is never scored.
pub async fn replay_samples<O: ScoringOracle + ?Sized>(
    samples: &[AudioSample],
    oracle: &mut O,
    policy: &TriggerPolicy,
    frame_len: usize,
    sample_rate: usize,
) -> Result<ReplayReport, OracleError> {
    let mut report = ReplayReport {
        frames_scored: 0,
        detection: None,
        max_score: 0.0,
        format_warning: None,
    };

    for (index, chunk) in samples.chunks_exact(frame_len).enumerate() {
        let frame = AudioFrame::new(chunk.to_vec());
        let scores = oracle.score(&frame).await?;
        report.frames_scored += 1;

        let score = policy.score_of(&scores)?;
        report.max_score = report.max_score.max(score);

        if let Some(event) = policy.evaluate(&scores)? {
            report.detection = Some(ReplayHit {
                frame_index: index,
                offset_secs: (index * frame_len) as f32 / sample_rate as f32,
                score: event.score,
            });
            break;
        }
    }

    let discarded = samples.len() % frame_len;
    if discarded > 0 && report.detection.is_none() {
        debug!("Discarded {} trailing samples", discarded);
    }

    Ok(report)
}

/// Replay a WAV recording
pub async fn replay_wav<O: ScoringOracle + ?Sized>(
    path: &Path,
    oracle: &mut O,
    policy: &TriggerPolicy,
    frame_len: usize,
    sample_rate: usize,
) -> Result<ReplayReport, ReplayError> {
    let read_error = |source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(read_error)?;
    let spec = reader.spec();

    let format_warning = if spec.channels != 1
        || spec.bits_per_sample != 16
        || spec.sample_rate as usize != sample_rate
    {
        let message = format!(
            "Audio format differs from expected (mono, 16-bit, {}Hz): channels={}, bits={}, rate={}",
            sample_rate, spec.channels, spec.bits_per_sample, spec.sample_rate
        );
        warn!("{}", message);
        Some(message)
    } else {
        None
    };

    let samples = read_samples(&mut reader).map_err(read_error)?;

    info!(
        "Replaying {} ({} samples, {:.2}s)",
        path.display(),
        samples.len(),
        samples.len() as f32 / sample_rate as f32
    );

    let mut report = replay_samples(&samples, oracle, policy, frame_len, sample_rate).await?;
    report.format_warning = format_warning;
    Ok(report)
}

/// Decode every sample as 16-bit PCM. Wider integer samples keep their top
/// 16 bits and float samples are rescaled, so a mismatched recording is
/// still scored rather than rejected.
fn read_samples<R: Read>(reader: &mut WavReader<R>) -> Result<Vec<AudioSample>, hound::Error> {
    let spec = reader.spec();

    match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_sample))
            .collect(),
        SampleFormat::Int if spec.bits_per_sample > 16 => {
            let shift = spec.bits_per_sample - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as AudioSample))
                .collect()
        }
        SampleFormat::Int => reader.samples::<AudioSample>().collect(),
    }
}
