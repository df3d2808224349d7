/// Listener configuration
///
/// One configuration covers every listener variant: clip persistence and
/// the external handoff are independent switches rather than separate
/// code paths.

use crate::audio_buffer::{DEFAULT_CLIP_SECS, SAMPLE_RATE};
use crate::audio_source::FRAME_LEN;
use crate::clip::DEFAULT_CLIP_PATH;
use crate::trigger::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Model output key listened for by default
pub const DEFAULT_WAKE_WORD: &str = "hey_jarvis_v0.1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Wake word must not be empty")]
    EmptyWakeWord,

    #[error("Threshold must be between 0.0 and 1.0, got {0}")]
    InvalidThreshold(f32),

    #[error("Sample rate must be {expected} Hz, got {actual}")]
    InvalidSampleRate { expected: usize, actual: usize },

    #[error("Frame length must be greater than 0")]
    InvalidFrameLength,

    #[error("Clip duration must be positive, got {0}s")]
    InvalidClipDuration(f32),

    #[error("Handoff command must name a program")]
    EmptyHandoffProgram,
}

/// External process launched after a detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl HandoffCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv-style list; `None` when the list is empty
    pub fn from_argv(argv: Vec<String>) -> Option<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program, argv.collect()))
    }
}

/// How detections are announced on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnounceFormat {
    Off,
    #[default]
    Plain,
    Json,
}

/// Triggering-clip persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    pub enabled: bool,

    /// Audio kept before (and including) the triggering frame
    pub duration_secs: f32,

    /// Fixed output file, overwritten on every detection
    pub path: PathBuf,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_secs: DEFAULT_CLIP_SECS,
            path: PathBuf::from(DEFAULT_CLIP_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Score map key to watch
    pub wake_word: String,

    /// Fires when the score is strictly greater than this
    pub threshold: f32,

    /// Sample rate (must be 16kHz for the scoring model)
    pub sample_rate: usize,

    /// Samples per scored frame
    pub frame_len: usize,

    pub clip: ClipConfig,

    pub handoff: Option<HandoffCommand>,

    pub announce: AnnounceFormat,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            threshold: DEFAULT_THRESHOLD,
            sample_rate: SAMPLE_RATE,
            frame_len: FRAME_LEN,
            clip: ClipConfig::default(),
            handoff: None,
            announce: AnnounceFormat::default(),
        }
    }
}

impl ListenerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wake_word.trim().is_empty() {
            return Err(ConfigError::EmptyWakeWord);
        }

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }

        if self.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::InvalidSampleRate {
                expected: SAMPLE_RATE,
                actual: self.sample_rate,
            });
        }

        if self.frame_len == 0 {
            return Err(ConfigError::InvalidFrameLength);
        }

        if self.clip.enabled && (self.clip.duration_secs.is_nan() || self.clip.duration_secs <= 0.0) {
            return Err(ConfigError::InvalidClipDuration(self.clip.duration_secs));
        }

        if let Some(handoff) = &self.handoff {
            if handoff.program.trim().is_empty() {
                return Err(ConfigError::EmptyHandoffProgram);
            }
        }

        Ok(())
    }
}
