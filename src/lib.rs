/// Wake-word listener library
///
/// Continuously captures microphone audio, scores fixed-size frames with an
/// external wake-word model, and reacts to a detection by saving the
/// triggering clip and/or handing control to an external process before
/// listening again.

pub mod audio_buffer;
pub mod audio_source;
pub mod clip;
pub mod config;
pub mod detector;
pub mod error;
pub mod oracle;
pub mod reaction;
pub mod replay;
pub mod stderr_guard;
pub mod trigger;

// Re-export main types
pub use audio_buffer::{AudioSample, RollingBuffer, SAMPLE_RATE};
pub use audio_source::{AudioFrame, AudioSource, CaptureStream, CpalSource, DeviceError, FRAME_LEN};
pub use clip::{write_clip, PersistenceError};
pub use config::{AnnounceFormat, ClipConfig, ConfigError, HandoffCommand, ListenerConfig};
pub use detector::{DetectionLoop, LoopStats, SessionState};
pub use error::{ErrorKind, ListenerError};
pub use oracle::{OracleError, ScoreMap, ScoringOracle, SubprocessOracle};
pub use reaction::{Handoff, HandoffError, HandoffOutcome, ProcessHandoff, ReactionController, ReactionOutcome};
pub use replay::{replay_samples, replay_wav, ReplayError, ReplayHit, ReplayReport};
pub use trigger::{evaluate, DetectionEvent, TriggerPolicy, DEFAULT_THRESHOLD};
