/// Detection loop
///
/// Drives capture, scoring and reaction on a single task:
/// read frame -> rolling buffer -> oracle -> trigger -> react -> resume.
/// Capture is closed for the whole reaction, so frames are neither
/// produced nor scored while an external handoff is running.

use crate::audio_buffer::RollingBuffer;
use crate::audio_source::{AudioSource, CaptureStream};
use crate::config::{ConfigError, ListenerConfig};
use crate::error::ListenerError;
use crate::oracle::ScoringOracle;
use crate::reaction::{ReactionController, ReactionOutcome};
use crate::trigger::{DetectionEvent, TriggerPolicy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Session state owned by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listening,
    Reacting,
    ShuttingDown,
}

/// Loop statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_read: u64,
    pub frames_scored: u64,
    /// Frames of the wrong length, dropped without scoring
    pub frames_discarded: u64,
    pub detections: u64,
    /// Number of times the input was opened
    pub sessions: u64,
}

pub struct DetectionLoop<S: AudioSource, O: ScoringOracle> {
    source: S,
    oracle: O,
    policy: TriggerPolicy,
    buffer: RollingBuffer,
    controller: ReactionController,
    frame_len: usize,
    cancel: CancellationToken,
    state: SessionState,
    stats: LoopStats,
    event_tx: Option<mpsc::UnboundedSender<DetectionEvent>>,
    released: bool,
}

impl<S: AudioSource, O: ScoringOracle> DetectionLoop<S, O> {
    pub fn new(
        source: S,
        oracle: O,
        config: &ListenerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!("Wake word: {}", config.wake_word);
        info!("Threshold: {}", config.threshold);
        info!(
            "Clip persistence: {}",
            if config.clip.enabled { "enabled" } else { "disabled" }
        );

        let buffer = if config.clip.enabled {
            RollingBuffer::for_duration(config.clip.duration_secs, config.sample_rate)
        } else {
            RollingBuffer::disabled()
        };

        Ok(Self {
            source,
            oracle,
            policy: TriggerPolicy::new(config.wake_word.clone(), config.threshold),
            buffer,
            controller: ReactionController::from_config(config),
            frame_len: config.frame_len,
            cancel,
            state: SessionState::Listening,
            stats: LoopStats::default(),
            event_tx: None,
            released: false,
        })
    }

    /// Replace the reaction built from the config
    pub fn with_controller(mut self, controller: ReactionController) -> Self {
        self.controller = controller;
        self
    }

    /// Receive every detection event as it fires
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DetectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx = Some(tx);
        rx
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or a fatal error occurs.
    ///
    /// Returns `Ok` only for a requested shutdown. The device is released
    /// on every exit path, exactly once.
    pub async fn run(&mut self) -> Result<LoopStats, ListenerError> {
        if self.state == SessionState::ShuttingDown {
            return Ok(self.stats.clone());
        }

        let mut stream = None;
        let result = self.drive(&mut stream).await;
        self.release(&mut stream);

        result.map(|()| self.stats.clone())
    }

    async fn drive(&mut self, stream: &mut Option<S::Stream>) -> Result<(), ListenerError> {
        *stream = Some(self.open_session()?);

        loop {
            if self.state == SessionState::ShuttingDown || self.cancel.is_cancelled() {
                self.state = SessionState::ShuttingDown;
                return Ok(());
            }

            if stream.is_none() {
                *stream = Some(self.open_session()?);
            }
            let Some(capture) = stream.as_mut() else {
                continue;
            };

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                frame = capture.read_frame() => Some(frame),
            };

            let Some(frame) = read else {
                info!("Shutdown requested while listening");
                self.state = SessionState::ShuttingDown;
                return Ok(());
            };

            let frame = frame?;
            self.stats.frames_read += 1;

            if frame.len() != self.frame_len {
                warn!(
                    "Discarding frame of {} samples (expected {})",
                    frame.len(),
                    self.frame_len
                );
                self.stats.frames_discarded += 1;
                continue;
            }

            self.buffer.push(frame.samples());

            let scores = self.oracle.score(&frame).await?;
            self.stats.frames_scored += 1;
            trace!("Score for {}: {:?}", self.policy.wake_word(), scores.get(self.policy.wake_word()));

            if let Some(event) = self.policy.evaluate(&scores)? {
                self.react(stream, event).await?;
            }
        }
    }

    /// LISTENING -> REACTING -> LISTENING (or SHUTTING_DOWN)
    async fn react(
        &mut self,
        stream: &mut Option<S::Stream>,
        event: DetectionEvent,
    ) -> Result<(), ListenerError> {
        info!("Wake word detected: {} (score {:.3})", event.wake_word, event.score);

        self.state = SessionState::Reacting;
        self.stats.detections += 1;

        if let Some(mut capture) = stream.take() {
            capture.close();
        }

        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event.clone());
        }

        let outcome = self
            .controller
            .react(&event, &self.buffer, &self.cancel)
            .await?;

        if outcome == ReactionOutcome::Cancelled || self.cancel.is_cancelled() {
            self.state = SessionState::ShuttingDown;
            return Ok(());
        }

        // Fresh model state so the same utterance can fire again
        self.oracle.reset().await?;
        *stream = Some(self.open_session()?);
        Ok(())
    }

    fn open_session(&mut self) -> Result<S::Stream, ListenerError> {
        let capture = self.source.open()?;

        self.buffer.clear();
        self.stats.sessions += 1;
        self.state = SessionState::Listening;

        info!("Listening for wake word");
        debug!("Session {} opened", self.stats.sessions);
        Ok(capture)
    }

    fn release(&mut self, stream: &mut Option<S::Stream>) {
        if self.released {
            return;
        }
        self.released = true;
        self.state = SessionState::ShuttingDown;

        if let Some(mut capture) = stream.take() {
            capture.close();
        }
        self.source.release();

        info!(
            "Detection loop stopped: {} frames scored, {} detections",
            self.stats.frames_scored, self.stats.detections
        );
    }
}
