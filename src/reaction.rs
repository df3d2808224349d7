/// Reaction controller
///
/// Runs the actions that follow a detection, in order: announce, persist
/// the triggering clip, then hand off to an external process and wait for
/// it. Capture is already closed when this runs, so no scoring happens
/// until the reaction completes.

use crate::audio_buffer::RollingBuffer;
use crate::clip::write_clip;
use crate::config::{AnnounceFormat, HandoffCommand, ListenerConfig};
use crate::trigger::DetectionEvent;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum HandoffError {
    #[error("Failed to launch handoff process '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for handoff process: {0}")]
    Wait(#[source] std::io::Error),
}

/// How a handoff ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// Process exited on its own; the code is logged, never interpreted
    Exited(Option<i32>),

    /// Process was killed because the listener is shutting down
    Terminated,
}

/// Whatever takes over after a detection
#[async_trait]
pub trait Handoff: Send {
    /// Run to completion, or until `cancel` fires
    async fn run(
        &mut self,
        event: &DetectionEvent,
        cancel: &CancellationToken,
    ) -> Result<HandoffOutcome, HandoffError>;
}

/// Launches a child process and waits for it to exit
pub struct ProcessHandoff {
    command: HandoffCommand,
}

impl ProcessHandoff {
    pub fn new(command: HandoffCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Handoff for ProcessHandoff {
    async fn run(
        &mut self,
        event: &DetectionEvent,
        cancel: &CancellationToken,
    ) -> Result<HandoffOutcome, HandoffError> {
        let mut child = TokioCommand::new(&self.command.program)
            .args(&self.command.args)
            .env("WAKE_LISTENER_WORD", &event.wake_word)
            .env("WAKE_LISTENER_SCORE", format!("{:.5}", event.score))
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HandoffError::Launch {
                program: self.command.program.clone(),
                source,
            })?;

        info!(
            "Handoff process started: {} (pid {:?})",
            self.command.program,
            child.id()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Terminating handoff process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill handoff process: {}", e);
                }
                Ok(HandoffOutcome::Terminated)
            }
            status = child.wait() => {
                let status = status.map_err(HandoffError::Wait)?;
                info!("Handoff process exited: {}", status);
                Ok(HandoffOutcome::Exited(status.code()))
            }
        }
    }
}

/// Result of one reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// Listening should resume
    Completed,

    /// Shutdown was requested mid-reaction
    Cancelled,
}

struct ClipTarget {
    path: PathBuf,
    sample_rate: u32,
}

/// Detection reaction: optional clip persistence, optional handoff
pub struct ReactionController {
    clip: Option<ClipTarget>,
    handoff: Option<Box<dyn Handoff>>,
    announce: AnnounceFormat,
}

impl ReactionController {
    /// Controller that does nothing but resume listening
    pub fn new() -> Self {
        Self {
            clip: None,
            handoff: None,
            announce: AnnounceFormat::Off,
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        let mut controller = Self::new().with_announce(config.announce);

        if config.clip.enabled {
            controller = controller.with_clip(config.clip.path.clone(), config.sample_rate as u32);
        }

        if let Some(command) = &config.handoff {
            controller = controller.with_handoff(Box::new(ProcessHandoff::new(command.clone())));
        }

        controller
    }

    pub fn with_clip(mut self, path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        self.clip = Some(ClipTarget {
            path: path.into(),
            sample_rate,
        });
        self
    }

    pub fn with_handoff(mut self, handoff: Box<dyn Handoff>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn with_announce(mut self, announce: AnnounceFormat) -> Self {
        self.announce = announce;
        self
    }

    pub fn persists_clip(&self) -> bool {
        self.clip.is_some()
    }

    pub fn has_handoff(&self) -> bool {
        self.handoff.is_some()
    }

    /// React to `event`. The clip is written before the handoff starts so
    /// it survives a failed launch. A clip write failure is logged and the
    /// reaction continues; a launch failure is returned.
    pub async fn react(
        &mut self,
        event: &DetectionEvent,
        buffer: &RollingBuffer,
        cancel: &CancellationToken,
    ) -> Result<ReactionOutcome, HandoffError> {
        self.announce(event);

        if let Some(target) = &self.clip {
            let samples = buffer.snapshot();
            if let Err(e) = write_clip(&target.path, &samples, target.sample_rate) {
                warn!("Clip not saved, continuing: {}", e);
            }
        }

        let Some(handoff) = self.handoff.as_mut() else {
            return Ok(ReactionOutcome::Completed);
        };

        match handoff.run(event, cancel).await? {
            HandoffOutcome::Exited(code) => {
                info!("Handoff finished (exit code {:?}), resuming", code);
                Ok(ReactionOutcome::Completed)
            }
            HandoffOutcome::Terminated => Ok(ReactionOutcome::Cancelled),
        }
    }

    fn announce(&self, event: &DetectionEvent) {
        match self.announce {
            AnnounceFormat::Off => {}
            AnnounceFormat::Plain => println!("Wake word detected"),
            AnnounceFormat::Json => match serde_json::to_string(event) {
                Ok(json) => println!("Wake word detected {}", json),
                Err(e) => warn!("Failed to serialize detection event: {}", e),
            },
        }
    }
}

impl Default for ReactionController {
    fn default() -> Self {
        Self::new()
    }
}
