/// Crate-level error type and exit status mapping

use crate::audio_source::DeviceError;
use crate::clip::PersistenceError;
use crate::config::ConfigError;
use crate::oracle::OracleError;
use crate::reaction::HandoffError;
use crate::replay::ReplayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Coarse classification of a [`ListenerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Device,
    UnknownWakeWord,
    Oracle,
    HandoffLaunch,
    Handoff,
    Persistence,
    Config,
    Replay,
}

impl ListenerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListenerError::Device(_) => ErrorKind::Device,
            ListenerError::Oracle(e) | ListenerError::Replay(ReplayError::Oracle(e)) => {
                oracle_kind(e)
            }
            ListenerError::Handoff(HandoffError::Launch { .. }) => ErrorKind::HandoffLaunch,
            ListenerError::Handoff(_) => ErrorKind::Handoff,
            ListenerError::Persistence(_) => ErrorKind::Persistence,
            ListenerError::Config(_) => ErrorKind::Config,
            ListenerError::Replay(_) => ErrorKind::Replay,
        }
    }

    /// Process exit status for this failure (never 0)
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Device => 3,
            ErrorKind::UnknownWakeWord => 4,
            ErrorKind::Oracle => 5,
            ErrorKind::HandoffLaunch | ErrorKind::Handoff => 6,
            ErrorKind::Persistence => 7,
            ErrorKind::Replay => 8,
        }
    }
}

fn oracle_kind(error: &OracleError) -> ErrorKind {
    match error {
        OracleError::UnknownWakeWord(_) => ErrorKind::UnknownWakeWord,
        _ => ErrorKind::Oracle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: ListenerError = OracleError::UnknownWakeWord("hey_jarvis".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownWakeWord);
        assert_eq!(err.to_string(), "Wake word 'hey_jarvis' missing from model output");

        let err: ListenerError = DeviceError::Truncated.into();
        assert_eq!(err.kind(), ErrorKind::Device);

        let err: ListenerError = HandoffError::Launch {
            program: "assistant".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::HandoffLaunch);

        let err: ListenerError =
            ReplayError::Oracle(OracleError::UnknownWakeWord("x".to_string())).into();
        assert_eq!(err.kind(), ErrorKind::UnknownWakeWord);
    }

    #[test]
    fn test_exit_codes_are_nonzero() {
        let errors: Vec<ListenerError> = vec![
            DeviceError::NoInputDevice.into(),
            OracleError::Exited.into(),
            ConfigError::InvalidFrameLength.into(),
        ];

        for err in errors {
            assert_ne!(err.exit_code(), 0);
        }
    }
}
