/// Wake-word scoring contract
///
/// The model that turns a frame into confidence scores lives outside this
/// crate. [`ScoringOracle`] is the seam: one call per frame, in capture
/// order, returning a score per wake-word name.
///
/// [`SubprocessOracle`] adapts an out-of-process model (for example an
/// openWakeWord script). For each frame it writes `frame_len * 2` bytes of
/// little-endian PCM to the child's stdin and expects exactly one line of
/// JSON on stdout, e.g. `{"hey_jarvis_v0.1": 0.0132}`.

use crate::audio_source::AudioFrame;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, trace};

/// Wake-word name to confidence in [0, 1]
pub type ScoreMap = HashMap<String, f32>;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Wake word '{0}' missing from model output")]
    UnknownWakeWord(String),

    #[error("Failed to start scoring model: {0}")]
    Launch(String),

    #[error("Scoring model I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed model output: {0}")]
    Protocol(String),

    #[error("Scoring model exited")]
    Exited,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoringOracle: Send {
    /// Score one full frame
    async fn score(&mut self, frame: &AudioFrame) -> Result<ScoreMap, OracleError>;

    /// Reinitialize, dropping any smoothing state carried across frames
    async fn reset(&mut self) -> Result<(), OracleError>;
}

/// Oracle backed by a child process speaking the frame/JSON line protocol
pub struct SubprocessOracle {
    program: String,
    args: Vec<String>,
    session: Option<ScorerSession>,
}

struct ScorerSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SubprocessOracle {
    /// Start the scorer
    pub fn spawn(program: impl Into<String>, args: Vec<String>) -> Result<Self, OracleError> {
        let program = program.into();
        let session = Self::start(&program, &args)?;

        Ok(Self {
            program,
            args,
            session: Some(session),
        })
    }

    /// Parse a shell-like command line (whitespace separated) into an oracle
    pub fn from_command_line(command_line: &str) -> Result<Self, OracleError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| OracleError::Launch("empty scorer command".to_string()))?;

        Self::spawn(program, parts.collect())
    }

    fn start(program: &str, args: &[String]) -> Result<ScorerSession, OracleError> {
        let mut child = TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Launch(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OracleError::Launch("scorer stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Launch("scorer stdout unavailable".to_string()))?;

        info!("Scoring model started: {} (pid {:?})", program, child.id());

        Ok(ScorerSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

#[async_trait]
impl ScoringOracle for SubprocessOracle {
    async fn score(&mut self, frame: &AudioFrame) -> Result<ScoreMap, OracleError> {
        let session = self.session.as_mut().ok_or(OracleError::Exited)?;

        session.stdin.write_all(&frame.to_le_bytes()).await?;
        session.stdin.flush().await?;

        let mut line = String::new();
        if session.stdout.read_line(&mut line).await? == 0 {
            return Err(OracleError::Exited);
        }

        let scores: ScoreMap = serde_json::from_str(line.trim())
            .map_err(|e| OracleError::Protocol(format!("{}: {:?}", e, line.trim())))?;

        trace!("Scores: {:?}", scores);
        Ok(scores)
    }

    async fn reset(&mut self) -> Result<(), OracleError> {
        if let Some(mut session) = self.session.take() {
            // Closing stdin lets a well-behaved scorer exit on its own
            drop(session.stdin);
            let _ = session.child.kill().await;
        }

        debug!("Restarting scoring model");
        self.session = Some(Self::start(&self.program, &self.args)?);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SCRIPT: &str = r#"while [ "$(head -c 8 | wc -c)" -eq 8 ]; do echo '{"hey_jarvis": 0.75}'; done"#;

    fn scorer() -> SubprocessOracle {
        SubprocessOracle::spawn("sh", vec!["-c".to_string(), SCRIPT.to_string()]).unwrap()
    }

    #[tokio::test]
    async fn test_subprocess_round_trip() {
        let mut oracle = scorer();
        let frame = AudioFrame::new(vec![0, 1, 2, 3]);

        for _ in 0..3 {
            let scores = oracle.score(&frame).await.unwrap();
            assert_relative_eq!(scores["hey_jarvis"], 0.75);
        }
    }

    #[tokio::test]
    async fn test_reset_restarts_scorer() {
        let mut oracle = scorer();
        let frame = AudioFrame::new(vec![0; 4]);

        oracle.score(&frame).await.unwrap();
        oracle.reset().await.unwrap();

        let scores = oracle.score(&frame).await.unwrap();
        assert_eq!(scores.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_protocol_error() {
        let mut oracle = SubprocessOracle::spawn(
            "sh",
            vec!["-c".to_string(), "head -c 8 > /dev/null; echo not-json".to_string()],
        )
        .unwrap();

        let result = oracle.score(&AudioFrame::new(vec![0; 4])).await;
        assert!(matches!(result, Err(OracleError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_exited_scorer() {
        let mut oracle =
            SubprocessOracle::spawn("sh", vec!["-c".to_string(), "exit 0".to_string()]).unwrap();

        let result = oracle.score(&AudioFrame::new(vec![0; 4])).await;
        assert!(matches!(result, Err(OracleError::Exited) | Err(OracleError::Io(_))));
    }

    #[test]
    fn test_empty_command_line() {
        assert!(matches!(
            SubprocessOracle::from_command_line("   "),
            Err(OracleError::Launch(_))
        ));
    }
}
