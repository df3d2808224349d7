/// Trigger policy
///
/// Turns the per-frame score map into a detection event. A detection fires
/// when the configured wake word scores strictly above the threshold; there
/// is no debounce because the loop stops capturing on the first fire.

use crate::oracle::{OracleError, ScoreMap};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Default detection threshold
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Wake-word detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Wake word that crossed the threshold
    pub wake_word: String,

    /// Confidence score (0.0 - 1.0)
    pub score: f32,

    /// Timestamp when the wake word was detected (microseconds since epoch)
    pub timestamp: i64,
}

/// Fires when `scores[wake_word] > threshold`.
///
/// A score map without `wake_word` means the model and configuration
/// disagree; that is reported, never read as a zero score.
pub fn evaluate(
    scores: &ScoreMap,
    wake_word: &str,
    threshold: f32,
) -> Result<Option<DetectionEvent>, OracleError> {
    let score = *scores
        .get(wake_word)
        .ok_or_else(|| OracleError::UnknownWakeWord(wake_word.to_string()))?;

    trace!("{} score={:.5}", wake_word, score);

    if score > threshold {
        Ok(Some(DetectionEvent {
            wake_word: wake_word.to_string(),
            score,
            timestamp: current_timestamp_micros(),
        }))
    } else {
        Ok(None)
    }
}

/// Configured wake word and threshold
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    wake_word: String,
    threshold: f32,
}

impl TriggerPolicy {
    pub fn new(wake_word: impl Into<String>, threshold: f32) -> Self {
        Self {
            wake_word: wake_word.into(),
            threshold,
        }
    }

    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score of the configured wake word, failing if the model omitted it
    pub fn score_of(&self, scores: &ScoreMap) -> Result<f32, OracleError> {
        scores
            .get(&self.wake_word)
            .copied()
            .ok_or_else(|| OracleError::UnknownWakeWord(self.wake_word.clone()))
    }

    pub fn evaluate(&self, scores: &ScoreMap) -> Result<Option<DetectionEvent>, OracleError> {
        evaluate(scores, &self.wake_word, self.threshold)
    }
}

/// Get current timestamp in microseconds
fn current_timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(value: f32) -> ScoreMap {
        ScoreMap::from([("hey_jarvis".to_string(), value)])
    }

    #[test]
    fn test_fires_above_threshold() {
        let event = evaluate(&scores(0.9), "hey_jarvis", 0.5).unwrap().unwrap();
        assert_eq!(event.wake_word, "hey_jarvis");
        assert_eq!(event.score, 0.9);
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_equal_to_threshold_never_fires() {
        assert!(evaluate(&scores(0.5), "hey_jarvis", 0.5).unwrap().is_none());
    }

    #[test]
    fn test_fires_iff_strictly_above() {
        let policy = TriggerPolicy::new("hey_jarvis", DEFAULT_THRESHOLD);

        for step in 0..=100 {
            let value = step as f32 / 100.0;
            let fired = policy.evaluate(&scores(value)).unwrap().is_some();
            assert_eq!(fired, value > 0.5, "score {}", value);
        }
    }

    #[test]
    fn test_missing_wake_word_is_error() {
        let result = evaluate(&scores(0.9), "alexa", 0.5);
        match result {
            Err(OracleError::UnknownWakeWord(name)) => assert_eq!(name, "alexa"),
            other => panic!("Expected UnknownWakeWord, got {:?}", other),
        }
    }

    #[test]
    fn test_other_keys_ignored() {
        let mut map = scores(0.1);
        map.insert("alexa".to_string(), 0.99);

        let policy = TriggerPolicy::new("hey_jarvis", 0.5);
        assert!(policy.evaluate(&map).unwrap().is_none());
        assert_eq!(policy.score_of(&map).unwrap(), 0.1);
    }

    #[test]
    fn test_event_serializes() {
        let event = DetectionEvent {
            wake_word: "hey_jarvis".to_string(),
            score: 0.75,
            timestamp: 42,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"wake_word":"hey_jarvis","score":0.75,"timestamp":42}"#);
    }
}
