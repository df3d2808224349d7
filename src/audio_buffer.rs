/// Rolling audio buffer
///
/// Holds the most recent samples of a listening session so the audio
/// around a detection can be written out as a clip. Sized from a duration
/// (1.5 seconds at 16kHz by default, ~48KB).

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use tracing::debug;

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Input sample rate expected by the scoring model
pub const SAMPLE_RATE: usize = 16000;

/// Default clip window: 1.5 seconds at 16kHz
pub const DEFAULT_CLIP_SECS: f32 = 1.5;

/// Convert a clip duration into a sample capacity
pub fn capacity_for(duration_secs: f32, sample_rate: usize) -> usize {
    (duration_secs.max(0.0) * sample_rate as f32).round() as usize
}

/// Bounded FIFO of recent samples.
///
/// A buffer built with zero capacity is disabled: pushes are ignored and
/// snapshots are empty. This is how clip persistence being switched off
/// reaches the loop, so the loop itself never branches on it.
pub struct RollingBuffer {
    ring: Option<HeapRb<AudioSample>>,
}

impl RollingBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating rolling buffer with capacity: {} samples", capacity);

        let ring = if capacity == 0 {
            None
        } else {
            Some(HeapRb::<AudioSample>::new(capacity))
        };

        Self { ring }
    }

    /// Create a buffer covering `duration_secs` of audio
    pub fn for_duration(duration_secs: f32, sample_rate: usize) -> Self {
        Self::with_capacity(capacity_for(duration_secs, sample_rate))
    }

    /// A buffer that never retains anything
    pub fn disabled() -> Self {
        Self { ring: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.ring.is_some()
    }

    /// Append samples, evicting the oldest ones once capacity is reached
    pub fn push(&mut self, samples: &[AudioSample]) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        let capacity = ring.capacity().get();

        // Only the newest `capacity` samples can survive this push
        let samples = &samples[samples.len().saturating_sub(capacity)..];

        let vacant = ring.vacant_len();
        if samples.len() > vacant {
            let to_drop = samples.len() - vacant;
            ring.skip(to_drop);
        }

        ring.push_slice(samples);
    }

    /// All held samples in chronological order, oldest first
    pub fn snapshot(&self) -> Vec<AudioSample> {
        match self.ring.as_ref() {
            Some(ring) => ring.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.occupied_len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of samples retained (0 when disabled)
    pub fn capacity(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.capacity().get())
    }

    /// Drop everything held; called when a new listening session starts
    pub fn clear(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            let occupied = ring.occupied_len();
            ring.skip(occupied);
            debug!("Cleared rolling buffer");
        }
    }

    /// Duration of audio currently held (in seconds)
    pub fn duration_secs(&self, sample_rate: usize) -> f32 {
        self.len() as f32 / sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(start: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| start + i as i16).collect()
    }

    #[test]
    fn test_buffer_creation() {
        let buffer = RollingBuffer::for_duration(DEFAULT_CLIP_SECS, SAMPLE_RATE);
        assert_eq!(buffer.capacity(), 24_000);
        assert!(buffer.is_empty());
        assert!(buffer.is_enabled());
    }

    #[test]
    fn test_snapshot_is_chronological() {
        let mut buffer = RollingBuffer::with_capacity(1000);
        buffer.push(&[1, 2, 3]);
        buffer.push(&[4, 5]);

        assert_eq!(buffer.snapshot(), vec![1, 2, 3, 4, 5]);
        // Snapshot is a pure read
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_length_is_bounded_by_capacity() {
        let frame_len = 4;
        let capacity = 10;
        let mut buffer = RollingBuffer::with_capacity(capacity);

        for n in 1..=6 {
            buffer.push(&frame((n * 10) as i16, frame_len));
            assert_eq!(buffer.snapshot().len(), (n * frame_len).min(capacity));
        }

        // Always ends with the most recent frame
        let snapshot = buffer.snapshot();
        assert_eq!(&snapshot[snapshot.len() - frame_len..], frame(60, frame_len).as_slice());
    }

    #[test]
    fn test_eviction_keeps_newest_frames() {
        let mut buffer = RollingBuffer::with_capacity(6);
        buffer.push(&[1, 1, 1]);
        buffer.push(&[2, 2, 2]);
        buffer.push(&[3, 3, 3]);

        assert_eq!(buffer.snapshot(), vec![2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_push_longer_than_capacity() {
        let mut buffer = RollingBuffer::with_capacity(4);
        buffer.push(&[9, 9]);
        buffer.push(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(buffer.snapshot(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut buffer = RollingBuffer::with_capacity(8);
        buffer.push(&[7, 7, 7, 7]);
        buffer.push(&[7, 7, 7, 7]);

        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_disabled_buffer_is_noop() {
        let mut buffer = RollingBuffer::with_capacity(0);
        buffer.push(&[1, 2, 3]);

        assert!(!buffer.is_enabled());
        assert!(buffer.snapshot().is_empty());
        assert_eq!(buffer.capacity(), 0);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RollingBuffer::with_capacity(1000);
        buffer.push(&vec![1; 500]);
        assert_eq!(buffer.len(), 500);

        buffer.clear();
        assert!(buffer.is_empty());

        buffer.push(&[4, 5]);
        assert_eq!(buffer.snapshot(), vec![4, 5]);
    }

    #[test]
    fn test_duration_calculation() {
        let mut buffer = RollingBuffer::with_capacity(SAMPLE_RATE * 2);
        buffer.push(&vec![0; SAMPLE_RATE]);

        assert_relative_eq!(buffer.duration_secs(SAMPLE_RATE), 1.0, epsilon = 0.01);
    }
}
