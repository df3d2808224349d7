/// Clip persistence
///
/// Writes the rolling buffer snapshot as a mono 16-bit PCM WAV file. The
/// target path is fixed and overwritten on every detection.

use crate::audio_buffer::AudioSample;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Default clip location, overwritten on every detection
pub const DEFAULT_CLIP_PATH: &str = "wake_audio.wav";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to write clip {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// WAV header used for clips: 1 channel, 2-byte samples
pub fn clip_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write `samples` (oldest first) to `path`
pub fn write_clip(
    path: &Path,
    samples: &[AudioSample],
    sample_rate: u32,
) -> Result<(), PersistenceError> {
    let wrap = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = WavWriter::create(path, clip_spec(sample_rate)).map_err(wrap)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wrap)?;
    }
    writer.finalize().map_err(wrap)?;

    info!(
        "Saved {} samples ({:.2}s) to {}",
        samples.len(),
        samples.len() as f32 / sample_rate as f32,
        path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use tempfile::tempdir;

    #[test]
    fn test_clip_header_and_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN];

        write_clip(&path, &samples, 16000).unwrap();

        let mut reader = WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 16000);

        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_payload_is_little_endian() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        write_clip(&path, &[0x0102, -2], 16000).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        // Canonical 44-byte header, then raw sample bytes
        assert_eq!(&bytes[bytes.len() - 4..], &[0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_clip_is_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.wav");

        write_clip(&path, &vec![5; 100], 16000).unwrap();
        write_clip(&path, &[7, 8], 16000).unwrap();

        let read: Vec<i16> = WavReader::open(&path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(read, vec![7, 8]);
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.wav");

        let result = write_clip(&path, &[1, 2, 3], 16000);
        assert!(matches!(result, Err(PersistenceError::Write { .. })));
    }
}
