/// Audio input module
///
/// Owns the microphone stream lifecycle: open, fixed-size frame reads, and
/// idempotent close. The cpal backend keeps its `Stream` on a dedicated
/// thread (cpal streams are not `Send`) and forwards whole frames over a
/// channel, so the detection loop only ever sees complete frames.

use crate::audio_buffer::AudioSample;
use crate::stderr_guard::StderrSilencer;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, SizedSample, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Samples per frame handed to the scoring model (80ms at 16kHz)
pub const FRAME_LEN: usize = 1280;

/// Frames queued between the capture thread and the loop (~5s of audio).
/// When the scorer falls further behind, new frames are dropped.
pub const FRAME_QUEUE_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Input device unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied opening input device: {0}")]
    PermissionDenied(String),

    #[error("Failed to open input stream: {0}")]
    Open(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Truncated read: input closed before a full frame was available")]
    Truncated,
}

/// One block of mono 16-bit PCM, in capture order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<AudioSample>,
}

impl AudioFrame {
    pub fn new(samples: Vec<AudioSample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<AudioSample> {
        self.samples
    }

    /// Little-endian byte encoding of the samples
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

impl From<Vec<AudioSample>> for AudioFrame {
    fn from(samples: Vec<AudioSample>) -> Self {
        Self::new(samples)
    }
}

/// An open input stream
#[async_trait]
pub trait CaptureStream: Send {
    /// Wait for the next complete frame
    async fn read_frame(&mut self) -> Result<AudioFrame, DeviceError>;

    /// Release the device. Calling this on a closed stream does nothing.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Something that can open the input device
pub trait AudioSource: Send {
    type Stream: CaptureStream;

    fn open(&mut self) -> Result<Self::Stream, DeviceError>;

    /// Release the audio subsystem on shutdown
    fn release(&mut self) {}
}

/// Cuts an arbitrary sample stream into fixed-size frames.
/// Samples that never make up a full frame are never emitted.
pub(crate) struct FrameAssembler {
    frame_len: usize,
    pending: Vec<AudioSample>,
}

impl FrameAssembler {
    pub(crate) fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    pub(crate) fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = AudioSample>,
        F: FnMut(Vec<AudioSample>),
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_len {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                emit(frame);
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}

type FrameSender = mpsc::Sender<Result<AudioFrame, DeviceError>>;

/// Callback side of the capture channel. Never blocks the audio thread:
/// a frame that finds the queue full is counted and dropped.
pub(crate) struct FrameForwarder {
    assembler: FrameAssembler,
    frames: FrameSender,
    dropped: u64,
}

impl FrameForwarder {
    pub(crate) fn new(frame_len: usize, frames: FrameSender) -> Self {
        Self {
            assembler: FrameAssembler::new(frame_len),
            frames,
            dropped: 0,
        }
    }

    pub(crate) fn push<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = AudioSample>,
    {
        let frames = &self.frames;
        let dropped = &mut self.dropped;

        self.assembler.push(samples, |frame| {
            match frames.try_send(Ok(AudioFrame::new(frame))) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    *dropped += 1;
                    if *dropped == 1 || *dropped % 100 == 0 {
                        warn!("Scoring is behind capture; {} frames dropped", dropped);
                    }
                }
                // Receiver closed; the stream is being torn down
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        });
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Convert a normalized float sample to 16-bit PCM
pub(crate) fn f32_to_sample(sample: f32) -> AudioSample {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as AudioSample
}

/// Default input device through cpal
pub struct CpalSource {
    sample_rate: u32,
    frame_len: usize,
}

impl CpalSource {
    pub fn new(sample_rate: usize, frame_len: usize) -> Self {
        Self {
            sample_rate: sample_rate as u32,
            frame_len,
        }
    }
}

impl AudioSource for CpalSource {
    type Stream = CpalCapture;

    fn open(&mut self) -> Result<CpalCapture, DeviceError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), DeviceError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let sample_rate = self.sample_rate;
        let frame_len = self.frame_len;

        let worker = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let opened = {
                    let _quiet = StderrSilencer::engage();
                    open_input_stream(sample_rate, frame_len, frame_tx)
                };

                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Park until close() or the handle is dropped
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::Open(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "Audio input opened: {} Hz mono, {} samples per frame",
                    sample_rate, frame_len
                );
                Ok(CpalCapture {
                    frames: frame_rx,
                    stop: Some(stop_tx),
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(DeviceError::Open("capture thread exited during open".to_string()))
            }
        }
    }
}

fn open_input_stream(
    sample_rate: u32,
    frame_len: usize,
    frames: FrameSender,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(DeviceError::NoInputDevice)?;

    if let Ok(name) = device.name() {
        debug!("Using input device: {}", name);
    }

    let mut last_error = None;

    for buffer_size in [BufferSize::Fixed(frame_len as u32), BufferSize::Default] {
        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(sample_rate),
            buffer_size,
        };

        match build_stream::<i16, _>(&device, &config, frame_len, frames.clone(), |s| s) {
            Ok(stream) => return start(stream),
            Err(e) => {
                debug!("i16 input with {:?} rejected: {}", config, e);
                last_error = Some(e);
            }
        }

        match build_stream::<f32, _>(&device, &config, frame_len, frames.clone(), f32_to_sample) {
            Ok(stream) => return start(stream),
            Err(e) => {
                debug!("f32 input with {:?} rejected: {}", config, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .map(build_error)
        .unwrap_or_else(|| DeviceError::Open("no usable stream configuration".to_string())))
}

fn start(stream: cpal::Stream) -> Result<cpal::Stream, DeviceError> {
    stream.play().map_err(play_error)?;
    Ok(stream)
}

fn build_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    frame_len: usize,
    frames: FrameSender,
    convert: F,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    F: Fn(T) -> AudioSample + Send + 'static,
{
    let error_tx = frames.clone();
    let mut forwarder = FrameForwarder::new(frame_len, frames);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            forwarder.push(data.iter().map(|&s| convert(s)));
        },
        move |err| {
            warn!("Audio stream error: {}", err);
            let _ = error_tx.try_send(Err(DeviceError::Stream(err.to_string())));
        },
        None,
    )
}

fn build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::Unavailable("device not available".to_string())
        }
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("permission") {
                DeviceError::PermissionDenied(message)
            } else {
                DeviceError::Open(message)
            }
        }
    }
}

fn play_error(err: cpal::PlayStreamError) -> DeviceError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => {
            DeviceError::Unavailable("device not available".to_string())
        }
        other => DeviceError::Open(other.to_string()),
    }
}

/// Open handle returned by [`CpalSource::open`]
pub struct CpalCapture {
    frames: mpsc::Receiver<Result<AudioFrame, DeviceError>>,
    stop: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

#[async_trait]
impl CaptureStream for CpalCapture {
    async fn read_frame(&mut self) -> Result<AudioFrame, DeviceError> {
        match self.frames.recv().await {
            Some(result) => result,
            None => Err(DeviceError::Truncated),
        }
    }

    fn close(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };

        let _ = stop.send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Audio capture thread panicked");
            }
        }

        self.frames.close();
        info!("Audio input closed");
    }

    fn is_open(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stderr_guard::STDERR_TEST_LOCK;

    #[test]
    fn test_assembler_emits_full_frames_only() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();

        assembler.push(vec![1, 2, 3], |f| frames.push(f));
        assert!(frames.is_empty());
        assert_eq!(assembler.pending(), 3);

        assembler.push(vec![4, 5, 6, 7, 8, 9], |f| frames.push(f));
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(assembler.pending(), 1);
    }

    #[tokio::test]
    async fn test_forwarder_drops_frames_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut forwarder = FrameForwarder::new(4, tx);

        // Five full frames into a queue of two
        forwarder.push((0..20).map(|i| i as AudioSample));
        assert_eq!(forwarder.dropped(), 3);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.samples(), &[0, 1, 2, 3]);
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.samples(), &[4, 5, 6, 7]);
        assert!(rx.try_recv().is_err());

        // Space frees up once the loop catches up
        forwarder.push(vec![9; 4]);
        assert_eq!(rx.recv().await.unwrap().unwrap().samples(), &[9, 9, 9, 9]);
        assert_eq!(forwarder.dropped(), 3);
    }

    #[test]
    fn test_forwarder_ignores_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let mut forwarder = FrameForwarder::new(2, tx);
        forwarder.push(vec![1, 2, 3, 4]);
        assert_eq!(forwarder.dropped(), 0);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_sample(0.0), 0);
        assert_eq!(f32_to_sample(1.0), 32767);
        assert_eq!(f32_to_sample(-2.0), -32768);
    }

    #[test]
    fn test_frame_le_bytes() {
        let frame = AudioFrame::new(vec![1, -2]);
        assert_eq!(frame.to_le_bytes(), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_open_without_hardware() {
        // May fail on systems without audio input; must never panic
        let _serial = STDERR_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut source = CpalSource::new(16000, FRAME_LEN);
        match source.open() {
            Ok(mut capture) => {
                assert!(capture.is_open());
                capture.close();
                capture.close();
                assert!(!capture.is_open());
            }
            Err(e) => println!("AudioSource open result: {}", e),
        }
    }
}
