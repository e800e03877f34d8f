//! Audio capture and playback adapters.
//!
//! The realtime protocol moves raw PCM 16-bit mono at 24 kHz, base64-encoded
//! inside `input_audio_buffer.append` events. The adapters here bridge that
//! wire format to host audio primitives behind the [`AudioSource`] and
//! [`AudioSink`] traits, so the pumps are fully testable without hardware.
//! cpal-backed microphone/speaker implementations live behind the
//! `desktop-audio` feature.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bridge::{BridgeResult, ClientEvent};

/// Sample rate of the realtime wire format.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame (20 ms at 24 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 480;

// =============================================================================
// Audio Queue
// =============================================================================

/// FIFO of decoded PCM buffers awaiting playback.
///
/// Buffers are consumed strictly in arrival order.
#[derive(Default)]
pub struct AudioQueue {
    buffers: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer to the tail of the queue.
    pub fn push(&self, buffer: Bytes) {
        self.buffers.lock().push_back(buffer);
        self.notify.notify_one();
    }

    /// Pop the head of the queue if one is available.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.buffers.lock().pop_front()
    }

    /// Wait for the next buffer.
    pub async fn pop(&self) -> Bytes {
        loop {
            if let Some(buffer) = self.try_pop() {
                return buffer;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }

    /// Drop all queued buffers.
    pub fn clear(&self) {
        self.buffers.lock().clear();
    }
}

// =============================================================================
// Device Traits
// =============================================================================

/// A source of fixed-size PCM frames (a microphone, a file, a test vector).
#[async_trait]
pub trait AudioSource: Send {
    /// Sample rate of the delivered frames.
    fn sample_rate(&self) -> u32;

    /// Next PCM frame, or `None` when the source has ended.
    async fn next_frame(&mut self) -> BridgeResult<Option<Bytes>>;

    /// Release the underlying device.
    fn close(&mut self);
}

/// A consumer of PCM buffers (a speaker, a file, a test recorder).
#[async_trait]
pub trait AudioSink: Send {
    /// Play one buffer. Called strictly in queue order.
    async fn play(&mut self, buffer: Bytes) -> BridgeResult<()>;

    /// Release the underlying device.
    fn close(&mut self);
}

// =============================================================================
// Capture Pump
// =============================================================================

/// Callback receiving serialized `input_audio_buffer.append` events.
pub type EncodedFrameSink = Arc<dyn Fn(String) + Send + Sync>;

/// Pulls frames from an [`AudioSource`], base64-encodes each one into an
/// append event, and hands it to the send callback.
#[derive(Default)]
pub struct CapturePump {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl CapturePump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start pumping. A second start while running is a no-op.
    pub fn start(&mut self, mut source: Box<dyn AudioSource>, sink: EncodedFrameSink) {
        if self.task.is_some() {
            tracing::debug!("Capture pump already running");
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = source.next_frame() => {
                        match frame {
                            Ok(Some(pcm)) => {
                                let event = ClientEvent::audio_append(&pcm);
                                match serde_json::to_string(&event) {
                                    Ok(json) => sink(json),
                                    Err(e) => {
                                        tracing::error!("Failed to encode audio frame: {}", e);
                                    }
                                }
                            }
                            Ok(None) => {
                                tracing::debug!("Audio source ended");
                                break;
                            }
                            Err(e) => {
                                tracing::error!("Audio capture error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            source.close();
        });
        self.cancel = Some(cancel);
        self.task = Some(task);
    }

    /// Stop pumping and release the source. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.task = None;
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for CapturePump {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Playback Pump
// =============================================================================

/// Drains an [`AudioQueue`] into an [`AudioSink`] strictly in arrival order.
pub struct PlaybackPump {
    queue: Arc<AudioQueue>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackPump {
    pub fn new(queue: Arc<AudioQueue>) -> Self {
        Self {
            queue,
            cancel: None,
            task: None,
        }
    }

    /// Start draining. Idempotent: starting an already-running pump is a
    /// no-op, not a second device open.
    pub fn start(&mut self, mut sink: Box<dyn AudioSink>) {
        if self.task.is_some() {
            tracing::debug!("Playback pump already running");
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let queue = self.queue.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        sink.close();
                        break;
                    }
                    buffer = queue.pop() => {
                        if let Err(e) = sink.play(buffer).await {
                            tracing::error!("Audio playback error: {}", e);
                            sink.close();
                            break;
                        }
                    }
                }
            }
        });
        self.cancel = Some(cancel);
        self.task = Some(task);
    }

    /// Stop draining, clear pending audio, release the sink.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.task = None;
        self.queue.clear();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

impl Drop for PlaybackPump {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Desktop devices (cpal)
// =============================================================================

#[cfg(feature = "desktop-audio")]
pub mod desktop {
    //! cpal-backed microphone and speaker.
    //!
    //! cpal streams are not `Send`, so each device lives on a dedicated
    //! thread that owns the stream; the async side talks to it over
    //! channels. Dropping or closing the adapter signals the thread, which
    //! drops the stream and releases the device.

    use super::*;
    use crate::core::bridge::BridgeError;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tokio::sync::mpsc;

    /// Default microphone, delivering PCM frames of
    /// [`CAPTURE_FRAME_SAMPLES`] samples at [`WIRE_SAMPLE_RATE`].
    pub struct CpalMicrophone {
        frames: mpsc::UnboundedReceiver<Bytes>,
        stop: Option<std::sync::mpsc::Sender<()>>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl CpalMicrophone {
        pub fn open() -> BridgeResult<Self> {
            let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Bytes>();
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

            let thread = std::thread::spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Hold the stream until asked to stop.
                let _ = stop_rx.recv();
                drop(stream);
            });

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    frames: frame_rx,
                    stop: Some(stop_tx),
                    thread: Some(thread),
                }),
                Ok(Err(e)) => Err(BridgeError::AudioDevice(e)),
                Err(_) => Err(BridgeError::AudioDevice(
                    "audio input thread exited during setup".to_string(),
                )),
            }
        }
    }

    fn build_input_stream(
        frame_tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| "no default input device".to_string())?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(WIRE_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_bytes = CAPTURE_FRAME_SAMPLES * 2;
        let mut pending: Vec<u8> = Vec::with_capacity(frame_bytes * 2);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    for sample in data {
                        pending.extend_from_slice(&sample.to_le_bytes());
                    }
                    while pending.len() >= frame_bytes {
                        let frame: Vec<u8> = pending.drain(..frame_bytes).collect();
                        let _ = frame_tx.send(Bytes::from(frame));
                    }
                },
                |err| tracing::error!("Microphone stream error: {}", err),
                None,
            )
            .map_err(|e| e.to_string())?;
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    #[async_trait]
    impl AudioSource for CpalMicrophone {
        fn sample_rate(&self) -> u32 {
            WIRE_SAMPLE_RATE
        }

        async fn next_frame(&mut self) -> BridgeResult<Option<Bytes>> {
            Ok(self.frames.recv().await)
        }

        fn close(&mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl Drop for CpalMicrophone {
        fn drop(&mut self) {
            self.close();
        }
    }

    /// Default speaker, fed from an internal sample buffer that the output
    /// callback drains (zero-filling on underrun).
    pub struct CpalSpeaker {
        samples: Arc<Mutex<VecDeque<i16>>>,
        stop: Option<std::sync::mpsc::Sender<()>>,
        thread: Option<std::thread::JoinHandle<()>>,
    }

    impl CpalSpeaker {
        pub fn open() -> BridgeResult<Self> {
            let samples: Arc<Mutex<VecDeque<i16>>> = Arc::new(Mutex::new(VecDeque::new()));
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

            let shared = samples.clone();
            let thread = std::thread::spawn(move || {
                let stream = match build_output_stream(shared) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            });

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    samples,
                    stop: Some(stop_tx),
                    thread: Some(thread),
                }),
                Ok(Err(e)) => Err(BridgeError::AudioDevice(e)),
                Err(_) => Err(BridgeError::AudioDevice(
                    "audio output thread exited during setup".to_string(),
                )),
            }
        }
    }

    fn build_output_stream(
        samples: Arc<Mutex<VecDeque<i16>>>,
    ) -> Result<cpal::Stream, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no default output device".to_string())?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(WIRE_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    let mut queued = samples.lock();
                    for slot in data.iter_mut() {
                        *slot = queued.pop_front().unwrap_or(0);
                    }
                },
                |err| tracing::error!("Speaker stream error: {}", err),
                None,
            )
            .map_err(|e| e.to_string())?;
        stream.play().map_err(|e| e.to_string())?;
        Ok(stream)
    }

    #[async_trait]
    impl AudioSink for CpalSpeaker {
        async fn play(&mut self, buffer: Bytes) -> BridgeResult<()> {
            let mut queued = self.samples.lock();
            for chunk in buffer.chunks_exact(2) {
                queued.push_back(i16::from_le_bytes([chunk[0], chunk[1]]));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.samples.lock().clear();
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
    }

    impl Drop for CpalSpeaker {
        fn drop(&mut self) {
            self.close();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct VecSource {
        frames: VecDeque<Bytes>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AudioSource for VecSource {
        fn sample_rate(&self) -> u32 {
            WIRE_SAMPLE_RATE
        }

        async fn next_frame(&mut self) -> BridgeResult<Option<Bytes>> {
            Ok(self.frames.pop_front())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct VecSink {
        played: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AudioSink for VecSink {
        async fn play(&mut self, buffer: Bytes) -> BridgeResult<()> {
            self.played.lock().push(buffer);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn queue_is_fifo() {
        let queue = AudioQueue::new();
        queue.push(Bytes::from_static(&[1]));
        queue.push(Bytes::from_static(&[2]));
        queue.push(Bytes::from_static(&[3]));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().unwrap().as_ref(), &[1]);
        assert_eq!(queue.try_pop().unwrap().as_ref(), &[2]);
        assert_eq!(queue.try_pop().unwrap().as_ref(), &[3]);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn queue_clear_empties() {
        let queue = AudioQueue::new();
        queue.push(Bytes::from_static(&[1]));
        queue.push(Bytes::from_static(&[2]));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn capture_pump_encodes_frames_in_order() {
        let closed = Arc::new(AtomicBool::new(false));
        let source = VecSource {
            frames: VecDeque::from([Bytes::from_static(&[1, 0]), Bytes::from_static(&[2, 0])]),
            closed: closed.clone(),
        };

        let sent: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = sent.clone();
        let mut pump = CapturePump::new();
        pump.start(
            Box::new(source),
            Arc::new(move |json| sink_log.lock().push(json)),
        );

        tokio::time::timeout(Duration::from_secs(1), async {
            while !closed.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("source should drain and close");

        let frames = sent.lock();
        assert_eq!(frames.len(), 2);
        for (frame, expected) in frames.iter().zip([[1u8, 0], [2u8, 0]]) {
            let value: serde_json::Value = serde_json::from_str(frame).unwrap();
            assert_eq!(value["type"], "input_audio_buffer.append");
            let audio = BASE64_STANDARD
                .decode(value["audio"].as_str().unwrap())
                .unwrap();
            assert_eq!(audio, expected);
        }
    }

    #[tokio::test]
    async fn capture_pump_stop_releases_source() {
        let closed = Arc::new(AtomicBool::new(false));
        // A source that never ends on its own.
        struct PendingSource {
            closed: Arc<AtomicBool>,
        }
        #[async_trait]
        impl AudioSource for PendingSource {
            fn sample_rate(&self) -> u32 {
                WIRE_SAMPLE_RATE
            }
            async fn next_frame(&mut self) -> BridgeResult<Option<Bytes>> {
                std::future::pending::<()>().await;
                unreachable!()
            }
            fn close(&mut self) {
                self.closed.store(true, Ordering::SeqCst);
            }
        }

        let mut pump = CapturePump::new();
        pump.start(
            Box::new(PendingSource {
                closed: closed.clone(),
            }),
            Arc::new(|_| {}),
        );
        tokio::task::yield_now().await;
        assert!(pump.is_running());

        pump.stop();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !closed.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("stop should release the source");

        // Repeated stop is harmless.
        pump.stop();
    }

    #[tokio::test]
    async fn playback_pump_drains_in_order_and_start_is_idempotent() {
        let queue = Arc::new(AudioQueue::new());
        let played: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let mut pump = PlaybackPump::new(queue.clone());
        pump.start(Box::new(VecSink {
            played: played.clone(),
            closed: closed.clone(),
        }));
        // Second start must not open a second sink.
        pump.start(Box::new(VecSink {
            played: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }));

        queue.push(Bytes::from_static(&[1]));
        queue.push(Bytes::from_static(&[2]));
        queue.push(Bytes::from_static(&[3]));

        tokio::time::timeout(Duration::from_secs(1), async {
            while played.lock().len() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("all buffers should play");

        assert_eq!(
            played
                .lock()
                .iter()
                .map(|b| b.as_ref().to_vec())
                .collect::<Vec<_>>(),
            vec![vec![1], vec![2], vec![3]]
        );

        queue.push(Bytes::from_static(&[9]));
        pump.stop();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !closed.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("stop should release the sink");
        assert!(queue.is_empty());
    }
}
