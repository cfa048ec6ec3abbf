//! Speech input/output behind one adapter.
//!
//! [`SpeechAdapter`] owns the single capture handle and the single playback
//! slot of a session, so the orchestrator never has to know whether it runs a
//! voice call or a text chat:
//! - [`SpeechAdapter::voice`] wires capture, synthesis and playback backends
//! - [`SpeechAdapter::silent`] turns every operation into a no-op
//!
//! Capture delivers [`CaptureEvent`]s on a channel the orchestrator drains.

mod capture;
mod elevenlabs;
mod sink;

pub use capture::{CaptureFeeder, ChannelCapture};
pub use elevenlabs::{ElevenLabsSynthesizer, DEFAULT_VOICE_ID};
pub use sink::FileSink;

use async_trait::async_trait;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, SpeechError, SpeechResult};

/// Output of a speech-to-text capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Partial text, still changing.
    Interim(String),
    /// Finalized utterance.
    Final(String),
    Failed(CaptureError),
}

/// Opaque id of a running capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureHandle(pub u64);

/// Speech-to-text source.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Begin delivering events on `events` until stopped.
    async fn start(
        &self,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> SpeechResult<CaptureHandle>;

    async fn stop(&self, handle: CaptureHandle);
}

/// Text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> SpeechResult<Vec<u8>>;
}

/// Audio output.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Resolves when playback ends. Dropping the future must stop playback.
    async fn play(&self, audio: Vec<u8>) -> SpeechResult<()>;
}

/// Where capture stands after a start or a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Listening,
    /// No capture backend (text chat).
    Silent,
    /// Capture stopped until the user retries. `notify` is set the first
    /// time this happens in a session.
    Halted { notify: bool },
}

/// How a `speak` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Stopped by a newer utterance or by `stop_playback`.
    Interrupted,
    /// No playback backend (text chat).
    Skipped,
    Failed(String),
}

struct VoiceBackend {
    capture: Arc<dyn SpeechCapture>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
}

#[derive(Default)]
struct CaptureSlot {
    handle: Option<CaptureHandle>,
    blocked: bool,
    warned: bool,
}

#[derive(Default)]
struct PlaybackSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Per-session speech adapter.
pub struct SpeechAdapter {
    backend: Option<VoiceBackend>,
    capture: Mutex<CaptureSlot>,
    playback: StdMutex<PlaybackSlot>,
    events_tx: mpsc::UnboundedSender<CaptureEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<CaptureEvent>>>,
}

impl SpeechAdapter {
    /// Voice-call variant.
    pub fn voice(
        capture: Arc<dyn SpeechCapture>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self::build(Some(VoiceBackend {
            capture,
            synthesizer,
            sink,
        }))
    }

    /// Text-chat variant: nothing is captured or played.
    pub fn silent() -> Self {
        Self::build(None)
    }

    fn build(backend: Option<VoiceBackend>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            capture: Mutex::new(CaptureSlot::default()),
            playback: StdMutex::new(PlaybackSlot::default()),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    pub fn is_voice(&self) -> bool {
        self.backend.is_some()
    }

    /// Take the capture event stream. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<CaptureEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub async fn is_capturing(&self) -> bool {
        self.capture.lock().await.handle.is_some()
    }

    /// Start capture unless it is already running or halted.
    pub async fn start_capture(&self) -> CaptureStatus {
        let Some(backend) = &self.backend else {
            return CaptureStatus::Silent;
        };

        let mut slot = self.capture.lock().await;
        if slot.blocked {
            return CaptureStatus::Halted { notify: false };
        }
        if slot.handle.is_some() {
            return CaptureStatus::Listening;
        }

        match backend.capture.start(self.events_tx.clone()).await {
            Ok(handle) => {
                debug!(handle = handle.0, "Speech capture started");
                slot.handle = Some(handle);
                CaptureStatus::Listening
            }
            Err(SpeechError::Capture(CaptureError::NoSpeech)) => {
                debug!("No speech detected on start, restarting capture");
                match backend.capture.start(self.events_tx.clone()).await {
                    Ok(handle) => {
                        slot.handle = Some(handle);
                        CaptureStatus::Listening
                    }
                    Err(e) => {
                        warn!(error = %e, "Capture restart failed");
                        Self::halt(&mut slot)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Speech capture could not start");
                Self::halt(&mut slot)
            }
        }
    }

    pub async fn stop_capture(&self) {
        let Some(backend) = &self.backend else {
            return;
        };

        let mut slot = self.capture.lock().await;
        if let Some(handle) = slot.handle.take() {
            backend.capture.stop(handle).await;
            debug!(handle = handle.0, "Speech capture stopped");
        }
    }

    /// Apply the recovery policy for a capture failure: silently restart on
    /// "no speech", halt until the user retries on anything else.
    pub async fn recover_capture(&self, error: &CaptureError) -> CaptureStatus {
        let Some(backend) = &self.backend else {
            return CaptureStatus::Silent;
        };

        let mut slot = self.capture.lock().await;
        if let Some(handle) = slot.handle.take() {
            backend.capture.stop(handle).await;
        }

        match error {
            CaptureError::NoSpeech => {
                debug!("No speech detected, restarting capture");
                match backend.capture.start(self.events_tx.clone()).await {
                    Ok(handle) => {
                        slot.handle = Some(handle);
                        CaptureStatus::Listening
                    }
                    Err(e) => {
                        warn!(error = %e, "Capture restart failed");
                        Self::halt(&mut slot)
                    }
                }
            }
            other => {
                warn!(error = %other, "Speech capture halted");
                Self::halt(&mut slot)
            }
        }
    }

    /// Clear a halt so the next start can succeed.
    pub async fn clear_halt(&self) {
        self.capture.lock().await.blocked = false;
    }

    /// Clear a halt and try to start capture again.
    pub async fn retry_capture(&self) -> CaptureStatus {
        self.clear_halt().await;
        self.start_capture().await
    }

    fn halt(slot: &mut CaptureSlot) -> CaptureStatus {
        slot.blocked = true;
        let notify = !slot.warned;
        slot.warned = true;
        CaptureStatus::Halted { notify }
    }

    /// Synthesize and play `text`. A newer call, or `stop_playback`,
    /// interrupts this one.
    pub async fn speak(&self, text: &str, voice_id: &str) -> PlaybackOutcome {
        let Some(backend) = &self.backend else {
            return PlaybackOutcome::Skipped;
        };

        let token = CancellationToken::new();
        let generation = {
            let Ok(mut slot) = self.playback.lock() else {
                return PlaybackOutcome::Failed("playback slot poisoned".to_string());
            };
            if let Some(previous) = slot.token.replace(token.clone()) {
                previous.cancel();
            }
            slot.generation += 1;
            slot.generation
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => PlaybackOutcome::Interrupted,
            result = async {
                let audio = backend.synthesizer.synthesize(text, voice_id).await?;
                backend.sink.play(audio).await
            } => match result {
                Ok(()) => PlaybackOutcome::Completed,
                Err(e) => {
                    warn!(error = %e, "Playback failed");
                    PlaybackOutcome::Failed(e.to_string())
                }
            },
        };

        if let Ok(mut slot) = self.playback.lock() {
            if slot.generation == generation {
                slot.token = None;
            }
        }

        if outcome == PlaybackOutcome::Completed {
            info!(chars = text.len(), "Utterance played");
        }
        outcome
    }

    /// Stop the utterance in progress, if any.
    pub fn stop_playback(&self) {
        if let Ok(mut slot) = self.playback.lock() {
            if let Some(token) = slot.token.take() {
                token.cancel();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .lock()
            .map(|slot| slot.token.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct EchoSynth;

    #[async_trait]
    impl SpeechSynthesizer for EchoSynth {
        async fn synthesize(&self, text: &str, _voice_id: &str) -> SpeechResult<Vec<u8>> {
            if text == "fail" {
                return Err(SpeechError::Synthesis {
                    message: "quota".to_string(),
                });
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    /// Plays for `delay`, counting completed utterances.
    struct SlowSink {
        delay: Duration,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl AudioSink for SlowSink {
        async fn play(&self, _audio: Vec<u8>) -> SpeechResult<()> {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn voice_adapter(
        capture: ChannelCapture,
        delay: Duration,
    ) -> (Arc<SpeechAdapter>, Arc<SlowSink>) {
        let sink = Arc::new(SlowSink {
            delay,
            finished: AtomicUsize::new(0),
        });
        let adapter = SpeechAdapter::voice(Arc::new(capture), Arc::new(EchoSynth), sink.clone());
        (Arc::new(adapter), sink)
    }

    #[tokio::test]
    async fn test_silent_adapter_is_noop() {
        let adapter = SpeechAdapter::silent();
        assert!(!adapter.is_voice());
        assert_eq!(adapter.start_capture().await, CaptureStatus::Silent);
        assert_eq!(adapter.speak("hola", "v").await, PlaybackOutcome::Skipped);
        assert!(!adapter.is_capturing().await);
    }

    #[tokio::test]
    async fn test_speak_completes() {
        let (adapter, sink) = voice_adapter(ChannelCapture::new(), Duration::from_millis(5));
        assert_eq!(adapter.speak("hola", "v").await, PlaybackOutcome::Completed);
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
        assert!(!adapter.is_playing());
    }

    #[tokio::test]
    async fn test_new_utterance_interrupts_previous() {
        let (adapter, sink) = voice_adapter(ChannelCapture::new(), Duration::from_millis(200));

        let first = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.speak("primero", "v").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = adapter.speak("segundo", "v").await;

        assert_eq!(first.await.unwrap(), PlaybackOutcome::Interrupted);
        assert_eq!(second, PlaybackOutcome::Completed);
        assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_playback_interrupts() {
        let (adapter, _sink) = voice_adapter(ChannelCapture::new(), Duration::from_secs(5));

        let playing = {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.speak("largo", "v").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(adapter.is_playing());

        adapter.stop_playback();
        assert_eq!(playing.await.unwrap(), PlaybackOutcome::Interrupted);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_reported() {
        let (adapter, _sink) = voice_adapter(ChannelCapture::new(), Duration::from_millis(1));
        assert!(matches!(
            adapter.speak("fail", "v").await,
            PlaybackOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_capture_start_and_stop() {
        let capture = ChannelCapture::new();
        let feeder = capture.feeder();
        let (adapter, _) = voice_adapter(capture.clone(), Duration::from_millis(1));
        let mut events = adapter.take_events().unwrap();
        assert!(adapter.take_events().is_none());

        assert_eq!(adapter.start_capture().await, CaptureStatus::Listening);
        assert!(feeder.finalize("Hola"));
        assert_eq!(
            events.recv().await,
            Some(CaptureEvent::Final("Hola".to_string()))
        );

        adapter.stop_capture().await;
        assert!(!capture.is_active());
        assert!(!feeder.finalize("ignored"));
    }

    #[tokio::test]
    async fn test_no_speech_restarts_silently() {
        let capture = ChannelCapture::new();
        let (adapter, _) = voice_adapter(capture.clone(), Duration::from_millis(1));
        adapter.start_capture().await;

        let status = adapter.recover_capture(&CaptureError::NoSpeech).await;
        assert_eq!(status, CaptureStatus::Listening);
        assert!(capture.is_active());
        assert_eq!(capture.start_count(), 2);
    }

    /// Fails the first `failures` starts with "no speech".
    struct FlakyCapture {
        failures: usize,
        starts: AtomicUsize,
    }

    #[async_trait]
    impl SpeechCapture for FlakyCapture {
        async fn start(
            &self,
            _events: mpsc::UnboundedSender<CaptureEvent>,
        ) -> SpeechResult<CaptureHandle> {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(SpeechError::Capture(CaptureError::NoSpeech));
            }
            Ok(CaptureHandle(n as u64))
        }

        async fn stop(&self, _handle: CaptureHandle) {}
    }

    fn flaky_adapter(failures: usize) -> (SpeechAdapter, Arc<FlakyCapture>) {
        let capture = Arc::new(FlakyCapture {
            failures,
            starts: AtomicUsize::new(0),
        });
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(1),
            finished: AtomicUsize::new(0),
        });
        let adapter = SpeechAdapter::voice(capture.clone(), Arc::new(EchoSynth), sink);
        (adapter, capture)
    }

    #[tokio::test]
    async fn test_no_speech_on_start_restarts() {
        let (adapter, capture) = flaky_adapter(1);

        assert_eq!(adapter.start_capture().await, CaptureStatus::Listening);
        assert!(adapter.is_capturing().await);
        assert_eq!(capture.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_speech_twice_on_start_halts() {
        let (adapter, capture) = flaky_adapter(2);

        assert_eq!(
            adapter.start_capture().await,
            CaptureStatus::Halted { notify: true }
        );
        assert!(!adapter.is_capturing().await);
        assert_eq!(capture.starts.load(Ordering::SeqCst), 2);

        assert_eq!(adapter.retry_capture().await, CaptureStatus::Listening);
        assert!(adapter.is_capturing().await);
    }

    #[tokio::test]
    async fn test_permission_denied_halts_and_warns_once() {
        let capture = ChannelCapture::new();
        let (adapter, _) = voice_adapter(capture.clone(), Duration::from_millis(1));
        adapter.start_capture().await;

        let status = adapter
            .recover_capture(&CaptureError::PermissionDenied)
            .await;
        assert_eq!(status, CaptureStatus::Halted { notify: true });
        assert!(!capture.is_active());

        // Stays halted, without a second notice, until the user retries.
        assert_eq!(
            adapter.start_capture().await,
            CaptureStatus::Halted { notify: false }
        );
        capture.set_permission_denied(true);
        assert_eq!(
            adapter.retry_capture().await,
            CaptureStatus::Halted { notify: false }
        );

        capture.set_permission_denied(false);
        assert_eq!(adapter.retry_capture().await, CaptureStatus::Listening);
        assert!(capture.is_active());
    }
}
