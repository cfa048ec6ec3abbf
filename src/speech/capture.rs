use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use super::{CaptureEvent, CaptureHandle, SpeechCapture};
use crate::error::{CaptureError, SpeechError, SpeechResult};

#[derive(Default)]
struct ChannelState {
    next_handle: u64,
    active: Option<(CaptureHandle, mpsc::UnboundedSender<CaptureEvent>)>,
    starts: u32,
    permission_denied: bool,
}

/// Capture backend fed by an external recognizer (or a terminal) through a
/// [`CaptureFeeder`]. Input pushed while capture is stopped is dropped.
#[derive(Clone, Default)]
pub struct ChannelCapture {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle used to push recognized speech into the active capture.
    pub fn feeder(&self) -> CaptureFeeder {
        CaptureFeeder {
            state: self.state.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.active.is_some())
            .unwrap_or(false)
    }

    /// How many times capture has been started.
    pub fn start_count(&self) -> u32 {
        self.state.lock().map(|s| s.starts).unwrap_or(0)
    }

    /// Make subsequent starts fail as if microphone access were refused.
    pub fn set_permission_denied(&self, denied: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.permission_denied = denied;
        }
    }
}

#[async_trait]
impl SpeechCapture for ChannelCapture {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> SpeechResult<CaptureHandle> {
        let mut state = self.state.lock().map_err(|_| CaptureError::Device {
            message: "capture state poisoned".to_string(),
        })?;

        if state.permission_denied {
            return Err(SpeechError::Capture(CaptureError::PermissionDenied));
        }

        state.next_handle += 1;
        state.starts += 1;
        let handle = CaptureHandle(state.next_handle);
        state.active = Some((handle, events));
        Ok(handle)
    }

    async fn stop(&self, handle: CaptureHandle) {
        if let Ok(mut state) = self.state.lock() {
            if state.active.as_ref().map(|(h, _)| *h) == Some(handle) {
                state.active = None;
            }
        }
    }
}

/// Producer side of a [`ChannelCapture`].
#[derive(Clone)]
pub struct CaptureFeeder {
    state: Arc<Mutex<ChannelState>>,
}

impl CaptureFeeder {
    /// Push partial text. Returns false when capture is not running.
    pub fn interim(&self, text: impl Into<String>) -> bool {
        self.send(CaptureEvent::Interim(text.into()))
    }

    /// Push a finalized utterance. Returns false when capture is not running.
    pub fn finalize(&self, text: impl Into<String>) -> bool {
        self.send(CaptureEvent::Final(text.into()))
    }

    /// Report a recognizer failure. Returns false when capture is not running.
    pub fn fail(&self, error: CaptureError) -> bool {
        self.send(CaptureEvent::Failed(error))
    }

    fn send(&self, event: CaptureEvent) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        match &state.active {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => {
                debug!(?event, "Capture inactive, input dropped");
                false
            }
        }
    }
}
