//! The session controller: owns one connection's devices and session, and
//! drives the `Disconnected → Connected ⇄ Speaking → Disconnected` state
//! machine.
//!
//! All per-connection resources live in a single [`Connection`] behind one
//! mutex. Device and transport events are consumed by one loop task per
//! connection, so the playback clock and capture framing only ever see one
//! writer at a time. Callbacks are always invoked with the lock released so
//! they may call back into the agent.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::capture::CapturePipeline;
use crate::device::{AudioBackend, AudioInput, DeviceEvent};
use crate::error::VoiceError;
use crate::frame::EncodedChunk;
use crate::playback::PlaybackScheduler;
use crate::state::{ConnectionState, Speaker, TranscriptEvent};
use crate::transport::{LiveSession, SessionConfig, Transport, TransportEvent};

pub type TranscriptCallback = Arc<dyn Fn(TranscriptEvent) + Send + Sync>;
pub type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Full-duplex voice client for a remote conversational agent.
///
/// Share it behind an `Arc` when `disconnect()` must be reachable while a
/// `connect()` is still pending. Dropping the agent disconnects it.
pub struct VoiceAgent {
    shared: Arc<Shared>,
}

impl VoiceAgent {
    pub fn new(
        audio: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        on_transcript: impl Fn(TranscriptEvent) + Send + Sync + 'static,
        on_status: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                audio,
                transport,
                config,
                on_transcript: Arc::new(on_transcript),
                on_status: Arc::new(on_status),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Acquires the microphone, opens the session and starts streaming.
    ///
    /// Does nothing if already connected or connecting. Never fails: every
    /// error is logged and reported as `Disconnected` through the status
    /// callback.
    pub async fn connect(&self) {
        let Some((attempt, cancel)) = self.shared.begin_attempt() else {
            debug!("Ignoring connect: already connected or connecting");
            return;
        };
        self.shared
            .clone()
            .establish(attempt, cancel)
            .instrument(info_span!("voice_session", attempt))
            .await;
    }

    /// Stops capture and playback, closes the session and releases the
    /// microphone. Idempotent, and safe while `connect()` is still pending.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().status
    }
}

impl Drop for VoiceAgent {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

struct Shared {
    audio: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    on_transcript: TranscriptCallback,
    on_status: StatusCallback,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    status: ConnectionState,
    phase: Phase,
    attempts: u64,
}

#[derive(Default)]
enum Phase {
    #[default]
    Idle,
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Active(Box<Connection>),
}

/// Everything acquired for one connection.
struct Connection {
    attempt: u64,
    cancel: CancellationToken,
    input: Box<dyn AudioInput>,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    session: Arc<dyn LiveSession>,
}

impl Connection {
    fn shutdown(mut self) {
        self.capture.stop(self.input.as_mut());
        self.playback.reset();
        self.session.close();
        self.input.release();
        self.cancel.cancel();
    }
}

impl Inner {
    fn is_connecting(&self, attempt: u64) -> bool {
        matches!(self.phase, Phase::Connecting { attempt: a, .. } if a == attempt)
    }

    fn active_mut(&mut self, attempt: u64) -> Option<&mut Connection> {
        match &mut self.phase {
            Phase::Active(conn) if conn.attempt == attempt => Some(conn),
            _ => None,
        }
    }

    /// Returns the new state if it changed.
    fn set_status(&mut self, status: ConnectionState) -> Option<ConnectionState> {
        if self.status == status {
            return None;
        }
        self.status = status;
        Some(status)
    }

    /// Tears down whatever the phase holds. Returns whether anything was
    /// connected or connecting.
    fn reset(&mut self) -> bool {
        self.status = ConnectionState::Disconnected;
        match std::mem::take(&mut self.phase) {
            Phase::Idle => false,
            Phase::Connecting { cancel, .. } => {
                cancel.cancel();
                true
            }
            Phase::Active(conn) => {
                conn.shutdown();
                true
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, changed: Option<ConnectionState>) {
        if let Some(status) = changed {
            (self.on_status)(status);
        }
    }

    fn begin_attempt(&self) -> Option<(u64, CancellationToken)> {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Idle) {
            return None;
        }
        inner.attempts += 1;
        let attempt = inner.attempts;
        let cancel = CancellationToken::new();
        inner.phase = Phase::Connecting {
            attempt,
            cancel: cancel.clone(),
        };
        Some((attempt, cancel))
    }

    /// Drops a failed attempt, unless `disconnect()` already took it over.
    fn abandon_attempt(&self, attempt: u64, reason: &VoiceError) {
        let ours = {
            let mut inner = self.lock();
            let ours = inner.is_connecting(attempt);
            if ours {
                inner.reset();
            }
            ours
        };
        if ours {
            warn!(error = %reason, "Voice connection failed");
            (self.on_status)(ConnectionState::Disconnected);
        }
    }

    async fn establish(self: Arc<Self>, attempt: u64, cancel: CancellationToken) {
        info!("Acquiring microphone");
        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect cancelled while acquiring microphone");
                return;
            }
            result = self.audio.open_input() => result,
        };
        let mut input = match input {
            Ok(input) => input,
            Err(e) => return self.abandon_attempt(attempt, &e),
        };

        info!(model = %self.config.model, voice = %self.config.voice_name, "Opening live session");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect cancelled while opening the session");
                input.release();
                return;
            }
            result = self.transport.open(&self.config) => result,
        };
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                input.release();
                return self.abandon_attempt(attempt, &e);
            }
        };
        let session: Arc<dyn LiveSession> = Arc::from(opened.session);
        let events = opened.events;

        let (device_tx, device_rx) = mpsc::unbounded_channel();
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Connect cancelled while opening the speaker");
                session.close();
                input.release();
                return;
            }
            result = self.audio.open_output(device_tx.clone()) => result,
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                session.close();
                input.release();
                return self.abandon_attempt(attempt, &e);
            }
        };

        let sink = session.clone();
        let mut capture = CapturePipeline::new(move |chunk: EncodedChunk| {
            if let Err(e) = sink.send(chunk) {
                debug!(error = %e, "Dropping capture frame");
            }
        });
        if let Err(e) = capture.start(input.as_mut(), device_tx) {
            session.close();
            input.release();
            return self.abandon_attempt(attempt, &e);
        }

        let connection = Connection {
            attempt,
            cancel: cancel.clone(),
            input,
            capture,
            playback: PlaybackScheduler::new(output),
            session,
        };

        let changed = {
            let mut inner = self.lock();
            if !inner.is_connecting(attempt) {
                drop(inner);
                info!("Disconnected before the session was ready; closing it");
                connection.shutdown();
                return;
            }
            inner.phase = Phase::Active(Box::new(connection));
            inner.set_status(ConnectionState::Connected)
        };
        info!("Voice session connected");
        self.notify(changed);

        tokio::spawn(
            self.clone()
                .run(attempt, cancel, device_rx, events)
                .instrument(tracing::Span::current()),
        );
    }

    async fn run(
        self: Arc<Self>,
        attempt: u64,
        cancel: CancellationToken,
        mut device_rx: mpsc::UnboundedReceiver<DeviceEvent>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Session event stream ended");
                        self.teardown(attempt);
                        break;
                    };
                    if self.on_transport_event(attempt, event).is_break() {
                        break;
                    }
                }
                Some(event) = device_rx.recv() => self.on_device_event(attempt, event),
            }
        }
        debug!("Session loop finished");
    }

    fn on_transport_event(&self, attempt: u64, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::UserTranscript(text) => {
                self.forward_transcript(attempt, text, Speaker::User)
            }
            TransportEvent::AgentTranscript(text) => {
                self.forward_transcript(attempt, text, Speaker::Agent)
            }
            TransportEvent::Audio(chunk) => self.play(attempt, &chunk),
            TransportEvent::Closed(reason) => {
                info!(?reason, "Session closed by remote");
                self.teardown(attempt);
                return ControlFlow::Break(());
            }
            TransportEvent::Error(message) => {
                let e = VoiceError::Remote(message);
                error!(error = %e, "Session failed");
                self.teardown(attempt);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn forward_transcript(&self, attempt: u64, text: String, speaker: Speaker) {
        if text.is_empty() || self.lock().active_mut(attempt).is_none() {
            return;
        }
        (self.on_transcript)(TranscriptEvent { text, speaker });
    }

    fn play(&self, attempt: u64, chunk: &EncodedChunk) {
        let changed = {
            let mut inner = self.lock();
            let Some(conn) = inner.active_mut(attempt) else {
                return;
            };
            match conn.playback.enqueue(chunk) {
                Ok(scheduled)
                    if scheduled.started_speaking
                        && inner.status == ConnectionState::Connected =>
                {
                    inner.set_status(ConnectionState::Speaking)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Dropping inbound audio chunk");
                    None
                }
            }
        };
        self.notify(changed);
    }

    fn on_device_event(&self, attempt: u64, event: DeviceEvent) {
        let changed = {
            let mut inner = self.lock();
            let Some(conn) = inner.active_mut(attempt) else {
                return;
            };
            match event {
                DeviceEvent::Captured(samples) => {
                    conn.capture.push_samples(&samples);
                    None
                }
                DeviceEvent::PlaybackEnded(id) => {
                    if conn.playback.on_buffer_ended(id)
                        && inner.status == ConnectionState::Speaking
                    {
                        inner.set_status(ConnectionState::Connected)
                    } else {
                        None
                    }
                }
            }
        };
        self.notify(changed);
    }

    /// Remote closure or failure: same teardown as a local disconnect, but
    /// only if `attempt` is still the live connection.
    fn teardown(&self, attempt: u64) {
        let torn_down = {
            let mut inner = self.lock();
            inner.active_mut(attempt).is_some() && inner.reset()
        };
        if torn_down {
            info!("Voice session disconnected");
            (self.on_status)(ConnectionState::Disconnected);
        }
    }

    fn disconnect(&self) {
        let torn_down = self.lock().reset();
        if torn_down {
            info!("Voice session disconnected");
            (self.on_status)(ConnectionState::Disconnected);
        }
    }
}
