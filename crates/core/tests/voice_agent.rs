use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atlas_core::device::{
    AudioBackend, AudioInput, AudioOutput, BufferId, DeviceEvent, DeviceEventSender,
};
use atlas_core::frame::{AudioFrame, CAPTURE_FRAME_SAMPLES, EncodedChunk, PLAYBACK_SAMPLE_RATE};
use atlas_core::transport::{LiveSession, OpenedSession, SessionConfig, Transport, TransportEvent};
use atlas_core::{ConnectionState, Result, Speaker, TranscriptEvent, VoiceAgent, VoiceError};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

// --- Fake audio devices ---

#[derive(Default)]
struct Devices {
    capture_tx: Option<DeviceEventSender>,
    output_tx: Option<DeviceEventSender>,
    inputs_started: usize,
    inputs_stopped: usize,
    inputs_released: usize,
    now: Duration,
    scheduled: Vec<(BufferId, Duration, Duration)>,
    outputs_stopped: usize,
}

struct FakeInput(Arc<Mutex<Devices>>);

impl AudioInput for FakeInput {
    fn start(&mut self, events: DeviceEventSender) -> Result<()> {
        let mut devices = self.0.lock().unwrap();
        devices.inputs_started += 1;
        devices.capture_tx = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        let mut devices = self.0.lock().unwrap();
        devices.inputs_stopped += 1;
        devices.capture_tx = None;
    }

    fn release(&mut self) {
        self.0.lock().unwrap().inputs_released += 1;
    }
}

struct FakeOutput(Arc<Mutex<Devices>>);

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> Duration {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, id: BufferId, frame: AudioFrame, start_at: Duration) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, frame.duration()));
        Ok(())
    }

    fn stop_all(&mut self) {
        self.0.lock().unwrap().outputs_stopped += 1;
    }
}

/// Signals `started`, then holds the caller until `release` is notified.
type Gate = Option<(Arc<Notify>, Arc<Notify>)>;

async fn pass(gate: &Gate) {
    if let Some((started, release)) = gate {
        started.notify_one();
        release.notified().await;
    }
}

struct FakeBackend {
    devices: Arc<Mutex<Devices>>,
    deny_microphone: bool,
    microphone_gate: Gate,
    speaker_gate: Gate,
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn open_input(&self) -> Result<Box<dyn AudioInput>> {
        pass(&self.microphone_gate).await;
        if self.deny_microphone {
            return Err(VoiceError::Permission("user denied access".to_string()));
        }
        Ok(Box::new(FakeInput(self.devices.clone())))
    }

    async fn open_output(&self, events: DeviceEventSender) -> Result<Box<dyn AudioOutput>> {
        pass(&self.speaker_gate).await;
        self.devices.lock().unwrap().output_tx = Some(events);
        Ok(Box::new(FakeOutput(self.devices.clone())))
    }
}

// --- Fake transport ---

struct FakeSession {
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
    closed: Arc<AtomicBool>,
}

impl LiveSession for FakeSession {
    fn send(&self, chunk: EncodedChunk) -> Result<()> {
        if self.is_closed() {
            return Err(VoiceError::SessionClosed);
        }
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Remote {
    sessions: Vec<Arc<AtomicBool>>,
    events_tx: Option<mpsc::Sender<TransportEvent>>,
    sent: Arc<Mutex<Vec<EncodedChunk>>>,
}

struct FakeTransport {
    remote: Arc<Mutex<Remote>>,
    reject: bool,
    gate: Gate,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _config: &SessionConfig) -> Result<OpenedSession> {
        pass(&self.gate).await;
        if self.reject {
            return Err(VoiceError::Connection("handshake rejected".to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        let mut remote = self.remote.lock().unwrap();
        remote.sessions.push(closed.clone());
        remote.events_tx = Some(tx);
        Ok(OpenedSession {
            session: Box::new(FakeSession {
                sent: remote.sent.clone(),
                closed,
            }),
            events: rx,
        })
    }
}

// --- Harness ---

#[derive(Default)]
struct Options {
    deny_microphone: bool,
    reject_session: bool,
    microphone_gate: Gate,
    gate: Gate,
    speaker_gate: Gate,
}

struct Harness {
    agent: Arc<VoiceAgent>,
    devices: Arc<Mutex<Devices>>,
    remote: Arc<Mutex<Remote>>,
    statuses: mpsc::UnboundedReceiver<ConnectionState>,
    transcripts: mpsc::UnboundedReceiver<TranscriptEvent>,
}

impl Harness {
    fn new(options: Options) -> Self {
        let devices = Arc::new(Mutex::new(Devices::default()));
        let remote = Arc::new(Mutex::new(Remote::default()));
        let (status_tx, statuses) = mpsc::unbounded_channel();
        let (transcript_tx, transcripts) = mpsc::unbounded_channel();

        let agent = VoiceAgent::new(
            Arc::new(FakeBackend {
                devices: devices.clone(),
                deny_microphone: options.deny_microphone,
                microphone_gate: options.microphone_gate,
                speaker_gate: options.speaker_gate,
            }),
            Arc::new(FakeTransport {
                remote: remote.clone(),
                reject: options.reject_session,
                gate: options.gate,
            }),
            SessionConfig::default(),
            move |event| {
                let _ = transcript_tx.send(event);
            },
            move |state| {
                let _ = status_tx.send(state);
            },
        );

        Self {
            agent: Arc::new(agent),
            devices,
            remote,
            statuses,
            transcripts,
        }
    }

    async fn connected() -> Self {
        let mut harness = Self::new(Options::default());
        harness.agent.connect().await;
        assert_eq!(harness.next_status().await, ConnectionState::Connected);
        harness
    }

    async fn next_status(&mut self) -> ConnectionState {
        timeout(WAIT, self.statuses.recv())
            .await
            .expect("timed out waiting for a status change")
            .expect("status channel closed")
    }

    async fn next_transcript(&mut self) -> TranscriptEvent {
        timeout(WAIT, self.transcripts.recv())
            .await
            .expect("timed out waiting for a transcript")
            .expect("transcript channel closed")
    }

    fn assert_no_more_statuses(&mut self) {
        assert!(self.statuses.try_recv().is_err());
    }

    async fn remote_sends(&self, event: TransportEvent) {
        let tx = self.remote.lock().unwrap().events_tx.clone().expect("no open session");
        tx.send(event).await.expect("session loop gone");
    }

    fn capture(&self, samples: Vec<f32>) {
        let devices = self.devices.lock().unwrap();
        let tx = devices.capture_tx.as_ref().expect("capture not started");
        tx.send(DeviceEvent::Captured(samples)).unwrap();
    }

    fn finish_buffer_at(&self, id: BufferId, now: Duration) {
        let mut devices = self.devices.lock().unwrap();
        devices.now = now;
        let tx = devices.output_tx.as_ref().expect("output not opened");
        tx.send(DeviceEvent::PlaybackEnded(id)).unwrap();
    }

    fn session_closed(&self, index: usize) -> bool {
        self.remote.lock().unwrap().sessions[index].load(Ordering::SeqCst)
    }

    async fn wait_until(&self, condition: impl Fn(&Self) -> bool) {
        timeout(WAIT, async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never became true");
    }
}

fn agent_audio(ms: usize) -> TransportEvent {
    let samples = vec![0.2; PLAYBACK_SAMPLE_RATE as usize * ms / 1000];
    let chunk = EncodedChunk::from_frame(&AudioFrame::new(samples, PLAYBACK_SAMPLE_RATE));
    TransportEvent::Audio(EncodedChunk::from_wire(chunk.data, PLAYBACK_SAMPLE_RATE))
}

// --- Tests ---

#[tokio::test]
async fn test_connect_streams_capture_frames_in_order() {
    let harness = Harness::connected().await;
    assert_eq!(harness.agent.state(), ConnectionState::Connected);

    harness.capture(vec![0.25; 3000]);
    harness.capture(vec![-0.25; 3000]);
    harness.capture(vec![0.5; 3000]);
    harness
        .wait_until(|h| h.remote.lock().unwrap().sent.lock().unwrap().len() == 2)
        .await;

    let remote = harness.remote.lock().unwrap();
    let sent = remote.sent.lock().unwrap();
    assert!(sent.iter().all(|c| c.mime_type == "audio/pcm;rate=16000"));

    let first = sent[0].decode(16_000).unwrap();
    let second = sent[1].decode(16_000).unwrap();
    assert_eq!(first.samples().len(), CAPTURE_FRAME_SAMPLES);
    assert_eq!(first.samples()[0], 0.25);
    assert_eq!(first.samples()[3000], -0.25);
    assert_eq!(second.samples()[0], -0.25);
    assert_eq!(second.samples()[CAPTURE_FRAME_SAMPLES - 1], 0.5);
}

#[tokio::test]
async fn test_back_to_back_agent_audio_plays_gaplessly() {
    let mut harness = Harness::connected().await;

    harness.remote_sends(agent_audio(500)).await;
    harness.remote_sends(agent_audio(500)).await;
    assert_eq!(harness.next_status().await, ConnectionState::Speaking);
    harness
        .wait_until(|h| h.devices.lock().unwrap().scheduled.len() == 2)
        .await;

    let (first_id, first_start, second_id, second_start) = {
        let devices = harness.devices.lock().unwrap();
        let (a, a_start, _) = devices.scheduled[0];
        let (b, b_start, _) = devices.scheduled[1];
        (a, a_start, b, b_start)
    };
    assert_eq!(second_start - first_start, Duration::from_millis(500));

    harness.finish_buffer_at(first_id, Duration::from_millis(500));
    harness.finish_buffer_at(second_id, Duration::from_secs(1));
    assert_eq!(harness.next_status().await, ConnectionState::Connected);
    harness.assert_no_more_statuses();
}

#[tokio::test]
async fn test_every_field_of_a_message_is_processed() {
    let mut harness = Harness::connected().await;

    harness
        .remote_sends(TransportEvent::UserTranscript("Where is my invoice?".into()))
        .await;
    harness
        .remote_sends(TransportEvent::AgentTranscript("Let me check.".into()))
        .await;
    harness.remote_sends(agent_audio(100)).await;

    assert_eq!(
        harness.next_transcript().await,
        TranscriptEvent {
            text: "Where is my invoice?".into(),
            speaker: Speaker::User
        }
    );
    let agent_line = harness.next_transcript().await;
    assert_eq!(agent_line.speaker, Speaker::Agent);
    assert!(!agent_line.is_user());
    assert_eq!(harness.next_status().await, ConnectionState::Speaking);
}

#[tokio::test]
async fn test_denied_microphone_never_opens_a_session() {
    let mut harness = Harness::new(Options {
        deny_microphone: true,
        ..Default::default()
    });

    harness.agent.connect().await;

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert_eq!(harness.agent.state(), ConnectionState::Disconnected);
    assert!(harness.remote.lock().unwrap().sessions.is_empty());
}

#[tokio::test]
async fn test_rejected_session_releases_the_microphone() {
    let mut harness = Harness::new(Options {
        reject_session: true,
        ..Default::default()
    });

    harness.agent.connect().await;

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    let devices = harness.devices.lock().unwrap();
    assert_eq!(devices.inputs_released, 1);
    assert_eq!(devices.inputs_started, 0);
}

#[tokio::test]
async fn test_malformed_chunk_is_dropped_and_playback_continues() {
    let mut harness = Harness::connected().await;

    harness
        .remote_sends(TransportEvent::Audio(EncodedChunk::from_wire(
            "%%% not base64 %%%",
            PLAYBACK_SAMPLE_RATE,
        )))
        .await;
    harness.remote_sends(agent_audio(200)).await;

    assert_eq!(harness.next_status().await, ConnectionState::Speaking);
    assert_eq!(harness.devices.lock().unwrap().scheduled.len(), 1);
    assert!(!harness.session_closed(0));
}

#[tokio::test]
async fn test_disconnect_during_pending_open_leaves_no_session() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut harness = Harness::new(Options {
        gate: Some((started.clone(), release.clone())),
        ..Default::default()
    });

    let agent = harness.agent.clone();
    let connecting = tokio::spawn(async move { agent.connect().await });
    timeout(WAIT, started.notified()).await.unwrap();

    harness.agent.disconnect();
    release.notify_one();
    timeout(WAIT, connecting).await.unwrap().unwrap();

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert_eq!(harness.agent.state(), ConnectionState::Disconnected);
    {
        let remote = harness.remote.lock().unwrap();
        assert!(
            remote
                .sessions
                .iter()
                .all(|closed| closed.load(Ordering::SeqCst))
        );
    }
    let devices = harness.devices.lock().unwrap();
    assert_eq!(devices.inputs_released, 1);
    assert_eq!(devices.inputs_started, 0);
}

fn gate() -> (Arc<Notify>, Arc<Notify>) {
    (Arc::new(Notify::new()), Arc::new(Notify::new()))
}

#[tokio::test]
async fn test_disconnect_while_acquiring_microphone_opens_nothing() {
    let (started, release) = gate();
    let mut harness = Harness::new(Options {
        microphone_gate: Some((started.clone(), release.clone())),
        ..Default::default()
    });

    let agent = harness.agent.clone();
    let connecting = tokio::spawn(async move { agent.connect().await });
    timeout(WAIT, started.notified()).await.unwrap();

    harness.agent.disconnect();
    timeout(WAIT, connecting).await.unwrap().unwrap();
    release.notify_one();

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert_eq!(harness.agent.state(), ConnectionState::Disconnected);
    assert!(harness.remote.lock().unwrap().sessions.is_empty());
    {
        let devices = harness.devices.lock().unwrap();
        assert_eq!(devices.inputs_started, 0);
        assert_eq!(devices.inputs_released, 0);
        assert!(devices.output_tx.is_none());
    }
    harness.assert_no_more_statuses();

    // The abandoned attempt does not block a fresh one.
    let mut retry = Harness::new(Options::default());
    retry.agent.connect().await;
    assert_eq!(retry.next_status().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_while_opening_speaker_closes_the_session() {
    let (started, release) = gate();
    let mut harness = Harness::new(Options {
        speaker_gate: Some((started.clone(), release.clone())),
        ..Default::default()
    });

    let agent = harness.agent.clone();
    let connecting = tokio::spawn(async move { agent.connect().await });
    timeout(WAIT, started.notified()).await.unwrap();

    harness.agent.disconnect();
    timeout(WAIT, connecting).await.unwrap().unwrap();
    release.notify_one();

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert!(harness.session_closed(0));
    let devices = harness.devices.lock().unwrap();
    assert_eq!(devices.inputs_started, 0);
    assert_eq!(devices.inputs_released, 1);
    assert!(devices.output_tx.is_none());
}

#[tokio::test]
async fn test_disconnect_while_speaking_releases_everything() {
    let mut harness = Harness::connected().await;
    harness.remote_sends(agent_audio(500)).await;
    assert_eq!(harness.next_status().await, ConnectionState::Speaking);

    harness.agent.disconnect();

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert!(harness.session_closed(0));
    let devices = harness.devices.lock().unwrap();
    assert_eq!(devices.inputs_stopped, 1);
    assert_eq!(devices.inputs_released, 1);
    assert_eq!(devices.outputs_stopped, 1);
    assert!(devices.capture_tx.is_none());
}

#[tokio::test]
async fn test_disconnect_and_connect_are_idempotent() {
    let mut harness = Harness::new(Options::default());

    harness.agent.disconnect();
    harness.assert_no_more_statuses();

    tokio::join!(harness.agent.connect(), harness.agent.connect());
    harness.agent.connect().await;
    assert_eq!(harness.next_status().await, ConnectionState::Connected);
    assert_eq!(harness.remote.lock().unwrap().sessions.len(), 1);

    harness.agent.disconnect();
    harness.agent.disconnect();
    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    harness.assert_no_more_statuses();
    assert_eq!(harness.devices.lock().unwrap().inputs_released, 1);
}

#[tokio::test]
async fn test_remote_closure_tears_down_like_disconnect() {
    let mut harness = Harness::connected().await;
    harness.remote_sends(agent_audio(500)).await;
    assert_eq!(harness.next_status().await, ConnectionState::Speaking);

    harness
        .remote_sends(TransportEvent::Closed(Some("session expired".into())))
        .await;

    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);
    assert!(harness.session_closed(0));
    let devices = harness.devices.lock().unwrap();
    assert_eq!(devices.inputs_released, 1);
    assert_eq!(devices.outputs_stopped, 1);
}

#[tokio::test]
async fn test_remote_error_tears_down_and_allows_reconnect() {
    let mut harness = Harness::connected().await;

    harness
        .remote_sends(TransportEvent::Error("internal error".into()))
        .await;
    assert_eq!(harness.next_status().await, ConnectionState::Disconnected);

    harness.agent.connect().await;
    assert_eq!(harness.next_status().await, ConnectionState::Connected);
    assert_eq!(harness.remote.lock().unwrap().sessions.len(), 2);
    assert!(harness.session_closed(0));
    assert!(!harness.session_closed(1));
}
