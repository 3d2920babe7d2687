use super::buffer::FrameBuffer;
use super::registry::SessionRegistry;
use super::sensor::PresenceSensor;
use super::writer::ArtifactWriter;
use crate::config::{CaptureConfig, RoomConfig};
use crate::domain::{RecordingArtifact, RecordingSession, SessionState};
use crate::error::CaptureError;
use crate::events::{CoreEvent, EventBus};
use crate::services::{CaptureDevice, CaptureDeviceFactory, CaptureFrame};
use crate::store::DurableStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Operator commands injected into a room's controller loop.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Start recording immediately, skipping the confirmation window.
    ManualStart,
    /// Stop the active recording (drains and emits an artifact).
    ManualStop,
    Shutdown,
}

/// Controller phase. `Terminal` is not represented: a terminal session is
/// torn down and the phase returns to `Idle` for the next lecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Presence detected; confirming against false positives.
    ArmedPresent { since_ms: u64 },
    /// Capturing. `quiet_since_ms` tracks the current silence episode.
    Recording { quiet_since_ms: Option<u64> },
    /// Stop requested; buffer flush in progress.
    Draining,
}

/// Transition the loop must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Presence appeared: create the session record and claim the room.
    Arm,
    /// Confirmation window elapsed with presence sustained: start capture.
    Confirm,
    /// Presence dropped before confirmation: false trigger, discard session.
    Disarm,
    /// Silence window elapsed or operator stop: flush and emit the artifact.
    BeginDrain,
}

/// The recording session state machine, clocked in milliseconds.
///
/// Pure transitions, no I/O: the async loop samples the sensors and applies
/// whatever this returns. Keeping it synchronous makes the debounce and
/// silence-window behavior testable with scripted sample sequences.
pub struct SessionFsm {
    confirm_window_ms: u64,
    silence_window_ms: u64,
    silence_threshold_db: f32,
    phase: Phase,
}

impl SessionFsm {
    pub fn new(confirm_window_ms: u64, silence_window_ms: u64, silence_threshold_db: f32) -> Self {
        Self {
            confirm_window_ms,
            silence_window_ms,
            silence_threshold_db,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn on_sample(&mut self, now_ms: u64, present: bool, level_db: f32) -> Option<Transition> {
        match self.phase {
            Phase::Idle => {
                if present {
                    self.phase = Phase::ArmedPresent { since_ms: now_ms };
                    Some(Transition::Arm)
                } else {
                    None
                }
            }
            Phase::ArmedPresent { since_ms } => {
                if !present {
                    self.phase = Phase::Idle;
                    Some(Transition::Disarm)
                } else if now_ms.saturating_sub(since_ms) >= self.confirm_window_ms {
                    self.phase = Phase::Recording {
                        quiet_since_ms: None,
                    };
                    Some(Transition::Confirm)
                } else {
                    None
                }
            }
            Phase::Recording { quiet_since_ms } => {
                let silent = !present && level_db < self.silence_threshold_db;
                if !silent {
                    self.phase = Phase::Recording {
                        quiet_since_ms: None,
                    };
                    return None;
                }
                let since = quiet_since_ms.unwrap_or(now_ms);
                if now_ms.saturating_sub(since) >= self.silence_window_ms {
                    self.phase = Phase::Draining;
                    Some(Transition::BeginDrain)
                } else {
                    self.phase = Phase::Recording {
                        quiet_since_ms: Some(since),
                    };
                    None
                }
            }
            Phase::Draining => None,
        }
    }

    /// Operator start: arm from `Idle`, then confirm immediately.
    /// Idempotent while a session is active.
    pub fn manual_start(&mut self, now_ms: u64) -> Vec<Transition> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Recording {
                    quiet_since_ms: None,
                };
                vec![Transition::Arm, Transition::Confirm]
            }
            Phase::ArmedPresent { .. } => {
                self.phase = Phase::Recording {
                    quiet_since_ms: None,
                };
                vec![Transition::Confirm]
            }
            Phase::Recording { .. } | Phase::Draining => {
                let _ = now_ms;
                Vec::new()
            }
        }
    }

    /// Operator stop: drain when recording, discard when still confirming.
    pub fn manual_stop(&mut self) -> Option<Transition> {
        match self.phase {
            Phase::Recording { .. } => {
                self.phase = Phase::Draining;
                Some(Transition::BeginDrain)
            }
            Phase::ArmedPresent { .. } => {
                self.phase = Phase::Idle;
                Some(Transition::Disarm)
            }
            Phase::Idle | Phase::Draining => None,
        }
    }

    /// Drain finished (or session failed); back to `Idle` for the next one.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}

struct ActiveSession {
    session: RecordingSession,
    device: Option<Box<dyn CaptureDevice>>,
    frame_rx: Option<mpsc::Receiver<CaptureFrame>>,
    buffer: FrameBuffer,
    writer: Option<ArtifactWriter>,
    overflow_warned: bool,
}

/// One long-lived controller per monitored room.
///
/// Owns the room's frame buffer, session lifecycle, and sensor cadence;
/// rooms are fully independent of each other. Completed artifacts are handed
/// to the pipeline through `artifact_tx`.
pub struct RoomController {
    room: RoomConfig,
    capture: CaptureConfig,
    sensor: PresenceSensor,
    device_factory: Arc<dyn CaptureDeviceFactory>,
    store: Arc<dyn DurableStore>,
    registry: SessionRegistry,
    events: EventBus,
    artifact_tx: mpsc::Sender<RecordingArtifact>,
}

impl RoomController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room: RoomConfig,
        capture: CaptureConfig,
        sensor: PresenceSensor,
        device_factory: Arc<dyn CaptureDeviceFactory>,
        store: Arc<dyn DurableStore>,
        registry: SessionRegistry,
        events: EventBus,
        artifact_tx: mpsc::Sender<RecordingArtifact>,
    ) -> Self {
        Self {
            room,
            capture,
            sensor,
            device_factory,
            store,
            registry,
            events,
            artifact_tx,
        }
    }

    /// Run the room loop until `Shutdown` (or the command channel closes).
    /// An in-flight recording is drained before returning.
    pub async fn run(self, mut commands: mpsc::Receiver<ControllerCommand>) {
        let mut fsm = SessionFsm::new(
            self.room.confirm_window_ms(&self.capture),
            self.room.silence_window_ms(&self.capture),
            self.capture.silence_threshold_db,
        );
        let mut interval = tokio::time::interval(self.capture.sample_period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let epoch = tokio::time::Instant::now();
        let mut active: Option<ActiveSession> = None;

        info!(room_id = %self.room.id, "room controller started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reading = self.sensor.sample(&self.room.id).await;
                    let now_ms = epoch.elapsed().as_millis() as u64;
                    if let Some(transition) = fsm.on_sample(now_ms, reading.present, reading.level_db) {
                        self.apply(transition, &mut fsm, &mut active).await;
                    }
                    // Pull captured frames on every tick while recording.
                    if matches!(fsm.phase(), Phase::Recording { .. }) {
                        if let Err(e) = self.pump_frames(&mut active) {
                            error!(room_id = %self.room.id, "capture failure: {e}");
                            self.fail_session(&mut fsm, &mut active, &e.to_string()).await;
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(ControllerCommand::ManualStart) => {
                            let now_ms = epoch.elapsed().as_millis() as u64;
                            for transition in fsm.manual_start(now_ms) {
                                self.apply(transition, &mut fsm, &mut active).await;
                            }
                        }
                        Some(ControllerCommand::ManualStop) => {
                            if let Some(transition) = fsm.manual_stop() {
                                self.apply(transition, &mut fsm, &mut active).await;
                            } else {
                                warn!(room_id = %self.room.id, "manual stop with no active recording");
                            }
                        }
                        Some(ControllerCommand::Shutdown) | None => {
                            if let Some(transition) = fsm.manual_stop() {
                                self.apply(transition, &mut fsm, &mut active).await;
                            }
                            break;
                        }
                    }
                }
            }
        }

        info!(room_id = %self.room.id, "room controller stopped");
    }

    async fn apply(
        &self,
        transition: Transition,
        fsm: &mut SessionFsm,
        active: &mut Option<ActiveSession>,
    ) {
        match transition {
            Transition::Arm => {
                let session = RecordingSession {
                    id: Uuid::new_v4(),
                    room_id: self.room.id.clone(),
                    faculty: self.room.faculty.clone(),
                    subject: self.room.subject.clone(),
                    started_at: Utc::now(),
                    state: SessionState::Armed,
                };
                if !self.registry.try_claim(&self.room.id, session.id).await {
                    // Second trigger while a session is active: ignored.
                    let fault = CaptureError::RoomBusy {
                        room_id: self.room.id.clone(),
                    };
                    warn!("{fault}, presence trigger ignored");
                    fsm.reset();
                    return;
                }
                info!(room_id = %self.room.id, session_id = %session.id, "presence detected, confirming");
                if let Err(e) = self.store.put_session(session.clone()).await {
                    error!(room_id = %self.room.id, "failed to persist session: {e}");
                    self.registry.release(&self.room.id, session.id).await;
                    fsm.reset();
                    return;
                }
                *active = Some(ActiveSession {
                    session,
                    device: None,
                    frame_rx: None,
                    buffer: FrameBuffer::new(self.capture.buffer_capacity_frames),
                    writer: None,
                    overflow_warned: false,
                });
            }
            Transition::Confirm => {
                if let Err(e) = self.start_capture(active).await {
                    error!(room_id = %self.room.id, "failed to start capture: {e}");
                    self.fail_session(fsm, active, &e.to_string()).await;
                }
            }
            Transition::Disarm => {
                if let Some(sess) = active.take() {
                    info!(
                        room_id = %self.room.id,
                        session_id = %sess.session.id,
                        "presence dropped before confirmation, discarding"
                    );
                    // False trigger: no artifact, no terminal record.
                    if let Err(e) = self.store.remove_session(sess.session.id).await {
                        warn!(room_id = %self.room.id, "failed to remove session: {e}");
                    }
                    self.registry.release(&self.room.id, sess.session.id).await;
                }
            }
            Transition::BeginDrain => {
                if let Err(e) = self.drain(active).await {
                    error!(room_id = %self.room.id, "drain failed: {e}");
                    self.fail_session(fsm, active, &e.to_string()).await;
                    return;
                }
                fsm.reset();
            }
        }
    }

    async fn start_capture(&self, active: &mut Option<ActiveSession>) -> Result<(), CaptureError> {
        let sess = active
            .as_mut()
            .context("confirm transition with no armed session")?;

        let mut device = self.device_factory.create(&self.room.id).map_err(|e| {
            CaptureError::CaptureDeviceFailure {
                room_id: self.room.id.clone(),
                reason: e.to_string(),
            }
        })?;
        let frame_rx = device
            .start()
            .await
            .map_err(|e| CaptureError::CaptureDeviceFailure {
                room_id: self.room.id.clone(),
                reason: e.to_string(),
            })?;

        let audio_path = self
            .capture
            .recordings_path
            .join(format!("{}-{}.wav", self.room.id, sess.session.id));
        let writer = ArtifactWriter::create(audio_path, 16000, 1)?;

        sess.session.started_at = Utc::now();
        sess.session.state = SessionState::Recording;
        self.store.put_session(sess.session.clone()).await?;

        info!(
            room_id = %self.room.id,
            session_id = %sess.session.id,
            device = device.name(),
            "recording started"
        );
        self.events.publish(CoreEvent::SessionStarted {
            session_id: sess.session.id,
            room_id: self.room.id.clone(),
        });

        sess.device = Some(device);
        sess.frame_rx = Some(frame_rx);
        sess.writer = Some(writer);
        Ok(())
    }

    /// Move frames from the device channel into the buffer. When the buffer
    /// hits capacity, pending frames are encoded to the artifact file first
    /// (backpressure, surfaced once per episode) so nothing is dropped.
    fn pump_frames(&self, active: &mut Option<ActiveSession>) -> Result<(), CaptureError> {
        let sess = match active {
            Some(s) => s,
            None => return Ok(()),
        };
        let rx = match sess.frame_rx.as_mut() {
            Some(rx) => rx,
            None => return Ok(()),
        };

        let mut hit_capacity = false;
        loop {
            match rx.try_recv() {
                Ok(frame) => {
                    if let Err(rejected) = sess.buffer.push(frame) {
                        hit_capacity = true;
                        if !sess.overflow_warned {
                            let fault = CaptureError::BufferOverflow {
                                session_id: sess.session.id,
                            };
                            warn!(room_id = %self.room.id, "{fault}, encoding pending frames");
                            self.events.publish(CoreEvent::BufferOverflow {
                                session_id: sess.session.id,
                            });
                            sess.overflow_warned = true;
                        }
                        let pending = sess.buffer.drain();
                        if let Some(writer) = sess.writer.as_mut() {
                            writer.write_frames(pending.iter())?;
                        }
                        sess.buffer
                            .push(rejected)
                            .map_err(|_| CaptureError::BufferOverflow {
                                session_id: sess.session.id,
                            })?;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    // Episode over once a pass completes without hitting
                    // capacity; the next overflow is surfaced again.
                    if !hit_capacity {
                        sess.overflow_warned = false;
                    }
                    return Ok(());
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(CaptureError::CaptureDeviceFailure {
                        room_id: self.room.id.clone(),
                        reason: "frame stream closed mid-session".to_string(),
                    })
                }
            }
        }
    }

    async fn drain(&self, active: &mut Option<ActiveSession>) -> Result<()> {
        let mut sess = active
            .take()
            .context("drain transition with no active session")?;

        info!(room_id = %self.room.id, session_id = %sess.session.id, "draining");
        sess.session.state = SessionState::Draining;
        self.store
            .set_session_state(sess.session.id, SessionState::Draining)
            .await?;

        // Stop the device first so the channel closes, then take everything
        // still in flight.
        let video_path = match sess.device.as_mut() {
            Some(device) => device.stop().await.context("capture device stop failed")?,
            None => None,
        };
        if let Some(rx) = sess.frame_rx.as_mut() {
            while let Ok(frame) = rx.try_recv() {
                if sess.buffer.push(frame).is_err() {
                    break;
                }
            }
            // Anything the bounded buffer could not absorb goes straight to
            // the encoder below via a second pass.
            let mut writer_frames: Vec<CaptureFrame> = sess.buffer.drain();
            while let Ok(frame) = rx.try_recv() {
                writer_frames.push(frame);
            }
            if let Some(writer) = sess.writer.as_mut() {
                writer.write_frames(writer_frames.iter())?;
            }
        }

        let writer = sess
            .writer
            .take()
            .context("draining session has no artifact writer")?;
        let written = writer.finish()?;

        let artifact = RecordingArtifact {
            session_id: sess.session.id,
            video_path,
            audio_path: written.path,
            duration_secs: written.duration_secs,
            checksum: written.checksum,
            faculty: sess.session.faculty.clone(),
            subject: sess.session.subject.clone(),
            recorded_at: sess.session.started_at,
        };
        self.store.put_artifact(artifact.clone()).await?;
        self.store
            .set_session_state(sess.session.id, SessionState::Completed)
            .await?;
        self.registry.release(&self.room.id, sess.session.id).await;

        info!(
            room_id = %self.room.id,
            session_id = %sess.session.id,
            duration_secs = artifact.duration_secs,
            "session completed"
        );
        self.events.publish(CoreEvent::SessionStopped {
            session_id: sess.session.id,
            artifact_id: artifact.session_id,
        });

        if let Err(e) = self.artifact_tx.send(artifact).await {
            error!(room_id = %self.room.id, "pipeline intake closed: {e}");
        }
        Ok(())
    }

    /// Unrecoverable capture error: discard the partial artifact, mark the
    /// session failed, surface to the operator, return to `Idle`.
    async fn fail_session(
        &self,
        fsm: &mut SessionFsm,
        active: &mut Option<ActiveSession>,
        reason: &str,
    ) {
        if let Some(mut sess) = active.take() {
            if let Some(writer) = sess.writer.take() {
                writer.discard();
            }
            if let Some(device) = sess.device.as_mut() {
                let _ = device.stop().await;
            }
            if let Err(e) = self
                .store
                .set_session_state(sess.session.id, SessionState::Failed)
                .await
            {
                warn!(room_id = %self.room.id, "failed to mark session failed: {e}");
            }
            self.registry.release(&self.room.id, sess.session.id).await;
            self.events.publish(CoreEvent::SessionFailed {
                session_id: sess.session.id,
                room_id: self.room.id.clone(),
                error: reason.to_string(),
            });
        }
        fsm.reset();
    }
}
