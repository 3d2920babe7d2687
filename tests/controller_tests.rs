// Integration tests for the per-room recording session controller:
// presence debounce, silence auto-stop, operator commands, backpressure,
// and capture failure handling.

mod common;

use anyhow::Result;
use common::{BrokenPresence, MockDeviceFactory, ScriptedPresence, StaticLevel};
use lectern::capture::{ControllerCommand, PresenceSensor, RoomController, SessionRegistry};
use lectern::config::{CaptureConfig, RoomConfig};
use lectern::domain::{RecordingArtifact, SessionState};
use lectern::events::{CoreEvent, EventBus};
use lectern::services::{AudioLevelMonitor, PresenceDetector};
use lectern::store::{DurableStore, MemoryStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

const QUIET: f32 = -70.0;

fn capture_config(dir: &Path, buffer_capacity: usize) -> CaptureConfig {
    CaptureConfig {
        sample_period_ms: 1000,
        sensor_timeout_ms: 250,
        min_confidence: 0.5,
        confirm_window_secs: 3,
        silence_window_secs: 5,
        silence_threshold_db: -50.0,
        buffer_capacity_frames: buffer_capacity,
        recordings_path: dir.to_path_buf(),
    }
}

fn room() -> RoomConfig {
    RoomConfig {
        id: "lh-101".to_string(),
        faculty: "Prof. Noor".to_string(),
        subject: "Algorithms".to_string(),
        confirm_window_secs: None,
        silence_window_secs: None,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    commands: mpsc::Sender<ControllerCommand>,
    artifacts: mpsc::Receiver<RecordingArtifact>,
    events: broadcast::Receiver<CoreEvent>,
    task: tokio::task::JoinHandle<()>,
}

fn spawn_controller(
    presence: Arc<dyn PresenceDetector>,
    audio: Arc<dyn AudioLevelMonitor>,
    devices: MockDeviceFactory,
    capture: CaptureConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::default();
    let events = bus.subscribe();
    let (artifact_tx, artifacts) = mpsc::channel(8);
    let (commands, cmd_rx) = mpsc::channel(8);

    let sensor = PresenceSensor::new(presence, audio, capture.sensor_timeout(), capture.min_confidence);
    let controller = RoomController::new(
        room(),
        capture,
        sensor,
        Arc::new(devices),
        store.clone(),
        SessionRegistry::new(),
        bus,
        artifact_tx,
    );
    let task = tokio::spawn(controller.run(cmd_rx));

    Harness {
        store,
        commands,
        artifacts,
        events,
        task,
    }
}

async fn shutdown(harness: &mut Harness) {
    let _ = harness.commands.send(ControllerCommand::Shutdown).await;
    let _ = (&mut harness.task).await;
}

fn drain_events(rx: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn short_presence_produces_no_session_and_no_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    // Presence for 2 samples against a 3 s confirmation window.
    let presence = Arc::new(ScriptedPresence::new(vec![true, true], false));
    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(2),
        capture_config(dir.path(), 512),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown(&mut harness).await;

    assert!(harness.artifacts.try_recv().is_err(), "no artifact expected");
    assert!(harness.store.list_sessions(None).await?.is_empty());
    let events = drain_events(&mut harness.events);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, CoreEvent::SessionStarted { .. })),
        "recording must never start: {events:?}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sustained_presence_records_and_silence_stops_exactly_one_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    // Presence for 10 samples, 3 s confirmation, 5 s silence window.
    let presence = Arc::new(ScriptedPresence::new(vec![true; 10], false));
    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(2),
        capture_config(dir.path(), 512),
    );

    // Recording starts at t=3s, silence window runs t=10s..15s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    shutdown(&mut harness).await;

    let artifact = harness.artifacts.try_recv().expect("one artifact");
    assert!(
        harness.artifacts.try_recv().is_err(),
        "exactly one artifact per session"
    );
    assert!((artifact.duration_secs - 2.0).abs() < 1e-9);
    assert_eq!(artifact.checksum.len(), 64);
    assert!(artifact.audio_path.exists());
    assert_eq!(artifact.faculty, "Prof. Noor");

    let session = harness
        .store
        .get_session(artifact.session_id)
        .await?
        .expect("session persisted");
    assert_eq!(session.state, SessionState::Completed);

    // Started precedes stopped; stop carries the artifact id.
    let events = drain_events(&mut harness.events);
    let started = events
        .iter()
        .position(|e| matches!(e, CoreEvent::SessionStarted { .. }))
        .expect("SessionStarted");
    let stopped = events
        .iter()
        .position(
            |e| matches!(e, CoreEvent::SessionStopped { artifact_id, .. } if *artifact_id == artifact.session_id),
        )
        .expect("SessionStopped");
    assert!(started < stopped);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn manual_start_and_stop_bypass_the_confirmation_window() -> Result<()> {
    let dir = TempDir::new()?;
    let presence = Arc::new(ScriptedPresence::new(Vec::new(), false));
    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(2),
        capture_config(dir.path(), 512),
    );

    harness.commands.send(ControllerCommand::ManualStart).await?;
    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.commands.send(ControllerCommand::ManualStop).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown(&mut harness).await;

    let artifact = harness.artifacts.try_recv().expect("one artifact");
    assert!((artifact.duration_secs - 2.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn buffer_overflow_applies_backpressure_without_losing_frames() -> Result<()> {
    let dir = TempDir::new()?;
    let presence = Arc::new(ScriptedPresence::new(vec![true; 10], false));
    // 2 s of audio (20 frames) against a 4-frame buffer.
    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(2),
        capture_config(dir.path(), 4),
    );

    tokio::time::sleep(Duration::from_secs(25)).await;
    shutdown(&mut harness).await;

    let artifact = harness.artifacts.try_recv().expect("one artifact");
    // Every frame survived the overflow episodes.
    assert!((artifact.duration_secs - 2.0).abs() < 1e-9);

    let events = drain_events(&mut harness.events);
    let overflows = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::BufferOverflow { .. }))
        .count();
    assert_eq!(overflows, 1, "overflow surfaced once per episode");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn each_overflow_episode_is_surfaced_separately() -> Result<()> {
    let dir = TempDir::new()?;
    let presence = Arc::new(ScriptedPresence::new(vec![true; 10], false));
    // 2 s of audio in two bursts 4 s apart, against a 4-frame buffer: each
    // burst overwhelms the buffer on its own.
    let mut devices = MockDeviceFactory::with_audio(2);
    devices.burst_gap_ms = Some(4_000);

    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        devices,
        capture_config(dir.path(), 4),
    );

    tokio::time::sleep(Duration::from_secs(25)).await;
    shutdown(&mut harness).await;

    let artifact = harness.artifacts.try_recv().expect("one artifact");
    assert!((artifact.duration_secs - 2.0).abs() < 1e-9);

    let events = drain_events(&mut harness.events);
    let overflows = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::BufferOverflow { .. }))
        .count();
    assert_eq!(overflows, 2, "one event per backpressure episode");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unavailable_detector_reads_as_absent_and_never_records() -> Result<()> {
    let dir = TempDir::new()?;
    let mut harness = spawn_controller(
        Arc::new(BrokenPresence),
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(1),
        capture_config(dir.path(), 512),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    shutdown(&mut harness).await;

    assert!(harness.store.list_sessions(None).await?.is_empty());
    assert!(harness.artifacts.try_recv().is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn device_failure_fails_session_without_emitting_artifact() -> Result<()> {
    let dir = TempDir::new()?;
    let presence = Arc::new(ScriptedPresence::new(Vec::new(), false));
    let mut devices = MockDeviceFactory::with_audio(1);
    devices.drop_sender_early = true;

    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        devices,
        capture_config(dir.path(), 512),
    );

    harness.commands.send(ControllerCommand::ManualStart).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    shutdown(&mut harness).await;

    assert!(harness.artifacts.try_recv().is_err(), "no artifact on capture failure");

    let sessions = harness.store.list_sessions(None).await?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::Failed);

    let events = drain_events(&mut harness.events);
    let failure = events
        .iter()
        .find_map(|e| match e {
            CoreEvent::SessionFailed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .expect("SessionFailed event");
    assert!(
        failure.contains("capture device failure in room lh-101"),
        "failure surfaced with the device fault: {failure}"
    );
    // The partial WAV was discarded.
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn controller_records_again_after_a_completed_session() -> Result<()> {
    let dir = TempDir::new()?;
    // Two bursts of presence separated by a long gap.
    let mut script = vec![true; 10];
    script.extend(vec![false; 10]);
    script.extend(vec![true; 10]);
    let presence = Arc::new(ScriptedPresence::new(script, false));
    let mut harness = spawn_controller(
        presence,
        Arc::new(StaticLevel(QUIET)),
        MockDeviceFactory::with_audio(1),
        capture_config(dir.path(), 512),
    );

    tokio::time::sleep(Duration::from_secs(45)).await;
    shutdown(&mut harness).await;

    let first = harness.artifacts.try_recv().expect("first artifact");
    let second = harness.artifacts.try_recv().expect("second artifact");
    assert_ne!(first.session_id, second.session_id);
    Ok(())
}
