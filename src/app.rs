//! Wiring: spawns one controller task per configured room and the pipeline
//! worker pool, and exposes the operator surface the surrounding application
//! (HTTP layer, dashboard) calls into.

use crate::capture::{ControllerCommand, PresenceSensor, RoomController, SessionRegistry};
use crate::config::Config;
use crate::domain::{RecordingSession, SearchFilters, SearchHit, TranscriptSegment};
use crate::error::{PipelineError, SearchError};
use crate::events::{CoreEvent, EventBus};
use crate::index::SearchIndex;
use crate::pipeline::{PipelineHandle, PipelineOrchestrator};
use crate::services::{
    AudioLevelMonitor, CaptureDeviceFactory, Embedder, PresenceDetector, Summarizer, Transcriber,
};
use crate::store::DurableStore;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// The external capabilities the core consumes, supplied by the embedding
/// application (real clients in production, scripted ones in tests).
#[derive(Clone)]
pub struct CapabilitySet {
    pub presence: Arc<dyn PresenceDetector>,
    pub audio: Arc<dyn AudioLevelMonitor>,
    pub devices: Arc<dyn CaptureDeviceFactory>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn DurableStore>,
}

/// A running lecture-capture core: room controllers plus the pipeline pool.
pub struct App {
    store: Arc<dyn DurableStore>,
    events: EventBus,
    index: Arc<SearchIndex>,
    pipeline: PipelineHandle,
    rooms: HashMap<String, mpsc::Sender<ControllerCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Spawn all long-lived tasks. Rooms run independently; the pipeline
    /// drains remaining work after the controllers shut down.
    pub fn start(config: Config, caps: CapabilitySet) -> Self {
        let events = EventBus::default();
        let registry = SessionRegistry::new();
        let index = Arc::new(SearchIndex::new(
            Arc::clone(&caps.store),
            Arc::clone(&caps.embedder),
            config.search.clone(),
        ));

        let (artifact_tx, artifact_rx) = mpsc::channel(64);
        let orchestrator = PipelineOrchestrator::new(
            Arc::clone(&caps.store),
            Arc::clone(&caps.transcriber),
            Arc::clone(&caps.summarizer),
            Arc::clone(&index),
            config.chunker.clone(),
            &config.pipeline,
            events.clone(),
        );
        let pipeline = orchestrator.handle();
        let mut tasks = vec![tokio::spawn(orchestrator.run(artifact_rx))];

        let mut rooms = HashMap::new();
        for room in &config.rooms {
            let (cmd_tx, cmd_rx) = mpsc::channel(16);
            let sensor = PresenceSensor::new(
                Arc::clone(&caps.presence),
                Arc::clone(&caps.audio),
                config.capture.sensor_timeout(),
                config.capture.min_confidence,
            );
            let controller = RoomController::new(
                room.clone(),
                config.capture.clone(),
                sensor,
                Arc::clone(&caps.devices),
                Arc::clone(&caps.store),
                registry.clone(),
                events.clone(),
                artifact_tx.clone(),
            );
            tasks.push(tokio::spawn(controller.run(cmd_rx)));
            rooms.insert(room.id.clone(), cmd_tx);
        }
        // Controllers hold the only intake senders now; once they all stop,
        // the orchestrator drains and exits.
        drop(artifact_tx);

        info!(rooms = rooms.len(), "lecture capture core started");

        Self {
            store: caps.store,
            events,
            index,
            pipeline,
            rooms,
            tasks,
        }
    }

    /// Operator: start recording in a room immediately.
    pub async fn manual_start(&self, room_id: &str) -> Result<()> {
        let tx = match self.rooms.get(room_id) {
            Some(tx) => tx,
            None => bail!("unknown room: {room_id}"),
        };
        tx.send(ControllerCommand::ManualStart)
            .await
            .context("room controller stopped")
    }

    /// Operator: stop the given session's recording.
    pub async fn manual_stop(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .with_context(|| format!("session {session_id} not found"))?;
        if session.state.is_terminal() {
            warn!(%session_id, "manual stop on terminal session ignored");
            return Ok(());
        }
        let tx = match self.rooms.get(&session.room_id) {
            Some(tx) => tx,
            None => bail!("session {session_id} belongs to unmanaged room {}", session.room_id),
        };
        tx.send(ControllerCommand::ManualStop)
            .await
            .context("room controller stopped")
    }

    /// Operator: re-queue a failed pipeline job.
    pub async fn retry_job(&self, job_id: Uuid) -> Result<(), PipelineError> {
        self.pipeline.retry_job(job_id).await
    }

    /// Operator: cancel an in-flight pipeline job.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool, PipelineError> {
        self.pipeline.cancel_job(job_id).await
    }

    /// Semantic search over indexed lecture transcripts.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.index.search(query, filters).await
    }

    pub async fn list_recordings(&self, room_id: Option<&str>) -> Result<Vec<RecordingSession>> {
        self.store.list_sessions(room_id).await
    }

    /// Transcript segments for a completed session, chronological order.
    pub async fn get_transcript(&self, session_id: Uuid) -> Result<Vec<TranscriptSegment>> {
        match self.store.job_for_artifact(session_id).await? {
            Some(job) => self.store.segments_for_job(job.id).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Stop all room controllers, drain in-flight recordings and pipeline
    /// work, then return.
    pub async fn shutdown(self) {
        for (room_id, tx) in &self.rooms {
            if tx.send(ControllerCommand::Shutdown).await.is_err() {
                warn!(room_id, "controller already stopped");
            }
        }
        drop(self.rooms);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("task ended abnormally: {e}");
            }
        }
        info!("lecture capture core stopped");
    }
}
