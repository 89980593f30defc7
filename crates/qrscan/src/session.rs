//! Scanning session lifecycle
//!
//! ```text
//!            start                 started Ok
//!   Idle ───────────▶ Opening ───────────────▶ Running
//!    ▲                  │ open / start error      │ stop, heartbeat expiry
//!    └──────────────────┴─────────────────────────┘
//!                  (teardown passes through Stopping)
//! ```
//!
//! Every asynchronous notification (backend started, frames detected,
//! heartbeat expired) becomes a [`SessionEvent`] on one channel drained by a
//! single controller task. Events carry the [`SessionId`] they belong to and
//! are checked against the current session under the session lock, so a
//! late callback from a torn-down session can never touch its successor.
//!
//! Teardown happens under the same lock: once `stop` returns, nothing more
//! reaches the caller for that session.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use scanconf::{CameraConfig, SessionDefaults};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::backend::{
    create_backend, select_backend_kind, BackendKind, CameraBackend, Facing, FrameSink,
    OpenRequest, StartNotifier,
};
use crate::error::ScanError;
use crate::formats::ScannerOptions;
use crate::frame::Frame;
use crate::pipeline::{
    DetectionBatch, DetectionPipeline, FrameMailbox, FrameStats, FrameStatsSnapshot,
};
use crate::platform::{Platform, SurfaceTexture};
use crate::watchdog::HeartbeatWatchdog;

/// Identity of one session. Generations only increase, so a stale id never
/// matches a later session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub fn generation(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Opening,
    Running,
    Stopping,
}

/// Parameters of a `start` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub target_width: u32,
    pub target_height: u32,
    /// Format names to scan for; `None` scans every format.
    pub formats: Option<Vec<String>>,
    pub facing: Facing,
    /// Zero disables the liveness watchdog.
    pub heartbeat_timeout: Duration,
}

impl StartRequest {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            formats: None,
            facing: Facing::default(),
            heartbeat_timeout: Duration::ZERO,
        }
    }

    /// Request built from configured defaults.
    pub fn from_defaults(defaults: &SessionDefaults) -> Result<Self, ScanError> {
        Ok(Self {
            target_width: defaults.target_width,
            target_height: defaults.target_height,
            formats: None,
            facing: defaults.facing.parse()?,
            heartbeat_timeout: Duration::from_millis(defaults.heartbeat_timeout_ms),
        })
    }

    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formats = Some(formats.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<(), ScanError> {
        if self.target_width == 0 {
            return Err(ScanError::InvalidArgument("targetWidth must be positive".into()));
        }
        if self.target_height == 0 {
            return Err(ScanError::InvalidArgument("targetHeight must be positive".into()));
        }
        Ok(())
    }
}

/// What the caller needs to show the preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub surface_width: u32,
    pub surface_height: u32,
    pub surface_orientation: u32,
    pub surface_id: u64,
    pub session_id: SessionId,
    pub backend: BackendKind,
}

/// Notifications funnelled into the controller task.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Started {
        session: SessionId,
        result: Result<(), ScanError>,
    },
    Detected(DetectionBatch),
    HeartbeatExpired(SessionId),
}

type StartResult = Result<SessionInfo, ScanError>;

/// Resolves once the camera is streaming, or with the error that stopped it.
/// A session stopped first resolves to [`ScanError::Cancelled`].
#[derive(Debug)]
pub struct PendingStart {
    rx: oneshot::Receiver<StartResult>,
}

impl Future for PendingStart {
    type Output = StartResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ScanError::Cancelled)))
    }
}

/// Detection batches of the running session, in order.
#[derive(Debug)]
pub struct DetectionStream {
    rx: mpsc::UnboundedReceiver<DetectionBatch>,
}

impl DetectionStream {
    pub async fn recv(&mut self) -> Option<DetectionBatch> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DetectionBatch> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<DetectionBatch> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// Resources owned by a live session.
struct Session {
    id: SessionId,
    info: SessionInfo,
    backend: Box<dyn CameraBackend>,
    surface: Arc<dyn SurfaceTexture>,
    mailbox: Arc<FrameMailbox>,
    pipeline: JoinHandle<()>,
    watchdog: Option<HeartbeatWatchdog>,
    pending: Option<oneshot::Sender<StartResult>>,
    stats: Arc<FrameStats>,
}

impl Session {
    /// Release in order: watchdog, mailbox, pipeline, backend, surface.
    fn shutdown(mut self) -> FrameStatsSnapshot {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.mailbox.close();
        self.pipeline.abort();
        self.backend.close();
        self.surface.release();
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(Err(ScanError::Cancelled));
        }
        self.stats.snapshot()
    }
}

struct SessionSlot {
    state: SessionState,
    generation: u64,
    session: Option<Session>,
    last_stats: Option<FrameStatsSnapshot>,
}

impl SessionSlot {
    fn current(&mut self, id: SessionId) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| s.id == id)
    }

    /// Also reached from the event task; see [`CameraBackend::close`] for
    /// what the backend may block on here.
    fn teardown(&mut self, reason: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.state = SessionState::Stopping;
        let id = session.id;
        let stats = session.shutdown();
        info!(
            "{} stopped ({}): {} frames received, {} dropped, {} batches",
            id, reason, stats.received, stats.dropped, stats.batches
        );
        self.last_stats = Some(stats);
        self.state = SessionState::Idle;
    }
}

struct Shared {
    slot: Mutex<SessionSlot>,
    platform: Platform,
    camera: CameraConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    detections: mpsc::UnboundedSender<DetectionBatch>,
    runtime: Handle,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self, event: SessionEvent) {
        let mut slot = self.lock();
        match event {
            SessionEvent::Started { session, result } => {
                let opening = slot.state == SessionState::Opening;
                let Some(current) = slot.current(session).filter(|_| opening) else {
                    debug!("Ignoring start report for stale {}", session);
                    return;
                };
                match result {
                    Ok(()) => {
                        let info = current.info.clone();
                        if let Some(pending) = current.pending.take() {
                            let _ = pending.send(Ok(info));
                        }
                        slot.state = SessionState::Running;
                        info!("{} running", session);
                    }
                    Err(e) => {
                        warn!("{} failed to start: {}", session, e);
                        let pending = current.pending.take();
                        slot.teardown("start failed");
                        if let Some(pending) = pending {
                            let _ = pending.send(Err(e));
                        }
                    }
                }
            }
            SessionEvent::Detected(batch) => {
                let running = slot.state == SessionState::Running;
                if running && slot.current(batch.session).is_some() {
                    let _ = self.detections.send(batch);
                } else {
                    debug!("Dropping detections from stale {}", batch.session);
                }
            }
            SessionEvent::HeartbeatExpired(session) => {
                if slot.current(session).is_some() {
                    warn!("{} missed its heartbeat; stopping", session);
                    slot.teardown("heartbeat expired");
                }
            }
        }
    }
}

async fn run_events(shared: Weak<Shared>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle(event);
    }
    debug!("session event loop finished");
}

/// Owns at most one scanning session at a time.
pub struct SessionController {
    shared: Arc<Shared>,
    event_task: JoinHandle<()>,
}

impl SessionController {
    /// Create a controller on the current tokio runtime.
    ///
    /// Panics outside a runtime, like `tokio::spawn`.
    pub fn new(platform: Platform, camera: CameraConfig) -> (Self, DetectionStream) {
        Self::with_runtime(Handle::current(), platform, camera)
    }

    pub fn with_runtime(
        runtime: Handle,
        platform: Platform,
        camera: CameraConfig,
    ) -> (Self, DetectionStream) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (detections, detections_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            slot: Mutex::new(SessionSlot {
                state: SessionState::Idle,
                generation: 0,
                session: None,
                last_stats: None,
            }),
            platform,
            camera,
            events,
            detections,
            runtime: runtime.clone(),
        });
        let event_task = runtime.spawn(run_events(Arc::downgrade(&shared), events_rx));

        (
            Self { shared, event_task },
            DetectionStream { rx: detections_rx },
        )
    }

    /// Open the camera and start scanning.
    ///
    /// Argument, permission and already-running problems are returned
    /// directly; hardware problems resolve the returned [`PendingStart`].
    pub fn start(&self, request: StartRequest) -> Result<PendingStart, ScanError> {
        request.validate()?;
        let shared = &self.shared;
        if !shared.platform.permissions.camera_permission_granted() {
            return Err(ScanError::NoPermission);
        }

        let mut slot = shared.lock();
        if slot.session.is_some() || slot.state != SessionState::Idle {
            return Err(ScanError::AlreadyRunning);
        }
        slot.generation += 1;
        let id = SessionId::new(slot.generation);
        slot.state = SessionState::Opening;

        let (tx, rx) = oneshot::channel();
        let pending = PendingStart { rx };

        let kind = select_backend_kind(
            shared.platform.camera_api_level,
            shared.camera.modern_min_api_level,
        );
        info!(
            "Starting {} on {:?} backend: {}x{} {}",
            id, kind, request.target_width, request.target_height, request.facing
        );

        let surface = match shared.platform.surfaces.create_surface() {
            Ok(surface) => surface,
            Err(e) => {
                slot.state = SessionState::Idle;
                let _ = tx.send(Err(e.into()));
                return Ok(pending);
            }
        };

        let mut backend = create_backend(kind, &shared.platform, shared.camera.image_buffer_count);
        let open = OpenRequest {
            target_width: request.target_width,
            target_height: request.target_height,
            facing: request.facing,
        };
        if let Err(e) = backend.open(&open) {
            warn!("{} failed to open camera: {}", id, e);
            backend.close();
            surface.release();
            slot.state = SessionState::Idle;
            let _ = tx.send(Err(e));
            return Ok(pending);
        }

        let info = SessionInfo {
            surface_width: backend.output_width(),
            surface_height: backend.output_height(),
            surface_orientation: backend.effective_orientation(),
            surface_id: surface.id(),
            session_id: id,
            backend: backend.kind(),
        };

        let stats = Arc::new(FrameStats::default());
        let mailbox = FrameMailbox::new(Arc::clone(&stats));
        let options = ScannerOptions::from_names(request.formats.as_deref());
        let detector = shared.platform.detectors.create(options);
        let pipeline = DetectionPipeline::new(
            id,
            Arc::clone(&mailbox),
            detector,
            Arc::clone(&stats),
            shared.events.clone(),
        )
        .spawn_on(&shared.runtime);

        let expired = shared.events.clone();
        let watchdog =
            HeartbeatWatchdog::arm_on(&shared.runtime, request.heartbeat_timeout, move || {
                let _ = expired.send(SessionEvent::HeartbeatExpired(id));
            });

        let sink_mailbox = Arc::clone(&mailbox);
        let on_frame: FrameSink = Arc::new(move |frame: Frame| {
            sink_mailbox.offer(frame);
        });
        let started_events = shared.events.clone();
        let started = StartNotifier::new(move |result| {
            let _ = started_events.send(SessionEvent::Started {
                session: id,
                result,
            });
        });
        backend.begin_streaming(Arc::clone(&surface), on_frame, started);

        slot.session = Some(Session {
            id,
            info,
            backend,
            surface,
            mailbox,
            pipeline,
            watchdog,
            pending: Some(tx),
            stats,
        });
        Ok(pending)
    }

    /// Tear the session down. Does nothing without one.
    pub fn stop(&self) {
        self.shared.lock().teardown("stop requested");
    }

    /// Keep the session alive. Does nothing without a session or timeout.
    pub fn heartbeat(&self) {
        let slot = self.shared.lock();
        if let Some(watchdog) = slot.session.as_ref().and_then(|s| s.watchdog.as_ref()) {
            watchdog.beat();
        }
    }

    pub fn set_torch(&self, on: bool) {
        let mut slot = self.shared.lock();
        match slot.session.as_mut() {
            Some(session) => session.backend.set_torch(on),
            None => debug!("Torch request without a session ignored"),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.lock().session.as_ref().map(|s| s.id)
    }

    /// Counters of the current session, or of the last one after it stopped.
    pub fn stats(&self) -> Option<FrameStatsSnapshot> {
        let slot = self.shared.lock();
        match slot.session.as_ref() {
            Some(session) => Some(session.stats.snapshot()),
            None => slot.last_stats,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
        self.event_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimEnvironment, SimUnit};

    const LEGACY: u32 = 19;
    const MODERN: u32 = 28;

    fn controller(env: &SimEnvironment, api_level: u32) -> (SessionController, DetectionStream) {
        SessionController::new(env.platform(api_level), CameraConfig::default())
    }

    #[tokio::test]
    async fn rejects_zero_dimensions() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, MODERN);
        let err = controller.start(StartRequest::new(0, 480)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));
        let err = controller.start(StartRequest::new(640, 0)).unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));

        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.session_id(), None);
        assert_eq!(env.surfaces.live_surfaces(), 0);
        assert!(env.surfaces.last_surface().is_none());
        assert!(env.camera.open_units().is_empty());
        assert!(!env.camera.is_device_open());
        assert!(env.detectors.last_options().is_none());
    }

    #[tokio::test]
    async fn rejects_without_permission() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        env.permissions.set_granted(false);
        let (controller, _detections) = controller(&env, MODERN);
        let err = controller.start(StartRequest::new(640, 480)).unwrap_err();
        assert_eq!(err, ScanError::NoPermission);
        assert!(env.camera.open_units().is_empty());
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, LEGACY);
        let info = controller.start(StartRequest::new(640, 480)).unwrap().await.unwrap();
        assert_eq!(info.backend, BackendKind::Legacy);

        let err = controller.start(StartRequest::new(640, 480)).unwrap_err();
        assert_eq!(err, ScanError::AlreadyRunning);
        assert_eq!(controller.session_id(), Some(info.session_id));
    }

    #[tokio::test]
    async fn open_failure_leaves_nothing_behind() {
        let env = SimEnvironment::new(vec![SimUnit::front(270)]);
        let (controller, _detections) = controller(&env, LEGACY);
        let err = controller.start(StartRequest::new(640, 480)).unwrap().await.unwrap_err();
        assert_eq!(err, ScanError::NoBackCamera);
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(env.surfaces.live_surfaces(), 0);

        // The slot is free again.
        let pending = controller
            .start(StartRequest::new(640, 480).with_facing(Facing::TowardsUser))
            .unwrap();
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn stop_cancels_pending_start() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, MODERN);
        env.camera.pause();
        let pending = controller.start(StartRequest::new(640, 480)).unwrap();
        assert_eq!(controller.state(), SessionState::Opening);

        controller.stop();
        env.camera.resume();
        assert_eq!(pending.await, Err(ScanError::Cancelled));
        assert_eq!(controller.state(), SessionState::Idle);

        env.camera.flush();
        assert!(!env.camera.is_device_open());
        assert_eq!(env.surfaces.live_surfaces(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_heartbeat_without_session_is_noop() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, LEGACY);
        controller.stop();
        controller.heartbeat();
        controller.set_torch(true);
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(controller.stats(), None);

        controller.start(StartRequest::new(640, 480)).unwrap().await.unwrap();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.stats().is_some());
    }

    #[tokio::test]
    async fn generations_increase() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, LEGACY);
        let first = controller.start(StartRequest::new(640, 480)).unwrap().await.unwrap();
        controller.stop();
        let second = controller.start(StartRequest::new(640, 480)).unwrap().await.unwrap();
        assert!(second.session_id > first.session_id);
        assert_ne!(first.surface_id, second.surface_id);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_stops_abandoned_session() {
        let env = SimEnvironment::new(vec![SimUnit::back(90)]);
        let (controller, _detections) = controller(&env, LEGACY);
        controller
            .start(
                StartRequest::new(640, 480).with_heartbeat_timeout(Duration::from_millis(500)),
            )
            .unwrap()
            .await
            .unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(400)).await;
            controller.heartbeat();
        }
        assert_eq!(controller.state(), SessionState::Running);

        tokio::time::sleep(Duration::from_millis(600)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(env.camera.open_units().is_empty());
        assert_eq!(env.surfaces.live_surfaces(), 0);
    }

    #[test]
    fn request_from_config_defaults() {
        let defaults = SessionDefaults {
            facing: "towardsUser".into(),
            heartbeat_timeout_ms: 1500,
            ..SessionDefaults::default()
        };
        let request = StartRequest::from_defaults(&defaults).unwrap();
        assert_eq!(request.target_width, 640);
        assert_eq!(request.target_height, 480);
        assert_eq!(request.facing, Facing::TowardsUser);
        assert_eq!(request.heartbeat_timeout, Duration::from_millis(1500));

        let bad = SessionDefaults {
            facing: "up".into(),
            ..SessionDefaults::default()
        };
        assert!(matches!(
            StartRequest::from_defaults(&bad),
            Err(ScanError::InvalidArgument(_))
        ));
    }

    #[test]
    fn session_info_uses_camel_case() {
        let info = SessionInfo {
            surface_width: 480,
            surface_height: 640,
            surface_orientation: 0,
            surface_id: 3,
            session_id: SessionId::new(2),
            backend: BackendKind::Legacy,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["surfaceWidth"], 480);
        assert_eq!(json["sessionId"], 2);
        assert_eq!(json["backend"], "legacy");
    }
}
