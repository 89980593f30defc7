//! Frame → detector → caller
//!
//! Frames arrive on the backend's callback context faster than the detector
//! can keep up. The mailbox holds at most one frame: while a frame is waiting
//! or being detected, new arrivals are released straight back to the camera.
//! The newest frame that finds the mailbox free wins.
//!
//! ```text
//! backend ──offer──▶ FrameMailbox (1 slot) ──next──▶ pipeline task
//!                          ▲                            │ detect().await
//!                          └──── InFlightFrame drop ◀───┘
//!                                                      │ DetectionBatch
//!                                                      ▼
//!                                              SessionEvent::Detected
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::formats::BarcodeFormat;
use crate::frame::Frame;
use crate::platform::{Bounds, Detector, RawBarcode};
use crate::session::{SessionEvent, SessionId};

/// Frame counters for one session.
#[derive(Debug, Default)]
pub struct FrameStats {
    received: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    detector_errors: AtomicU64,
    batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub processed: u64,
    pub detector_errors: u64,
    pub batches: u64,
}

impl FrameStats {
    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<(u64, Frame)>,
    busy: bool,
    closed: bool,
    next_seq: u64,
}

/// Single-slot hand-off between the camera callback and the pipeline task.
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    ready: Notify,
    stats: Arc<FrameStats>,
}

impl FrameMailbox {
    pub fn new(stats: Arc<FrameStats>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::default()),
            ready: Notify::new(),
            stats,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand a frame over. Returns false when it was released instead.
    pub fn offer(&self, frame: Frame) -> bool {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.lock();
        if slot.closed || slot.busy {
            drop(slot);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            // `frame` drops here and its buffer goes back to the camera.
            return false;
        }
        slot.next_seq += 1;
        let seq = slot.next_seq;
        slot.frame = Some((seq, frame));
        slot.busy = true;
        drop(slot);
        self.ready.notify_one();
        true
    }

    /// Wait for the next frame. `None` once the mailbox is closed.
    pub async fn next(self: &Arc<Self>) -> Option<InFlightFrame> {
        loop {
            {
                let mut slot = self.lock();
                if slot.closed {
                    return None;
                }
                if let Some((seq, frame)) = slot.frame.take() {
                    return Some(InFlightFrame {
                        frame,
                        seq,
                        _busy: BusyGuard(Arc::clone(self)),
                    });
                }
            }
            self.ready.notified().await;
        }
    }

    /// Release any waiting frame and refuse new ones.
    pub fn close(&self) {
        let pending = {
            let mut slot = self.lock();
            slot.closed = true;
            slot.frame.take()
        };
        drop(pending);
        self.ready.notify_one();
    }

    fn finish(&self) {
        self.lock().busy = false;
    }
}

/// The frame currently owned by the pipeline. Dropping it releases the
/// buffer, then frees the mailbox for the next arrival.
pub struct InFlightFrame {
    // Field order is drop order.
    frame: Frame,
    seq: u64,
    _busy: BusyGuard,
}

impl InFlightFrame {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

struct BusyGuard(Arc<FrameMailbox>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// One recognised code as delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedCode {
    pub content: Option<String>,
    #[serde(rename = "bytes")]
    pub raw_bytes: Vec<u8>,
    pub format: BarcodeFormat,
    pub bounds: Bounds,
}

impl From<RawBarcode> for DetectedCode {
    fn from(raw: RawBarcode) -> Self {
        Self {
            content: raw.raw_value,
            raw_bytes: raw.raw_bytes,
            format: BarcodeFormat::from_code(raw.format),
            bounds: raw.bounding_box,
        }
    }
}

/// All codes found in one frame, in detector order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub session: SessionId,
    pub frame_seq: u64,
    pub codes: Vec<DetectedCode>,
}

pub(crate) struct DetectionPipeline {
    session: SessionId,
    mailbox: Arc<FrameMailbox>,
    detector: Arc<dyn Detector>,
    stats: Arc<FrameStats>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl DetectionPipeline {
    pub fn new(
        session: SessionId,
        mailbox: Arc<FrameMailbox>,
        detector: Arc<dyn Detector>,
        stats: Arc<FrameStats>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            session,
            mailbox,
            detector,
            stats,
            events,
        }
    }

    pub fn spawn_on(self, handle: &tokio::runtime::Handle) -> JoinHandle<()> {
        handle.spawn(self.run())
    }

    pub async fn run(self) {
        debug!("detection pipeline started for {}", self.session);
        while let Some(in_flight) = self.mailbox.next().await {
            let image = in_flight.frame().input_image();
            let result = self.detector.detect(&image).await;
            self.stats.processed.fetch_add(1, Ordering::Relaxed);

            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    self.stats.detector_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Detector failed on frame {}: {}", in_flight.seq(), e);
                    continue;
                }
            };
            if raw.is_empty() {
                continue;
            }

            let batch = DetectionBatch {
                session: self.session,
                frame_seq: in_flight.seq(),
                codes: raw.into_iter().map(DetectedCode::from).collect(),
            };
            drop(in_flight);

            debug!(
                "frame {} yielded {} code(s)",
                batch.frame_seq,
                batch.codes.len()
            );
            self.stats.batches.fetch_add(1, Ordering::Relaxed);
            if self.events.send(SessionEvent::Detected(batch)).is_err() {
                break;
            }
        }
        debug!("detection pipeline finished for {}", self.session);
    }
}
