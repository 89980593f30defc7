//! qrscan: camera-backed barcode scanning sessions
//!
//! A [`SessionController`] owns at most one scanning session. Starting one
//! picks a camera backend for the host's camera API generation, negotiates
//! output size and orientation, and streams frames through a single-slot
//! mailbox into the detector. Recognised codes reach the caller as
//! [`DetectionBatch`]es on a [`DetectionStream`].
//!
//! ```text
//! caller ── start / stop / heartbeat / set_torch ──▶ SessionController
//!                                                        │
//!                          ┌─────────────────────────────┤
//!                          ▼                             ▼
//!                  dyn CameraBackend             HeartbeatWatchdog
//!                 (legacy | modern)                      │ expiry
//!                          │ frames                      │
//!                          ▼                             │
//!                    FrameMailbox ──▶ DetectionPipeline  │
//!                                          │ batches     │
//!                                          ▼             ▼
//!                                   controller event loop ──▶ DetectionStream
//! ```
//!
//! Hardware, permissions, display and detection are reached through the
//! traits in [`platform`] and [`backend`]; [`sim`] provides in-process
//! implementations of all of them.

pub mod backend;
pub mod error;
pub mod formats;
pub mod frame;
pub mod orientation;
pub mod pipeline;
pub mod platform;
pub mod session;
pub mod sim;
pub mod size;
pub mod watchdog;

pub use backend::{BackendKind, CameraBackend, Facing, LensFacing};
pub use error::{HalError, ScanError};
pub use formats::{BarcodeFormat, ScannerOptions};
pub use frame::{Frame, FrameBuffer, InputImage, PixelFormat};
pub use orientation::Rotation;
pub use pipeline::{DetectedCode, DetectionBatch, FrameMailbox, FrameStats, FrameStatsSnapshot};
pub use platform::{Bounds, Detector, DetectorError, DetectorFactory, Platform, RawBarcode};
pub use session::{
    DetectionStream, PendingStart, SessionController, SessionId, SessionInfo, SessionState,
    StartRequest,
};
pub use size::Size;
pub use watchdog::HeartbeatWatchdog;
