//! Camera backends
//!
//! Two generations of camera hardware API sit behind one contract:
//!
//! ```text
//!   SessionController
//!          │ open / begin_streaming / set_torch / close
//!          ▼
//!   dyn CameraBackend ──┬── LegacyBackend  (preview callback, no torch)
//!                       └── ModernBackend  (async open, image stream + preview,
//!                                           repeating request, torch)
//!          │ FrameSink (backend callback context)
//!          ▼
//!     FrameMailbox
//! ```
//!
//! Which one runs is decided once per session from the platform's camera API
//! level and never changes mid-session.

pub mod legacy;
pub mod modern;

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScanError;
use crate::frame::Frame;
use crate::platform::{Platform, SurfaceTexture};
use crate::size::Size;

pub use legacy::LegacyBackend;
pub use modern::ModernBackend;

/// Which camera the caller wants, in caller terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Facing {
    #[default]
    AwayFromUser,
    TowardsUser,
}

impl Facing {
    pub fn as_token(self) -> &'static str {
        match self {
            Facing::AwayFromUser => "awayFromUser",
            Facing::TowardsUser => "towardsUser",
        }
    }
}

impl FromStr for Facing {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awayFromUser" => Ok(Facing::AwayFromUser),
            "towardsUser" => Ok(Facing::TowardsUser),
            other => Err(ScanError::InvalidArgument(format!(
                "unknown orientation {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Lens direction as hardware reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LensFacing {
    Back,
    Front,
    External,
}

impl From<Facing> for LensFacing {
    fn from(facing: Facing) -> Self {
        match facing {
            Facing::AwayFromUser => LensFacing::Back,
            Facing::TowardsUser => LensFacing::Front,
        }
    }
}

/// Focus behaviours a camera may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusMode {
    ContinuousVideo,
    ContinuousPicture,
    Auto,
    Fixed,
}

/// First mode in `priority` that the hardware supports.
pub(crate) fn choose_focus_mode(available: &[FocusMode], priority: &[FocusMode]) -> Option<FocusMode> {
    priority.iter().copied().find(|mode| available.contains(mode))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Legacy,
    Modern,
}

/// Modern hardware API when the platform is new enough, legacy otherwise.
pub fn select_backend_kind(camera_api_level: u32, modern_min_api_level: u32) -> BackendKind {
    if camera_api_level >= modern_min_api_level {
        BackendKind::Modern
    } else {
        BackendKind::Legacy
    }
}

/// Build the backend for a session.
pub fn create_backend(
    kind: BackendKind,
    platform: &Platform,
    image_buffer_count: usize,
) -> Box<dyn CameraBackend> {
    debug!(?kind, api_level = platform.camera_api_level, "creating camera backend");
    match kind {
        BackendKind::Legacy => Box::new(LegacyBackend::new(
            Arc::clone(&platform.legacy),
            Arc::clone(&platform.display),
        )),
        BackendKind::Modern => Box::new(ModernBackend::new(
            Arc::clone(&platform.modern),
            Arc::clone(&platform.display),
            image_buffer_count,
        )),
    }
}

/// What the caller asked the camera for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub target_width: u32,
    pub target_height: u32,
    pub facing: Facing,
}

/// Hardware facts gathered while opening, fixed for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub facing: LensFacing,
    pub sensor_orientation: u32,
    pub torch_available: bool,
    /// Sizes the preview output supports.
    pub output_sizes: Vec<Size>,
    /// Size chosen for the preview output.
    pub output_size: Size,
}

/// Receives frames on the backend's callback context.
pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync>;

/// One-shot report of whether streaming actually started.
///
/// Dropping it unfired reports an unknown fault, so a start request always
/// gets an answer.
pub struct StartNotifier {
    inner: Option<Box<dyn FnOnce(Result<(), ScanError>) + Send>>,
}

impl StartNotifier {
    pub fn new(f: impl FnOnce(Result<(), ScanError>) + Send + 'static) -> Self {
        Self {
            inner: Some(Box::new(f)),
        }
    }

    pub fn notify(mut self, result: Result<(), ScanError>) {
        if let Some(f) = self.inner.take() {
            f(result);
        }
    }
}

impl Drop for StartNotifier {
    fn drop(&mut self) {
        if let Some(f) = self.inner.take() {
            f(Err(ScanError::unknown(
                "camera backend dropped its start notification",
            )));
        }
    }
}

impl std::fmt::Debug for StartNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartNotifier")
            .field("pending", &self.inner.is_some())
            .finish()
    }
}

/// One camera hardware generation.
///
/// Calls arrive from the controller's thread; frames and the start
/// notification leave on the backend's own callback context. After `close`
/// returns no further frame is delivered.
pub trait CameraBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Pick a camera and negotiate sizes. Synchronous; a backend whose
    /// hardware opens asynchronously claims the device in `begin_streaming`.
    fn open(&mut self, request: &OpenRequest) -> Result<BackendCapabilities, ScanError>;

    /// Attach outputs and start frames flowing. Completion, successful or
    /// not, is reported through `started`, possibly before this returns.
    fn begin_streaming(
        &mut self,
        surface: Arc<dyn SurfaceTexture>,
        on_frame: FrameSink,
        started: StartNotifier,
    );

    /// Ignored when the hardware has no torch.
    fn set_torch(&mut self, on: bool);

    /// Release everything in reverse order of acquisition. Safe after a
    /// partial open and safe to repeat.
    ///
    /// Runs on the controller's event task as well as the caller's thread,
    /// under the session lock. It may wait for a frame delivery already in
    /// progress but must not wait on the async runtime or on the session.
    fn close(&mut self);

    fn output_width(&self) -> u32;

    fn output_height(&self) -> u32;

    /// Orientation the caller should apply to the preview surface.
    fn effective_orientation(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn facing_tokens() {
        assert_eq!("awayFromUser".parse::<Facing>().unwrap(), Facing::AwayFromUser);
        assert_eq!("towardsUser".parse::<Facing>().unwrap(), Facing::TowardsUser);
        assert!(matches!(
            "sideways".parse::<Facing>(),
            Err(ScanError::InvalidArgument(_))
        ));
        assert_eq!(LensFacing::from(Facing::TowardsUser), LensFacing::Front);
    }

    #[test]
    fn backend_selection_threshold() {
        assert_eq!(select_backend_kind(19, 21), BackendKind::Legacy);
        assert_eq!(select_backend_kind(21, 21), BackendKind::Modern);
        assert_eq!(select_backend_kind(33, 21), BackendKind::Modern);
    }

    #[test]
    fn focus_priority() {
        let priority = [
            FocusMode::ContinuousVideo,
            FocusMode::ContinuousPicture,
            FocusMode::Auto,
        ];
        assert_eq!(
            choose_focus_mode(&[FocusMode::Auto, FocusMode::ContinuousPicture], &priority),
            Some(FocusMode::ContinuousPicture)
        );
        assert_eq!(choose_focus_mode(&[FocusMode::Fixed], &priority), None);
    }

    #[test]
    fn dropped_notifier_reports_unknown() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        drop(StartNotifier::new(move |result| {
            *slot.lock().unwrap() = Some(result);
        }));

        let result = seen.lock().unwrap().take().unwrap();
        assert!(matches!(result, Err(ScanError::Unknown { .. })));
    }

    #[test]
    fn notifier_fires_once() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let notifier = StartNotifier::new(move |result| {
            assert!(result.is_ok());
            *counter.lock().unwrap() += 1;
        });
        notifier.notify(Ok(()));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
