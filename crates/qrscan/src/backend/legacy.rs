//! Legacy camera backend
//!
//! Drives the first-generation camera API: cameras are numbered, opened
//! synchronously, configured through a parameter block, and deliver preview
//! frames through a single continuous callback. There is no torch control.
//!
//! ```text
//! LegacyCameraApi ── open(index) ──▶ LegacyDevice
//!                                      │ set_parameters (size, NV21, focus)
//!                                      │ set_preview_texture(surface)
//!                                      │ set_preview_callback ──▶ FrameSink
//!                                      ▼
//!                                 start_preview
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::backend::{
    choose_focus_mode, BackendCapabilities, BackendKind, CameraBackend, FocusMode, FrameSink,
    LensFacing, OpenRequest, StartNotifier,
};
use crate::error::{HalError, ScanError};
use crate::frame::{Frame, FrameBuffer, PixelFormat};
use crate::orientation;
use crate::platform::{DisplayInfo, SurfaceTexture};
use crate::size::{self, Size};

/// Static facts about one numbered camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyCameraInfo {
    pub facing: LensFacing,
    /// Clockwise mount angle of the sensor.
    pub orientation: u32,
}

/// Parameter block read from and written back to a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyParameters {
    pub supported_preview_sizes: Vec<Size>,
    pub supported_focus_modes: Vec<FocusMode>,
    pub preview_size: Option<Size>,
    pub preview_format: Option<PixelFormat>,
    pub focus_mode: Option<FocusMode>,
}

/// Preview callback; `None` when the driver delivered no data.
pub type PreviewCallback = Box<dyn FnMut(Option<Bytes>) + Send>;

pub trait LegacyCameraApi: Send + Sync {
    fn number_of_cameras(&self) -> usize;
    fn camera_info(&self, index: usize) -> Result<LegacyCameraInfo, HalError>;
    fn open(&self, index: usize) -> Result<Box<dyn LegacyDevice>, HalError>;
}

pub trait LegacyDevice: Send {
    fn parameters(&self) -> LegacyParameters;
    fn set_parameters(&mut self, params: LegacyParameters) -> Result<(), HalError>;
    fn set_preview_texture(&mut self, surface: Arc<dyn SurfaceTexture>) -> Result<(), HalError>;
    /// Replaces the callback; `None` deregisters and waits out any delivery in progress.
    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>);
    fn start_preview(&mut self) -> Result<(), HalError>;
    /// Trigger a single focus sweep.
    fn auto_focus(&mut self);
    fn stop_preview(&mut self);
    fn release(self: Box<Self>);
}

const PREVIEW_FORMAT: PixelFormat = PixelFormat::Nv21;

/// Continuous modes are preferred; a one-shot sweep is the fallback.
const FOCUS_PRIORITY: [FocusMode; 2] = [FocusMode::ContinuousVideo, FocusMode::ContinuousPicture];

pub struct LegacyBackend {
    api: Arc<dyn LegacyCameraApi>,
    display: Arc<dyn DisplayInfo>,
    device: Option<Box<dyn LegacyDevice>>,
    info: Option<LegacyCameraInfo>,
    preview_size: Option<Size>,
    focus_mode: Option<FocusMode>,
}

impl LegacyBackend {
    pub fn new(api: Arc<dyn LegacyCameraApi>, display: Arc<dyn DisplayInfo>) -> Self {
        Self {
            api,
            display,
            device: None,
            info: None,
            preview_size: None,
            focus_mode: None,
        }
    }

    /// Linear scan for the first camera facing the requested way.
    fn find_camera(&self, wanted: LensFacing) -> Option<(usize, LegacyCameraInfo)> {
        (0..self.api.number_of_cameras()).find_map(|index| match self.api.camera_info(index) {
            Ok(info) if info.facing == wanted => Some((index, info)),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping camera {}: {}", index, e);
                None
            }
        })
    }

    fn configure(
        device: &mut dyn LegacyDevice,
        info: &LegacyCameraInfo,
        request: &OpenRequest,
    ) -> Result<(Size, Option<FocusMode>, Vec<Size>), ScanError> {
        let mut params = device.parameters();

        let focus_mode = choose_focus_mode(&params.supported_focus_modes, &FOCUS_PRIORITY).or_else(
            || choose_focus_mode(&params.supported_focus_modes, &[FocusMode::Auto]),
        );
        match focus_mode {
            Some(mode) => info!("Initializing with focus mode {:?}", mode),
            None => info!("Initializing with autofocus off as not supported."),
        }

        let size = size::select(
            &params.supported_preview_sizes,
            request.target_width,
            request.target_height,
            size::needs_swap(info.orientation),
        )
        .ok_or_else(|| ScanError::CameraUnavailable("camera reports no preview sizes".into()))?;

        let supported = params.supported_preview_sizes.clone();
        params.preview_size = Some(size);
        params.preview_format = Some(PREVIEW_FORMAT);
        params.focus_mode = focus_mode;
        device.set_parameters(params)?;

        Ok((size, focus_mode, supported))
    }

    /// Preview size with width and height exchanged for every mount. The
    /// caller applies `effective_orientation` on top of it.
    fn display_size(&self) -> Size {
        self.preview_size.map_or(Size::new(0, 0), |size| size.swapped())
    }
}

impl CameraBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn open(&mut self, request: &OpenRequest) -> Result<BackendCapabilities, ScanError> {
        let wanted = LensFacing::from(request.facing);
        let Some((index, info)) = self.find_camera(wanted) else {
            return Err(match wanted {
                LensFacing::Back => ScanError::NoBackCamera,
                _ => ScanError::NoMatchingCamera,
            });
        };

        let mut device = self.api.open(index)?;
        let (preview_size, focus_mode, output_sizes) =
            match Self::configure(device.as_mut(), &info, request) {
                Ok(configured) => configured,
                Err(e) => {
                    device.release();
                    return Err(e);
                }
            };

        info!(
            "Legacy camera {} opened: {:?} mounted at {}, preview {}",
            index, info.facing, info.orientation, preview_size
        );

        self.device = Some(device);
        self.info = Some(info);
        self.preview_size = Some(preview_size);
        self.focus_mode = focus_mode;

        Ok(BackendCapabilities {
            facing: info.facing,
            sensor_orientation: info.orientation,
            torch_available: false,
            output_sizes,
            output_size: preview_size,
        })
    }

    fn begin_streaming(
        &mut self,
        surface: Arc<dyn SurfaceTexture>,
        on_frame: FrameSink,
        started: StartNotifier,
    ) {
        let (Some(device), Some(info), Some(size)) =
            (self.device.as_mut(), self.info, self.preview_size)
        else {
            started.notify(Err(ScanError::CameraUnavailable(
                "camera was not opened".into(),
            )));
            return;
        };

        surface.set_default_buffer_size(size);

        let display = Arc::clone(&self.display);
        let front = info.facing == LensFacing::Front;
        device.set_preview_callback(Some(Box::new(move |data: Option<Bytes>| {
            let Some(data) = data else {
                warn!("Preview callback delivered no data");
                return;
            };
            let rotation = orientation::resolve(display.rotation(), info.orientation, front);
            debug!("frame size: {}", size);
            on_frame(Frame::new(
                FrameBuffer::owned(data),
                size.width,
                size.height,
                PREVIEW_FORMAT,
                rotation,
            ));
        })));

        let result = device
            .set_preview_texture(surface)
            .and_then(|()| device.start_preview());
        if let Err(e) = result {
            started.notify(Err(e.into()));
            return;
        }

        if self.focus_mode == Some(FocusMode::Auto) {
            device.auto_focus();
        }

        started.notify(Ok(()));
    }

    fn set_torch(&mut self, on: bool) {
        debug!("Torch request ({}) ignored: legacy backend has no torch", on);
    }

    fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop_preview();
            device.set_preview_callback(None);
            device.release();
            info!("Legacy camera released");
        }
    }

    fn output_width(&self) -> u32 {
        self.display_size().width
    }

    fn output_height(&self) -> u32 {
        self.display_size().height
    }

    fn effective_orientation(&self) -> u32 {
        self.info
            .map(|info| (info.orientation + 270) % 360)
            .unwrap_or(0)
    }
}

impl Drop for LegacyBackend {
    fn drop(&mut self) {
        self.close();
    }
}
