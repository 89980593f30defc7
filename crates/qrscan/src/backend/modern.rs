//! Modern camera backend
//!
//! The second-generation API is asynchronous end to end. Opening a device,
//! configuring a capture session and every frame arrive as callbacks on the
//! HAL's callback context:
//!
//! ```text
//! begin_streaming
//!   └─ open_camera ─▶ DeviceEvent::Opened
//!                       └─ create_capture_session ─▶ Configured
//!                                                      └─ set_repeating_request
//!                                                         started ─▶ Ok
//!   set_torch(on) ─▶ stop_repeating ─▶ Ready ─▶ set_repeating_request(flash)
//! ```
//!
//! Torch changes are therefore eventually consistent: the flag flips
//! immediately and the hardware follows once the session reports ready.
//!
//! HAL callbacks never run from inside the HAL call that caused them, so the
//! backend may hold its state lock while calling into the HAL.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::backend::{
    choose_focus_mode, BackendCapabilities, BackendKind, CameraBackend, FocusMode, FrameSink,
    LensFacing, OpenRequest, StartNotifier,
};
use crate::error::{HalError, ScanError};
use crate::frame::{Frame, FrameBuffer, PixelFormat};
use crate::orientation;
use crate::platform::{DisplayInfo, SurfaceTexture};
use crate::size::{self, Size};

/// Static description of one camera. Absent keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraCharacteristics {
    pub lens_facing: Option<LensFacing>,
    pub sensor_orientation: Option<u32>,
    pub flash_available: Option<bool>,
    pub af_modes: Option<Vec<FocusMode>>,
    /// Sizes a preview surface output supports.
    pub preview_sizes: Vec<Size>,
    /// Sizes a still/image stream output supports.
    pub jpeg_sizes: Vec<Size>,
}

pub enum DeviceEvent {
    Opened(Box<dyn ModernDevice>),
    Disconnected,
    Error(i32),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => f.write_str("Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({code})"),
        }
    }
}

pub type DeviceStateCallback = Box<dyn FnMut(DeviceEvent) + Send>;

pub trait ModernCameraApi: Send + Sync {
    fn camera_ids(&self) -> Result<Vec<String>, HalError>;
    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, HalError>;
    /// Starts an asynchronous open; the outcome arrives on `callback`.
    fn open_camera(&self, id: &str, callback: DeviceStateCallback) -> Result<(), HalError>;
}

/// One image taken from the stream's pool. Dropping the buffer returns it.
#[derive(Debug)]
pub struct Image {
    pub buffer: FrameBuffer,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

pub type ImageListener = Box<dyn FnMut(Image) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageStreamConfig {
    pub size: Size,
    pub format: PixelFormat,
    /// Pool size; the stream stalls while all images are held.
    pub max_images: usize,
}

#[derive(Clone)]
pub enum OutputTarget {
    ImageStream(ImageStreamConfig),
    Preview {
        surface: Arc<dyn SurfaceTexture>,
        size: Size,
    },
}

impl OutputTarget {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputTarget::ImageStream(_) => OutputKind::ImageStream,
            OutputTarget::Preview { .. } => OutputKind::Preview,
        }
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::ImageStream(config) => f.debug_tuple("ImageStream").field(config).finish(),
            OutputTarget::Preview { surface, size } => f
                .debug_struct("Preview")
                .field("surface", &surface.id())
                .field("size", size)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    ImageStream,
    Preview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashMode {
    #[default]
    Off,
    Torch,
}

/// Settings for the repeating capture request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub control_mode_auto: bool,
    pub ae_on: bool,
    pub af_mode: Option<FocusMode>,
    pub flash: FlashMode,
    pub targets: Vec<OutputKind>,
}

pub enum CaptureSessionEvent {
    Configured(Box<dyn CaptureSession>),
    /// The session has no requests in flight.
    Ready,
    ConfigureFailed(String),
}

pub type SessionStateCallback = Box<dyn FnMut(CaptureSessionEvent) + Send>;

pub trait ModernDevice: Send {
    fn id(&self) -> &str;
    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputTarget>,
        on_image: ImageListener,
        callback: SessionStateCallback,
    ) -> Result<(), HalError>;
    fn close(self: Box<Self>);
}

pub trait CaptureSession: Send {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), HalError>;
    /// Stop the repeating request; `Ready` follows once in-flight captures drain.
    fn stop_repeating(&mut self) -> Result<(), HalError>;
    fn close(self: Box<Self>);
}

const IMAGE_FORMAT: PixelFormat = PixelFormat::Yuv420;

const FOCUS_PRIORITY: [FocusMode; 3] = [
    FocusMode::ContinuousVideo,
    FocusMode::ContinuousPicture,
    FocusMode::Auto,
];

/// Camera chosen by `open`.
#[derive(Debug, Clone)]
struct Selected {
    id: String,
    facing: LensFacing,
    sensor_orientation: u32,
    torch_available: bool,
    af_mode: Option<FocusMode>,
    image_size: Size,
    preview_size: Size,
}

/// State shared with the HAL callbacks.
#[derive(Default)]
struct Shared {
    closed: bool,
    device: Option<Box<dyn ModernDevice>>,
    session: Option<Box<dyn CaptureSession>>,
    request: Option<CaptureRequest>,
    torch_on: bool,
    started: Option<StartNotifier>,
}

impl Shared {
    fn fail_start(&mut self, err: ScanError) {
        match self.started.take() {
            Some(started) => started.notify(Err(err)),
            None => error!("Camera fault while streaming: {}", err),
        }
    }

    fn flash_mode(&self) -> FlashMode {
        if self.torch_on {
            FlashMode::Torch
        } else {
            FlashMode::Off
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ModernBackend {
    api: Arc<dyn ModernCameraApi>,
    display: Arc<dyn DisplayInfo>,
    image_buffer_count: usize,
    selected: Option<Selected>,
    shared: Arc<Mutex<Shared>>,
}

impl ModernBackend {
    pub fn new(
        api: Arc<dyn ModernCameraApi>,
        display: Arc<dyn DisplayInfo>,
        image_buffer_count: usize,
    ) -> Self {
        Self {
            api,
            display,
            image_buffer_count: image_buffer_count.max(1),
            selected: None,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn find_camera(
        &self,
        wanted: LensFacing,
    ) -> Result<Option<(String, CameraCharacteristics)>, ScanError> {
        for id in self.api.camera_ids()? {
            let characteristics = match self.api.characteristics(&id) {
                Ok(c) => c,
                Err(e) => {
                    warn!("Skipping camera {}: {}", id, e);
                    continue;
                }
            };
            if characteristics.lens_facing == Some(wanted) {
                return Ok(Some((id, characteristics)));
            }
        }
        Ok(None)
    }
}

impl CameraBackend for ModernBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Modern
    }

    fn open(&mut self, request: &OpenRequest) -> Result<BackendCapabilities, ScanError> {
        let wanted = LensFacing::from(request.facing);
        let (id, characteristics) = self
            .find_camera(wanted)?
            .ok_or(ScanError::NoMatchingCamera)?;

        let sensor_orientation = characteristics.sensor_orientation.unwrap_or(0);
        let swap = size::needs_swap(sensor_orientation);
        let image_size = size::select(
            &characteristics.jpeg_sizes,
            request.target_width,
            request.target_height,
            swap,
        )
        .ok_or_else(|| ScanError::CameraUnavailable("camera reports no image sizes".into()))?;
        let preview_size = size::select(
            &characteristics.preview_sizes,
            request.target_width,
            request.target_height,
            swap,
        )
        .ok_or_else(|| ScanError::CameraUnavailable("camera reports no preview sizes".into()))?;

        let af_modes = characteristics.af_modes.as_deref().unwrap_or(&[]);
        let af_mode = choose_focus_mode(af_modes, &FOCUS_PRIORITY);
        match af_mode {
            Some(mode) => info!("Initializing with focus mode {:?}", mode),
            None => info!("Initializing with autofocus off as not supported."),
        }

        let torch_available = characteristics.flash_available.unwrap_or(false);
        info!(
            "Modern camera {} selected: {:?} mounted at {}, image {}, preview {}, torch {}",
            id, wanted, sensor_orientation, image_size, preview_size, torch_available
        );

        self.selected = Some(Selected {
            id,
            facing: wanted,
            sensor_orientation,
            torch_available,
            af_mode,
            image_size,
            preview_size,
        });

        Ok(BackendCapabilities {
            facing: wanted,
            sensor_orientation,
            torch_available,
            output_sizes: characteristics.preview_sizes,
            output_size: preview_size,
        })
    }

    fn begin_streaming(
        &mut self,
        surface: Arc<dyn SurfaceTexture>,
        on_frame: FrameSink,
        started: StartNotifier,
    ) {
        let Some(selected) = self.selected.clone() else {
            started.notify(Err(ScanError::CameraUnavailable(
                "camera was not opened".into(),
            )));
            return;
        };

        surface.set_default_buffer_size(selected.preview_size);
        {
            let mut shared = lock(&self.shared);
            if shared.closed {
                started.notify(Err(ScanError::Cancelled));
                return;
            }
            shared.started = Some(started);
        }

        let plan = StreamPlan {
            selected: selected.clone(),
            image_buffer_count: self.image_buffer_count,
            surface,
            on_frame,
            display: Arc::clone(&self.display),
        };
        let shared = Arc::clone(&self.shared);
        let callback: DeviceStateCallback =
            Box::new(move |event| on_device_event(&shared, &plan, event));

        if let Err(e) = self.api.open_camera(&selected.id, callback) {
            lock(&self.shared).fail_start(e.into());
        }
    }

    fn set_torch(&mut self, on: bool) {
        let torch_available = self.selected.as_ref().is_some_and(|s| s.torch_available);
        if !torch_available {
            debug!("Torch request ({}) ignored: no flash unit", on);
            return;
        }

        let mut shared = lock(&self.shared);
        if shared.torch_on == on {
            return;
        }
        shared.torch_on = on;
        info!("Torch {}", if on { "on" } else { "off" });

        // The Ready callback restarts the request with the new flash mode.
        if let Some(session) = shared.session.as_mut() {
            if let Err(e) = session.stop_repeating() {
                warn!("Failed to stop repeating request for torch change: {}", e);
            }
        }
    }

    fn close(&mut self) {
        let (session, device, started) = {
            let mut shared = lock(&self.shared);
            shared.closed = true;
            shared.request = None;
            (
                shared.session.take(),
                shared.device.take(),
                shared.started.take(),
            )
        };

        if let Some(session) = session {
            session.close();
        }
        if let Some(device) = device {
            info!("Closing camera {}", device.id());
            device.close();
        }
        if let Some(started) = started {
            started.notify(Err(ScanError::Cancelled));
        }
    }

    fn output_width(&self) -> u32 {
        self.selected.as_ref().map_or(0, |s| s.preview_size.width)
    }

    fn output_height(&self) -> u32 {
        self.selected.as_ref().map_or(0, |s| s.preview_size.height)
    }

    fn effective_orientation(&self) -> u32 {
        match self.selected.as_ref().map(|s| s.sensor_orientation) {
            Some(270) => 90,
            Some(mount) => mount,
            None => 0,
        }
    }
}

impl Drop for ModernBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Everything the device callback needs to build the capture session.
struct StreamPlan {
    selected: Selected,
    image_buffer_count: usize,
    surface: Arc<dyn SurfaceTexture>,
    on_frame: FrameSink,
    display: Arc<dyn DisplayInfo>,
}

impl StreamPlan {
    fn outputs(&self) -> Vec<OutputTarget> {
        vec![
            OutputTarget::ImageStream(ImageStreamConfig {
                size: self.selected.image_size,
                format: IMAGE_FORMAT,
                max_images: self.image_buffer_count,
            }),
            OutputTarget::Preview {
                surface: Arc::clone(&self.surface),
                size: self.selected.preview_size,
            },
        ]
    }

    fn request(&self, flash: FlashMode) -> CaptureRequest {
        CaptureRequest {
            control_mode_auto: true,
            ae_on: true,
            af_mode: self.selected.af_mode,
            flash,
            targets: self.outputs().iter().map(OutputTarget::kind).collect(),
        }
    }

    fn image_listener(&self, shared: Arc<Mutex<Shared>>) -> ImageListener {
        let on_frame = Arc::clone(&self.on_frame);
        let display = Arc::clone(&self.display);
        let mount = self.selected.sensor_orientation;
        let front = self.selected.facing == LensFacing::Front;
        Box::new(move |image: Image| {
            if lock(&shared).closed {
                return;
            }
            let rotation = orientation::resolve(display.rotation(), mount, front);
            debug!("frame size: {}x{}", image.width, image.height);
            on_frame(Frame::new(
                image.buffer,
                image.width,
                image.height,
                image.format,
                rotation,
            ));
        })
    }
}

fn on_device_event(shared: &Arc<Mutex<Shared>>, plan: &StreamPlan, event: DeviceEvent) {
    let mut state = lock(shared);
    match event {
        DeviceEvent::Opened(mut device) => {
            if state.closed {
                debug!("Camera {} opened after close; closing it", device.id());
                drop(state);
                device.close();
                return;
            }
            info!("Camera {} opened", device.id());

            let session_shared = Arc::clone(shared);
            let request = plan.request(state.flash_mode());
            let result = device.create_capture_session(
                plan.outputs(),
                plan.image_listener(Arc::clone(shared)),
                Box::new(move |event| on_session_event(&session_shared, &request, event)),
            );
            state.device = Some(device);
            if let Err(e) = result {
                state.fail_start(e.into());
            }
        }
        DeviceEvent::Disconnected => {
            warn!("Camera {} disconnected", plan.selected.id);
            let device = state.device.take();
            state.fail_start(HalError::Disconnected.into());
            drop(state);
            if let Some(device) = device {
                device.close();
            }
        }
        DeviceEvent::Error(code) => {
            error!("Camera {} error {}", plan.selected.id, code);
            let device = state.device.take();
            state.fail_start(HalError::Device(code).into());
            drop(state);
            if let Some(device) = device {
                device.close();
            }
        }
    }
}

fn on_session_event(shared: &Mutex<Shared>, template: &CaptureRequest, event: CaptureSessionEvent) {
    let mut state = lock(shared);
    match event {
        CaptureSessionEvent::Configured(mut session) => {
            if state.closed {
                drop(state);
                session.close();
                return;
            }
            let request = CaptureRequest {
                flash: state.flash_mode(),
                ..template.clone()
            };
            match session.set_repeating_request(&request) {
                Ok(()) => {
                    info!("Capture session configured");
                    state.session = Some(session);
                    state.request = Some(request);
                    if let Some(started) = state.started.take() {
                        started.notify(Ok(()));
                    }
                }
                Err(e) => {
                    state.fail_start(e.into());
                    drop(state);
                    session.close();
                }
            }
        }
        CaptureSessionEvent::Ready => {
            if state.closed {
                return;
            }
            let flash = state.flash_mode();
            let Shared {
                session, request, ..
            } = &mut *state;
            let (Some(session), Some(request)) = (session.as_mut(), request.as_mut()) else {
                return;
            };
            request.flash = flash;
            debug!("Session ready; restarting repeating request with {:?}", flash);
            if let Err(e) = session.set_repeating_request(request) {
                error!("Failed to restart repeating request: {}", e);
            }
        }
        CaptureSessionEvent::ConfigureFailed(message) => {
            warn!("Capture session configuration failed: {}", message);
            state.fail_start(ScanError::CameraUnavailable(message));
        }
    }
}
