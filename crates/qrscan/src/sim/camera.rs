//! Simulated camera hardware implementing both API generations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::backend::legacy::{
    LegacyCameraApi, LegacyCameraInfo, LegacyDevice, LegacyParameters, PreviewCallback,
};
use crate::backend::modern::{
    CameraCharacteristics, CaptureRequest, CaptureSession, CaptureSessionEvent, DeviceEvent,
    DeviceStateCallback, Image, ImageListener, ImageStreamConfig, ModernCameraApi, ModernDevice,
    OutputTarget, SessionStateCallback,
};
use crate::backend::{FocusMode, LensFacing};
use crate::error::HalError;
use crate::frame::FrameBuffer;
use crate::platform::SurfaceTexture;
use crate::sim::looper::Looper;
use crate::size::Size;

/// One simulated camera unit.
#[derive(Debug, Clone)]
pub struct SimUnit {
    pub facing: LensFacing,
    pub orientation: u32,
    pub preview_sizes: Vec<Size>,
    pub jpeg_sizes: Vec<Size>,
    pub focus_modes: Vec<FocusMode>,
    pub flash: bool,
    pub fail_open: Option<i32>,
    pub fail_configure: bool,
}

impl SimUnit {
    pub fn new(facing: LensFacing, orientation: u32) -> Self {
        Self {
            facing,
            orientation,
            preview_sizes: vec![Size::new(640, 480)],
            jpeg_sizes: vec![Size::new(640, 480)],
            focus_modes: vec![FocusMode::ContinuousPicture, FocusMode::Auto],
            flash: false,
            fail_open: None,
            fail_configure: false,
        }
    }

    pub fn back(orientation: u32) -> Self {
        Self::new(LensFacing::Back, orientation)
    }

    pub fn front(orientation: u32) -> Self {
        Self::new(LensFacing::Front, orientation)
    }

    pub fn with_preview_sizes(mut self, sizes: &[(u32, u32)]) -> Self {
        self.preview_sizes = sizes.iter().map(|&(w, h)| Size::new(w, h)).collect();
        self
    }

    pub fn with_jpeg_sizes(mut self, sizes: &[(u32, u32)]) -> Self {
        self.jpeg_sizes = sizes.iter().map(|&(w, h)| Size::new(w, h)).collect();
        self
    }

    pub fn with_focus_modes(mut self, modes: &[FocusMode]) -> Self {
        self.focus_modes = modes.to_vec();
        self
    }

    pub fn with_flash(mut self) -> Self {
        self.flash = true;
        self
    }

    /// Opening reports device error `code`.
    pub fn failing_open(mut self, code: i32) -> Self {
        self.fail_open = Some(code);
        self
    }

    /// Output configuration is rejected.
    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }
}

#[derive(Default)]
struct SimState {
    open_units: Vec<usize>,
    legacy_params: HashMap<usize, LegacyParameters>,
    preview_running: bool,
    auto_focus_triggers: usize,
    modern_device: Option<usize>,
    stream: Option<ImageStreamConfig>,
    session_generation: u64,
    repeating: bool,
    requests: Vec<CaptureRequest>,
    stop_repeating: usize,
}

struct SimInner {
    units: Vec<SimUnit>,
    looper: Looper,
    state: Mutex<SimState>,
    preview_callback: Mutex<Option<PreviewCallback>>,
    image_listener: Mutex<Option<ImageListener>>,
    outstanding: Arc<AtomicUsize>,
}

impl SimInner {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn unit(&self, index: usize) -> Result<&SimUnit, HalError> {
        self.units
            .get(index)
            .ok_or_else(|| HalError::Access(format!("no camera {index}")))
    }

    fn deliver(&self, data: Bytes) {
        let (preview_running, stream) = {
            let state = self.state();
            let stream = if state.repeating { state.stream } else { None };
            (state.preview_running, stream)
        };

        if preview_running {
            let mut callback = self.preview_callback.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(callback) = callback.as_mut() {
                callback(Some(data));
            }
            return;
        }

        let Some(stream) = stream else {
            debug!("sim frame dropped: camera not streaming");
            return;
        };
        if self.outstanding.load(Ordering::SeqCst) >= stream.max_images {
            warn!("sim image pool exhausted; frame dropped");
            return;
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.outstanding);
        let buffer = FrameBuffer::pooled(data, move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        });

        let mut listener = self.image_listener.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(listener) = listener.as_mut() {
            listener(Image {
                buffer,
                width: stream.size.width,
                height: stream.size.height,
                format: stream.format,
            });
        }
    }
}

/// Simulated camera stack. Clones share the same hardware.
#[derive(Clone)]
pub struct SimCamera {
    inner: Arc<SimInner>,
}

impl SimCamera {
    pub fn new(units: Vec<SimUnit>) -> Self {
        Self {
            inner: Arc::new(SimInner {
                units,
                looper: Looper::spawn(),
                state: Mutex::new(SimState::default()),
                preview_callback: Mutex::new(None),
                image_listener: Mutex::new(None),
                outstanding: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Feed one frame of sensor data through whichever API is streaming.
    pub fn emit_frame(&self, data: &[u8]) {
        let data = Bytes::copy_from_slice(data);
        let inner = Arc::clone(&self.inner);
        self.inner.looper.post(move || inner.deliver(data));
    }

    pub fn flush(&self) {
        self.inner.looper.flush();
    }

    pub fn pause(&self) {
        self.inner.looper.pause();
    }

    pub fn resume(&self) {
        self.inner.looper.resume();
    }

    pub fn open_units(&self) -> Vec<usize> {
        self.inner.state().open_units.clone()
    }

    pub fn legacy_parameters(&self, index: usize) -> Option<LegacyParameters> {
        self.inner.state().legacy_params.get(&index).cloned()
    }

    pub fn auto_focus_triggers(&self) -> usize {
        self.inner.state().auto_focus_triggers
    }

    pub fn is_device_open(&self) -> bool {
        self.inner.state().modern_device.is_some()
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.inner.state().requests.clone()
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.inner.state().requests.last().cloned()
    }

    pub fn stop_repeating_count(&self) -> usize {
        self.inner.state().stop_repeating
    }

    pub fn image_pool_capacity(&self) -> Option<usize> {
        self.inner.state().stream.map(|s| s.max_images)
    }

    /// Images handed out and not yet returned.
    pub fn outstanding_buffers(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }
}

impl LegacyCameraApi for SimCamera {
    fn number_of_cameras(&self) -> usize {
        self.inner.units.len()
    }

    fn camera_info(&self, index: usize) -> Result<LegacyCameraInfo, HalError> {
        let unit = self.inner.unit(index)?;
        Ok(LegacyCameraInfo {
            facing: unit.facing,
            orientation: unit.orientation,
        })
    }

    fn open(&self, index: usize) -> Result<Box<dyn LegacyDevice>, HalError> {
        let unit = self.inner.unit(index)?;
        if let Some(code) = unit.fail_open {
            return Err(HalError::Device(code));
        }
        let mut state = self.inner.state();
        if state.open_units.contains(&index) {
            return Err(HalError::InUse(index.to_string()));
        }
        state.open_units.push(index);
        state.legacy_params.insert(
            index,
            LegacyParameters {
                supported_preview_sizes: unit.preview_sizes.clone(),
                supported_focus_modes: unit.focus_modes.clone(),
                ..LegacyParameters::default()
            },
        );
        Ok(Box::new(SimLegacyDevice {
            inner: Arc::clone(&self.inner),
            index,
        }))
    }
}

struct SimLegacyDevice {
    inner: Arc<SimInner>,
    index: usize,
}

impl LegacyDevice for SimLegacyDevice {
    fn parameters(&self) -> LegacyParameters {
        self.inner
            .state()
            .legacy_params
            .get(&self.index)
            .cloned()
            .unwrap_or_default()
    }

    fn set_parameters(&mut self, params: LegacyParameters) -> Result<(), HalError> {
        if self.inner.unit(self.index)?.fail_configure {
            return Err(HalError::Configure("preview parameters rejected".into()));
        }
        self.inner.state().legacy_params.insert(self.index, params);
        Ok(())
    }

    fn set_preview_texture(&mut self, surface: Arc<dyn SurfaceTexture>) -> Result<(), HalError> {
        debug!("sim camera {} previewing to surface {}", self.index, surface.id());
        Ok(())
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) {
        *self
            .inner
            .preview_callback
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = callback;
    }

    fn start_preview(&mut self) -> Result<(), HalError> {
        self.inner.state().preview_running = true;
        Ok(())
    }

    fn auto_focus(&mut self) {
        self.inner.state().auto_focus_triggers += 1;
    }

    fn stop_preview(&mut self) {
        self.inner.state().preview_running = false;
    }

    fn release(self: Box<Self>) {
        {
            let mut state = self.inner.state();
            state.open_units.retain(|&u| u != self.index);
            state.preview_running = false;
        }
        self.inner
            .preview_callback
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }
}

impl ModernCameraApi for SimCamera {
    fn camera_ids(&self) -> Result<Vec<String>, HalError> {
        Ok((0..self.inner.units.len()).map(|i| i.to_string()).collect())
    }

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, HalError> {
        let unit = self.inner.unit(parse_id(id)?)?;
        Ok(CameraCharacteristics {
            lens_facing: Some(unit.facing),
            sensor_orientation: Some(unit.orientation),
            flash_available: Some(unit.flash),
            af_modes: Some(unit.focus_modes.clone()),
            preview_sizes: unit.preview_sizes.clone(),
            jpeg_sizes: unit.jpeg_sizes.clone(),
        })
    }

    fn open_camera(&self, id: &str, mut callback: DeviceStateCallback) -> Result<(), HalError> {
        let index = parse_id(id)?;
        let fail_open = self.inner.unit(index)?.fail_open;
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();

        self.inner.looper.post(move || {
            if let Some(code) = fail_open {
                callback(DeviceEvent::Error(code));
                return;
            }
            {
                let mut state = inner.state();
                if state.modern_device.is_some() {
                    drop(state);
                    callback(DeviceEvent::Error(HAL_CAMERA_IN_USE));
                    return;
                }
                state.modern_device = Some(index);
                state.open_units.push(index);
            }
            callback(DeviceEvent::Opened(Box::new(SimModernDevice {
                inner: Arc::clone(&inner),
                index,
                id,
            })));
        });
        Ok(())
    }
}

const HAL_CAMERA_IN_USE: i32 = 1;

fn parse_id(id: &str) -> Result<usize, HalError> {
    id.parse()
        .map_err(|_| HalError::Access(format!("unknown camera id {id:?}")))
}

struct SimModernDevice {
    inner: Arc<SimInner>,
    index: usize,
    id: String,
}

impl ModernDevice for SimModernDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputTarget>,
        on_image: ImageListener,
        callback: SessionStateCallback,
    ) -> Result<(), HalError> {
        let stream = outputs.iter().find_map(|output| match output {
            OutputTarget::ImageStream(config) => Some(*config),
            OutputTarget::Preview { .. } => None,
        });
        let fail = self.inner.unit(self.index)?.fail_configure;

        let generation = {
            let mut state = self.inner.state();
            state.session_generation += 1;
            state.stream = stream;
            state.repeating = false;
            state.session_generation
        };
        *self
            .inner
            .image_listener
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(on_image);

        let callback = Arc::new(Mutex::new(callback));
        let inner = Arc::clone(&self.inner);
        self.inner.looper.post(move || {
            let session_callback = Arc::clone(&callback);
            let mut on_event = callback.lock().unwrap_or_else(|p| p.into_inner());
            if fail {
                on_event(CaptureSessionEvent::ConfigureFailed(
                    "output configuration rejected".into(),
                ));
            } else {
                on_event(CaptureSessionEvent::Configured(Box::new(SimCaptureSession {
                    inner,
                    generation,
                    callback: session_callback,
                })));
            }
        });
        Ok(())
    }

    fn close(self: Box<Self>) {
        {
            let mut state = self.inner.state();
            if state.modern_device == Some(self.index) {
                state.modern_device = None;
            }
            state.open_units.retain(|&u| u != self.index);
            state.session_generation += 1;
            state.repeating = false;
            state.stream = None;
        }
        self.inner
            .image_listener
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }
}

struct SimCaptureSession {
    inner: Arc<SimInner>,
    generation: u64,
    callback: Arc<Mutex<SessionStateCallback>>,
}

impl CaptureSession for SimCaptureSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), HalError> {
        let mut state = self.inner.state();
        if state.session_generation != self.generation {
            return Err(HalError::Configure("capture session is closed".into()));
        }
        state.requests.push(request.clone());
        state.repeating = true;
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), HalError> {
        {
            let mut state = self.inner.state();
            if state.session_generation != self.generation {
                return Err(HalError::Configure("capture session is closed".into()));
            }
            state.repeating = false;
            state.stop_repeating += 1;
        }

        let inner = Arc::clone(&self.inner);
        let callback = Arc::clone(&self.callback);
        let generation = self.generation;
        self.inner.looper.post(move || {
            if inner.state().session_generation != generation {
                return;
            }
            let mut on_event = callback.lock().unwrap_or_else(|p| p.into_inner());
            on_event(CaptureSessionEvent::Ready);
        });
        Ok(())
    }

    fn close(self: Box<Self>) {
        let mut state = self.inner.state();
        if state.session_generation == self.generation {
            state.session_generation += 1;
            state.repeating = false;
        }
    }
}
