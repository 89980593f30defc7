//! In-process stand-ins for the host platform
//!
//! `SimCamera` implements both camera API generations on its own callback
//! thread; the remaining types cover display rotation, permissions, preview
//! surfaces and detection. [`SimEnvironment`] wires them into a
//! [`Platform`].

mod camera;
mod detector;
mod looper;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

pub use camera::{SimCamera, SimUnit};
pub use detector::{PayloadDetector, PayloadDetectorFactory};

use crate::error::HalError;
use crate::orientation::Rotation;
use crate::platform::{DisplayInfo, PermissionGate, Platform, SurfaceRegistry, SurfaceTexture};
use crate::size::Size;

#[derive(Debug)]
pub struct SimDisplay {
    rotation: Mutex<Rotation>,
}

impl SimDisplay {
    pub fn new(rotation: Rotation) -> Self {
        Self {
            rotation: Mutex::new(rotation),
        }
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        *self.rotation.lock().unwrap_or_else(|p| p.into_inner()) = rotation;
    }
}

impl DisplayInfo for SimDisplay {
    fn rotation(&self) -> Rotation {
        *self.rotation.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug)]
pub struct SimPermissions {
    granted: AtomicBool,
}

impl SimPermissions {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

impl PermissionGate for SimPermissions {
    fn camera_permission_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SimSurface {
    id: u64,
    buffer_size: Mutex<Option<Size>>,
    released: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl SimSurface {
    pub fn buffer_size(&self) -> Option<Size> {
        *self.buffer_size.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl SurfaceTexture for SimSurface {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_default_buffer_size(&self, size: Size) {
        *self.buffer_size.lock().unwrap_or_else(|p| p.into_inner()) = Some(size);
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!("surface {} released", self.id);
        }
    }
}

#[derive(Debug, Default)]
pub struct SimSurfaceRegistry {
    next_id: AtomicU64,
    live: Arc<AtomicUsize>,
    last: Mutex<Option<Arc<SimSurface>>>,
}

impl SimSurfaceRegistry {
    /// Surfaces created and not yet released.
    pub fn live_surfaces(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn last_surface(&self) -> Option<Arc<SimSurface>> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl SurfaceRegistry for SimSurfaceRegistry {
    fn create_surface(&self) -> Result<Arc<dyn SurfaceTexture>, HalError> {
        let surface = Arc::new(SimSurface {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            buffer_size: Mutex::new(None),
            released: AtomicBool::new(false),
            live: Arc::clone(&self.live),
        });
        self.live.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&surface));
        Ok(surface)
    }
}

/// A complete simulated host.
pub struct SimEnvironment {
    pub camera: SimCamera,
    pub display: Arc<SimDisplay>,
    pub permissions: Arc<SimPermissions>,
    pub surfaces: Arc<SimSurfaceRegistry>,
    pub detectors: Arc<PayloadDetectorFactory>,
}

impl SimEnvironment {
    /// Upright display, permission granted, detection without latency.
    pub fn new(units: Vec<SimUnit>) -> Self {
        Self::with_detectors(units, PayloadDetectorFactory::new())
    }

    pub fn with_detectors(units: Vec<SimUnit>, detectors: PayloadDetectorFactory) -> Self {
        Self {
            camera: SimCamera::new(units),
            display: Arc::new(SimDisplay::new(Rotation::Deg0)),
            permissions: Arc::new(SimPermissions::new(true)),
            surfaces: Arc::new(SimSurfaceRegistry::default()),
            detectors: Arc::new(detectors),
        }
    }

    pub fn platform(&self, camera_api_level: u32) -> Platform {
        Platform {
            camera_api_level,
            legacy: Arc::new(self.camera.clone()),
            modern: Arc::new(self.camera.clone()),
            display: self.display.clone(),
            permissions: self.permissions.clone(),
            surfaces: self.surfaces.clone(),
            detectors: self.detectors.clone(),
        }
    }
}
