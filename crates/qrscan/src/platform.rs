//! Collaborators the scanning core consumes but does not implement
//!
//! - `Detector` / `DetectorFactory`: the code recognition library
//! - `PermissionGate`: whether camera access has been granted
//! - `DisplayInfo`: current display rotation
//! - `SurfaceRegistry` / `SurfaceTexture`: preview surfaces shown by the caller
//!
//! `Platform` bundles them with the two camera hardware layers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::legacy::LegacyCameraApi;
use crate::backend::modern::ModernCameraApi;
use crate::error::HalError;
use crate::formats::ScannerOptions;
use crate::frame::InputImage;
use crate::orientation::Rotation;
use crate::size::Size;

/// Bounding rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub top: i32,
    pub left: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One detection as the detector reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBarcode {
    /// Decoded text, if the payload was text.
    pub raw_value: Option<String>,
    pub raw_bytes: Vec<u8>,
    /// Detector format code.
    pub format: i32,
    pub bounding_box: Bounds,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector failed: {0}")]
    Failed(String),
}

/// Turns an image into recognised codes, in the detector's own order.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image: &InputImage<'_>) -> Result<Vec<RawBarcode>, DetectorError>;
}

/// Builds a detector configured for one session's formats.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, options: ScannerOptions) -> Arc<dyn Detector>;
}

pub trait PermissionGate: Send + Sync {
    fn camera_permission_granted(&self) -> bool;
}

pub trait DisplayInfo: Send + Sync {
    fn rotation(&self) -> Rotation;
}

/// A preview surface the caller renders from.
pub trait SurfaceTexture: Send + Sync {
    /// Caller-visible handle.
    fn id(&self) -> u64;
    fn set_default_buffer_size(&self, size: Size);
    fn release(&self);
}

pub trait SurfaceRegistry: Send + Sync {
    fn create_surface(&self) -> Result<Arc<dyn SurfaceTexture>, HalError>;
}

/// Everything a session controller needs from the host.
#[derive(Clone)]
pub struct Platform {
    /// Version of the host camera subsystem; decides the backend.
    pub camera_api_level: u32,
    pub legacy: Arc<dyn LegacyCameraApi>,
    pub modern: Arc<dyn ModernCameraApi>,
    pub display: Arc<dyn DisplayInfo>,
    pub permissions: Arc<dyn PermissionGate>,
    pub surfaces: Arc<dyn SurfaceRegistry>,
    pub detectors: Arc<dyn DetectorFactory>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("camera_api_level", &self.camera_api_level)
            .finish_non_exhaustive()
    }
}
