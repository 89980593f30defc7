//! Camera frames and the buffers behind them
//!
//! A frame's buffer belongs to the camera backend. Whoever holds the frame
//! holds the buffer; dropping it hands the buffer back, so a frame is
//! released on every path out of a callback without explicit cleanup.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::orientation::Rotation;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YCrCb 4:2:0 semi-planar, the legacy preview format.
    Nv21,
    /// Planar YUV 4:2:0 from the modern image stream.
    Yuv420,
}

impl PixelFormat {
    /// Numeric format tag understood by the detector.
    pub fn tag(self) -> i32 {
        match self {
            PixelFormat::Nv21 => 17,
            PixelFormat::Yuv420 => 35,
        }
    }
}

/// Pixel data plus the hook that returns it to its pool.
pub struct FrameBuffer {
    data: Bytes,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl FrameBuffer {
    /// A buffer nobody needs back.
    pub fn owned(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            release: None,
        }
    }

    /// A buffer borrowed from a pool; `release` runs exactly once when dropped.
    pub fn pooled(data: impl Into<Bytes>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            data: data.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.release.is_some())
            .finish()
    }
}

/// One camera frame with the metadata the detector needs.
#[derive(Debug)]
pub struct Frame {
    buffer: FrameBuffer,
    width: u32,
    height: u32,
    format: PixelFormat,
    rotation: Rotation,
}

impl Frame {
    pub fn new(
        buffer: FrameBuffer,
        width: u32,
        height: u32,
        format: PixelFormat,
        rotation: Rotation,
    ) -> Self {
        Self {
            buffer,
            width,
            height,
            format,
            rotation,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    /// Borrow the frame in the shape the detector consumes.
    pub fn input_image(&self) -> InputImage<'_> {
        InputImage {
            data: self.buffer.data(),
            width: self.width,
            height: self.height,
            format: self.format,
            rotation: self.rotation,
        }
    }
}

/// Detector input: pixels tagged with geometry, format, and rotation.
#[derive(Debug, Clone, Copy)]
pub struct InputImage<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rotation: Rotation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pooled_buffer_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let frame = Frame::new(
            FrameBuffer::pooled(vec![1u8, 2, 3], move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            2,
            1,
            PixelFormat::Yuv420,
            Rotation::Deg90,
        );

        let image = frame.input_image();
        assert_eq!(image.data, &[1, 2, 3]);
        assert_eq!(image.rotation, Rotation::Deg90);
        assert_eq!(image.format.tag(), 35);
        assert_eq!(released.load(Ordering::SeqCst), 0);

        drop(frame);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owned_buffer_has_no_release_hook() {
        let buffer = FrameBuffer::owned(Bytes::from_static(b"abc"));
        assert_eq!(buffer.len(), 3);
        assert!(format!("{buffer:?}").contains("pooled: false"));
    }
}
