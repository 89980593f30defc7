//! Detector that reads codes straight out of simulated frame payloads.
//!
//! A frame is UTF-8 text, one code per line, written `FORMAT:payload`, e.g.
//! `QR_CODE:https://example.org`. A frame reading exactly `ERR` makes the
//! detector fail. Anything else decodes to nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::formats::{BarcodeFormat, ScannerOptions};
use crate::frame::InputImage;
use crate::platform::{Bounds, Detector, DetectorError, DetectorFactory, RawBarcode};

const LINE_HEIGHT: i32 = 16;

#[derive(Debug, Clone)]
pub struct PayloadDetector {
    options: ScannerOptions,
    latency: Option<Duration>,
}

impl PayloadDetector {
    pub fn new(options: ScannerOptions) -> Self {
        Self {
            options,
            latency: None,
        }
    }

    /// Hold every detection for `latency` of tokio time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn parse(&self, image: &InputImage<'_>) -> Result<Vec<RawBarcode>, DetectorError> {
        if image.data == b"ERR" {
            return Err(DetectorError::Failed("simulated detector fault".into()));
        }
        let Ok(text) = std::str::from_utf8(image.data) else {
            return Ok(Vec::new());
        };

        let width = image.width as i32;
        let codes = text
            .lines()
            .enumerate()
            .filter_map(|(row, line)| {
                let (name, payload) = line.split_once(':')?;
                let format = BarcodeFormat::from_name(name.trim())?;
                if !self.options.accepts(format) {
                    return None;
                }
                let top = row as i32 * LINE_HEIGHT;
                Some(RawBarcode {
                    raw_value: Some(payload.to_string()),
                    raw_bytes: payload.as_bytes().to_vec(),
                    format: format.code(),
                    bounding_box: Bounds {
                        top,
                        left: 0,
                        right: width,
                        bottom: top + LINE_HEIGHT,
                    },
                })
            })
            .collect();
        Ok(codes)
    }
}

#[async_trait]
impl Detector for PayloadDetector {
    async fn detect(&self, image: &InputImage<'_>) -> Result<Vec<RawBarcode>, DetectorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.parse(image)
    }
}

/// Builds [`PayloadDetector`]s and remembers the options each was given.
#[derive(Debug, Default)]
pub struct PayloadDetectorFactory {
    latency: Option<Duration>,
    created: Mutex<Vec<ScannerOptions>>,
}

impl PayloadDetectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn last_options(&self) -> Option<ScannerOptions> {
        self.created
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .last()
            .copied()
    }
}

impl DetectorFactory for PayloadDetectorFactory {
    fn create(&self, options: ScannerOptions) -> Arc<dyn Detector> {
        self.created
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(options);
        let detector = PayloadDetector::new(options);
        match self.latency {
            Some(latency) => Arc::new(detector.with_latency(latency)),
            None => Arc::new(detector),
        }
    }
}
