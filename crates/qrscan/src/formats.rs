//! Barcode symbologies and the detector's format bitmask.
//!
//! Codes match the detector library's constants, so a raw format code from
//! a detection maps back through [`BarcodeFormat::from_code`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarcodeFormat {
    AllFormats,
    #[serde(rename = "CODE_128")]
    Code128,
    #[serde(rename = "CODE_39")]
    Code39,
    #[serde(rename = "CODE_93")]
    Code93,
    Codabar,
    DataMatrix,
    #[serde(rename = "EAN_13")]
    Ean13,
    #[serde(rename = "EAN_8")]
    Ean8,
    Itf,
    QrCode,
    UpcA,
    UpcE,
    Pdf417,
    Aztec,
    Unknown,
}

impl BarcodeFormat {
    /// Every concrete symbology, in table order.
    pub const ALL: [BarcodeFormat; 13] = [
        BarcodeFormat::Code128,
        BarcodeFormat::Code39,
        BarcodeFormat::Code93,
        BarcodeFormat::Codabar,
        BarcodeFormat::DataMatrix,
        BarcodeFormat::Ean13,
        BarcodeFormat::Ean8,
        BarcodeFormat::Itf,
        BarcodeFormat::QrCode,
        BarcodeFormat::UpcA,
        BarcodeFormat::UpcE,
        BarcodeFormat::Pdf417,
        BarcodeFormat::Aztec,
    ];

    pub fn code(self) -> i32 {
        match self {
            BarcodeFormat::AllFormats => 0,
            BarcodeFormat::Code128 => 1,
            BarcodeFormat::Code39 => 2,
            BarcodeFormat::Code93 => 4,
            BarcodeFormat::Codabar => 8,
            BarcodeFormat::DataMatrix => 16,
            BarcodeFormat::Ean13 => 32,
            BarcodeFormat::Ean8 => 64,
            BarcodeFormat::Itf => 128,
            BarcodeFormat::QrCode => 256,
            BarcodeFormat::UpcA => 512,
            BarcodeFormat::UpcE => 1024,
            BarcodeFormat::Pdf417 => 2048,
            BarcodeFormat::Aztec => 4096,
            BarcodeFormat::Unknown => -1,
        }
    }

    /// Fixed lookup from a detector format code.
    pub fn from_code(code: i32) -> BarcodeFormat {
        if code == 0 {
            return BarcodeFormat::AllFormats;
        }
        Self::ALL
            .into_iter()
            .find(|f| f.code() == code)
            .unwrap_or(BarcodeFormat::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            BarcodeFormat::AllFormats => "ALL_FORMATS",
            BarcodeFormat::Code128 => "CODE_128",
            BarcodeFormat::Code39 => "CODE_39",
            BarcodeFormat::Code93 => "CODE_93",
            BarcodeFormat::Codabar => "CODABAR",
            BarcodeFormat::DataMatrix => "DATA_MATRIX",
            BarcodeFormat::Ean13 => "EAN_13",
            BarcodeFormat::Ean8 => "EAN_8",
            BarcodeFormat::Itf => "ITF",
            BarcodeFormat::QrCode => "QR_CODE",
            BarcodeFormat::UpcA => "UPC_A",
            BarcodeFormat::UpcE => "UPC_E",
            BarcodeFormat::Pdf417 => "PDF417",
            BarcodeFormat::Aztec => "AZTEC",
            BarcodeFormat::Unknown => "UNKNOWN",
        }
    }

    pub fn from_name(name: &str) -> Option<BarcodeFormat> {
        if name == BarcodeFormat::AllFormats.name() {
            return Some(BarcodeFormat::AllFormats);
        }
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl std::fmt::Display for BarcodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options handed to the detector factory when a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScannerOptions {
    /// OR of format codes; 0 means every format.
    pub formats: u32,
}

impl ScannerOptions {
    pub fn all() -> Self {
        Self { formats: 0 }
    }

    /// Build options from caller-supplied format names.
    ///
    /// Unrecognised names are ignored. `None`, or a list with no recognised
    /// names, selects every format. `ALL_FORMATS` contributes nothing when
    /// combined with other names, as with a plain OR of the codes.
    pub fn from_names<S: AsRef<str>>(names: Option<&[S]>) -> Self {
        let Some(names) = names else {
            return Self::all();
        };
        let formats = names
            .iter()
            .filter_map(|n| BarcodeFormat::from_name(n.as_ref()))
            .fold(0u32, |acc, f| acc | f.code() as u32);
        Self { formats }
    }

    pub fn accepts(&self, format: BarcodeFormat) -> bool {
        if self.formats == 0 {
            return true;
        }
        match format.code() {
            code if code > 0 => self.formats & code as u32 != 0,
            _ => false,
        }
    }
}
