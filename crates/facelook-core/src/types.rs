use image::{DynamicImage, GrayImage, RgbImage};
use std::fmt;

/// Axis-aligned face rectangle in pixel coordinates of the frame it was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Center point as floating-point pixel coordinates.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Fixed-size face crop handed from the locator to the classifier.
///
/// Pixels are row-major and interleaved. Faces produced by the locator are
/// always 3-channel RGB; single-channel faces exist for callers that feed
/// the classifier from other sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedFace {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: usize,
}

impl NormalizedFace {
    /// Wrap raw interleaved pixels. Returns `None` if the buffer length does
    /// not match `width * height * channels` or `channels` is zero.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32, channels: usize) -> Option<Self> {
        if channels == 0 || data.len() != width as usize * height as usize * channels {
            return None;
        }
        Some(Self { data, width, height, channels })
    }

    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self { data: image.into_raw(), width, height, channels: 3 }
    }

    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self { data: image.into_raw(), width, height, channels: 1 }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert into an `image` buffer for encoding or inspection.
    pub fn to_image(&self) -> DynamicImage {
        match self.channels {
            1 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .map(DynamicImage::ImageRgb8),
            _ => None,
        }
        .unwrap_or_else(|| DynamicImage::new_rgb8(self.width, self.height))
    }
}

/// Identity assigned to a face: a known label, or the "unknown" sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityLabel {
    Known(String),
    Unknown,
}

pub const UNKNOWN_IDENTITY: &str = "unknown";

impl IdentityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(name) => name,
            Self::Unknown => UNKNOWN_IDENTITY,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl fmt::Display for IdentityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal output of the classifier.
///
/// Invariant: `label` is `Known` only if `confidence` reached the decision
/// threshold in effect when the prediction was made.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: IdentityLabel,
    /// Maximum class probability, in [0, 1].
    pub confidence: f32,
}

impl Prediction {
    pub fn unknown(confidence: f32) -> Self {
        Self { label: IdentityLabel::Unknown, confidence }
    }

    pub fn is_recognized(&self) -> bool {
        self.label.is_known()
    }
}
