//! Face localization: decode, detect, select, and normalize one face crop.

use crate::cascade::CascadeDetector;
use crate::frame::{self, LumaFrame};
use crate::geometry::{self, CropRegion, DEFAULT_CENTRALITY_PENALTY};
use crate::types::{FaceBox, NormalizedFace};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
/// Frames smaller than this on either axis never contain a usable face.
pub const MIN_FRAME_SIDE: u32 = 10;
pub const DEFAULT_TARGET_SIZE: u32 = 160;
/// Input edge of older 224×224 classifiers.
pub const LEGACY_TARGET_SIZE: u32 = 224;
pub const DEFAULT_MIN_FACE_REL: f64 = 0.10;
pub const DEFAULT_MARGIN_REL: f64 = 0.25;
pub const DEFAULT_MAX_DETECT_SIDE: u32 = 960;
/// Native window of the bundled frontal cascades; no smaller face is searched.
const MIN_FACE_FLOOR: u32 = 24;
const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face detector available: {0}")]
    DetectorUnavailable(String),
}

/// A face detection backend run against the equalized working frame.
pub trait FaceDetector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Return raw face boxes no smaller than `min_size` pixels per edge.
    fn detect(&self, frame: &LumaFrame, min_size: u32) -> Vec<FaceBox>;
}

/// Per-call localization parameters.
#[derive(Debug, Clone)]
pub struct LocateOptions {
    /// Edge of the square output crop.
    pub target_size: u32,
    /// Smallest face searched, as a fraction of the working frame's shorter side.
    pub min_face_rel: f64,
    /// Padding around the detected box, as a fraction of its longer side.
    pub margin_rel: f64,
    /// Longer-side ceiling of the detection copy.
    pub max_detect_side: u32,
    /// Off-center penalty weight for candidate selection.
    pub centrality_penalty: f64,
}

impl Default for LocateOptions {
    fn default() -> Self {
        Self {
            target_size: DEFAULT_TARGET_SIZE,
            min_face_rel: DEFAULT_MIN_FACE_REL,
            margin_rel: DEFAULT_MARGIN_REL,
            max_detect_side: DEFAULT_MAX_DETECT_SIDE,
            centrality_penalty: DEFAULT_CENTRALITY_PENALTY,
        }
    }
}

/// Callback invoked with every crop the locator returns.
pub type CropObserver = Box<dyn Fn(&NormalizedFace) + Send + Sync>;

/// Finds the single most plausible face in an image.
///
/// Holds no per-request state; one instance can serve concurrent callers.
pub struct FaceLocator {
    detectors: Vec<Box<dyn FaceDetector>>,
    observer: Option<CropObserver>,
}

impl FaceLocator {
    /// Build a locator over already-constructed detectors.
    pub fn new(detectors: Vec<Box<dyn FaceDetector>>) -> Result<Self, LocatorError> {
        if detectors.is_empty() {
            return Err(LocatorError::DetectorUnavailable("no detectors configured".into()));
        }
        Ok(Self { detectors, observer: None })
    }

    /// Load the frontal Haar cascade and the LBP fallback cascade.
    ///
    /// A cascade that cannot be loaded is skipped with a warning; the
    /// locator fails only if neither loads.
    pub fn from_cascade_files(
        frontal: impl AsRef<Path>,
        fallback: impl AsRef<Path>,
    ) -> Result<Self, LocatorError> {
        let mut detectors: Vec<Box<dyn FaceDetector>> = Vec::new();
        let mut failures: Vec<String> = Vec::new();

        for (name, path) in [("frontal", frontal.as_ref()), ("fallback", fallback.as_ref())] {
            match CascadeDetector::load(name, path) {
                Ok(d) => detectors.push(Box::new(d)),
                Err(e) => {
                    tracing::warn!(detector = name, path = %path.display(), error = %e, "cascade unavailable");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if detectors.is_empty() {
            return Err(LocatorError::DetectorUnavailable(failures.join("; ")));
        }
        Self::new(detectors)
    }

    /// Install a hook that sees every returned crop (debug snapshots, metrics).
    pub fn with_crop_observer(mut self, observer: impl Fn(&NormalizedFace) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Locate and normalize one face from encoded image bytes.
    ///
    /// `Ok(None)` means no usable face; `Err` is reserved for bytes that do
    /// not decode.
    pub fn locate(&self, bytes: &[u8], opts: &LocateOptions) -> Result<Option<NormalizedFace>, LocatorError> {
        let rgb = frame::decode_rgb(bytes)?;
        Ok(self.locate_rgb(&rgb, opts))
    }

    /// Locate and normalize one face from an already-decoded frame.
    pub fn locate_rgb(&self, rgb: &RgbImage, opts: &LocateOptions) -> Option<NormalizedFace> {
        let (width, height) = rgb.dimensions();
        if width < MIN_FRAME_SIDE || height < MIN_FRAME_SIDE {
            tracing::debug!(width, height, "frame too small for detection");
            return None;
        }

        let luma = frame::rgb_to_luma(rgb);
        let (mut working, scale) = frame::downscale_for_detection(&luma, opts.max_detect_side);
        frame::clahe_enhance(&mut working, CLAHE_TILES, CLAHE_CLIP_LIMIT);

        let candidates = self.candidates(&working, opts.min_face_rel);
        let chosen = geometry::select_candidate(
            &candidates,
            working.width,
            working.height,
            opts.centrality_penalty,
        )?;
        let face_box = geometry::map_to_original(&chosen, scale);
        let region = geometry::crop_region(&face_box, opts.margin_rel, width, height)?;

        tracing::debug!(
            candidates = candidates.len(),
            scale,
            ?chosen,
            ?region,
            "face selected"
        );

        let face = normalize_crop(rgb, &region, opts.target_size);
        if let Some(observer) = &self.observer {
            observer(&face);
        }
        Some(face)
    }

    /// Union of raw detections from every detector, in detector order.
    fn candidates(&self, working: &LumaFrame, min_face_rel: f64) -> Vec<FaceBox> {
        let min_size = MIN_FACE_FLOOR.max((working.min_side() as f64 * min_face_rel) as u32);
        let mut all = Vec::new();
        for detector in &self.detectors {
            let found = detector.detect(working, min_size);
            tracing::debug!(detector = detector.name(), count = found.len(), min_size, "detections");
            all.extend(found);
        }
        all
    }
}

/// Crop `region` out of the full-resolution frame and area-resize it to a
/// `target_size` square.
pub fn normalize_crop(rgb: &RgbImage, region: &CropRegion, target_size: u32) -> NormalizedFace {
    let target = target_size.max(1);
    let crop = image::imageops::crop_imm(rgb, region.x0, region.y0, region.width(), region.height()).to_image();
    NormalizedFace::from_rgb(frame::resize_rgb_area(&crop, target, target))
}
