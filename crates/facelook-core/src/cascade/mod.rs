//! Boosted cascade face detectors loaded from OpenCV XML definitions.
//!
//! Two feature families are evaluated: Haar-like rectangle contrasts with
//! per-window variance normalization, and 8-bit local binary patterns over a
//! 3×3 grid of blocks. Detection scans a pyramid of downscaled copies with a
//! fixed-size window and groups the raw hits.

mod group;
mod integral;
mod xml;

pub use group::{group_rectangles, GROUP_EPS};
use integral::IntegralImage;

use crate::frame::{resize_area, LumaFrame};
use crate::locator::FaceDetector;
use crate::types::FaceBox;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_SCALE_FACTOR: f64 = 1.05;
pub const DEFAULT_MIN_NEIGHBORS: usize = 5;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cannot read cascade {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("malformed cascade: {0}")]
    Malformed(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Haar,
    Lbp,
}

#[derive(Debug, Clone)]
struct HaarRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<HaarRect>,
}

/// Top-left of a 3×3 block grid; each block is `block_width × block_height`.
#[derive(Debug, Clone)]
struct LbpFeature {
    x: u32,
    y: u32,
    block_width: u32,
    block_height: u32,
}

#[derive(Debug, Clone)]
enum Features {
    Haar(Vec<HaarFeature>),
    Lbp(Vec<LbpFeature>),
}

#[derive(Debug, Clone)]
enum Split {
    /// Ordered split: go left when the feature value is below the threshold.
    Threshold(f32),
    /// Categorical split: go left when the LBP code's bit is set.
    Subset([u32; 8]),
}

/// Tree node. Child values `<= 0` address leaf `-child`.
#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    split: Split,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    weak: Vec<WeakClassifier>,
}

/// Multi-scale scan parameters.
#[derive(Debug, Clone)]
pub struct ScanParams {
    /// Pyramid step between scales; values `<= 1.0` are raised to 1.01.
    pub scale_factor: f64,
    /// Raw hits a cluster needs beyond the first to be reported.
    pub min_neighbors: usize,
    /// Smallest reported box edge in pixels.
    pub min_size: u32,
    /// Largest reported box edge in pixels (`None` = unbounded).
    pub max_size: Option<u32>,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: 0,
            max_size: None,
        }
    }
}

/// A loaded boosted cascade.
#[derive(Debug, Clone)]
pub struct Cascade {
    kind: FeatureKind,
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Features,
}

impl Cascade {
    /// Load a cascade definition from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_xml_str(&xml)
    }

    pub fn from_xml_str(xml: &str) -> Result<Self, CascadeError> {
        xml::parse(xml)
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn feature_count(&self) -> usize {
        match &self.features {
            Features::Haar(f) => f.len(),
            Features::Lbp(f) => f.len(),
        }
    }

    /// Check that every index and rectangle stays inside the cascade.
    fn validate(&self) -> Result<(), CascadeError> {
        let n_features = self.feature_count();
        for (si, stage) in self.stages.iter().enumerate() {
            for weak in &stage.weak {
                for node in &weak.nodes {
                    if node.feature >= n_features {
                        return Err(CascadeError::Malformed(format!(
                            "stage {si}: feature {} out of {n_features}",
                            node.feature
                        )));
                    }
                    for child in [node.left, node.right] {
                        let ok = if child > 0 {
                            (child as usize) < weak.nodes.len()
                        } else {
                            ((-child) as usize) < weak.leaves.len()
                        };
                        if !ok {
                            return Err(CascadeError::Malformed(format!(
                                "stage {si}: dangling tree reference {child}"
                            )));
                        }
                    }
                }
            }
        }

        let (ww, wh) = (self.window_width, self.window_height);
        let fits = |x: u32, y: u32, w: u32, h: u32| x + w <= ww && y + h <= wh;
        let all_fit = match &self.features {
            Features::Haar(fs) => fs
                .iter()
                .flat_map(|f| f.rects.iter())
                .all(|r| fits(r.x, r.y, r.width, r.height)),
            Features::Lbp(fs) => fs
                .iter()
                .all(|f| fits(f.x, f.y, f.block_width * 3, f.block_height * 3)),
        };
        if !all_fit {
            return Err(CascadeError::Malformed("feature outside detection window".into()));
        }
        Ok(())
    }

    /// Run every stage on the window at `(wx, wy)`; true if all stages pass.
    fn classify(&self, ii: &IntegralImage, wx: usize, wy: usize) -> bool {
        let ww = self.window_width as usize;
        let wh = self.window_height as usize;

        // Haar responses are divided by area × stddev of the window interior.
        let inv_norm = match self.kind {
            FeatureKind::Haar => {
                let area = ((ww - 2) * (wh - 2)) as f64;
                let s = ii.rect_sum(wx + 1, wy + 1, ww - 2, wh - 2) as f64;
                let sq = ii.rect_sqsum(wx + 1, wy + 1, ww - 2, wh - 2) as f64;
                let nf = area * sq - s * s;
                if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 }
            }
            FeatureKind::Lbp => 1.0,
        };

        for stage in &self.stages {
            let mut sum = 0.0f64;
            for weak in &stage.weak {
                let mut idx = 0usize;
                let leaf = loop {
                    let node = &weak.nodes[idx];
                    let go_left = match &node.split {
                        Split::Threshold(t) => {
                            self.haar_value(ii, node.feature, wx, wy) * inv_norm < *t as f64
                        }
                        Split::Subset(words) => {
                            let code = self.lbp_code(ii, node.feature, wx, wy);
                            words[(code >> 5) as usize] & (1u32 << (code & 31)) != 0
                        }
                    };
                    let next = if go_left { node.left } else { node.right };
                    if next <= 0 {
                        break (-next) as usize;
                    }
                    idx = next as usize;
                };
                sum += weak.leaves[leaf] as f64;
            }
            if sum < stage.threshold as f64 {
                return false;
            }
        }
        true
    }

    fn haar_value(&self, ii: &IntegralImage, feature: usize, wx: usize, wy: usize) -> f64 {
        let Features::Haar(features) = &self.features else {
            return 0.0;
        };
        features[feature]
            .rects
            .iter()
            .map(|r| {
                let s = ii.rect_sum(
                    wx + r.x as usize,
                    wy + r.y as usize,
                    r.width as usize,
                    r.height as usize,
                );
                r.weight as f64 * s as f64
            })
            .sum()
    }

    /// 8-bit code comparing each outer block of the 3×3 grid to the center,
    /// clockwise from the top-left block (MSB) to the left block (LSB).
    fn lbp_code(&self, ii: &IntegralImage, feature: usize, wx: usize, wy: usize) -> u32 {
        let Features::Lbp(features) = &self.features else {
            return 0;
        };
        let f = &features[feature];
        let (bw, bh) = (f.block_width as usize, f.block_height as usize);
        let (x0, y0) = (wx + f.x as usize, wy + f.y as usize);
        let block = |col: usize, row: usize| ii.rect_sum(x0 + col * bw, y0 + row * bh, bw, bh);

        let center = block(1, 1);
        const ORDER: [(usize, usize); 8] = [(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (1, 2), (0, 2), (0, 1)];
        ORDER.iter().fold(0u32, |code, &(c, r)| (code << 1) | u32::from(block(c, r) >= center))
    }

    /// Scan the frame at every pyramid level and return grouped detections
    /// in frame coordinates.
    pub fn detect_multi_scale(&self, frame: &LumaFrame, params: &ScanParams) -> Vec<FaceBox> {
        let (img_w, img_h) = (frame.width as f64, frame.height as f64);
        let (ww, wh) = (self.window_width as usize, self.window_height as usize);
        let scale_step = params.scale_factor.max(1.01);

        let mut raw = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (ww as f64 * factor).round() as u32;
            let win_h = (wh as f64 * factor).round() as u32;
            let scaled_w = (img_w / factor).round() as usize;
            let scaled_h = (img_h / factor).round() as usize;
            if scaled_w < ww || scaled_h < wh {
                break;
            }
            if params.max_size.is_some_and(|m| win_w > m || win_h > m) {
                break;
            }

            if win_w >= params.min_size && win_h >= params.min_size {
                let scaled = resize_area(
                    &frame.data,
                    frame.width as usize,
                    frame.height as usize,
                    1,
                    scaled_w,
                    scaled_h,
                );
                let ii = IntegralImage::new(&scaled, scaled_w, scaled_h);
                let step = if factor > 2.0 { 1 } else { 2 };

                for wy in (0..=scaled_h - wh).step_by(step) {
                    for wx in (0..=scaled_w - ww).step_by(step) {
                        if self.classify(&ii, wx, wy) {
                            let x = ((wx as f64 * factor).round() as u32).min(frame.width - 1);
                            let y = ((wy as f64 * factor).round() as u32).min(frame.height - 1);
                            raw.push(FaceBox::new(
                                x,
                                y,
                                win_w.min(frame.width - x),
                                win_h.min(frame.height - y),
                            ));
                        }
                    }
                }
            }

            factor *= scale_step;
        }

        tracing::trace!(raw = raw.len(), "cascade scan complete");
        group_rectangles(raw, params.min_neighbors, GROUP_EPS)
    }
}

/// A cascade paired with its scan parameters, usable as a locator backend.
pub struct CascadeDetector {
    name: String,
    cascade: Cascade,
    scale_factor: f64,
    min_neighbors: usize,
}

impl CascadeDetector {
    pub fn new(name: impl Into<String>, cascade: Cascade) -> Self {
        Self {
            name: name.into(),
            cascade,
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
        }
    }

    /// Load a named cascade detector from an XML file.
    pub fn load(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, CascadeError> {
        let name = name.into();
        let path = path.as_ref();
        let cascade = Cascade::from_file(path)?;
        tracing::info!(
            detector = %name,
            path = %path.display(),
            kind = ?cascade.kind(),
            window = ?cascade.window_size(),
            stages = cascade.stage_count(),
            "loaded cascade"
        );
        Ok(Self::new(name, cascade))
    }
}

impl FaceDetector for CascadeDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, frame: &LumaFrame, min_size: u32) -> Vec<FaceBox> {
        let params = ScanParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size,
            max_size: None,
        };
        self.cascade.detect_multi_scale(frame, &params)
    }
}
