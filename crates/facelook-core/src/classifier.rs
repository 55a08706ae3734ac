//! Identity classification over a normalized face crop.
//!
//! The model handle is owned by the caller and passed in per call; this
//! module only prepares the input tensor and turns class scores into a
//! thresholded [`Prediction`].

use crate::frame::resize_area;
use crate::labels::IdentityTable;
use crate::types::{IdentityLabel, NormalizedFace, Prediction};
use ndarray::{Array4, ArrayView4};
use thiserror::Error;

/// Minimum winning probability for a face to be reported as a known identity.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Recoverable failure while preparing input or running the model.
#[derive(Error, Debug)]
pub enum InferenceFailure {
    #[error("input shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
    #[error("inference runtime: {0}")]
    Runtime(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory order of the model's 4-D image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// Batch, height, width, channels (Keras/TensorFlow exports).
    Nhwc,
    /// Batch, channels, height, width (PyTorch exports).
    Nchw,
}

/// Declared image input of a classifier, batch dimension dropped.
///
/// `None` spatial dimensions are dynamic and accept the face as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub height: Option<usize>,
    pub width: Option<usize>,
    pub channels: usize,
    pub layout: TensorLayout,
}

impl InputShape {
    pub fn nhwc(height: usize, width: usize, channels: usize) -> Self {
        Self { height: Some(height), width: Some(width), channels, layout: TensorLayout::Nhwc }
    }

    pub fn nchw(channels: usize, height: usize, width: usize) -> Self {
        Self { height: Some(height), width: Some(width), channels, layout: TensorLayout::Nchw }
    }

    /// Interpret raw model dimensions (negative = dynamic).
    ///
    /// The trailing axis is taken as channels when it is 1–4; otherwise the
    /// second axis is tried. The channel axis itself must be static.
    pub fn from_dims(dims: &[i64]) -> Option<Self> {
        if dims.len() != 4 {
            return None;
        }
        let fixed = |d: i64| (d > 0).then_some(d as usize);
        let is_channels = |d: i64| (1..=4).contains(&d);

        if is_channels(dims[3]) {
            Some(Self {
                height: fixed(dims[1]),
                width: fixed(dims[2]),
                channels: dims[3] as usize,
                layout: TensorLayout::Nhwc,
            })
        } else if is_channels(dims[1]) {
            Some(Self {
                height: fixed(dims[2]),
                width: fixed(dims[3]),
                channels: dims[1] as usize,
                layout: TensorLayout::Nchw,
            })
        } else {
            None
        }
    }
}

/// A loaded classifier. Implementations must tolerate concurrent `forward`
/// calls, either natively or by serializing internally.
pub trait IdentityModel: Send + Sync {
    fn input_shape(&self) -> InputShape;

    /// Run one forward pass on a batch of one, laid out as `input_shape()`
    /// declares. Returns the class scores for that single image.
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceFailure>;
}

/// Reconcile a face crop with the model's declared input and scale to [0, 1].
pub fn prepare(face: &NormalizedFace, shape: &InputShape) -> Result<Array4<f32>, InferenceFailure> {
    let src_c = face.channels();
    let dst_c = shape.channels;
    if src_c != dst_c && src_c != 1 {
        return Err(InferenceFailure::ShapeMismatch(format!(
            "face has {src_c} channels, model expects {dst_c}"
        )));
    }

    let (face_w, face_h) = (face.width() as usize, face.height() as usize);
    let h = shape.height.unwrap_or(face_h);
    let w = shape.width.unwrap_or(face_w);
    if h == 0 || w == 0 {
        return Err(InferenceFailure::ShapeMismatch(format!("model expects {w}x{h} input")));
    }

    let pixels = if (w, h) == (face_w, face_h) {
        face.as_bytes().to_vec()
    } else {
        resize_area(face.as_bytes(), face_w, face_h, src_c, w, h)
    };

    // Single-channel faces are replicated across every model channel.
    let sample = |y: usize, x: usize, c: usize| -> f32 {
        let c = if src_c == 1 { 0 } else { c };
        pixels[(y * w + x) * src_c + c] as f32 / 255.0
    };

    let tensor = match shape.layout {
        TensorLayout::Nhwc => Array4::from_shape_fn((1, h, w, dst_c), |(_, y, x, c)| sample(y, x, c)),
        TensorLayout::Nchw => Array4::from_shape_fn((1, dst_c, h, w), |(_, c, y, x)| sample(y, x, c)),
    };
    Ok(tensor)
}

/// Turn raw class scores into probabilities.
///
/// Scores inside [0, 1] are probabilities and pass through unchanged, even
/// when they do not sum to one. Any score outside that range marks the vector
/// as logits, which are softmaxed.
pub fn to_probabilities(scores: Vec<f32>) -> Result<Vec<f32>, InferenceFailure> {
    if scores.is_empty() {
        return Err(InferenceFailure::InvalidOutput("empty score vector".into()));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(InferenceFailure::InvalidOutput("non-finite class score".into()));
    }

    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        return Ok(scores);
    }

    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / total).collect())
}

/// Index and value of the largest probability; the first one wins ties.
fn arg_max(probs: &[f32]) -> Option<(usize, f32)> {
    probs.iter().copied().enumerate().fold(None, |best, (i, p)| match best {
        Some((_, bp)) if bp >= p => best,
        _ => Some((i, p)),
    })
}

/// Thresholded identity decision over a caller-supplied model.
#[derive(Debug, Clone)]
pub struct IdentityClassifier {
    table: IdentityTable,
    threshold: f32,
}

impl IdentityClassifier {
    pub fn new(table: IdentityTable) -> Self {
        Self { table, threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Predict the identity of one face.
    ///
    /// Never fails: an [`InferenceFailure`] is logged and reported as
    /// `unknown` with zero confidence.
    pub fn predict(&self, model: &dyn IdentityModel, face: &NormalizedFace) -> Prediction {
        match self.try_predict(model, face) {
            Ok(prediction) => prediction,
            Err(e) => {
                tracing::warn!(error = %e, "identity inference failed; reporting unknown");
                Prediction::unknown(0.0)
            }
        }
    }

    fn try_predict(&self, model: &dyn IdentityModel, face: &NormalizedFace) -> Result<Prediction, InferenceFailure> {
        let input = prepare(face, &model.input_shape())?;
        let scores = model.forward(input.view())?;
        let probs = to_probabilities(scores)?;
        Ok(self.decide(&probs))
    }

    /// Apply the threshold and the index table to a probability vector.
    pub fn decide(&self, probs: &[f32]) -> Prediction {
        let Some((index, confidence)) = arg_max(probs) else {
            return Prediction::unknown(0.0);
        };

        if confidence < self.threshold {
            tracing::debug!(index, confidence, threshold = self.threshold, "below threshold");
            return Prediction::unknown(confidence);
        }

        match self.table.get(index) {
            Some(name) => {
                tracing::debug!(index, confidence, identity = name, "identity predicted");
                Prediction { label: IdentityLabel::Known(name.to_string()), confidence }
            }
            None => {
                tracing::debug!(index, confidence, "class index has no label");
                Prediction::unknown(confidence)
            }
        }
    }
}
