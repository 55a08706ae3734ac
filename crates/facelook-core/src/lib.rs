//! facelook-core: face localization and identity classification.
//!
//! Locates at most one face per image with boosted cascades (Haar frontal,
//! LBP fallback), normalizes it to a square crop, and classifies it with an
//! ONNX model through ONNX Runtime.

pub mod cascade;
pub mod classifier;
pub mod frame;
pub mod geometry;
pub mod labels;
pub mod locator;
pub mod onnx;
pub mod pipeline;
pub mod types;

pub use cascade::{Cascade, CascadeDetector, CascadeError};
pub use classifier::{IdentityClassifier, IdentityModel, InferenceFailure, InputShape, TensorLayout};
pub use labels::{IdentityTable, LabelsError};
pub use locator::{FaceDetector, FaceLocator, LocateOptions, LocatorError};
pub use onnx::{ModelLoadError, OnnxIdentityModel};
pub use pipeline::{Recognition, RecognitionPipeline, RecognitionResponse};
pub use types::{FaceBox, IdentityLabel, NormalizedFace, Prediction};

use std::path::PathBuf;

/// Default directory for cascades, the classifier and its labels:
/// `$XDG_DATA_HOME/facelook`, falling back to `~/.local/share/facelook`.
pub fn default_asset_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelook")
}
