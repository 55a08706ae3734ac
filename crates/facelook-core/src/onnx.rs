//! ONNX Runtime identity classifier.

use crate::classifier::{IdentityModel, InferenceFailure, InputShape};
use ndarray::ArrayView4;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported model input: {0}")]
    InvalidInputShape(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Image classifier whose first input is a 4-D float tensor and whose first
/// output holds one score per identity class.
pub struct OnnxIdentityModel {
    // `Session::run` needs `&mut`; the lock lets one handle serve many callers.
    session: Mutex<Session>,
    shape: InputShape,
}

impl OnnxIdentityModel {
    pub fn load(model_path: &str) -> Result<Self, ModelLoadError> {
        if !Path::new(model_path).exists() {
            return Err(ModelLoadError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let input = session
            .inputs()
            .first()
            .ok_or_else(|| ModelLoadError::InvalidInputShape("model declares no inputs".into()))?;
        let dims: Vec<i64> = match input.dtype() {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
            other => return Err(ModelLoadError::InvalidInputShape(format!("{other:?}"))),
        };
        let shape = InputShape::from_dims(&dims)
            .ok_or_else(|| ModelLoadError::InvalidInputShape(format!("cannot read image layout from {dims:?}")))?;

        tracing::info!(
            path = model_path,
            input = ?dims,
            layout = ?shape.layout,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded identity classifier"
        );

        Ok(Self { session: Mutex::new(session), shape })
    }
}

impl IdentityModel for OnnxIdentityModel {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceFailure> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceFailure::Runtime("session lock poisoned".into()))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input)?])?;
        if outputs.len() == 0 {
            return Err(InferenceFailure::InvalidOutput("model produced no outputs".into()));
        }

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceFailure::InvalidOutput(format!("class scores: {e}")))?;
        Ok(scores.to_vec())
    }
}
