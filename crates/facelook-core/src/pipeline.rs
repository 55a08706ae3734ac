//! End-to-end recognition: image bytes → one face → one identity.

use crate::classifier::{IdentityClassifier, IdentityModel};
use crate::locator::{FaceLocator, LocateOptions, LocatorError};
use crate::types::{NormalizedFace, Prediction, UNKNOWN_IDENTITY};
use serde::Serialize;

pub const NO_FACE_MESSAGE: &str = "No face detected in the image";

/// Outcome of one recognition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Identified(Prediction),
    NoFace,
}

impl Recognition {
    pub fn to_response(&self) -> RecognitionResponse {
        match self {
            Recognition::Identified(p) => RecognitionResponse {
                recognized: p.is_recognized(),
                identity: p.label.as_str().to_string(),
                confidence: p.confidence,
                message: None,
            },
            Recognition::NoFace => RecognitionResponse {
                recognized: false,
                identity: UNKNOWN_IDENTITY.to_string(),
                confidence: 0.0,
                message: Some(NO_FACE_MESSAGE.to_string()),
            },
        }
    }
}

/// Transport-facing result body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResponse {
    pub recognized: bool,
    pub identity: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub struct RecognitionPipeline {
    locator: FaceLocator,
    classifier: IdentityClassifier,
    options: LocateOptions,
}

impl RecognitionPipeline {
    pub fn new(locator: FaceLocator, classifier: IdentityClassifier, options: LocateOptions) -> Self {
        Self { locator, classifier, options }
    }

    /// Recognize the single most prominent face in an encoded image.
    ///
    /// Only undecodable input is an error. No face and low-confidence faces
    /// are both ordinary outcomes.
    pub fn recognize(&self, model: &dyn IdentityModel, bytes: &[u8]) -> Result<Recognition, LocatorError> {
        let Some(face) = self.locate(bytes)? else {
            return Ok(Recognition::NoFace);
        };
        Ok(Recognition::Identified(self.identify(model, &face)))
    }

    /// Localization half of [`recognize`](Self::recognize). Callers that load
    /// the model lazily run this first and skip the model when no face is found.
    pub fn locate(&self, bytes: &[u8]) -> Result<Option<NormalizedFace>, LocatorError> {
        let face = self.locator.locate(bytes, &self.options)?;
        if face.is_none() {
            tracing::debug!("no face located");
        }
        Ok(face)
    }

    /// Classification half of [`recognize`](Self::recognize).
    pub fn identify(&self, model: &dyn IdentityModel, face: &NormalizedFace) -> Prediction {
        let prediction = self.classifier.predict(model, face);
        tracing::info!(
            identity = prediction.label.as_str(),
            confidence = prediction.confidence,
            recognized = prediction.is_recognized(),
            "recognition complete"
        );
        prediction
    }
}
