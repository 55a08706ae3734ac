use facelook_core::classifier::DEFAULT_CONFIDENCE_THRESHOLD;
use facelook_core::geometry::DEFAULT_CENTRALITY_PENALTY;
use facelook_core::labels::LabelsError;
use facelook_core::locator::{DEFAULT_MARGIN_REL, DEFAULT_MAX_DETECT_SIDE, DEFAULT_MIN_FACE_REL, DEFAULT_TARGET_SIZE};
use facelook_core::{IdentityTable, LocateOptions};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding cascades, the classifier and its labels.
    pub asset_dir: PathBuf,
    /// Haar frontal-face cascade XML.
    pub frontal_cascade: PathBuf,
    /// LBP fallback cascade XML.
    pub fallback_cascade: PathBuf,
    /// ONNX identity classifier.
    pub model_path: PathBuf,
    /// TOML class-index → identity table.
    pub labels_path: PathBuf,
    pub target_size: u32,
    pub min_face_rel: f64,
    pub margin_rel: f64,
    pub max_detect_side: u32,
    pub centrality_penalty: f64,
    pub confidence_threshold: f32,
}

impl Config {
    /// Load configuration from `FACELOOK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let asset_dir = var("FACELOOK_ASSET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facelook_core::default_asset_dir);
        let path = |key: &str, file: &str| var(key).map(PathBuf::from).unwrap_or_else(|| asset_dir.join(file));

        Self {
            frontal_cascade: path("FACELOOK_FRONTAL_CASCADE", "haarcascade_frontalface_default.xml"),
            fallback_cascade: path("FACELOOK_FALLBACK_CASCADE", "lbpcascade_frontalface.xml"),
            model_path: path("FACELOOK_MODEL_PATH", "face_classifier.onnx"),
            labels_path: path("FACELOOK_LABELS_PATH", "labels.toml"),
            target_size: env_u32(&var, "FACELOOK_TARGET_SIZE", DEFAULT_TARGET_SIZE),
            min_face_rel: env_f64(&var, "FACELOOK_MIN_FACE_REL", DEFAULT_MIN_FACE_REL),
            margin_rel: env_f64(&var, "FACELOOK_MARGIN_REL", DEFAULT_MARGIN_REL),
            max_detect_side: env_u32(&var, "FACELOOK_MAX_DETECT_SIDE", DEFAULT_MAX_DETECT_SIDE),
            centrality_penalty: env_f64(&var, "FACELOOK_CENTRALITY_PENALTY", DEFAULT_CENTRALITY_PENALTY),
            confidence_threshold: env_f32(&var, "FACELOOK_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            asset_dir,
        }
    }

    pub fn locate_options(&self) -> LocateOptions {
        LocateOptions {
            target_size: self.target_size,
            min_face_rel: self.min_face_rel,
            margin_rel: self.margin_rel,
            max_detect_side: self.max_detect_side,
            centrality_penalty: self.centrality_penalty,
        }
    }

    /// Load the labels table. A missing file gives an empty table, so every
    /// face is reported as unknown.
    pub fn load_labels(&self) -> Result<IdentityTable, LabelsError> {
        match IdentityTable::load(&self.labels_path) {
            Err(LabelsError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.labels_path.display(), "labels file missing; all faces will be unknown");
                Ok(IdentityTable::default())
            }
            other => other,
        }
    }

    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

fn env_f64(var: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_f32(var: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_u32(var: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults_under_asset_dir() {
        let cfg = config(&[("FACELOOK_ASSET_DIR", "/srv/facelook")]);
        assert_eq!(cfg.frontal_cascade, PathBuf::from("/srv/facelook/haarcascade_frontalface_default.xml"));
        assert_eq!(cfg.fallback_cascade, PathBuf::from("/srv/facelook/lbpcascade_frontalface.xml"));
        assert_eq!(cfg.model_path, PathBuf::from("/srv/facelook/face_classifier.onnx"));
        assert_eq!(cfg.labels_path, PathBuf::from("/srv/facelook/labels.toml"));
        assert_eq!(cfg.target_size, 160);
        assert_eq!(cfg.max_detect_side, 960);
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(cfg.centrality_penalty, 0.3);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("FACELOOK_ASSET_DIR", "/a"),
            ("FACELOOK_MODEL_PATH", "/models/custom.onnx"),
            ("FACELOOK_TARGET_SIZE", "224"),
            ("FACELOOK_CONFIDENCE_THRESHOLD", "0.7"),
            ("FACELOOK_MARGIN_REL", " 0.1 "),
        ]);
        assert_eq!(cfg.model_path, PathBuf::from("/models/custom.onnx"));
        assert_eq!(cfg.labels_path, PathBuf::from("/a/labels.toml"));
        assert_eq!(cfg.target_size, 224);
        assert_eq!(cfg.confidence_threshold, 0.7);
        assert_eq!(cfg.locate_options().margin_rel, 0.1);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let cfg = config(&[("FACELOOK_TARGET_SIZE", "big"), ("FACELOOK_MIN_FACE_REL", "")]);
        assert_eq!(cfg.target_size, DEFAULT_TARGET_SIZE);
        assert_eq!(cfg.min_face_rel, DEFAULT_MIN_FACE_REL);
    }

    #[test]
    fn test_f64_knobs_parsed() {
        let cfg = config(&[
            ("FACELOOK_MIN_FACE_REL", "0.2"),
            ("FACELOOK_CENTRALITY_PENALTY", "0"),
            ("FACELOOK_MARGIN_REL", "wide"),
        ]);
        assert_eq!(cfg.min_face_rel, 0.2);
        assert_eq!(cfg.centrality_penalty, 0.0);
        assert_eq!(cfg.margin_rel, DEFAULT_MARGIN_REL);
    }

    #[test]
    fn test_missing_labels_file_is_empty_table() {
        let cfg = config(&[("FACELOOK_LABELS_PATH", "/nonexistent/labels.toml")]);
        assert!(cfg.load_labels().unwrap().is_empty());
    }
}
