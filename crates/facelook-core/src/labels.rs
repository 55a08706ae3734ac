//! Closed class-index → identity table.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("cannot read labels {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("labels TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("label key {0:?} is not a class index")]
    InvalidIndex(String),
}

#[derive(Deserialize)]
struct LabelsFile {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Maps classifier output indices to identity names. Indices absent from the
/// table never resolve to an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTable {
    labels: BTreeMap<usize, String>,
}

impl IdentityTable {
    /// Parse a `[labels]` table keyed by class index:
    ///
    /// ```toml
    /// [labels]
    /// 0 = "ana"
    /// 1 = "felipe"
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, LabelsError> {
        let file: LabelsFile = toml::from_str(src)?;
        let labels = file
            .labels
            .into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<usize>()
                    .map(|idx| (idx, v))
                    .map_err(|_| LabelsError::InvalidIndex(k))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { labels })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LabelsError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| LabelsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(usize, S)> for IdentityTable {
    fn from_iter<I: IntoIterator<Item = (usize, S)>>(iter: I) -> Self {
        Self { labels: iter.into_iter().map(|(i, s)| (i, s.into())).collect() }
    }
}
