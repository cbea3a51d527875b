//! Companion configuration shipped next to the model artifact (`assets.json`).

use crate::error::LoadError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LABELS: [&str; 2] = ["No Tumor", "Tumor"];
pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_INPUT_SIZE: [i64; 4] = [1, 224, 224, 3];
pub const DEFAULT_SCALE: &str = "x/255.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAssets {
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Expected interpreter input shape.
    #[serde(default = "default_input_size")]
    pub input_size: Vec<i64>,
    #[serde(default = "default_scale")]
    pub scale: String,
    /// The document as published, including keys this struct ignores.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|label| label.to_string()).collect()
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_input_size() -> Vec<i64> {
    DEFAULT_INPUT_SIZE.to_vec()
}

fn default_scale() -> String {
    DEFAULT_SCALE.to_string()
}

impl Default for ModelAssets {
    fn default() -> Self {
        Self {
            labels: default_labels(),
            threshold: default_threshold(),
            input_size: default_input_size(),
            scale: default_scale(),
            raw: serde_json::Value::Object(Default::default()),
        }
    }
}

impl ModelAssets {
    pub fn from_json(bytes: &[u8]) -> Result<Self, LoadError> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| LoadError::Config(format!("assets is not valid JSON: {}", e)))?;
        let mut assets: ModelAssets = serde_json::from_value(raw.clone())
            .map_err(|e| LoadError::Config(format!("unexpected assets layout: {}", e)))?;
        assets.raw = raw;
        assets.validate()?;
        Ok(assets)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.labels.len() != 2 {
            return Err(LoadError::Config(format!(
                "expected exactly 2 labels, got {}",
                self.labels.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(LoadError::Config(format!(
                "threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }

    pub fn negative_label(&self) -> &str {
        &self.labels[0]
    }

    pub fn positive_label(&self) -> &str {
        &self.labels[1]
    }

    /// `(height, width)` from `input_size`, assuming NHWC unless the
    /// channel axis is clearly second.
    pub fn spatial_size(&self) -> Option<(u32, u32)> {
        let dims: Vec<u32> = self
            .input_size
            .iter()
            .map(|&d| u32::try_from(d).ok())
            .collect::<Option<_>>()?;
        match dims.as_slice() {
            [_, 3, h, w] if *w != 3 => Some((*h, *w)),
            [_, h, w, _] => Some((*h, *w)),
            [h, w, _] => Some((*h, *w)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_keys_missing() {
        let assets = ModelAssets::from_json(b"{}").unwrap();
        assert_eq!(assets.labels, vec!["No Tumor", "Tumor"]);
        assert_eq!(assets.threshold, 0.5);
        assert_eq!(assets.input_size, vec![1, 224, 224, 3]);
        assert_eq!(assets.spatial_size(), Some((224, 224)));
    }

    #[test]
    fn test_keeps_unknown_keys() {
        let json = br#"{"labels": ["Normal", "Pneumonia"], "threshold": 0.311, "arch": "resnet50"}"#;
        let assets = ModelAssets::from_json(json).unwrap();
        assert_eq!(assets.positive_label(), "Pneumonia");
        assert_eq!(assets.threshold, 0.311);
        assert_eq!(assets.raw["arch"], "resnet50");
    }

    #[test]
    fn test_rejects_wrong_label_count() {
        let err = ModelAssets::from_json(br#"{"labels": ["a", "b", "c"]}"#).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        assert!(ModelAssets::from_json(br#"{"threshold": 1.5}"#).is_err());
    }

    #[test]
    fn test_spatial_size_channels_first() {
        let assets = ModelAssets {
            input_size: vec![1, 3, 256, 192],
            ..Default::default()
        };
        assert_eq!(assets.spatial_size(), Some((256, 192)));
    }
}
