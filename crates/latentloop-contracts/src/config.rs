use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ModelRegistry, ModelSpec};

pub const ENV_IMAGES_ROWS: &str = "LATENTLOOP_IMAGES_ROWS";
pub const ENV_IMAGES_COLS: &str = "LATENTLOOP_IMAGES_COLS";
pub const ENV_SCORE_BASIC: &str = "LATENTLOOP_SCORE_BASIC";
pub const ENV_STAGES_NUMBER: &str = "LATENTLOOP_STAGES_NUMBER";
pub const ENV_INFERENCE_ENDPOINT: &str = "LATENTLOOP_INFERENCE_ENDPOINT";
pub const ENV_RNG_SEED: &str = "LATENTLOOP_RNG_SEED";

const MIN_TIMEOUT_S: f64 = 1.0;
// One day; longer waits are configuration mistakes.
const MAX_SECONDS: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("score_basic must be a finite number greater than 1, got {0}")]
    ScoreBasic(f64),
    #[error("render.resize_ratio must be in (0, 1], got {0}")]
    ResizeRatio(f64),
    #[error("candidates is {candidates} but rows x cols is {rows}x{cols}")]
    CandidateCount {
        candidates: usize,
        rows: usize,
        cols: usize,
    },
    #[error("model '{0}' has seed_dimension 0")]
    SeedDimension(String),
    #[error("grid.border {border} is wider than grid.spacing {spacing}")]
    Border { border: u32, spacing: u32 },
    #[error("{key} must be a finite number between {min} and {max} seconds, got {value}")]
    Seconds {
        key: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Search service settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub rows: usize,
    pub cols: usize,
    /// Optional explicit candidate count; must agree with `rows * cols`.
    pub candidates: Option<usize>,
    pub score_basic: f64,
    pub stages_total: u32,
    pub grid: GridSettings,
    pub render: RenderSettings,
    pub inference: InferenceSettings,
    pub dryrun: DryrunSettings,
    pub rng_seed: Option<u64>,
    pub models: Option<Vec<ModelSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub spacing: u32,
    pub border: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub resize_ratio: f64,
    pub label_offset: [u32; 2],
    pub label_scale: u32,
    pub placeholder_size: [u32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub endpoint: String,
    pub attempts: u32,
    pub timeout_s: f64,
    pub retry_delay_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DryrunSettings {
    pub size: [u32; 2],
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 3,
            candidates: None,
            score_basic: 1.5,
            stages_total: 3,
            grid: GridSettings::default(),
            render: RenderSettings::default(),
            inference: InferenceSettings::default(),
            dryrun: DryrunSettings::default(),
            rng_seed: None,
            models: None,
        }
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            spacing: 10,
            border: None,
        }
    }
}

impl GridSettings {
    pub fn border(&self) -> u32 {
        self.border.unwrap_or(self.spacing / 4)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resize_ratio: 0.5,
            label_offset: [16, 16],
            label_scale: 4,
            placeholder_size: [512, 512],
        }
    }
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://stylegan-generator:8000".to_string(),
            attempts: 3,
            timeout_s: 1200.0,
            retry_delay_s: 0.0,
        }
    }
}

impl Default for DryrunSettings {
    fn default() -> Self {
        Self { size: [256, 256] }
    }
}

impl SearchConfig {
    /// Loads the optional JSON file, applies `LATENTLOOP_*` environment
    /// overrides, then validates.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading config {}", path.display()))?;
                Self::from_json_str(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(non_empty_env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_IMAGES_ROWS) {
            self.rows = parse_value(ENV_IMAGES_ROWS, &value)?;
        }
        if let Some(value) = lookup(ENV_IMAGES_COLS) {
            self.cols = parse_value(ENV_IMAGES_COLS, &value)?;
        }
        if let Some(value) = lookup(ENV_SCORE_BASIC) {
            self.score_basic = parse_value(ENV_SCORE_BASIC, &value)?;
        }
        if let Some(value) = lookup(ENV_STAGES_NUMBER) {
            self.stages_total = parse_value(ENV_STAGES_NUMBER, &value)?;
        }
        if let Some(value) = lookup(ENV_INFERENCE_ENDPOINT) {
            self.inference.endpoint = value;
        }
        if let Some(value) = lookup(ENV_RNG_SEED) {
            self.rng_seed = Some(parse_value(ENV_RNG_SEED, &value)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 {
            return Err(ConfigError::Zero("rows"));
        }
        if self.cols == 0 {
            return Err(ConfigError::Zero("cols"));
        }
        if self.stages_total == 0 {
            return Err(ConfigError::Zero("stages_total"));
        }
        if self.inference.attempts == 0 {
            return Err(ConfigError::Zero("inference.attempts"));
        }
        if self.render.label_scale == 0 {
            return Err(ConfigError::Zero("render.label_scale"));
        }
        if !self.score_basic.is_finite() || self.score_basic <= 1.0 {
            return Err(ConfigError::ScoreBasic(self.score_basic));
        }
        if self.grid.border() > self.grid.spacing {
            return Err(ConfigError::Border {
                border: self.grid.border(),
                spacing: self.grid.spacing,
            });
        }
        check_seconds(
            "inference.timeout_s",
            self.inference.timeout_s,
            MIN_TIMEOUT_S,
            MAX_SECONDS,
        )?;
        check_seconds(
            "inference.retry_delay_s",
            self.inference.retry_delay_s,
            0.0,
            MAX_SECONDS,
        )?;
        let ratio = self.render.resize_ratio;
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
            return Err(ConfigError::ResizeRatio(ratio));
        }
        if let Some(candidates) = self.candidates {
            if candidates != self.rows * self.cols {
                return Err(ConfigError::CandidateCount {
                    candidates,
                    rows: self.rows,
                    cols: self.cols,
                });
            }
        }
        if let Some(models) = &self.models {
            if let Some(model) = models.iter().find(|model| model.seed_dimension == 0) {
                return Err(ConfigError::SeedDimension(model.name.clone()));
            }
        }
        Ok(())
    }

    /// Candidates per round.
    pub fn candidates(&self) -> usize {
        self.rows * self.cols
    }

    pub fn model_registry(&self) -> ModelRegistry {
        match &self.models {
            Some(specs) => ModelRegistry::from_specs(specs.clone()),
            None => ModelRegistry::new(None),
        }
    }
}

fn check_seconds(key: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::Seconds {
            key,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

pub fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<String, String>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_four_by_three_grid() {
        let config = SearchConfig::default();
        assert_eq!(config.candidates(), 12);
        assert_eq!(config.grid.border(), 2);
        assert_eq!(config.stages_total, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_fields_are_optional() -> anyhow::Result<()> {
        let config = SearchConfig::from_json_str(
            r#"{"rows": 2, "cols": 2, "grid": {"spacing": 8}, "inference": {"attempts": 5}}"#,
        )?;
        assert_eq!(config.candidates(), 4);
        assert_eq!(config.grid.border(), 2);
        assert_eq!(config.inference.attempts, 5);
        assert_eq!(config.inference.timeout_s, 1200.0);
        assert_eq!(config.score_basic, 1.5);
        Ok(())
    }

    #[test]
    fn env_overrides_replace_file_values() -> anyhow::Result<()> {
        let mut config = SearchConfig::default();
        config.apply_overrides(lookup(&[
            (ENV_IMAGES_ROWS, "2"),
            (ENV_IMAGES_COLS, "5"),
            (ENV_SCORE_BASIC, "2.5"),
            (ENV_STAGES_NUMBER, "6"),
            (ENV_INFERENCE_ENDPOINT, "http://localhost:9000"),
            (ENV_RNG_SEED, "7"),
        ]))?;
        assert_eq!(config.candidates(), 10);
        assert_eq!(config.score_basic, 2.5);
        assert_eq!(config.stages_total, 6);
        assert_eq!(config.inference.endpoint, "http://localhost:9000");
        assert_eq!(config.rng_seed, Some(7));
        Ok(())
    }

    #[test]
    fn env_override_with_garbage_is_rejected() {
        let mut config = SearchConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_IMAGES_ROWS, "four")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "LATENTLOOP_IMAGES_ROWS has invalid value 'four'"
        );
    }

    #[test]
    fn validate_rejects_inconsistent_settings() {
        let mut config = SearchConfig {
            candidates: Some(10),
            ..SearchConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CandidateCount { .. })
        ));

        config.candidates = Some(12);
        config.score_basic = 1.0;
        assert_eq!(config.validate(), Err(ConfigError::ScoreBasic(1.0)));

        config.score_basic = 1.5;
        config.stages_total = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("stages_total")));

        config.stages_total = 3;
        config.render.resize_ratio = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::ResizeRatio(1.5)));
    }

    #[test]
    fn validate_rejects_border_wider_than_spacing() {
        let mut config = SearchConfig::default();
        config.grid.spacing = 2;
        config.grid.border = Some(20);
        assert_eq!(
            config.validate(),
            Err(ConfigError::Border {
                border: 20,
                spacing: 2
            })
        );

        config.grid.border = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_bounds_inference_durations() -> anyhow::Result<()> {
        let config = SearchConfig::from_json_str(r#"{"inference": {"timeout_s": 1e20}}"#)?;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Seconds {
                key: "inference.timeout_s",
                ..
            })
        ));

        for delay in [-1.0, f64::NAN, f64::INFINITY, 1e12] {
            let mut config = SearchConfig::default();
            config.inference.retry_delay_s = delay;
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::Seconds {
                        key: "inference.retry_delay_s",
                        ..
                    })
                ),
                "delay {delay}"
            );
        }

        let mut config = SearchConfig::default();
        config.inference.timeout_s = 0.5;
        assert!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn load_reads_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"stages_total": 4, "models": [{"name": "tiny", "provider": "dryrun", "seed_dimension": 16}]}"#,
        )?;
        let config = SearchConfig::load(Some(&path))?;
        assert_eq!(config.stages_total, 4);
        assert_eq!(config.model_registry().names(), vec!["tiny"]);
        Ok(())
    }
}
