// ⚙️ Consolidator Configuration
//
// Every threshold and dictionary the matcher relies on is a tunable here;
// defaults were chosen against hand-labelled filing pairs and can be
// overridden from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConsolidationError, Result};

/// Environment variable naming a TOML config file
pub const CONFIG_ENV_VAR: &str = "CONSOLIDATOR_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidatorConfig {
    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub normalization: NormalizationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub review: ReviewConfig,
}

impl ConsolidatorConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConsolidationError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `CONSOLIDATOR_CONFIG` if set, else defaults
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(&path),
            Err(_) => {
                tracing::debug!("{} not set, using default config", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConsolidationError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.low_watermark) || !(0.0..=1.0).contains(&m.high_watermark) {
            return Err(ConsolidationError::Config(
                "watermarks must lie in [0, 1]".to_string(),
            ));
        }
        if m.low_watermark > m.high_watermark {
            return Err(ConsolidationError::Config(format!(
                "low watermark {} above high watermark {}",
                m.low_watermark, m.high_watermark
            )));
        }
        let w = &m.weights;
        if [w.name, w.identifier, w.overlap, w.temporal].iter().any(|x| *x < 0.0) {
            return Err(ConsolidationError::Config("negative score weight".to_string()));
        }
        if w.sum() <= 0.0 {
            return Err(ConsolidationError::Config("score weights sum to zero".to_string()));
        }
        if m.max_bucket_size < 2 {
            return Err(ConsolidationError::Config("max_bucket_size must be at least 2".to_string()));
        }
        let n = &self.normalization;
        if n.corporate_suffixes.iter().chain(n.person_suffixes.iter()).any(|s| s.trim().is_empty()) {
            return Err(ConsolidationError::Config("empty suffix entry".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// MATCHING
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Score at or above which a candidate auto-merges
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,

    /// Score below which a candidate is rejected
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f64,

    #[serde(default)]
    pub weights: ScoreWeights,

    /// Buckets larger than this are skipped with a warning (generic names)
    #[serde(default = "default_max_bucket_size")]
    pub max_bucket_size: usize,

    /// Shortest shared prefix that still counts as identifier evidence
    #[serde(default = "default_min_prefix_len")]
    pub min_identifier_prefix: usize,
}

fn default_high_watermark() -> f64 {
    0.70
}
fn default_low_watermark() -> f64 {
    0.40
}
fn default_max_bucket_size() -> usize {
    500
}
fn default_min_prefix_len() -> usize {
    4
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            weights: ScoreWeights::default(),
            max_bucket_size: default_max_bucket_size(),
            min_identifier_prefix: default_min_prefix_len(),
        }
    }
}

/// Weights of the four score components
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_name_weight")]
    pub name: f64,
    #[serde(default = "default_identifier_weight")]
    pub identifier: f64,
    #[serde(default = "default_overlap_weight")]
    pub overlap: f64,
    #[serde(default = "default_temporal_weight")]
    pub temporal: f64,
}

fn default_name_weight() -> f64 {
    0.45
}
fn default_identifier_weight() -> f64 {
    0.25
}
fn default_overlap_weight() -> f64 {
    0.20
}
fn default_temporal_weight() -> f64 {
    0.10
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.name + self.identifier + self.overlap + self.temporal
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            name: default_name_weight(),
            identifier: default_identifier_weight(),
            overlap: default_overlap_weight(),
            temporal: default_temporal_weight(),
        }
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Trailing corporate designators stripped from company names
    #[serde(default = "default_corporate_suffixes")]
    pub corporate_suffixes: Vec<String>,

    /// Generational suffixes stripped from person names
    #[serde(default = "default_person_suffixes")]
    pub person_suffixes: Vec<String>,
}

fn default_corporate_suffixes() -> Vec<String> {
    [
        "inc", "incorporated", "corp", "corporation", "co", "company", "llc", "ltd", "limited",
        "plc", "lp", "llp", "sa", "ag", "nv",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_person_suffixes() -> Vec<String> {
    ["jr", "sr", "ii", "iii", "iv"].iter().map(|s| s.to_string()).collect()
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            corporate_suffixes: default_corporate_suffixes(),
            person_suffixes: default_person_suffixes(),
        }
    }
}

// ============================================================================
// STORAGE / PIPELINE / REVIEW
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("consolidator.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker threads for matching and linking; 0 means one per core
    #[serde(default)]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Review items older than this are reported as stale
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
}

fn default_stale_after_days() -> i64 {
    30
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self { stale_after_days: default_stale_after_days() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ConsolidatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.matching.high_watermark, 0.70);
        assert!((config.matching.weights.sum() - 1.0).abs() < 1e-9);
        assert!(config.normalization.corporate_suffixes.contains(&"corporation".to_string()));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ConsolidatorConfig = toml::from_str(
            r#"
            [matching]
            high_watermark = 0.8

            [review]
            stale_after_days = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.high_watermark, 0.8);
        assert_eq!(config.matching.low_watermark, 0.40);
        assert_eq!(config.review.stale_after_days, 7);
        assert_eq!(config.storage.db_path, PathBuf::from("consolidator.db"));
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let mut config = ConsolidatorConfig::default();
        config.matching.low_watermark = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_suffix_rejected() {
        let mut config = ConsolidatorConfig::default();
        config.normalization.corporate_suffixes.push("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consolidator.toml");

        let mut config = ConsolidatorConfig::default();
        config.pipeline.worker_threads = 3;
        config.save(&path).unwrap();

        let loaded = ConsolidatorConfig::load(&path).unwrap();
        assert_eq!(loaded.pipeline.worker_threads, 3);
        assert_eq!(loaded.matching.max_bucket_size, 500);
    }
}
