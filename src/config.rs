use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::MAX_SEQ_LEN;
use crate::error::{MlmError, Result};
use crate::masking::MaskingPolicy;
use crate::vocab::{EventType, PerformanceConfigs};

/// Settings of one MLM experiment. Loss histories and the epoch counter carry
/// over when a run resumes from a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpConfig {
    // IO paths
    pub model_name: String,
    pub save_dir: String,
    pub data_path: String,
    pub perf_config_name: String,

    // Model setting
    pub n_embed: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub dropout: f64,
    pub max_seq_len: usize,

    // Training setting
    pub special_tokens: Vec<EventType>,
    pub n_epochs: usize,
    pub mlm_prob: f64,
    pub lr: f64,
    pub eval_interval: usize,
    pub save_interval: usize,
    pub resume_from: Option<String>,

    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub total_epoch_num: usize,
}

impl Default for ExpConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            save_dir: String::new(),
            data_path: String::new(),
            perf_config_name: String::new(),
            n_embed: 256,
            n_layers: 4,
            n_heads: 4,
            dropout: 0.1,
            max_seq_len: MAX_SEQ_LEN,
            special_tokens: Vec::new(),
            n_epochs: 20,
            mlm_prob: 0.15,
            lr: 1e-4,
            eval_interval: 5,
            save_interval: 5,
            resume_from: None,
            train_loss: Vec::new(),
            val_loss: Vec::new(),
            total_epoch_num: 0,
        }
    }
}

impl ExpConfig {
    pub fn validate(&self, perf_configs: &PerformanceConfigs) -> Result<()> {
        perf_configs.get(&self.perf_config_name)?;
        if !(self.mlm_prob > 0.0 && self.mlm_prob <= 1.0) {
            return Err(MlmError::config(format!(
                "mlm_prob must be in (0, 1], got {}",
                self.mlm_prob
            )));
        }
        if self.eval_interval == 0 || self.save_interval == 0 {
            return Err(MlmError::config("eval_interval and save_interval must be positive"));
        }
        if self.special_tokens.is_empty() {
            warn!(model = %self.model_name, "Special token(s) is required for MLM training");
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Missing keys take their defaults; unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn masking_policy(&self) -> Result<MaskingPolicy> {
        MaskingPolicy::builder()
            .mask_prob(self.mlm_prob)
            .special_types(self.special_tokens.iter().copied())
            .max_seq_len(self.max_seq_len)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn velocity_config() -> ExpConfig {
        ExpConfig {
            model_name: "velocitymlm".to_string(),
            save_dir: "save".to_string(),
            data_path: "data/mstro_with_dyn.pt".to_string(),
            perf_config_name: "performance_with_dynamics".to_string(),
            special_tokens: vec![EventType::Velocity],
            ..Default::default()
        }
    }

    #[test]
    fn test_json_pair() {
        let mut cfg = velocity_config();
        cfg.train_loss = vec![2.5, 1.75];
        cfg.total_epoch_num = 2;
        let json = cfg.to_json().unwrap();
        assert!(json.contains("\"special_tokens\": [\n    \"velocity\"\n  ]"));
        assert_eq!(ExpConfig::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn test_partial_json_and_unknown_keys() {
        let json = r#"{
            "model_name": "m",
            "perf_config_name": "performance",
            "device": "mps",
            "n_epochs": 3
        }"#;
        let cfg = ExpConfig::from_json(json).unwrap();
        assert_eq!(cfg.model_name, "m");
        assert_eq!(cfg.n_epochs, 3);
        assert_eq!(cfg.n_embed, 256);
        assert_eq!(cfg.mlm_prob, 0.15);
        assert!(ExpConfig::from_json(r#"{"special_tokens": ["pitch_bend"]}"#).is_err());
    }

    #[test]
    fn test_validate() {
        let configs = PerformanceConfigs::builtin();
        assert!(velocity_config().validate(&configs).is_ok());

        let mut cfg = velocity_config();
        cfg.perf_config_name = "unknown".to_string();
        assert!(matches!(cfg.validate(&configs), Err(MlmError::Config(_))));

        let mut cfg = velocity_config();
        cfg.mlm_prob = 0.0;
        assert!(matches!(cfg.validate(&configs), Err(MlmError::Config(_))));

        // only a warning
        let mut cfg = velocity_config();
        cfg.special_tokens.clear();
        assert!(cfg.validate(&configs).is_ok());
    }

    #[test]
    fn test_masking_policy_from_config() {
        let policy = velocity_config().masking_policy().unwrap();
        assert_eq!(policy.mask_prob(), 0.15);
        assert_eq!(policy.special_types(), &[EventType::Velocity]);
    }
}
