use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ExpConfig;
use crate::error::{MlmError, Result};

/// Everything needed to resume a run. Model and optimizer state are opaque to
/// this crate; the trainer decides what goes in them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingCheckpoint {
    pub config: ExpConfig,
    pub total_epoch_num: usize,
    pub model_state: serde_json::Value,
    pub optimizer_state: serde_json::Value,
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
}

impl TrainingCheckpoint {
    /// Appends this run's histories to the ones `cfg` resumed with.
    pub fn from_run(
        cfg: &ExpConfig,
        num_epoch: usize,
        train_loss: &[f32],
        val_loss: &[f32],
        model_state: serde_json::Value,
        optimizer_state: serde_json::Value,
    ) -> Self {
        let mut all_train_loss = cfg.train_loss.clone();
        all_train_loss.extend_from_slice(train_loss);
        let mut all_val_loss = cfg.val_loss.clone();
        all_val_loss.extend_from_slice(val_loss);

        let total_epoch_num = cfg.total_epoch_num + num_epoch;
        let mut config = cfg.clone();
        config.train_loss = all_train_loss.clone();
        config.val_loss = all_val_loss.clone();
        config.total_epoch_num = total_epoch_num;

        Self {
            config,
            total_epoch_num,
            model_state,
            optimizer_state,
            train_loss: all_train_loss,
            val_loss: all_val_loss,
        }
    }
}

pub trait CheckpointStore {
    fn save(&self, path: &Path, checkpoint: &TrainingCheckpoint) -> Result<()>;

    fn load(&self, path: &Path) -> Result<TrainingCheckpoint>;

    /// Like [`CheckpointStore::save`], but refuses to replace an existing file.
    fn save_new(&self, path: &Path, checkpoint: &TrainingCheckpoint) -> Result<()> {
        if path.exists() {
            return Err(MlmError::AlreadyExists(format!(
                "Checkpoint file already exists: {}",
                path.display()
            )));
        }
        self.save(path, checkpoint)
    }

    /// The experiment config stored in a checkpoint, as pretty JSON.
    fn describe(&self, path: &Path) -> Result<String> {
        self.load(path)?.config.to_json()
    }
}

/// Stores checkpoints as pretty-printed JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCheckpointStore;

impl CheckpointStore for JsonCheckpointStore {
    fn save(&self, path: &Path, checkpoint: &TrainingCheckpoint) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec_pretty(checkpoint)?)?;
        info!(path = %path.display(), epochs = checkpoint.total_epoch_num, "Checkpoint saved");
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<TrainingCheckpoint> {
        if !path.exists() {
            return Err(MlmError::NotFound(format!(
                "Checkpoint file not found: {}",
                path.display()
            )));
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resumed_config() -> ExpConfig {
        ExpConfig {
            model_name: "velocitymlm+".to_string(),
            perf_config_name: "performance_with_dynamics".to_string(),
            train_loss: vec![3.0, 2.0],
            val_loss: vec![2.5],
            total_epoch_num: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_run_accumulates() {
        let ckpt = TrainingCheckpoint::from_run(
            &resumed_config(),
            3,
            &[1.5, 1.25, 1.0],
            &[1.1],
            json!({"weights": [0.5, 0.25]}),
            json!(null),
        );
        assert_eq!(ckpt.total_epoch_num, 5);
        assert_eq!(ckpt.train_loss, vec![3.0, 2.0, 1.5, 1.25, 1.0]);
        assert_eq!(ckpt.val_loss, vec![2.5, 1.1]);
        assert_eq!(ckpt.config.total_epoch_num, 5);
        assert_eq!(ckpt.config.train_loss, ckpt.train_loss);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints").join("velocitymlm.json");
        let store = JsonCheckpointStore;
        let ckpt = TrainingCheckpoint::from_run(
            &resumed_config(),
            1,
            &[0.75],
            &[],
            json!({"layer0": [1, 2, 3]}),
            json!({"step": 10}),
        );
        store.save(&path, &ckpt).unwrap();
        assert_eq!(store.load(&path).unwrap(), ckpt);
    }

    #[test]
    fn test_save_new_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("velocitymlm.json");
        let store = JsonCheckpointStore;
        let first = TrainingCheckpoint::from_run(
            &resumed_config(),
            1,
            &[0.75],
            &[],
            json!(1),
            json!(null),
        );
        store.save_new(&path, &first).unwrap();

        let second = TrainingCheckpoint::from_run(
            &resumed_config(),
            4,
            &[0.5; 4],
            &[],
            json!(2),
            json!(null),
        );
        let res = store.save_new(&path, &second);
        assert!(matches!(res, Err(MlmError::AlreadyExists(_))));
        // the first checkpoint is untouched
        assert_eq!(store.load(&path).unwrap(), first);

        // plain save still overwrites
        store.save(&path, &second).unwrap();
        assert_eq!(store.load(&path).unwrap().total_epoch_num, 6);
    }

    #[test]
    fn test_describe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("velocitymlm.json");
        let store = JsonCheckpointStore;
        let ckpt = TrainingCheckpoint::from_run(
            &resumed_config(),
            2,
            &[1.0, 0.5],
            &[],
            json!(null),
            json!(null),
        );
        store.save(&path, &ckpt).unwrap();

        let described = store.describe(&path).unwrap();
        assert!(described.contains("\"model_name\": \"velocitymlm+\""));
        assert_eq!(ExpConfig::from_json(&described).unwrap(), ckpt.config);
        assert_eq!(ExpConfig::from_json(&described).unwrap().total_epoch_num, 4);

        let missing = store.describe(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(MlmError::NotFound(_))));
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let res = JsonCheckpointStore.load(&dir.path().join("nope.json"));
        assert!(matches!(res, Err(MlmError::NotFound(_))));
    }
}
