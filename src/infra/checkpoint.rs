// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using Burn's CompactRecorder.
//
// What gets saved per run:
//   {model_name}-{epoch:03}.mpk.gz  — periodic epoch snapshots
//   {model_name}_bestmodel.mpk.gz   — lowest validation loss so far
//   latest_epoch.json               — last periodic epoch written
//   train_config.json               — everything needed to rebuild
//                                     the model before loading
//
// CompactRecorder serialises to MessagePack and gzips it;
// loading fails if the architecture does not match, which is
// why the config rides along.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use std::{fs, path::PathBuf};

use crate::application::train_use_case::TrainConfig;
use crate::ml::model::CaptionModel;

pub struct CheckpointManager {
    dir:        PathBuf,
    model_name: String,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<String>, model_name: impl Into<String>) -> Self {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir).ok();
        Self { dir, model_name: model_name.into() }
    }

    /// Save a periodic epoch snapshot and move the latest-epoch
    /// pointer.
    pub fn save_epoch<B: AutodiffBackend>(
        &self,
        model: &CaptionModel<B>,
        epoch: usize,
    ) -> Result<()> {
        let path = self.dir.join(format!("{}-{:03}", self.model_name, epoch));
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let latest_path = self.dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Overwrite the best-model snapshot.
    pub fn save_best<B: AutodiffBackend>(&self, model: &CaptionModel<B>) -> Result<()> {
        let path = self.dir.join(format!("{}_bestmodel", self.model_name));
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save best model to '{}'", path.display()))?;
        tracing::debug!("Saved best-model snapshot");
        Ok(())
    }

    /// Load the best-model snapshot into an architecture-matching
    /// model. Falls back to the latest periodic snapshot when no
    /// best-model file exists yet.
    pub fn load_best<B: Backend>(
        &self,
        model:  CaptionModel<B>,
        device: &B::Device,
    ) -> Result<CaptionModel<B>> {
        let best = self.dir.join(format!("{}_bestmodel", self.model_name));
        if best.with_extension("mpk.gz").exists() {
            tracing::info!("Loading best-model snapshot");
            return self.load_from(model, best, device);
        }
        tracing::warn!("No best-model snapshot found, falling back to latest epoch");
        self.load_latest(model, device)
    }

    /// Load the snapshot latest_epoch.json points at. A missing
    /// pointer file is not fatal: the freshly initialized model
    /// is returned so callers can still run, with a warning that
    /// the weights are untrained.
    pub fn load_latest<B: Backend>(
        &self,
        model:  CaptionModel<B>,
        device: &B::Device,
    ) -> Result<CaptionModel<B>> {
        if !self.dir.join("latest_epoch.json").exists() {
            tracing::warn!(
                "No checkpoint found in '{}', using untrained weights",
                self.dir.display()
            );
            return Ok(model);
        }
        let epoch = self.latest_epoch()?;
        let path = self.dir.join(format!("{}-{:03}", self.model_name, epoch));
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        self.load_from(model, path, device)
    }

    fn load_from<B: Backend>(
        &self,
        model:  CaptionModel<B>,
        path:   PathBuf,
        device: &B::Device,
    ) -> Result<CaptionModel<B>> {
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!(
                    "Cannot load checkpoint '{}'. Have you trained the model first?",
                    path.display()
                )
            })?;
        Ok(model.load_record(record))
    }

    /// Save the training configuration so inference can rebuild
    /// the exact architecture. Called once before training starts.
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'generate'.",
                path.display()
            )
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");
        let s = fs::read_to_string(&path)
            .with_context(|| "Cannot find 'latest_epoch.json'. Have you run 'train' first?")?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}
