// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full training pipeline in order:
//
//   Step 1: Load embedding/record splits   (Layer 4 - data)
//   Step 2: Build / load tokenizer         (Layer 6 - infra)
//   Step 3: Build datasets per task        (Layer 4 - data)
//   Step 4: Save config                    (Layer 6 - infra)
//   Step 5: Run training loop              (Layer 5 - ml)
//
// Which splits are required depends on the task: captioning
// needs the caption splits, vqa the question-answer splits,
// multi-task both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::data::{
    dataset::PrefixDataset,
    storage::{CaptionSplit, QaSplit, SplitStorage},
};
use crate::domain::policy::{OverflowPolicy, RemainderPolicy, TrainTask};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::MetricsLogger,
    tokenizer_store::{TokenizerStore, EOS_ID},
};
use crate::ml::{
    language_model::CausalLmConfig,
    mapper::MappingKind,
    model::CaptionModelConfig,
    trainer::{run_training, TaskData},
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All hyperparameters for a training run. Serialisable so it
// can be saved to disk and reloaded for generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub caption_data:     Option<String>,
    pub caption_val_data: Option<String>,
    pub qa_data:          Option<String>,
    pub qa_val_data:      Option<String>,
    pub checkpoint_dir:   String,
    pub model_name:       String,

    pub task:              TrainTask,
    pub mapping:           MappingKind,
    pub prefix_length:     usize,
    pub clip_length:       usize,
    /// Visual embedding width: 512 for ViT features, 640 for
    /// ResNet features
    pub prefix_dim:        usize,
    pub normalize_prefix:  bool,
    pub only_prefix:       bool,
    pub overflow:          OverflowPolicy,
    pub remainder:         RemainderPolicy,
    pub weight_captioning: f64,
    pub weight_vqa:        f64,

    pub batch_size:   usize,
    pub epochs:       usize,
    pub lr:           f64,
    pub warmup_steps: usize,
    pub save_every:   usize,
    pub seed:         u64,

    pub vocab_size:    usize,
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    pub dropout:       f64,
    pub max_positions: usize,
    pub mapper_layers: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            caption_data:     None,
            caption_val_data: None,
            qa_data:          None,
            qa_val_data:      None,
            checkpoint_dir:   "checkpoints".to_string(),
            model_name:       "caption_prefix".to_string(),

            task:              TrainTask::Captioning,
            mapping:           MappingKind::Mlp,
            prefix_length:     10,
            clip_length:       10,
            prefix_dim:        512,
            normalize_prefix:  false,
            only_prefix:       false,
            overflow:          OverflowPolicy::ZeroSupervision,
            remainder:         RemainderPolicy::StopAtShorter,
            weight_captioning: 1.0,
            weight_vqa:        1.0,

            batch_size:   40,
            epochs:       10,
            lr:           2e-5,
            warmup_steps: 5000,
            save_every:   1,
            seed:         42,

            vocab_size:    10_000,
            d_model:       256,
            num_heads:     8,
            num_layers:    6,
            d_ff:          1024,
            dropout:       0.1,
            max_positions: 1024,
            mapper_layers: 8,
        }
    }
}

impl TrainConfig {
    /// The model architecture implied by this config. Used both
    /// to build the training model and to rebuild it for
    /// generation.
    pub fn model_config(&self) -> CaptionModelConfig {
        CaptionModelConfig::new(
            self.mapping,
            self.prefix_dim,
            self.prefix_length,
            self.clip_length,
            CausalLmConfig::new(
                self.vocab_size,
                self.d_model,
                self.num_heads,
                self.num_layers,
                self.d_ff,
            )
            .with_max_positions(self.max_positions)
            .with_dropout(self.dropout),
        )
        .with_mapper_layers(self.mapper_layers)
        .with_only_prefix(self.only_prefix)
    }

    fn needs_captions(&self) -> bool {
        matches!(self.task, TrainTask::Captioning | TrainTask::MultiTask)
    }

    fn needs_qa(&self) -> bool {
        matches!(self.task, TrainTask::Vqa | TrainTask::MultiTask)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end.
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Load splits ───────────────────────────────────────────────
        let caption_splits: Option<(CaptionSplit, CaptionSplit)> = if cfg.needs_captions() {
            Some(load_split_pair(
                cfg.caption_data.as_deref(),
                cfg.caption_val_data.as_deref(),
                "caption",
                cfg.seed,
            )?)
        } else {
            None
        };
        let qa_splits: Option<(QaSplit, QaSplit)> = if cfg.needs_qa() {
            Some(load_split_pair(
                cfg.qa_data.as_deref(),
                cfg.qa_val_data.as_deref(),
                "qa",
                cfg.seed,
            )?)
        } else {
            None
        };

        // ── Step 2: Build / load tokenizer ────────────────────────────────────
        // The vocabulary is built over every text the model will
        // ever see in this run, so both tasks share one id space.
        let mut corpus = Vec::new();
        if let Some((train, val)) = &caption_splits {
            corpus.extend(train.records.iter().map(|r| r.caption.clone()));
            corpus.extend(val.records.iter().map(|r| r.caption.clone()));
        }
        if let Some((train, val)) = &qa_splits {
            for r in train.records.iter().chain(&val.records) {
                corpus.push(format!("{} {}", r.question, r.answer));
            }
        }
        let tok_store = TokenizerStore::new(&cfg.checkpoint_dir);
        let tokenizer = tok_store.load_or_build(&corpus, cfg.vocab_size)?;

        // ── Step 3: Build datasets per task ───────────────────────────────────
        let caption_data = caption_splits
            .map(|(train, val)| {
                anyhow::Ok(TaskData {
                    train: self.caption_dataset(&train, &tokenizer)?,
                    val:   self.caption_dataset(&val, &tokenizer)?,
                })
            })
            .transpose()?;
        let qa_data = qa_splits
            .map(|(train, val)| {
                anyhow::Ok(TaskData {
                    train: self.qa_dataset(&train, &tokenizer)?,
                    val:   self.qa_dataset(&val, &tokenizer)?,
                })
            })
            .transpose()?;

        // ── Step 4: Save config for generation ────────────────────────────────
        // The saved copy carries the tokenizer's actual size, not
        // the requested budget, so the rebuilt model always
        // matches the checkpoint.
        let mut saved_cfg = cfg.clone();
        saved_cfg.vocab_size = tokenizer.get_vocab_size(true);
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir, &cfg.model_name);
        ckpt_manager.save_config(&saved_cfg)?;

        // ── Step 5: Run training loop (Layer 5) ───────────────────────────────
        let metrics = MetricsLogger::new(&cfg.checkpoint_dir)?;
        run_training(&saved_cfg, caption_data, qa_data, ckpt_manager, metrics)?;

        Ok(())
    }

    fn caption_dataset(&self, split: &CaptionSplit, tokenizer: &Tokenizer) -> Result<PrefixDataset> {
        self.check_embedding_dim(split.embedding_dim())?;
        PrefixDataset::captioning(
            split,
            tokenizer,
            self.config.prefix_length,
            self.config.normalize_prefix,
        )
    }

    fn qa_dataset(&self, split: &QaSplit, tokenizer: &Tokenizer) -> Result<PrefixDataset> {
        self.check_embedding_dim(split.embedding_dim())?;
        PrefixDataset::question_answering(
            split,
            tokenizer,
            self.config.prefix_length,
            self.config.normalize_prefix,
            self.config.overflow,
            EOS_ID,
        )
    }

    fn check_embedding_dim(&self, dim: usize) -> Result<()> {
        anyhow::ensure!(
            dim == self.config.prefix_dim,
            "split carries {}-dimensional embeddings but --prefix-dim is {} \
             (use --resnet-features for 640-dimensional embeddings)",
            dim,
            self.config.prefix_dim
        );
        Ok(())
    }
}

fn load_split_pair<R>(
    train_path: Option<&str>,
    val_path:   Option<&str>,
    label:      &str,
    seed:       u64,
) -> Result<(SplitStorage<R>, SplitStorage<R>)>
where
    R: serde::de::DeserializeOwned + Clone,
{
    let train_path =
        train_path.with_context(|| format!("--{label}-data is required for this task"))?;
    let train = SplitStorage::load(train_path)?;
    match val_path {
        Some(path) => Ok((train, SplitStorage::load(path)?)),
        None => {
            // no dedicated validation file: hold out 10% of the
            // training records instead
            tracing::info!("No {label} validation split given, holding out 10% of training records");
            Ok(train.split_train_val(0.9, seed))
        }
    }
}
