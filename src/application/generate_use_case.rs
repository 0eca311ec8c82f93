// ============================================================
// Layer 2 — GenerateUseCase
// ============================================================
// Loads a trained checkpoint and generates text for every
// record of a dataset split, writing predictions next to their
// ground truth as evaluation records.
//
// Context construction per task:
//   Captioning — the prefix embeddings alone seed generation
//   Vqa        — prefix plus the tokenized question; the answer
//                span and padding are hidden behind the
//                attention mask so the model continues from the
//                question
//
// Batches come off the loader unshuffled, so predictions stay
// index-aligned with the dataset metadata.

use anyhow::{bail, ensure, Result};
use burn::{data::dataloader::DataLoaderBuilder, prelude::*};
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::data::{
    batcher::{PrefixBatch, PrefixBatcher},
    dataset::PrefixDataset,
    storage::{CaptionSplit, QaSplit},
};
use crate::domain::{policy::TrainTask, records::EvaluationRecord};
use crate::infra::{
    checkpoint::CheckpointManager,
    evaluation::write_evaluation_records,
    tokenizer_store::{token_id, TokenizerStore, EOS_ID},
};
use crate::ml::{decoder::BatchDecoderConfig, model::CaptionModel};

type MyBackend = burn::backend::Wgpu;

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub data_path:      String,
    pub checkpoint_dir: String,
    pub task:           TrainTask,
    pub output_path:    String,
    pub batch_size:     usize,
    pub entry_length:   usize,
    pub temperature:    f64,
}

pub struct GenerateUseCase {
    config: GenerateConfig,
}

impl GenerateUseCase {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;
        ensure!(
            cfg.task != TrainTask::MultiTask,
            "generation runs one task at a time; pass captioning or vqa"
        );

        // ── Rebuild the trained model ─────────────────────────────────────────
        // the config file names the checkpoint files, so it is
        // read before the manager proper is built
        let train_cfg = CheckpointManager::new(&cfg.checkpoint_dir, "").load_config()?;
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir, &train_cfg.model_name);

        let device = burn::backend::wgpu::WgpuDevice::default();
        let model: CaptionModel<MyBackend> = train_cfg.model_config().init(&device);
        let model = ckpt.load_best(model, &device)?;

        let tokenizer = TokenizerStore::new(&cfg.checkpoint_dir).load()?;

        // ── Build the dataset for the requested split ─────────────────────────
        let dataset = match cfg.task {
            TrainTask::Captioning => {
                let split = CaptionSplit::load(&cfg.data_path)?;
                PrefixDataset::captioning(
                    &split,
                    &tokenizer,
                    train_cfg.prefix_length,
                    train_cfg.normalize_prefix,
                )?
            }
            TrainTask::Vqa => {
                let split = QaSplit::load(&cfg.data_path)?;
                PrefixDataset::question_answering(
                    &split,
                    &tokenizer,
                    train_cfg.prefix_length,
                    train_cfg.normalize_prefix,
                    train_cfg.overflow,
                    EOS_ID,
                )?
            }
            TrainTask::MultiTask => bail!("unreachable: multi-task rejected above"),
        };
        let meta = dataset.meta().to_vec();

        // the sentence terminator doubles as the stop token; a
        // vocabulary without "." falls back to end-of-text only
        let stop_id = token_id(&tokenizer, ".").unwrap_or(EOS_ID);
        let decoder = BatchDecoderConfig::new(stop_id, EOS_ID)
            .with_entry_length(cfg.entry_length)
            .with_temperature(cfg.temperature)
            .init();

        // ── Generate batch by batch, in dataset order ─────────────────────────
        let loader = DataLoaderBuilder::new(PrefixBatcher::<MyBackend>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .build(dataset);

        let mut predictions: Vec<String> = Vec::with_capacity(meta.len());
        for batch in loader.iter() {
            let texts = self.generate_batch(&model, batch, &decoder, &tokenizer)?;
            predictions.extend(texts);
        }

        // misalignment here would pair predictions with the
        // wrong ground truth
        ensure!(
            predictions.len() == meta.len(),
            "generated {} sequences for {} records",
            predictions.len(),
            meta.len()
        );

        let records: Vec<EvaluationRecord> = meta
            .iter()
            .zip(&predictions)
            .map(|(m, predicted)| EvaluationRecord {
                image_id:  m.image_id,
                question:  m.question.clone(),
                reference: m.reference.clone(),
                predicted: predicted.clone(),
            })
            .collect();

        let output = PathBuf::from(&cfg.output_path);
        write_evaluation_records(&output, &records, predictions.len())?;

        println!(
            "Generated {} sequences, records written to '{}'",
            records.len(),
            output.display()
        );
        Ok(())
    }

    fn generate_batch(
        &self,
        model:     &CaptionModel<MyBackend>,
        batch:     PrefixBatch<MyBackend>,
        decoder:   &crate::ml::decoder::BatchDecoder,
        tokenizer: &Tokenizer,
    ) -> Result<Vec<String>> {
        let prefix = model.prefix_embeds(batch.visual);
        let [batch_size, prefix_length, _] = prefix.dims();

        match self.config.task {
            TrainTask::Captioning => decoder.generate(&model.lm, prefix, None, tokenizer),
            TrainTask::Vqa => {
                // context covers the whole padded token block;
                // only prefix + question positions are visible
                let token_embeds = model.lm.embed_tokens(batch.tokens);
                let context = Tensor::cat(vec![prefix, token_embeds], 1);

                let [b, mask_len] = batch.attention_mask.dims();
                let question_mask = batch
                    .attention_mask
                    .slice([0..b, prefix_length..mask_len])
                    - batch.loss_mask.slice([0..b, prefix_length..mask_len]);
                let mask = Tensor::cat(
                    vec![
                        Tensor::<MyBackend, 2>::ones(
                            [batch_size, prefix_length],
                            &question_mask.device(),
                        ),
                        question_mask,
                    ],
                    1,
                );
                decoder.generate(&model.lm, context, Some(mask), tokenizer)
            }
            TrainTask::MultiTask => bail!("unreachable: multi-task rejected at entry"),
        }
    }
}
