// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Single-task and multi-task train + validation loops using
// Burn's DataLoader and AdamW.
//
// Backend split:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on the inner backend,
//     so the validation batcher is built on that backend too
//
// Prefix-only mode: the backward pass still covers the whole
// graph, but GradientsParams is collected from the mapper
// module alone — the optimizer never sees a language-model
// parameter id, so the LM weights stay frozen.
//
// Learning rate follows linear warmup then linear decay,
// recomputed per optimization step.

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{PrefixBatch, PrefixBatcher},
    dataset::PrefixDataset,
};
use crate::domain::policy::{RemainderPolicy, TrainTask};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    loss::{masked_cross_entropy, shifted_logits},
    model::CaptionModel,
    scheduler::{InterleavedSchedule, InterleavedStep, TaskLossMeter, TaskWeights},
};

type MyBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Train/validation split for one task.
pub struct TaskData {
    pub train: PrefixDataset,
    pub val:   PrefixDataset,
}

/// Linear warmup to `base`, then linear decay to zero at
/// `total` steps.
pub fn scheduled_lr(base: f64, step: usize, warmup: usize, total: usize) -> f64 {
    if warmup > 0 && step < warmup {
        return base * (step + 1) as f64 / warmup as f64;
    }
    if total > warmup {
        let remaining = total.saturating_sub(step) as f64;
        let span = (total - warmup) as f64;
        return base * (remaining / span).clamp(0.0, 1.0);
    }
    base
}

/// Next-token loss for one batch: forward, align logits with
/// the token sequence, average over mask-selected positions.
fn batch_loss<B: Backend>(model: &CaptionModel<B>, batch: PrefixBatch<B>) -> Tensor<B, 1> {
    let prefix_length = model.prefix_length;
    let logits = model.forward(
        batch.tokens.clone(),
        batch.visual,
        Some(batch.attention_mask),
    );
    let shifted = shifted_logits(logits, prefix_length);
    let [b, mask_len] = batch.loss_mask.dims();
    let token_mask = batch.loss_mask.slice([0..b, prefix_length..mask_len]);
    masked_cross_entropy(shifted, batch.tokens, token_mask)
}

pub fn run_training(
    cfg:          &TrainConfig,
    caption_data: Option<TaskData>,
    qa_data:      Option<TaskData>,
    ckpt_manager: CheckpointManager,
    metrics:      MetricsLogger,
) -> Result<()> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);

    match cfg.task {
        TrainTask::Captioning => {
            let data = caption_data.context("captioning task requires a caption split")?;
            single_task_loop::<MyBackend>(cfg, data, ckpt_manager, metrics, device)
        }
        TrainTask::Vqa => {
            let data = qa_data.context("vqa task requires a question-answer split")?;
            single_task_loop::<MyBackend>(cfg, data, ckpt_manager, metrics, device)
        }
        TrainTask::MultiTask => {
            let caption = caption_data.context("multi-task training requires a caption split")?;
            let qa = qa_data.context("multi-task training requires a question-answer split")?;
            multi_task_loop::<MyBackend>(cfg, caption, qa, ckpt_manager, metrics, device)
        }
    }
}

fn single_task_loop<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    data:         TaskData,
    ckpt_manager: CheckpointManager,
    metrics:      MetricsLogger,
    device:       B::Device,
) -> Result<()> {
    let mut model: CaptionModel<B> = cfg.model_config().init(&device);
    tracing::info!(
        "Model ready: {:?} mapper, prefix_length={}, only_prefix={}",
        cfg.mapping,
        cfg.prefix_length,
        cfg.only_prefix,
    );

    let mut optim = AdamWConfig::new().with_epsilon(1e-8).init();

    let batches_per_epoch = data.train.len().div_ceil(cfg.batch_size);
    let total_steps = batches_per_epoch * cfg.epochs;

    let train_loader = DataLoaderBuilder::new(PrefixBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(data.train);

    let val_loader = DataLoaderBuilder::new(PrefixBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .num_workers(1)
        .build(data.val);

    let mut best_val = f64::INFINITY;
    let mut global_step = 0usize;

    for epoch in 1..=cfg.epochs {
        let mut train_meter = TaskLossMeter::default();
        let mut last_lr = cfg.lr;

        for batch in train_loader.iter() {
            let lr = scheduled_lr(cfg.lr, global_step, cfg.warmup_steps, total_steps);
            last_lr = lr;

            let loss = batch_loss(&model, batch);
            train_meter.record(loss.clone().into_scalar().elem::<f64>());

            let grads = loss.backward();
            let grads = if model.only_prefix {
                GradientsParams::from_grads(grads, &model.mapper)
            } else {
                GradientsParams::from_grads(grads, &model)
            };
            model = optim.step(lr, model, grads);
            global_step += 1;
        }

        let model_valid = model.valid();
        let mut val_meter = TaskLossMeter::default();
        for batch in val_loader.iter() {
            let loss = batch_loss(&model_valid, batch);
            val_meter.record(loss.into_scalar().elem::<f64>());
        }

        let row = match cfg.task {
            TrainTask::Vqa => EpochMetrics::new(
                epoch, f64::NAN, train_meter.mean(), f64::NAN, val_meter.mean(), last_lr,
            ),
            _ => EpochMetrics::new(
                epoch, train_meter.mean(), f64::NAN, val_meter.mean(), f64::NAN, last_lr,
            ),
        };
        metrics.log(&row)?;

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | lr={:.2e}",
            epoch,
            cfg.epochs,
            train_meter.mean(),
            val_meter.mean(),
            last_lr,
        );

        if val_meter.mean() < best_val {
            best_val = val_meter.mean();
            ckpt_manager.save_best(&model)?;
            tracing::info!("New best validation loss {:.4} at epoch {}", best_val, epoch);
        }
        if epoch % cfg.save_every == 0 || epoch == cfg.epochs {
            ckpt_manager.save_epoch(&model, epoch)?;
        }
    }

    tracing::info!("Training complete");
    Ok(())
}

fn multi_task_loop<B: AutodiffBackend>(
    cfg:          &TrainConfig,
    caption:      TaskData,
    qa:           TaskData,
    ckpt_manager: CheckpointManager,
    metrics:      MetricsLogger,
    device:       B::Device,
) -> Result<()> {
    let mut model: CaptionModel<B> = cfg.model_config().init(&device);
    let weights = TaskWeights::new()
        .with_captioning(cfg.weight_captioning)
        .with_vqa(cfg.weight_vqa);
    tracing::info!(
        "Multi-task training: {:?} remainder policy, weights caption={} vqa={}",
        cfg.remainder,
        weights.captioning,
        weights.vqa,
    );

    let mut optim = AdamWConfig::new().with_epsilon(1e-8).init();

    let caption_batches = caption.train.len().div_ceil(cfg.batch_size);
    let qa_batches = qa.train.len().div_ceil(cfg.batch_size);
    let batches_per_epoch = match cfg.remainder {
        RemainderPolicy::StopAtShorter => caption_batches.min(qa_batches),
        RemainderPolicy::DrainLonger => caption_batches.max(qa_batches),
    };
    let total_steps = batches_per_epoch * cfg.epochs;

    let caption_loader = DataLoaderBuilder::new(PrefixBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(caption.train);
    let qa_loader = DataLoaderBuilder::new(PrefixBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .build(qa.train);

    let caption_val_loader =
        DataLoaderBuilder::new(PrefixBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .build(caption.val);
    let qa_val_loader =
        DataLoaderBuilder::new(PrefixBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .num_workers(1)
            .build(qa.val);

    let mut best_val = f64::INFINITY;
    let mut global_step = 0usize;

    for epoch in 1..=cfg.epochs {
        let mut caption_meter = TaskLossMeter::default();
        let mut qa_meter = TaskLossMeter::default();
        let mut last_lr = cfg.lr;

        let schedule =
            InterleavedSchedule::new(caption_loader.iter(), qa_loader.iter(), cfg.remainder);

        for step in schedule {
            let lr = scheduled_lr(cfg.lr, global_step, cfg.warmup_steps, total_steps);
            last_lr = lr;

            // one backward pass per scheduled step, whatever the
            // step carries
            let loss = match step {
                InterleavedStep::Pair(c, q) => {
                    let caption_loss = batch_loss(&model, c);
                    let qa_loss = batch_loss(&model, q);
                    caption_meter.record(caption_loss.clone().into_scalar().elem::<f64>());
                    qa_meter.record(qa_loss.clone().into_scalar().elem::<f64>());
                    weights.combine(caption_loss, qa_loss)
                }
                InterleavedStep::CaptionOnly(c) => {
                    let caption_loss = batch_loss(&model, c);
                    caption_meter.record(caption_loss.clone().into_scalar().elem::<f64>());
                    caption_loss.mul_scalar(weights.captioning)
                }
                InterleavedStep::VqaOnly(q) => {
                    let qa_loss = batch_loss(&model, q);
                    qa_meter.record(qa_loss.clone().into_scalar().elem::<f64>());
                    qa_loss.mul_scalar(weights.vqa)
                }
            };

            let grads = loss.backward();
            let grads = if model.only_prefix {
                GradientsParams::from_grads(grads, &model.mapper)
            } else {
                GradientsParams::from_grads(grads, &model)
            };
            model = optim.step(lr, model, grads);
            global_step += 1;
        }

        let model_valid = model.valid();
        let mut caption_val = TaskLossMeter::default();
        for batch in caption_val_loader.iter() {
            let loss = batch_loss(&model_valid, batch);
            caption_val.record(loss.into_scalar().elem::<f64>());
        }
        let mut qa_val = TaskLossMeter::default();
        for batch in qa_val_loader.iter() {
            let loss = batch_loss(&model_valid, batch);
            qa_val.record(loss.into_scalar().elem::<f64>());
        }

        metrics.log(&EpochMetrics::new(
            epoch,
            caption_meter.mean(),
            qa_meter.mean(),
            caption_val.mean(),
            qa_val.mean(),
            last_lr,
        ))?;

        println!(
            "Epoch {:>3}/{} | caption: train={:.4} val={:.4} | vqa: train={:.4} val={:.4} | lr={:.2e}",
            epoch,
            cfg.epochs,
            caption_meter.mean(),
            caption_val.mean(),
            qa_meter.mean(),
            qa_val.mean(),
            last_lr,
        );

        let combined_val = caption_val.mean() + qa_val.mean();
        if combined_val < best_val {
            best_val = combined_val;
            ckpt_manager.save_best(&model)?;
            tracing::info!(
                "New best combined validation loss {:.4} at epoch {}",
                best_val,
                epoch
            );
        }
        if epoch % cfg.save_every == 0 || epoch == cfg.epochs {
            ckpt_manager.save_epoch(&model, epoch)?;
        }
    }

    tracing::info!("Training complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lr_warmup_ramps_linearly() {
        let base = 2e-5;
        assert!((scheduled_lr(base, 0, 100, 1000) - base / 100.0).abs() < 1e-12);
        assert!((scheduled_lr(base, 49, 100, 1000) - base * 0.5).abs() < 1e-12);
        assert!((scheduled_lr(base, 99, 100, 1000) - base).abs() < 1e-12);
    }

    #[test]
    fn test_lr_decays_to_zero_at_total() {
        let base = 1e-4;
        let mid = scheduled_lr(base, 550, 100, 1000);
        assert!(mid < base && mid > 0.0);
        assert_eq!(scheduled_lr(base, 1000, 100, 1000), 0.0);
        // past total the rate stays clamped at zero
        assert_eq!(scheduled_lr(base, 2000, 100, 1000), 0.0);
    }

    #[test]
    fn test_lr_without_warmup_or_decay() {
        assert_eq!(scheduled_lr(3e-4, 5, 0, 0), 3e-4);
    }
}
